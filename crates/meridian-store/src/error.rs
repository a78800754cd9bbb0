use meridian_core::{CoreError, ErrorCode};
use meridian_graph::GraphError;
use thiserror::Error;

/// Errors surfaced by the metadata store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid parameter {parameter} for {method}: {reason}")]
    InvalidParameter {
        parameter: String,
        method: &'static str,
        reason: String,
    },

    #[error("Mandatory property {property} missing from {instance}")]
    PropertyError { property: String, instance: String },

    #[error("Match criteria not recognized: {0}")]
    InvalidMatchCriteria(String),

    #[error("Instance already exists: {guid}")]
    AlreadyExists { guid: String },

    #[error("Entity not known: {guid}")]
    EntityNotKnown { guid: String },

    #[error("Relationship not known: {guid}")]
    RelationshipNotKnown { guid: String },

    #[error("Entity {guid} is only stored as a proxy")]
    EntityProxyOnly { guid: String },

    #[error("Relationship {guid} not created: entity {missing_end} is not stored")]
    RelationshipNotCreated { guid: String, missing_end: String },

    #[error("Entity {guid} has no classification {name}")]
    ClassificationNotKnown { guid: String, name: String },

    #[error("Type not known: {name}")]
    TypeNotKnown { name: String },

    #[error("Store belongs to metadata collection {stored}, opened by {requested}")]
    IdentityMismatch { stored: String, requested: String },

    #[error("Mapping failed for {guid} in {method}: {reason}")]
    Mapping {
        guid: String,
        method: &'static str,
        reason: String,
    },

    #[error("Index {index} not ready: {reason}")]
    IndexNotReady { index: String, reason: String },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// The catalog entry describing this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            Self::PropertyError { .. } => ErrorCode::PropertyError,
            Self::InvalidMatchCriteria(_) => ErrorCode::InvalidMatchCriteria,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::EntityNotKnown { .. } => ErrorCode::EntityNotKnown,
            Self::RelationshipNotKnown { .. } => ErrorCode::RelationshipNotKnown,
            Self::EntityProxyOnly { .. } => ErrorCode::EntityProxyOnly,
            Self::RelationshipNotCreated { .. } => ErrorCode::RelationshipNotCreated,
            Self::ClassificationNotKnown { .. } => ErrorCode::ClassificationNotKnown,
            Self::TypeNotKnown { .. } => ErrorCode::TypeNotKnown,
            Self::IdentityMismatch { .. } => ErrorCode::IdentityMismatch,
            Self::Mapping { .. } => ErrorCode::MappingError,
            Self::IndexNotReady { .. } => ErrorCode::IndexNotReady,
            Self::Graph(GraphError::ConstraintViolation { .. }) => ErrorCode::AlreadyExists,
            Self::Graph(_) => ErrorCode::RepositoryError,
        }
    }

    /// Operator-facing message built from the catalog template.
    pub fn message(&self) -> String {
        let code = self.code();
        match self {
            Self::InvalidParameter {
                parameter,
                method,
                reason,
            } => code.message(&[parameter.as_str(), *method, reason.as_str()]),
            Self::PropertyError { property, instance } => {
                code.message(&[property.as_str(), instance.as_str()])
            }
            Self::InvalidMatchCriteria(text) => code.message(&[text.as_str()]),
            Self::AlreadyExists { guid }
            | Self::EntityNotKnown { guid }
            | Self::RelationshipNotKnown { guid }
            | Self::EntityProxyOnly { guid } => code.message(&[guid.as_str()]),
            Self::RelationshipNotCreated { guid, missing_end } => {
                code.message(&[guid.as_str(), missing_end.as_str()])
            }
            Self::ClassificationNotKnown { guid, name } => {
                code.message(&[guid.as_str(), name.as_str()])
            }
            Self::TypeNotKnown { name } => code.message(&[name.as_str()]),
            Self::IdentityMismatch { stored, requested } => {
                code.message(&[stored.as_str(), requested.as_str()])
            }
            Self::Mapping {
                guid,
                method,
                reason,
            } => code.message(&[guid.as_str(), *method, reason.as_str()]),
            Self::IndexNotReady { index, reason } => {
                code.message(&[index.as_str(), reason.as_str()])
            }
            Self::Graph(GraphError::ConstraintViolation { value, .. }) => {
                code.message(&[value.trim_matches('"')])
            }
            Self::Graph(e) => code.message(&[e.to_string().as_str()]),
        }
    }

    pub(crate) fn mapping(guid: &str, method: &'static str, reason: impl ToString) -> Self {
        Self::Mapping {
            guid: guid.to_string(),
            method,
            reason: reason.to_string(),
        }
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TypeNotKnown { name } => Self::TypeNotKnown { name },
            CoreError::InvalidMatchCriteria(text) => Self::InvalidMatchCriteria(text),
            CoreError::Config(reason) => Self::InvalidParameter {
                parameter: "config".to_string(),
                method: "open",
                reason,
            },
            CoreError::Serialization(e) => Self::mapping("<unknown>", "serialization", e),
        }
    }
}
