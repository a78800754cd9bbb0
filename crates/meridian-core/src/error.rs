use thiserror::Error;

/// Errors raised by the shared model (type resolution, configuration).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Type not known: {name}")]
    TypeNotKnown { name: String },

    #[error("Match criteria not recognized: {0}")]
    InvalidMatchCriteria(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable catalog of operator-facing error descriptions.
///
/// Every store failure maps to exactly one entry. Identifiers and templates
/// are part of the public contract and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidParameter,
    PropertyError,
    InvalidMatchCriteria,
    AlreadyExists,
    EntityNotKnown,
    RelationshipNotKnown,
    EntityProxyOnly,
    RelationshipNotCreated,
    ClassificationNotKnown,
    TypeNotKnown,
    IdentityMismatch,
    MappingError,
    IndexNotReady,
    RepositoryError,
}

impl ErrorCode {
    pub fn id(self) -> &'static str {
        match self {
            Self::InvalidParameter => "MERIDIAN-STORE-400-001",
            Self::PropertyError => "MERIDIAN-STORE-400-002",
            Self::InvalidMatchCriteria => "MERIDIAN-STORE-400-003",
            Self::AlreadyExists => "MERIDIAN-STORE-409-001",
            Self::EntityNotKnown => "MERIDIAN-STORE-404-001",
            Self::RelationshipNotKnown => "MERIDIAN-STORE-404-002",
            Self::EntityProxyOnly => "MERIDIAN-STORE-404-003",
            Self::RelationshipNotCreated => "MERIDIAN-STORE-400-004",
            Self::ClassificationNotKnown => "MERIDIAN-STORE-404-004",
            Self::TypeNotKnown => "MERIDIAN-STORE-500-001",
            Self::IdentityMismatch => "MERIDIAN-STORE-500-002",
            Self::MappingError => "MERIDIAN-STORE-500-003",
            Self::IndexNotReady => "MERIDIAN-STORE-503-001",
            Self::RepositoryError => "MERIDIAN-STORE-500-004",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidParameter
            | Self::PropertyError
            | Self::InvalidMatchCriteria
            | Self::RelationshipNotCreated => 400,
            Self::EntityNotKnown
            | Self::RelationshipNotKnown
            | Self::EntityProxyOnly
            | Self::ClassificationNotKnown => 404,
            Self::AlreadyExists => 409,
            Self::IndexNotReady => 503,
            Self::TypeNotKnown
            | Self::IdentityMismatch
            | Self::MappingError
            | Self::RepositoryError => 500,
        }
    }

    /// Message template; `{0}`, `{1}`, ... are positional parameters.
    pub fn message_template(self) -> &'static str {
        match self {
            Self::InvalidParameter => "The parameter {0} passed to method {1} is not valid: {2}",
            Self::PropertyError => "Mandatory property {0} is missing from instance {1}",
            Self::InvalidMatchCriteria => "The match criteria {0} is not recognized",
            Self::AlreadyExists => "An instance with guid {0} already exists in the store",
            Self::EntityNotKnown => "No entity with guid {0} is stored",
            Self::RelationshipNotKnown => "No relationship with guid {0} is stored",
            Self::EntityProxyOnly => "Entity {0} is only held as a proxy; its detail is not available",
            Self::RelationshipNotCreated => {
                "Relationship {0} could not be created because entity {1} is not stored"
            }
            Self::ClassificationNotKnown => "Entity {0} has no classification named {1}",
            Self::TypeNotKnown => "Type {0} referenced by stored data is not known to the registry",
            Self::IdentityMismatch => {
                "The store belongs to metadata collection {0} but was opened by {1}"
            }
            Self::MappingError => "Instance {0} could not be mapped during {1}: {2}",
            Self::IndexNotReady => "Index {0} did not become enabled: {1}",
            Self::RepositoryError => "The graph backend reported an error: {0}",
        }
    }

    pub fn system_action(self) -> &'static str {
        match self {
            Self::InvalidParameter
            | Self::PropertyError
            | Self::InvalidMatchCriteria
            | Self::RelationshipNotCreated => "The request was rejected before any change was made.",
            Self::AlreadyExists => "The request was rejected; the existing instance is unchanged.",
            Self::EntityNotKnown
            | Self::RelationshipNotKnown
            | Self::EntityProxyOnly
            | Self::ClassificationNotKnown => "The request returned no result.",
            Self::TypeNotKnown => "The operation was aborted and its transaction rolled back.",
            Self::IdentityMismatch => "The store was not opened and no change was made.",
            Self::MappingError => "The operation was aborted and its transaction rolled back.",
            Self::IndexNotReady => "The index management transaction was rolled back.",
            Self::RepositoryError => "The operation was aborted and its transaction rolled back.",
        }
    }

    pub fn user_action(self) -> &'static str {
        match self {
            Self::InvalidParameter | Self::PropertyError => {
                "Correct the request and retry."
            }
            Self::InvalidMatchCriteria => "Use one of ALL, ANY or NONE.",
            Self::AlreadyExists => "Update the existing instance instead of creating it again.",
            Self::EntityNotKnown | Self::RelationshipNotKnown => {
                "Check the guid; the instance may have been removed."
            }
            Self::EntityProxyOnly => "Retrieve the entity from its home metadata collection.",
            Self::RelationshipNotCreated => "Store both entities (or their proxies) first.",
            Self::ClassificationNotKnown => "Classify the entity before updating or removing the classification.",
            Self::TypeNotKnown => {
                "Ensure the type registry holds every type used by stored instances."
            }
            Self::IdentityMismatch => {
                "Configure the metadata collection id that created this store."
            }
            Self::MappingError => "Inspect the stored instance; it may have been written by an incompatible version.",
            Self::IndexNotReady => "Retry once the backend has finished index construction.",
            Self::RepositoryError => "Check the backend logs and connectivity.",
        }
    }

    /// Fill the message template with positional parameters.
    pub fn message(self, params: &[&str]) -> String {
        let mut out = self.message_template().to_string();
        for (i, p) in params.iter().enumerate() {
            out = out.replace(&format!("{{{i}}}"), p);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_fills_positional_parameters() {
        let msg = ErrorCode::IdentityMismatch.message(&["c-1", "c-2"]);
        assert_eq!(
            msg,
            "The store belongs to metadata collection c-1 but was opened by c-2"
        );
    }

    #[test]
    fn codes_are_unique() {
        let all = [
            ErrorCode::InvalidParameter,
            ErrorCode::PropertyError,
            ErrorCode::InvalidMatchCriteria,
            ErrorCode::AlreadyExists,
            ErrorCode::EntityNotKnown,
            ErrorCode::RelationshipNotKnown,
            ErrorCode::EntityProxyOnly,
            ErrorCode::RelationshipNotCreated,
            ErrorCode::ClassificationNotKnown,
            ErrorCode::TypeNotKnown,
            ErrorCode::IdentityMismatch,
            ErrorCode::MappingError,
            ErrorCode::IndexNotReady,
            ErrorCode::RepositoryError,
        ];
        let ids: std::collections::HashSet<_> = all.iter().map(|c| c.id()).collect();
        assert_eq!(ids.len(), all.len());
        assert_eq!(ErrorCode::EntityProxyOnly.http_status(), 404);
    }
}
