//! Neo4j connection management and the Neo4j graph backend.
//!
//! The store API is synchronous, so the client owns a Tokio runtime and
//! drives the async driver with `block_on`. Element identity is the Neo4j
//! internal id; property maps cross the wire as JSON through APOC so every
//! scalar keeps its exact type.

use std::collections::BTreeSet;
use std::sync::Arc;

use neo4rs::{query, BoltType, ConfigBuilder, Graph, Query, Row, Txn};
use serde::Deserialize;
use tokio::runtime::Runtime;

use crate::backend::{
    EdgeRecord, ElementKind, GraphBackend, GraphError, GraphTransaction, IndexKind, IndexMapping,
    IndexSpec, IndexStatus, Result, SchemaAction, SchemaManagement, VertexRecord,
};
use crate::cypher::{self, ident};
use crate::filter::Filter;
use crate::value::{Direction, Element, ElementId, PropertyMap, ScalarType, Value};

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "meridian-dev".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
    runtime: Arc<Runtime>,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub fn connect(config: &GraphConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = runtime
            .block_on(Graph::connect(neo_config))
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self {
            graph,
            runtime: Arc::new(runtime),
        })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Execute a write-only query outside any transaction.
    pub fn run(&self, query: Query) -> Result<()> {
        self.runtime.block_on(self.graph.run(query))?;
        Ok(())
    }

    /// Execute a read query outside any transaction and collect all rows.
    pub fn query_rows(&self, query: Query) -> Result<Vec<Row>> {
        self.runtime.block_on(async {
            let mut stream = self.graph.execute(query).await?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await? {
                rows.push(row);
            }
            Ok(rows)
        })
    }

    fn count(&self, query: Query) -> Result<i64> {
        let rows = self.query_rows(query)?;
        rows.first().map_or(Ok(0), |row| get(row, "c"))
    }
}

impl GraphBackend for GraphClient {
    fn begin(&self) -> Result<Box<dyn GraphTransaction + '_>> {
        let txn = self.runtime.block_on(self.graph.start_txn())?;
        Ok(Box::new(Neo4jTransaction { client: self, txn }))
    }

    fn management(&self) -> Result<Box<dyn SchemaManagement + '_>> {
        Ok(Box::new(Neo4jManagement {
            client: self,
            statements: Vec::new(),
            pending_labels: BTreeSet::new(),
            pending_keys: BTreeSet::new(),
            pending_indexes: BTreeSet::new(),
        }))
    }

    fn name(&self) -> &'static str {
        "neo4j"
    }
}

fn get<T: serde::de::DeserializeOwned>(row: &Row, key: &str) -> Result<T> {
    row.get(key)
        .map_err(|e| GraphError::Serialization(format!("Failed to read column {key}: {e}")))
}

fn bolt(value: &Value) -> BoltType {
    match value {
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Float(f) => (*f).into(),
        Value::Str(s) => s.clone().into(),
    }
}

fn parse_props(json: &str) -> Result<PropertyMap> {
    serde_json::from_str(json).map_err(|e| GraphError::Serialization(e.to_string()))
}

const VERTEX_COLUMNS: &str =
    "id(n) AS id, head(labels(n)) AS label, apoc.convert.toJson(properties(n)) AS props";

const EDGE_COLUMNS: &str = "id(r) AS id, type(r) AS label, id(startNode(r)) AS out_id, \
     id(endNode(r)) AS in_id, apoc.convert.toJson(properties(r)) AS props";

fn vertex_from_row(row: &Row) -> Result<VertexRecord> {
    Ok(VertexRecord {
        id: ElementId(get(row, "id")?),
        label: get(row, "label")?,
        properties: parse_props(&get::<String>(row, "props")?)?,
    })
}

fn edge_from_row(row: &Row) -> Result<EdgeRecord> {
    Ok(EdgeRecord {
        id: ElementId(get(row, "id")?),
        label: get(row, "label")?,
        out_vertex: ElementId(get(row, "out_id")?),
        in_vertex: ElementId(get(row, "in_id")?),
        properties: parse_props(&get::<String>(row, "props")?)?,
    })
}

fn match_element(element: Element) -> (&'static str, ElementId) {
    match element {
        Element::Vertex(id) => ("MATCH (x) WHERE id(x) = $id", id),
        Element::Edge(id) => ("MATCH ()-[x]->() WHERE id(x) = $id", id),
    }
}

struct Neo4jTransaction<'g> {
    client: &'g GraphClient,
    txn: Txn,
}

impl Neo4jTransaction<'_> {
    fn rows(&mut self, q: Query) -> Result<Vec<Row>> {
        let txn = &mut self.txn;
        self.client.runtime.block_on(async {
            let mut stream = txn.execute(q).await?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next(txn.handle()).await? {
                rows.push(row);
            }
            Ok(rows)
        })
    }

    fn exec(&mut self, q: Query) -> Result<()> {
        self.client.runtime.block_on(self.txn.run(q))?;
        Ok(())
    }

    /// Run a query that must return the created or touched element id.
    fn single_id(&mut self, q: Query, missing: (&'static str, ElementId)) -> Result<ElementId> {
        let rows = self.rows(q)?;
        match rows.first() {
            Some(row) => Ok(ElementId(get(row, "id")?)),
            None => Err(GraphError::NotFound {
                kind: missing.0,
                id: missing.1,
            }),
        }
    }
}

impl GraphTransaction for Neo4jTransaction<'_> {
    fn add_vertex(&mut self, label: &str) -> Result<ElementId> {
        let q = query(&format!("CREATE (n:{}) RETURN id(n) AS id", ident(label)));
        self.single_id(q, ("vertex", ElementId(-1)))
    }

    fn add_edge(&mut self, label: &str, out: ElementId, into: ElementId) -> Result<ElementId> {
        let cypher = format!(
            "MATCH (a), (b) WHERE id(a) = $out AND id(b) = $in
             CREATE (a)-[r:{}]->(b) RETURN id(r) AS id",
            ident(label)
        );
        let q = query(&cypher).param("out", out.0).param("in", into.0);
        self.single_id(q, ("vertex", out))
    }

    fn vertex(&mut self, id: ElementId) -> Result<Option<VertexRecord>> {
        let q = query(&format!("MATCH (n) WHERE id(n) = $id RETURN {VERTEX_COLUMNS}"))
            .param("id", id.0);
        self.rows(q)?.first().map(vertex_from_row).transpose()
    }

    fn edge(&mut self, id: ElementId) -> Result<Option<EdgeRecord>> {
        let q = query(&format!(
            "MATCH ()-[r]->() WHERE id(r) = $id RETURN {EDGE_COLUMNS}"
        ))
        .param("id", id.0);
        self.rows(q)?.first().map(edge_from_row).transpose()
    }

    fn set_property(&mut self, element: Element, key: &str, value: Value) -> Result<()> {
        let (matcher, id) = match_element(element);
        let cypher = format!("{matcher} SET x.{} = $v RETURN id(x) AS id", ident(key));
        let q = query(&cypher).param("id", id.0).param("v", bolt(&value));
        self.single_id(q, (kind_of(element), id)).map(|_| ())
    }

    fn set_properties(&mut self, element: Element, props: &PropertyMap) -> Result<()> {
        let (matcher, id) = match_element(element);
        let json =
            serde_json::to_string(props).map_err(|e| GraphError::Serialization(e.to_string()))?;
        let cypher = format!("{matcher} SET x += apoc.convert.fromJsonMap($props) RETURN id(x) AS id");
        let q = query(&cypher).param("id", id.0).param("props", json);
        self.single_id(q, (kind_of(element), id)).map(|_| ())
    }

    fn remove_property(&mut self, element: Element, key: &str) -> Result<()> {
        let (matcher, id) = match_element(element);
        let cypher = format!("{matcher} REMOVE x.{}", ident(key));
        self.exec(query(&cypher).param("id", id.0))
    }

    fn remove_vertex(&mut self, id: ElementId) -> Result<()> {
        let q = query("MATCH (n) WHERE id(n) = $id DETACH DELETE n RETURN $id AS id")
            .param("id", id.0);
        self.single_id(q, ("vertex", id)).map(|_| ())
    }

    fn remove_edge(&mut self, id: ElementId) -> Result<()> {
        let q = query("MATCH ()-[r]->() WHERE id(r) = $id DELETE r RETURN $id AS id")
            .param("id", id.0);
        self.single_id(q, ("edge", id)).map(|_| ())
    }

    fn edges(
        &mut self,
        vertex: ElementId,
        direction: Direction,
        label: Option<&str>,
    ) -> Result<Vec<EdgeRecord>> {
        let rel = match label {
            Some(l) => format!("[r:{}]", ident(l)),
            None => "[r]".to_string(),
        };
        let pattern = match direction {
            Direction::Out => format!("(n)-{rel}->()"),
            Direction::In => format!("(n)<-{rel}-()"),
            Direction::Both => format!("(n)-{rel}-()"),
        };
        let cypher = format!(
            "MATCH {pattern} WHERE id(n) = $id
             WITH DISTINCT r RETURN {EDGE_COLUMNS} ORDER BY id"
        );
        let rows = self.rows(query(&cypher).param("id", vertex.0))?;
        rows.iter().map(edge_from_row).collect()
    }

    fn find_vertices(&mut self, label: &str, filter: &Filter) -> Result<Vec<VertexRecord>> {
        let rendered = cypher::render("n", filter);
        let cypher = format!(
            "MATCH (n:{}) WHERE {} RETURN {VERTEX_COLUMNS} ORDER BY id",
            ident(label),
            rendered.clause
        );
        let q = rendered
            .params
            .iter()
            .fold(query(&cypher), |q, (name, v)| q.param(name, bolt(v)));
        let rows = self.rows(q)?;
        rows.iter().map(vertex_from_row).collect()
    }

    fn find_edges(&mut self, label: &str, filter: &Filter) -> Result<Vec<EdgeRecord>> {
        let rendered = cypher::render("r", filter);
        let cypher = format!(
            "MATCH ()-[r:{}]->() WHERE {} RETURN {EDGE_COLUMNS} ORDER BY id",
            ident(label),
            rendered.clause
        );
        let q = rendered
            .params
            .iter()
            .fold(query(&cypher), |q, (name, v)| q.param(name, bolt(v)));
        let rows = self.rows(q)?;
        rows.iter().map(edge_from_row).collect()
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let Neo4jTransaction { client, txn } = *self;
        client.runtime.block_on(txn.commit())?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let Neo4jTransaction { client, txn } = *self;
        client.runtime.block_on(txn.rollback())?;
        Ok(())
    }
}

fn kind_of(element: Element) -> &'static str {
    match element {
        Element::Vertex(_) => "vertex",
        Element::Edge(_) => "edge",
    }
}

/// Schema changes are queued and applied as individual DDL statements on commit.
///
/// Neo4j creates labels and property keys implicitly, so those calls only
/// record intent for the lifetime of the management transaction.
struct Neo4jManagement<'g> {
    client: &'g GraphClient,
    statements: Vec<String>,
    pending_labels: BTreeSet<String>,
    pending_keys: BTreeSet<String>,
    pending_indexes: BTreeSet<String>,
}

impl Neo4jManagement<'_> {
    fn label_exists(&mut self, procedure: &str, column: &str, name: &str) -> Result<bool> {
        if self.pending_labels.contains(name) {
            return Ok(true);
        }
        let cypher =
            format!("CALL {procedure}() YIELD {column} WHERE {column} = $name RETURN count(*) AS c");
        Ok(self.client.count(query(&cypher).param("name", name))? > 0)
    }
}

fn index_ddl(spec: &IndexSpec) -> String {
    let name = ident(&spec.name);
    let label = ident(&spec.label);
    let key = ident(&spec.key);
    let target = match spec.element {
        ElementKind::Vertex => format!("(x:{label})"),
        ElementKind::Edge => format!("()-[x:{label}]-()"),
    };
    match spec.kind {
        IndexKind::Composite { unique: true } => {
            format!("CREATE CONSTRAINT {name} IF NOT EXISTS FOR {target} REQUIRE x.{key} IS UNIQUE")
        }
        IndexKind::Composite { unique: false } | IndexKind::Mixed(IndexMapping::String) => {
            format!("CREATE RANGE INDEX {name} IF NOT EXISTS FOR {target} ON (x.{key})")
        }
        IndexKind::Mixed(IndexMapping::Text) => {
            format!("CREATE TEXT INDEX {name} IF NOT EXISTS FOR {target} ON (x.{key})")
        }
    }
}

fn status_from_state(state: &str) -> IndexStatus {
    match state {
        "ONLINE" => IndexStatus::Enabled,
        "POPULATING" => IndexStatus::Registered,
        "FAILED" => IndexStatus::Disabled,
        _ => IndexStatus::Installed,
    }
}

impl SchemaManagement for Neo4jManagement<'_> {
    fn contains_vertex_label(&mut self, label: &str) -> Result<bool> {
        self.label_exists("db.labels", "label", label)
    }

    fn make_vertex_label(&mut self, label: &str) -> Result<()> {
        self.pending_labels.insert(label.to_string());
        Ok(())
    }

    fn contains_edge_label(&mut self, label: &str) -> Result<bool> {
        self.label_exists("db.relationshipTypes", "relationshipType", label)
    }

    fn make_edge_label(&mut self, label: &str) -> Result<()> {
        self.pending_labels.insert(label.to_string());
        Ok(())
    }

    fn contains_property_key(&mut self, key: &str) -> Result<bool> {
        if self.pending_keys.contains(key) {
            return Ok(true);
        }
        let q = query(
            "CALL db.propertyKeys() YIELD propertyKey WHERE propertyKey = $key RETURN count(*) AS c",
        )
        .param("key", key);
        Ok(self.client.count(q)? > 0)
    }

    fn make_property_key(&mut self, key: &str, _scalar: ScalarType) -> Result<()> {
        self.pending_keys.insert(key.to_string());
        Ok(())
    }

    fn contains_index(&mut self, name: &str) -> Result<bool> {
        if self.pending_indexes.contains(name) {
            return Ok(true);
        }
        let q = query("SHOW INDEXES YIELD name WHERE name = $name RETURN count(*) AS c")
            .param("name", name);
        Ok(self.client.count(q)? > 0)
    }

    fn build_index(&mut self, spec: &IndexSpec) -> Result<()> {
        self.statements.push(index_ddl(spec));
        self.pending_indexes.insert(spec.name.clone());
        Ok(())
    }

    fn index_status(&mut self, name: &str) -> Result<Option<IndexStatus>> {
        if self.pending_indexes.contains(name) {
            return Ok(Some(IndexStatus::Installed));
        }
        let q = query("SHOW INDEXES YIELD name, state WHERE name = $name RETURN state")
            .param("name", name);
        let rows = self.client.query_rows(q)?;
        rows.first()
            .map(|row| get::<String>(row, "state").map(|s| status_from_state(&s)))
            .transpose()
    }

    fn update_index(&mut self, name: &str, action: SchemaAction) -> Result<()> {
        // Neo4j populates and enables indexes on its own.
        tracing::debug!(index = name, ?action, "index action left to Neo4j");
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        for statement in &self.statements {
            tracing::debug!(%statement, "applying schema statement");
            self.client.run(query(statement))?;
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
