//! A labelled property graph served on a loopback listener.
//!
//! Documents are stored as nodes. Every JSON object becomes a node labelled
//! with its collection (or, for nested objects, the field that held it).
//! Scalar fields become node properties; nested objects become child nodes
//! reached through an edge named after the field.

use super::{Database, DatabaseCore, DocumentDatabase, State};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::loader::LoaderRegistry;
use crate::logger::Logger;
use crate::registry::RegisteredBackend;
use crate::server::{self, json_object, Credentials, RequestHandler, ServerHandle, SHUTDOWN_TIMEOUT};
use crate::source::Source;
use async_trait::async_trait;
use jzon::object::Object;
use jzon::JsonValue;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Port the listener uses unless configured otherwise.
pub const DEFAULT_PORT: u16 = 7474;

/// A graph node: a label plus scalar properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub label: String,
    pub properties: Object,
}

/// Thread-safe node/edge storage.
#[derive(Debug, Default)]
pub struct GraphStore {
    graph: Mutex<Graph<Node, String, Directed>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a JSON object as a node tree and return the root node.
    pub fn insert_object(&self, label: &str, object: &Object) -> NodeIndex {
        add_object(&mut self.lock(), label, object)
    }

    pub fn node_count(&self) -> usize {
        self.lock().node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.lock().edge_count()
    }

    /// Number of nodes carrying `label`.
    pub fn count(&self, label: &str) -> usize {
        self.lock()
            .node_weights()
            .filter(|node| node.label == label)
            .count()
    }

    /// Properties of every node carrying `label`, in insertion order.
    pub fn nodes(&self, label: &str) -> Vec<Object> {
        self.lock()
            .node_weights()
            .filter(|node| node.label == label)
            .map(|node| node.properties.clone())
            .collect()
    }

    /// Names of the edges leaving `node`, with the label of their targets.
    pub fn relationships(&self, node: NodeIndex) -> Vec<(String, String)> {
        let graph = self.lock();
        let mut out: Vec<_> = graph
            .edges(node)
            .map(|edge| (edge.weight().clone(), graph[edge.target()].label.clone()))
            .collect();
        // petgraph walks edges newest first.
        out.reverse();
        out
    }

    fn lock(&self) -> MutexGuard<'_, Graph<Node, String, Directed>> {
        self.graph
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn add_object(graph: &mut Graph<Node, String, Directed>, label: &str, object: &Object) -> NodeIndex {
    let node = graph.add_node(Node {
        label: label.to_string(),
        properties: Object::new(),
    });

    for (key, value) in object.iter() {
        match value {
            JsonValue::Object(child) => {
                let child = add_object(graph, key, child);
                graph.add_edge(node, child, key.to_string());
            }
            JsonValue::Array(items) if items.iter().any(JsonValue::is_object) => {
                let mut scalars = Vec::new();
                for item in items {
                    match item {
                        JsonValue::Object(child) => {
                            let child = add_object(graph, key, child);
                            graph.add_edge(node, child, key.to_string());
                        }
                        other => scalars.push(other.clone()),
                    }
                }
                if !scalars.is_empty() {
                    graph[node].properties.insert(key, JsonValue::Array(scalars));
                }
            }
            scalar => graph[node].properties.insert(key, scalar.clone()),
        }
    }
    node
}

/// A graph database handle.
pub struct GraphDatabase {
    core: DatabaseCore,
    store: Option<Arc<GraphStore>>,
    server: Option<ServerHandle>,
}

impl GraphDatabase {
    pub fn new() -> Self {
        Self::from_core(DatabaseCore::new(LoaderRegistry::documents()))
    }

    pub fn with_config(config: DatabaseConfig) -> Self {
        Self::from_core(DatabaseCore::with_config(config, LoaderRegistry::documents()))
    }

    fn from_core(core: DatabaseCore) -> Self {
        Self {
            core,
            store: None,
            server: None,
        }
    }

    /// The running graph, shared with the listener.
    pub fn store(&self) -> Option<Arc<GraphStore>> {
        self.store.clone()
    }
}

impl Default for GraphDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GraphDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDatabase")
            .field("name", &self.core.name())
            .field("state", &self.core.state())
            .finish()
    }
}

#[async_trait]
impl Database for GraphDatabase {
    fn kind(&self) -> &'static str {
        "graph"
    }

    fn config(&self) -> &DatabaseConfig {
        self.core.config()
    }

    fn state(&self) -> State {
        self.core.state()
    }

    fn configure(&mut self, key: &str, value: &str, logger: &dyn Logger) -> bool {
        self.core.configure(key, value, logger)
    }

    async fn start(&mut self, logger: &dyn Logger) {
        if !self.core.begin_start(logger) {
            return;
        }
        let store = Arc::new(GraphStore::new());
        let config = self.core.config();
        let addr = server::loopback(config.effective_port(DEFAULT_PORT));
        let handler = GraphRequestHandler {
            store: store.clone(),
        };
        match server::serve(addr, Credentials::from_config(config), Arc::new(handler)).await {
            Ok(handle) => {
                self.server = Some(handle);
                self.store = Some(store);
                self.core.finish_start(logger);
            }
            Err(e) => self.core.start_failed(logger, e),
        }
    }

    async fn stop(&mut self, logger: &dyn Logger) {
        if !self.core.begin_stop() {
            return;
        }
        if let Some(server) = self.server.take() {
            if let Err(e) = server.shutdown(SHUTDOWN_TIMEOUT).await {
                self.core.stop_failed(logger, e);
            }
        }
        self.store = None;
        self.core.finish_stop(logger);
    }

    async fn load(&self, logger: &dyn Logger, source: Option<&Source>) {
        self.core.loaders().load(self, logger, source).await
    }

    fn loaders(&self) -> &LoaderRegistry {
        self.core.loaders()
    }

    fn loaders_mut(&mut self) -> &mut LoaderRegistry {
        self.core.loaders_mut()
    }

    fn listen_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerHandle::local_addr)
    }

    fn as_documents(&self) -> Option<&dyn DocumentDatabase> {
        Some(self)
    }
}

impl DocumentDatabase for GraphDatabase {
    fn insert_document(&self, collection: &str, document: JsonValue) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::NotStarted(self.core.name().to_string()))?;
        match &document {
            JsonValue::Object(object) => {
                store.insert_object(collection, object);
                Ok(())
            }
            _ => Err(Error::Unsupported {
                database: self.core.name().to_string(),
                capability: "documents that are not JSON objects",
            }),
        }
    }
}

struct GraphRequestHandler {
    store: Arc<GraphStore>,
}

impl RequestHandler for GraphRequestHandler {
    fn handle(&self, request: &str) -> String {
        let command = match jzon::parse(request) {
            Ok(command) => command,
            Err(e) => return json_object([("ok", 0.into()), ("error", e.to_string().into())]).dump(),
        };
        let reply = if let Some(label) = command["count"].as_str() {
            json_object([("ok", 1.into()), ("n", self.store.count(label).into())])
        } else if let Some(label) = command["nodes"].as_str() {
            let nodes = self
                .store
                .nodes(label)
                .into_iter()
                .map(JsonValue::Object)
                .collect();
            json_object([("ok", 1.into()), ("nodes", JsonValue::Array(nodes))])
        } else {
            json_object([("ok", 0.into()), ("error", "unknown command".into())])
        };
        reply.dump()
    }
}

fn create_graph() -> Box<dyn Database> {
    Box::new(GraphDatabase::new())
}

inventory::submit! { RegisteredBackend { name: "graph", create: create_graph } }
