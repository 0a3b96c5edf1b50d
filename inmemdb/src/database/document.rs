//! An in-process document store, embedded or behind a loopback listener.

use super::{Database, DatabaseCore, DocumentDatabase, State};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::loader::LoaderRegistry;
use crate::logger::Logger;
use crate::registry::RegisteredBackend;
use crate::server::{self, json_object, Credentials, RequestHandler, ServerHandle, SHUTDOWN_TIMEOUT};
use crate::source::Source;
use async_trait::async_trait;
use jzon::JsonValue;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Port the served variant listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 27017;

/// Named collections of JSON documents, in insertion order.
#[derive(Debug, Default)]
pub struct DocumentStore {
    collections: Mutex<BTreeMap<String, Vec<JsonValue>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, document: JsonValue) {
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    /// Every document in a collection. Unknown collections are empty.
    pub fn find(&self, collection: &str) -> Vec<JsonValue> {
        self.lock().get(collection).cloned().unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.lock().get(collection).map_or(0, Vec::len)
    }

    /// Remove a collection. Returns whether it existed.
    pub fn drop_collection(&self, collection: &str) -> bool {
        self.lock().remove(collection).is_some()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<JsonValue>>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A document database handle.
pub struct MemoryDocumentDatabase {
    core: DatabaseCore,
    served: bool,
    store: Option<Arc<DocumentStore>>,
    server: Option<ServerHandle>,
}

impl MemoryDocumentDatabase {
    /// An unconfigured handle. `served` adds a listener.
    pub fn new(served: bool) -> Self {
        Self::from_core(served, DatabaseCore::new(LoaderRegistry::documents()))
    }

    pub fn with_config(served: bool, config: DatabaseConfig) -> Self {
        Self::from_core(served, DatabaseCore::with_config(config, LoaderRegistry::documents()))
    }

    fn from_core(served: bool, core: DatabaseCore) -> Self {
        Self {
            core,
            served,
            store: None,
            server: None,
        }
    }

    /// The running store, shared with any listener.
    pub fn store(&self) -> Option<Arc<DocumentStore>> {
        self.store.clone()
    }
}

impl std::fmt::Debug for MemoryDocumentDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDocumentDatabase")
            .field("name", &self.core.name())
            .field("served", &self.served)
            .field("state", &self.core.state())
            .finish()
    }
}

#[async_trait]
impl Database for MemoryDocumentDatabase {
    fn kind(&self) -> &'static str {
        if self.served {
            "document-server"
        } else {
            "documents"
        }
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
        let store = Arc::new(DocumentStore::new());
        if self.served {
            let config = self.core.config();
            let addr = server::loopback(config.effective_port(DEFAULT_PORT));
            let handler = DocumentRequestHandler {
                store: store.clone(),
            };
            match server::serve(addr, Credentials::from_config(config), Arc::new(handler)).await {
                Ok(handle) => self.server = Some(handle),
                Err(e) => {
                    self.core.start_failed(logger, e);
                    return;
                }
            }
        }
        self.store = Some(store);
        self.core.finish_start(logger);
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

impl DocumentDatabase for MemoryDocumentDatabase {
    fn insert_document(&self, collection: &str, document: JsonValue) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::NotStarted(self.core.name().to_string()))?;
        store.insert(collection, document);
        Ok(())
    }
}

/// Answers JSON commands against a shared store.
struct DocumentRequestHandler {
    store: Arc<DocumentStore>,
}

impl DocumentRequestHandler {
    fn execute(&self, mut command: JsonValue) -> std::result::Result<JsonValue, String> {
        if let Some(collection) = command["insert"].as_str().map(str::to_string) {
            let document = command.remove("document");
            if document.is_null() {
                return Err("insert requires a document".to_string());
            }
            self.store.insert(&collection, document);
            return Ok(json_object([("ok", 1.into()), ("n", 1.into())]));
        }
        if let Some(collection) = command["find"].as_str() {
            let documents = self.store.find(collection);
            return Ok(json_object([
                ("ok", 1.into()),
                ("documents", JsonValue::Array(documents)),
            ]));
        }
        if let Some(collection) = command["count"].as_str() {
            let n = self.store.count(collection);
            return Ok(json_object([("ok", 1.into()), ("n", n.into())]));
        }
        if let Some(collection) = command["drop"].as_str() {
            let dropped = self.store.drop_collection(collection);
            return Ok(json_object([("ok", 1.into()), ("dropped", dropped.into())]));
        }
        Err("unknown command".to_string())
    }
}

impl RequestHandler for DocumentRequestHandler {
    fn handle(&self, request: &str) -> String {
        let result = jzon::parse(request)
            .map_err(|e| e.to_string())
            .and_then(|command| self.execute(command));
        match result {
            Ok(reply) => reply.dump(),
            Err(message) => json_object([("ok", 0.into()), ("error", message.into())]).dump(),
        }
    }
}

fn create_embedded() -> Box<dyn Database> {
    Box::new(MemoryDocumentDatabase::new(false))
}

fn create_served() -> Box<dyn Database> {
    Box::new(MemoryDocumentDatabase::new(true))
}

inventory::submit! { RegisteredBackend { name: "documents", create: create_embedded } }
inventory::submit! { RegisteredBackend { name: "document-server", create: create_served } }
