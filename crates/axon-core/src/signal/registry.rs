//! Topic registry: logical topic name <-> wire type string <-> payload schema.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::error::{SignalError, SignalResult};
use super::schema::{JsonMap, PayloadSchema};
use crate::domain::Domain;

/// A named, schema-typed pub/sub channel. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub wire_type: String,
    #[serde(default)]
    pub schema: PayloadSchema,
}

impl Topic {
    pub fn new(name: impl Into<String>, wire_type: impl Into<String>, schema: PayloadSchema) -> Self {
        Self {
            name: name.into(),
            wire_type: wire_type.into(),
            schema,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StaticTopics {
    #[serde(default)]
    topics: Vec<Topic>,
}

#[derive(Default)]
struct Tables {
    topics: BTreeMap<String, Topic>,
    by_wire_type: HashMap<String, String>,
}

/// Process-wide topic table. All mutation goes through `register`/`unregister`.
#[derive(Default)]
pub struct TopicRegistry {
    tables: RwLock<Tables>,
}

impl std::fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topics", &self.read().topics.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a topic. Names and wire types must both be unique.
    pub fn register(&self, topic: Topic) -> SignalResult<()> {
        let mut tables = self.write();
        if tables.topics.contains_key(&topic.name) {
            return Err(SignalError::AlreadyRegistered { topic: topic.name });
        }
        if let Some(owner) = tables.by_wire_type.get(&topic.wire_type) {
            return Err(SignalError::WireTypeTaken {
                wire_type: topic.wire_type,
                topic: owner.clone(),
            });
        }
        debug!(topic = %topic.name, wire_type = %topic.wire_type, "Registered topic");
        tables
            .by_wire_type
            .insert(topic.wire_type.clone(), topic.name.clone());
        tables.topics.insert(topic.name.clone(), topic);
        Ok(())
    }

    pub fn get(&self, name: &str) -> SignalResult<Topic> {
        self.read()
            .topics
            .get(name)
            .cloned()
            .ok_or_else(|| SignalError::UnknownTopic {
                topic: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().topics.contains_key(name)
    }

    /// All topics, sorted by name.
    pub fn list(&self) -> Vec<Topic> {
        self.read().topics.values().cloned().collect()
    }

    /// Wire type of a topic that is known to exist.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not registered. Asking for an unregistered topic's
    /// wire type is a wiring bug; use [`get`](Self::get) for fallible lookups.
    pub fn type_of(&self, name: &str) -> String {
        let wire_type = self.read().topics.get(name).map(|t| t.wire_type.clone());
        match wire_type {
            Some(wire_type) => wire_type,
            None => panic!("type_of called for unregistered topic '{name}'"),
        }
    }

    pub fn topic_from_type(&self, wire_type: &str) -> SignalResult<Topic> {
        let tables = self.read();
        tables
            .by_wire_type
            .get(wire_type)
            .and_then(|name| tables.topics.get(name))
            .cloned()
            .ok_or_else(|| SignalError::UnknownWireType {
                wire_type: wire_type.to_string(),
            })
    }

    /// Validate `payload` against the topic's schema, returning the coerced object.
    pub fn validate(&self, name: &str, payload: &Value) -> SignalResult<JsonMap> {
        let topic = self.get(name)?;
        Ok(topic.schema.validate(&topic.name, payload)?)
    }

    /// Remove a topic. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut tables = self.write();
        match tables.topics.remove(name) {
            Some(topic) => {
                tables.by_wire_type.remove(&topic.wire_type);
                debug!(topic = %name, "Unregistered topic");
                true
            }
            None => false,
        }
    }

    /// Register every topic, stopping at the first conflict.
    pub fn load_topics(&self, topics: impl IntoIterator<Item = Topic>) -> SignalResult<usize> {
        let mut count = 0;
        for topic in topics {
            self.register(topic)?;
            count += 1;
        }
        Ok(count)
    }

    /// Bulk-load topics from a JSON (`{"topics": [...]}`) or TOML (`[[topics]]`) file.
    pub fn load_static(&self, path: &Path) -> SignalResult<usize> {
        let fail = |reason: String| SignalError::StaticConfig {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let parsed: StaticTopics = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(|e| fail(e.to_string()))?,
            _ => serde_json::from_str(&raw).map_err(|e| fail(e.to_string()))?,
        };
        let count = self.load_topics(parsed.topics)?;
        info!(path = %path.display(), count, "Loaded static topics");
        Ok(count)
    }

    /// Register the topics a domain bundle declares.
    pub fn register_domain(&self, domain: &dyn Domain) -> SignalResult<usize> {
        let count = self.load_topics(domain.topics())?;
        info!(domain = %domain.name(), count, "Registered domain topics");
        Ok(count)
    }
}
