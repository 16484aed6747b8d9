//! Type-name → constructor registry (spec §4.1).

use super::{Node, NodeFactory, NodeMeta};
use crate::error::{ProxyError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    meta: NodeMeta,
    factory: NodeFactory,
}

/// A named construct passed to the engine at construction time rather than
/// an implicit global (spec §9, "Global mutable state"), so tests can build
/// independent engines with independent registries.
#[derive(Default)]
pub struct NodeRegistry {
    // Preserves registration order for `list()`.
    order: Vec<String>,
    entries: HashMap<String, Entry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, meta: NodeMeta, factory: F) -> Result<()>
    where
        F: Fn(Value) -> Box<dyn Node> + Send + Sync + 'static,
    {
        let name = meta.name.to_string();
        if self.entries.contains_key(&name) {
            return Err(ProxyError::TypeAlreadyRegistered(name));
        }
        self.order.push(name.clone());
        self.entries.insert(
            name,
            Entry {
                meta,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) {
        self.entries.remove(name);
        self.order.retain(|n| n != name);
    }

    pub fn create(&self, name: &str, config: Value) -> Result<Box<dyn Node>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ProxyError::TypeNotRegistered(name.to_string()))?;
        Ok((entry.factory)(config))
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn list(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn list_by_category(&self, category: super::NodeCategory) -> Vec<&str> {
        self.order
            .iter()
            .filter(|n| {
                self.entries
                    .get(*n)
                    .map(|e| std::mem::discriminant(&e.meta.category) == std::mem::discriminant(&category))
                    .unwrap_or(false)
            })
            .map(String::as_str)
            .collect()
    }

    pub fn get_meta(&self, name: &str) -> Option<&NodeMeta> {
        self.entries.get(name).map(|e| &e.meta)
    }

    pub fn get_all_metadata(&self) -> Vec<&NodeMeta> {
        self.order
            .iter()
            .filter_map(|n| self.entries.get(n).map(|e| &e.meta))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
