//! Bidirectional translation between public field names and backend field
//! names. Built once per index handle at startup; empty maps are the common
//! case and every operation on them returns its input untouched.

use indexmap::IndexMap;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Default)]
pub struct FieldAliasMap {
    to_backend: IndexMap<String, String>,
    to_public: IndexMap<String, String>,
}

impl FieldAliasMap {
    /// Build from `(public, backend)` pairs. Two public names targeting the
    /// same backend field would make the reverse map lossy, so that is a
    /// configuration error.
    pub fn new<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut to_backend = IndexMap::new();
        let mut to_public = IndexMap::new();
        for (public, backend) in entries {
            if let Some(existing) = to_public.get(&backend) {
                return Err(GatewayError::Config(format!(
                    "fields \"{existing}\" and \"{public}\" both map to backend field \"{backend}\""
                )));
            }
            to_public.insert(backend.clone(), public.clone());
            to_backend.insert(public, backend);
        }
        Ok(Self { to_backend, to_public })
    }

    pub fn is_empty(&self) -> bool {
        self.to_backend.is_empty()
    }

    /// Public → backend name; identity on miss.
    pub fn to_backend<'a>(&'a self, name: &'a str) -> &'a str {
        self.to_backend.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Backend → public name; identity on miss.
    pub fn from_backend<'a>(&'a self, name: &'a str) -> &'a str {
        self.to_public.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn keys_to_backend<V>(&self, map: IndexMap<String, V>) -> IndexMap<String, V> {
        if self.is_empty() {
            return map;
        }
        map.into_iter().map(|(k, v)| (self.to_backend(&k).to_string(), v)).collect()
    }

    pub fn keys_from_backend<V>(&self, map: IndexMap<String, V>) -> IndexMap<String, V> {
        if self.is_empty() {
            return map;
        }
        map.into_iter().map(|(k, v)| (self.from_backend(&k).to_string(), v)).collect()
    }

    pub fn array_to_backend(&self, list: Vec<String>) -> Vec<String> {
        if self.is_empty() {
            return list;
        }
        list.into_iter().map(|name| self.to_backend(&name).to_string()).collect()
    }

    pub fn array_from_backend(&self, list: Vec<String>) -> Vec<String> {
        if self.is_empty() {
            return list;
        }
        list.into_iter().map(|name| self.from_backend(&name).to_string()).collect()
    }
}
