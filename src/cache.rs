//! Deterministic cache keys and the Redis-backed result cache.
//!
//! Keys are derived from a canonical serialization of `{q, …options}` in
//! which every object's keys are sorted recursively (arrays keep their
//! order), hashed with SHA-256. Cache failures never surface to callers:
//! the cache flips to disconnected, requests keep being served, and later
//! calls retry opportunistically.

use std::sync::atomic::{AtomicBool, Ordering};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::SearchOptions;

/// Bumping this constant invalidates every cache entry.
pub const CACHE_VERSION: &str = "v1";

pub const SEARCH_TTL_SECS: u64 = 60;
pub const MAPPING_TTL_SECS: u64 = 3600;

/// Sort object keys at every depth; arrays preserve insertion order.
pub fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), canonical_value(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

pub fn search_cache_key(handle: &str, query: &str, options: &SearchOptions) -> String {
    let mut payload = serde_json::Map::new();
    payload.insert("q".to_string(), Value::String(query.to_string()));
    if let Value::Object(opts) = serde_json::to_value(options).expect("options serialize") {
        for (k, v) in opts {
            payload.insert(k, v);
        }
    }
    let canonical = canonical_value(&Value::Object(payload));
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    format!("{CACHE_VERSION}:search:{handle}:{digest:x}")
}

pub fn mapping_cache_key(handle: &str) -> String {
    format!("{CACHE_VERSION}:mapping:{handle}")
}

/// Best-effort shared cache. Constructed disabled when no Redis URL is
/// configured; all operations swallow backend errors. A configured cache
/// whose backend is unreachable reports `error` while requests keep being
/// served uncached.
pub struct ResultCache {
    conn: Option<ConnectionManager>,
    configured: bool,
    connected: AtomicBool,
}

impl ResultCache {
    pub fn disabled() -> Self {
        Self { conn: None, configured: false, connected: AtomicBool::new(false) }
    }

    pub async fn connect(url: &str) -> Self {
        let conn = match redis::Client::open(url) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(conn) => {
                    tracing::info!(target: "cache", "result cache connected");
                    Some(conn)
                }
                Err(e) => {
                    tracing::error!(target: "cache", error = %e, "redis connection failed; serving uncached");
                    None
                }
            },
            Err(e) => {
                tracing::error!(target: "cache", error = %e, "invalid redis url; serving uncached");
                None
            }
        };
        let connected = conn.is_some();
        Self { conn, configured: true, connected: AtomicBool::new(connected) }
    }

    pub fn enabled(&self) -> bool {
        self.conn.is_some()
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> &'static str {
        if !self.configured {
            "disabled"
        } else if self.enabled() && self.connected() {
            "connected"
        } else {
            "error"
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(raw) => {
                self.connected.store(true, Ordering::Relaxed);
                raw.and_then(|s| serde_json::from_str(&s).ok())
            }
            Err(e) => {
                self.mark_error("get", e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let Some(mut conn) = self.conn.clone() else { return };
        let Ok(raw) = serde_json::to_string(value) else { return };
        match conn.set_ex::<_, _, ()>(key, raw, ttl_secs).await {
            Ok(()) => self.connected.store(true, Ordering::Relaxed),
            Err(e) => self.mark_error("set", e),
        }
    }

    pub async fn flush(&self) -> bool {
        let Some(mut conn) = self.conn.clone() else { return false };
        match redis::cmd("FLUSHDB").query_async::<_, ()>(&mut conn).await {
            Ok(()) => {
                self.connected.store(true, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.mark_error("flush", e);
                false
            }
        }
    }

    fn mark_error(&self, op: &str, e: redis::RedisError) {
        self.connected.store(false, Ordering::Relaxed);
        tracing::warn!(target: "cache", op, error = %e, "cache unavailable; continuing without it");
    }
}
