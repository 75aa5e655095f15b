//! Namespaced durable key -> JSON store.
//!
//! Keys are only ever built through [`StoreKey`] and [`Namespace`], so every
//! writer agrees on the layout:
//!
//! | key                       | value                                   |
//! |---------------------------|-----------------------------------------|
//! | `facility-metadata:<id>`  | `{name, address, phone, lat, lon}`      |
//! | `facility-resources:<id>` | `{operational, resources: [{fuel, water}]}` |
//! | `incident-snapshot`       | full array of incidents                 |
//!
//! Reads never fail: a backend error or a value that does not parse is logged
//! and reported as absent, and the caller falls back to its default.

use crate::error::StoreError;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{Pool, Postgres};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    FacilityMetadata,
    FacilityResources,
}

impl Namespace {
    pub const fn prefix(self) -> &'static str {
        match self {
            Namespace::FacilityMetadata => "facility-metadata:",
            Namespace::FacilityResources => "facility-resources:",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKey<'a> {
    FacilityMetadata(&'a str),
    FacilityResources(&'a str),
    IncidentSnapshot,
}

impl Display for StoreKey<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKey::FacilityMetadata(id) => {
                write!(f, "{}{id}", Namespace::FacilityMetadata.prefix())
            }
            StoreKey::FacilityResources(id) => {
                write!(f, "{}{id}", Namespace::FacilityResources.prefix())
            }
            StoreKey::IncidentSnapshot => write!(f, "incident-snapshot"),
        }
    }
}

/// Raw text storage underneath [`StateStore`]. Writes to a key are last-write-wins.
pub trait StoreBackend: Send + Sync + 'static {
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn write(&self, key: &str, value: String)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// All `(key, value)` pairs whose key starts with `prefix`, ordered by key.
    fn scan(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<(String, String)>, StoreError>> + Send;
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores text as-is, bypassing serialization.
    pub fn put_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.records.write().insert(key.into(), value.into());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.records.read().get(key).cloned()
    }
}

impl StoreBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.raw(key))
    }

    async fn write(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.put_raw(key, value);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .records
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: Pool<Postgres>,
}

impl PostgresBackend {
    pub const fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

impl StoreBackend for PostgresBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(sqlx::query_scalar::<_, String>(
            r"
            SELECT value
            FROM state_records
            WHERE key = $1
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn write(&self, key: &str, value: String) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO state_records (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(sqlx::query_as::<_, (String, String)>(
            r"
            SELECT key, value
            FROM state_records
            WHERE left(key, length($1)) = $1
            ORDER BY key
            ",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?)
    }
}

/// Typed JSON layer over a [`StoreBackend`].
#[derive(Debug)]
pub struct StateStore<B> {
    backend: B,
}

impl<B: StoreBackend> StateStore<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the value at `key`, or `None` if it is absent, unreadable or does not parse as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &StoreKey<'_>) -> Option<T> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(%key, error = ?e, "store read failed, treating record as absent");
                None
            }
        }
    }

    /// Like [`StateStore::get`], but a backend failure is returned rather than read as absent.
    /// Only a record that does not parse as `T` comes back as `Ok(None)`.
    pub async fn try_get<T: DeserializeOwned>(
        &self,
        key: &StoreKey<'_>,
    ) -> Result<Option<T>, StoreError> {
        let key = key.to_string();
        Ok(self
            .backend
            .read(&key)
            .await?
            .and_then(|text| parse_record(&key, &text)))
    }

    pub async fn get_value(&self, key: &StoreKey<'_>) -> Option<Value> {
        self.get::<Value>(key).await
    }

    /// Overwrites the whole value at `key`.
    pub async fn set<T>(&self, key: &StoreKey<'_>, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let key = key.to_string();
        let text = serde_json::to_string(value).map_err(|source| StoreError::Serialize {
            key: key.clone(),
            source,
        })?;
        trace!(key, len = text.len(), "writing store record");
        self.backend.write(&key, text).await
    }

    /// Every parseable record in `namespace`, keyed by the suffix after the prefix.
    pub async fn namespace<T: DeserializeOwned>(&self, namespace: Namespace) -> BTreeMap<String, T> {
        let prefix = namespace.prefix();
        let rows = match self.backend.scan(prefix).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(prefix, error = ?e, "store scan failed, treating namespace as empty");
                return BTreeMap::new();
            }
        };

        rows.into_iter()
            .filter_map(|(key, text)| {
                let value = parse_record(&key, &text)?;
                let suffix = key.strip_prefix(prefix)?.to_string();
                Some((suffix, value))
            })
            .collect()
    }
}

fn parse_record<T: DeserializeOwned>(key: &str, text: &str) -> Option<T> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "corrupt store record, treating as absent");
            None
        }
    }
}
