use crate::error::SourceError;
use crate::geo::Coordinate;
use crate::sources::IncidentSource;
use crate::store::{StateStore, StoreBackend, StoreKey};
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DELETION_LEDGER_CAPACITY: usize = 100;

/// An incident row as the incident source hands it over. Cells may be strings or numbers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawIncident {
    pub lat: Value,
    pub lon: Value,
    pub strength: Value,
    pub reported_at: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Taken from the configured key column; deletable remotely.
    Column,
    /// Built from `lat|lon|strength` because the row had no key cell.
    Composite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentKey {
    pub value: String,
    pub kind: KeyKind,
}

impl Display for IncidentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub key: IncidentKey,
    pub coordinates: Option<Coordinate>,
    pub strength: Option<f64>,
    pub reported_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn from_raw(raw: RawIncident) -> Self {
        let coordinates = match (coerce_number(&raw.lat), coerce_number(&raw.lon)) {
            (Some(lat), Some(lon)) => Coordinate::new(lat, lon),
            _ => None,
        };
        let key = match raw.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(value) => IncidentKey {
                value: value.to_string(),
                kind: KeyKind::Column,
            },
            None => IncidentKey {
                value: format!(
                    "{}|{}|{}",
                    cell_text(&raw.lat),
                    cell_text(&raw.lon),
                    cell_text(&raw.strength)
                ),
                kind: KeyKind::Composite,
            },
        };

        Self {
            key,
            coordinates,
            strength: coerce_number(&raw.strength),
            reported_at: raw.reported_at.as_deref().and_then(parse_reported_at),
        }
    }

    /// Report time for display, or the `Unknown` sentinel.
    pub fn reported_at_display(&self) -> String {
        self.reported_at
            .map_or_else(|| crate::facilities::UNKNOWN.to_string(), |t| t.to_rfc3339())
    }
}

/// Numeric value of a cell; `None` for blanks, text that does not parse, and non-finite numbers.
pub fn coerce_number(cell: &Value) -> Option<f64> {
    let n = match cell {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_reported_at(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionFailure {
    pub key: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Remote deletions that failed after the incident was already removed locally.
#[derive(Debug, Clone, Default)]
pub struct DeletionLedger {
    failures: Arc<RwLock<VecDeque<DeletionFailure>>>,
}

impl DeletionLedger {
    fn record(&self, key: &IncidentKey, error: &SourceError) {
        let mut failures = self.failures.write();
        if failures.len() == DELETION_LEDGER_CAPACITY {
            failures.pop_front();
        }
        failures.push_back(DeletionFailure {
            key: key.value.clone(),
            error: error.to_string(),
            failed_at: Utc::now(),
        });
    }

    pub fn snapshot(&self) -> Vec<DeletionFailure> {
        self.failures.read().iter().cloned().collect()
    }
}

pub struct IncidentRegistry<B, I> {
    store: Arc<StateStore<B>>,
    source: Arc<I>,
    incidents: Vec<Incident>,
    ledger: DeletionLedger,
}

impl<B: StoreBackend, I: IncidentSource> IncidentRegistry<B, I> {
    pub fn new(store: Arc<StateStore<B>>, source: Arc<I>) -> Self {
        Self {
            store,
            source,
            incidents: Vec::new(),
            ledger: DeletionLedger::default(),
        }
    }

    /// Replaces the whole snapshot with `records` and persists it as one value.
    pub async fn load(&mut self, records: Vec<RawIncident>) -> usize {
        let incidents = records
            .into_iter()
            .map(Incident::from_raw)
            .collect::<Vec<_>>();
        let unplaced = incidents.iter().filter(|i| i.coordinates.is_none()).count();
        if unplaced > 0 {
            debug!(unplaced, "incidents without usable coordinates kept unranked");
        }

        if let Err(e) = self.store.set(&StoreKey::IncidentSnapshot, &incidents).await {
            warn!(error = ?e, "failed to persist incident snapshot");
        }
        self.incidents = incidents;
        info!(len = self.incidents.len(), "incident registry loaded");
        self.incidents.len()
    }

    /// Reads the last persisted snapshot back into memory.
    pub async fn restore(&mut self) -> usize {
        self.incidents = self
            .store
            .get::<Vec<Incident>>(&StoreKey::IncidentSnapshot)
            .await
            .unwrap_or_default();
        debug!(len = self.incidents.len(), "incident registry restored from store");
        self.incidents.len()
    }

    pub fn all(&self) -> &[Incident] {
        &self.incidents
    }

    pub fn get(&self, key: &str) -> Option<&Incident> {
        self.incidents.iter().find(|i| i.key.value == key)
    }

    pub fn deletion_failures(&self) -> Vec<DeletionFailure> {
        self.ledger.snapshot()
    }

    /// Drops every incident with `key` locally, then asks the source to delete it.
    ///
    /// The local removal is final: a failed remote delete is logged and recorded in the
    /// deletion ledger, and only the next successful [`load`](Self::load) reconciles it.
    /// Returns the handle of the remote request, or `None` if nothing matched locally.
    pub async fn remove(&mut self, key: &str) -> Option<JoinHandle<()>> {
        let mut removed: Option<IncidentKey> = None;
        self.incidents.retain(|incident| {
            if incident.key.value == key {
                removed.get_or_insert_with(|| incident.key.clone());
                false
            } else {
                true
            }
        });
        let removed = removed?;
        info!(key, "incident removed locally");

        if let Err(e) = self
            .store
            .set(&StoreKey::IncidentSnapshot, &self.incidents)
            .await
        {
            warn!(key, error = ?e, "failed to persist incident snapshot after removal");
        }

        let source = Arc::clone(&self.source);
        let ledger = self.ledger.clone();
        Some(tokio::spawn(async move {
            match source.delete_incident(&removed).await {
                Ok(()) => info!(key = %removed, "incident deleted from source"),
                Err(e) => {
                    warn!(
                        key = %removed,
                        error = %e,
                        "remote incident deletion failed, local snapshot diverges until next refresh"
                    );
                    ledger.record(&removed, &e);
                }
            }
        }))
    }
}
