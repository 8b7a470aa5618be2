//! Origin/destination transaction merge keyed by `Event.id`
//!
//! Enriched records live in two places: the `globalTransactions` collection (written
//! by the tx tracker, holds destination data and sometimes origin data) and the
//! `vaas` collection (always holds the freshest origin timestamp and chain id).
//! [`resolve_global_transaction`] merges both lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ORIGIN_STATUS_CONFIRMED: &str = "confirmed";

/// Lookup failure, distinguishing a missing record from a failed query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Data error: {0}")]
    Data(String),
}

impl LookupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginTx {
    pub tx_hash: String,
    pub chain_id: u16,
    pub timestamp: Option<DateTime<Utc>>,
    pub status: String,
}

impl OriginTx {
    /// Origin tx derived from a stored VAA; a signed VAA implies a confirmed source tx.
    pub fn confirmed(tx_hash: impl Into<String>, chain_id: u16, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            chain_id,
            timestamp,
            status: ORIGIN_STATUS_CONFIRMED.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationTx {
    pub chain_id: u16,
    pub status: String,
    pub tx_hash: String,
    pub block_number: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTransaction {
    #[serde(rename = "_id")]
    pub id: String,
    pub origin_tx: Option<OriginTx>,
    pub destination_tx: Option<DestinationTx>,
}

/// Merge a `globalTransactions` lookup with an origin lookup from `vaas`.
///
/// A missing global record is tolerated; any other failure propagates.
pub fn resolve_global_transaction(
    id: &str,
    global: Result<GlobalTransaction, LookupError>,
    origin: Result<OriginTx, LookupError>,
) -> Result<GlobalTransaction, LookupError> {
    let global = match global {
        Ok(record) => Some(record),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    let origin = origin?;

    let merged = match global {
        None => GlobalTransaction {
            id: id.to_string(),
            origin_tx: Some(origin),
            destination_tx: None,
        },
        Some(record) => match record.origin_tx {
            None => GlobalTransaction {
                id: record.id,
                origin_tx: Some(origin),
                destination_tx: record.destination_tx,
            },
            Some(mut enriched) => {
                enriched.timestamp = origin.timestamp;
                enriched.chain_id = origin.chain_id;
                GlobalTransaction {
                    id: record.id,
                    origin_tx: Some(enriched),
                    destination_tx: record.destination_tx,
                }
            }
        },
    };

    Ok(merged)
}

/// Read side of the enrichment store.
#[async_trait]
pub trait TransactionLookup: Send + Sync {
    async fn find_global_transaction(&self, id: &str) -> Result<GlobalTransaction, LookupError>;

    async fn find_origin_tx(&self, id: &str) -> Result<OriginTx, LookupError>;

    async fn find_enriched_transaction(&self, id: &str) -> Result<GlobalTransaction, LookupError> {
        let global = match self.find_global_transaction(id).await {
            Err(e) if !e.is_not_found() => return Err(e),
            other => other,
        };
        let origin = self.find_origin_tx(id).await;
        resolve_global_transaction(id, global, origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ts(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn destination() -> DestinationTx {
        DestinationTx {
            chain_id: 2,
            status: "completed".to_string(),
            tx_hash: "0xdest".to_string(),
            block_number: Some("100".to_string()),
            from: None,
            to: None,
            timestamp: ts(50),
            updated_at: ts(60),
        }
    }

    #[test]
    fn test_missing_global_uses_origin_only() {
        let origin = OriginTx::confirmed("0xorigin", 1, ts(10));
        let merged = resolve_global_transaction(
            "1/0xabc/42",
            Err(LookupError::NotFound("1/0xabc/42".into())),
            Ok(origin.clone()),
        )
        .unwrap();

        assert_eq!(merged.id, "1/0xabc/42");
        assert_eq!(merged.origin_tx, Some(origin));
        assert!(merged.destination_tx.is_none());
    }

    #[test]
    fn test_global_without_origin_keeps_destination() {
        let origin = OriginTx::confirmed("0xorigin", 1, ts(10));
        let global = GlobalTransaction {
            id: "1/0xabc/42".into(),
            origin_tx: None,
            destination_tx: Some(destination()),
        };

        let merged = resolve_global_transaction("1/0xabc/42", Ok(global), Ok(origin.clone())).unwrap();
        assert_eq!(merged.origin_tx, Some(origin));
        assert_eq!(merged.destination_tx, Some(destination()));
    }

    #[test]
    fn test_enriched_origin_wins_but_timestamp_and_chain_refresh() {
        let enriched = OriginTx {
            tx_hash: "solana-sig".into(),
            chain_id: 9,
            timestamp: ts(1),
            status: "confirmed".into(),
        };
        let global = GlobalTransaction {
            id: "1/0xabc/42".into(),
            origin_tx: Some(enriched),
            destination_tx: Some(destination()),
        };
        let fresh = OriginTx::confirmed("0xorigin", 1, ts(10));

        let merged = resolve_global_transaction("1/0xabc/42", Ok(global), Ok(fresh)).unwrap();
        let origin = merged.origin_tx.unwrap();
        assert_eq!(origin.tx_hash, "solana-sig");
        assert_eq!(origin.chain_id, 1);
        assert_eq!(origin.timestamp, ts(10));
        assert_eq!(merged.destination_tx, Some(destination()));
    }

    #[test]
    fn test_data_errors_propagate() {
        let origin = OriginTx::confirmed("0xorigin", 1, ts(10));
        let err = resolve_global_transaction(
            "1/0xabc/42",
            Err(LookupError::Data("connection reset".into())),
            Ok(origin),
        )
        .unwrap_err();
        assert!(!err.is_not_found());

        let err = resolve_global_transaction(
            "1/0xabc/42",
            Err(LookupError::NotFound("1/0xabc/42".into())),
            Err(LookupError::NotFound("1/0xabc/42".into())),
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    struct FailingGlobal {
        origin_calls: AtomicU32,
    }

    #[async_trait]
    impl TransactionLookup for FailingGlobal {
        async fn find_global_transaction(&self, _id: &str) -> Result<GlobalTransaction, LookupError> {
            Err(LookupError::Data("timeout".into()))
        }

        async fn find_origin_tx(&self, _id: &str) -> Result<OriginTx, LookupError> {
            self.origin_calls.fetch_add(1, Ordering::SeqCst);
            Ok(OriginTx::confirmed("0xorigin", 1, None))
        }
    }

    #[tokio::test]
    async fn test_lookup_short_circuits_on_global_data_error() {
        let lookup = FailingGlobal {
            origin_calls: AtomicU32::new(0),
        };

        let result = lookup.find_enriched_transaction("1/0xabc/42").await;
        assert_eq!(result, Err(LookupError::Data("timeout".into())));
        assert_eq!(lookup.origin_calls.load(Ordering::SeqCst), 0);
    }
}
