//! Canonical cross-chain message model shared by the change watcher and the queue consumer
//!
//! `Event.id` (`<chainID>/<emitterAddress>/<sequence>`) is the only join key between the
//! change-capture layer and the queue layer, so every decode path goes through
//! [`Event::validate`] before the record is handed to downstream code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub mod enrichment;
mod error;
pub mod extjson;

pub use enrichment::{
    resolve_global_transaction, DestinationTx, GlobalTransaction, LookupError, OriginTx,
    TransactionLookup,
};
pub use error::{EventError, Result};

/// One cross-chain message record (signed VAA) as stored by the explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "emitterChain")]
    pub chain_id: u16,
    #[serde(rename = "emitterAddr")]
    pub emitter_address: String,
    /// String-encoded integer, monotonically increasing per emitter
    pub sequence: String,
    #[serde(rename = "guardianSetIndex", default)]
    pub guardian_set_index: u32,
    /// Raw encoded VAA bytes (base64 in JSON)
    #[serde(rename = "vaas", with = "base64_bytes", default)]
    pub vaa: Vec<u8>,
    #[serde(rename = "indexedAt")]
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "txHash", default)]
    pub tx_hash: String,
    #[serde(default)]
    pub version: u16,
    #[serde(default)]
    pub revision: u16,
}

impl Event {
    /// Build a minimal event whose ID is derived from its chain, emitter and sequence.
    pub fn new(
        chain_id: u16,
        emitter_address: impl Into<String>,
        sequence: u64,
        indexed_at: DateTime<Utc>,
    ) -> Self {
        let emitter_address = emitter_address.into();
        let id = EventId {
            chain_id,
            emitter_address: emitter_address.clone(),
            sequence,
        };

        Self {
            id: id.to_string(),
            chain_id,
            emitter_address,
            sequence: sequence.to_string(),
            guardian_set_index: 0,
            vaa: Vec::new(),
            indexed_at,
            timestamp: None,
            updated_at: None,
            tx_hash: String::new(),
            version: 1,
            revision: 0,
        }
    }

    /// Decode a stored document (MongoDB extended JSON allowed) into a validated event.
    pub fn from_document(document: Value) -> Result<Self> {
        let normalized = extjson::normalize(document)?;
        let event: Event = serde_json::from_value(normalized)?;
        event.validate()?;
        Ok(event)
    }

    /// Decode a JSON payload into a validated event.
    pub fn from_json(payload: &str) -> Result<Self> {
        let event: Event = serde_json::from_str(payload)?;
        event.validate()?;
        Ok(event)
    }

    pub fn event_id(&self) -> Result<EventId> {
        self.id.parse()
    }

    /// Check that the ID agrees with chain id, emitter address and sequence.
    pub fn validate(&self) -> Result<()> {
        let parsed = self.event_id()?;

        if parsed.chain_id != self.chain_id {
            return Err(EventError::IdMismatch {
                id: self.id.clone(),
                field: "emitterChain",
            });
        }
        if parsed.emitter_address != self.emitter_address {
            return Err(EventError::IdMismatch {
                id: self.id.clone(),
                field: "emitterAddr",
            });
        }
        if self.sequence.parse::<u64>().ok() != Some(parsed.sequence) {
            return Err(EventError::IdMismatch {
                id: self.id.clone(),
                field: "sequence",
            });
        }

        Ok(())
    }
}

/// Parsed form of `<chainID>/<emitterAddress>/<sequence>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId {
    pub chain_id: u16,
    pub emitter_address: String,
    pub sequence: u64,
}

impl FromStr for EventId {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| EventError::InvalidId {
            id: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return Err(invalid("expected 3 '/'-separated parts"));
        }

        let chain_id = parts[0]
            .parse::<u16>()
            .map_err(|_| invalid("chain id is not a 16-bit unsigned integer"))?;
        if parts[1].is_empty() {
            return Err(invalid("emitter address is empty"));
        }
        let sequence = parts[2]
            .parse::<u64>()
            .map_err(|_| invalid("sequence is not an unsigned integer"))?;

        Ok(Self {
            chain_id,
            emitter_address: parts[1].to_string(),
            sequence,
        })
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.chain_id, self.emitter_address, self.sequence)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
