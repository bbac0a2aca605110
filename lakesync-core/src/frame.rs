//! Wire frames: the tagged envelopes clients and gateways exchange.
//!
//! JSON is the transport; 64-bit HLC fields travel as decimal strings
//! (see the `HlcTimestamp` serde impl), so frames survive JSON number
//! precision limits.

use serde::{Deserialize, Serialize};

use crate::delta::RowDelta;
use crate::error::Result;
use crate::hlc::HlcTimestamp;

/// A sync envelope. The `type` tag on the wire distinguishes pushes,
/// pull responses, and broadcast fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncFrame {
    #[serde(rename = "SYNC_PUSH")]
    Push {
        #[serde(rename = "clientId")]
        client_id: String,
        deltas: Vec<RowDelta>,
        #[serde(rename = "lastSeenHlc")]
        last_seen_hlc: HlcTimestamp,
    },
    #[serde(rename = "SYNC_PULL")]
    Pull {
        deltas: Vec<RowDelta>,
        cursor: HlcTimestamp,
        #[serde(rename = "hasMore")]
        has_more: bool,
    },
    #[serde(rename = "BROADCAST")]
    Broadcast {
        #[serde(rename = "sourceClientId")]
        source_client_id: String,
        deltas: Vec<RowDelta>,
        cursor: HlcTimestamp,
    },
}

impl SyncFrame {
    /// Encode to the JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the JSON wire form.
    pub fn decode(bytes: &[u8]) -> Result<SyncFrame> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The deltas carried by the frame, regardless of kind.
    pub fn deltas(&self) -> &[RowDelta] {
        match self {
            SyncFrame::Push { deltas, .. }
            | SyncFrame::Pull { deltas, .. }
            | SyncFrame::Broadcast { deltas, .. } => deltas,
        }
    }
}
