//! Hybrid logical clock: 48 bits of wall-clock milliseconds packed with a
//! 16-bit logical counter into a single 64-bit timestamp.
//!
//! Every emission is strictly greater than the previous one, even when the
//! wall clock stalls or regresses. Remote timestamps are merged through
//! [`HlcClock::recv`], which bounds acceptable forward drift.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SyncError};

/// Maximum accepted forward drift of a remote wall clock, in milliseconds.
pub const MAX_DRIFT_MS: u64 = 5_000;

/// Maximum value of the logical counter before the wall component advances.
pub const MAX_COUNTER: u16 = u16::MAX;

const COUNTER_BITS: u32 = 16;

/// A packed hybrid-logical-clock timestamp.
///
/// Layout: `(wall_ms << 16) | counter`. Comparison is numeric over the
/// packed value, which orders first by wall time, then by counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HlcTimestamp(u64);

impl HlcTimestamp {
    /// Pack a wall-clock millisecond reading and a counter.
    pub fn encode(wall_ms: u64, counter: u16) -> Self {
        Self((wall_ms << COUNTER_BITS) | counter as u64)
    }

    /// Unpack into `(wall_ms, counter)`.
    pub fn decode(self) -> (u64, u16) {
        (self.0 >> COUNTER_BITS, (self.0 & 0xFFFF) as u16)
    }

    /// Wall-clock millisecond component.
    pub fn wall_ms(self) -> u64 {
        self.0 >> COUNTER_BITS
    }

    /// Logical counter component.
    pub fn counter(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// The zero timestamp, ordered before every real emission.
    pub const ZERO: HlcTimestamp = HlcTimestamp(0);
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for HlcTimestamp {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<HlcTimestamp> for u64 {
    fn from(ts: HlcTimestamp) -> u64 {
        ts.0
    }
}

// On JSON boundaries the packed value exceeds 2^53, so it travels as a
// decimal string. Numeric input is still accepted on decode.
impl Serialize for HlcTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for HlcTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(HlcTimestamp(n)),
            Raw::Text(s) => s
                .parse::<u64>()
                .map(HlcTimestamp)
                .map_err(|e| serde::de::Error::custom(format!("invalid hlc '{s}': {e}"))),
        }
    }
}

/// Source of wall-clock milliseconds. Injectable so tests can drive the
/// clock through stalls, regressions, and drift scenarios.
pub trait WallClock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Strictly monotonic hybrid logical clock.
///
/// Shared across tasks via `Arc<HlcClock>`; the last emission is guarded by
/// a short mutex so concurrent `now`/`recv` calls serialize.
pub struct HlcClock {
    wall: Arc<dyn WallClock>,
    last: Mutex<(u64, u16)>,
}

impl HlcClock {
    /// Create a clock over the system wall clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Create a clock over an injected wall-clock source.
    pub fn new(wall: Arc<dyn WallClock>) -> Self {
        Self {
            wall,
            last: Mutex::new((0, 0)),
        }
    }

    /// Emit the next local timestamp.
    ///
    /// If the wall clock moved forward, the counter resets. If it stalled
    /// or regressed, the counter bumps; counter overflow advances the wall
    /// component by one millisecond.
    pub fn now(&self) -> HlcTimestamp {
        let mut last = self.last.lock();
        let now_wall = self.wall.now_ms();
        let (last_wall, last_counter) = *last;

        let next = if now_wall > last_wall {
            (now_wall, 0)
        } else if last_counter == MAX_COUNTER {
            (last_wall + 1, 0)
        } else {
            (last_wall, last_counter + 1)
        };

        *last = next;
        HlcTimestamp::encode(next.0, next.1)
    }

    /// Merge a remote timestamp, emitting a local timestamp strictly
    /// greater than both the remote input and the previous local emission.
    ///
    /// Rejects remotes whose wall component runs ahead of the local wall
    /// clock by more than [`MAX_DRIFT_MS`].
    pub fn recv(&self, remote: HlcTimestamp) -> Result<HlcTimestamp> {
        let mut last = self.last.lock();
        let now_wall = self.wall.now_ms();
        let (remote_wall, remote_counter) = remote.decode();

        if remote_wall > now_wall && remote_wall - now_wall > MAX_DRIFT_MS {
            return Err(SyncError::ClockDrift {
                remote_ms: remote_wall,
                local_ms: now_wall,
            });
        }

        let (last_wall, last_counter) = *last;
        let wall = now_wall.max(remote_wall).max(last_wall);

        let counter = if wall == last_wall && wall == remote_wall {
            last_counter.max(remote_counter).checked_add(1)
        } else if wall == last_wall {
            last_counter.checked_add(1)
        } else if wall == remote_wall {
            remote_counter.checked_add(1)
        } else {
            Some(0)
        };

        let next = match counter {
            Some(c) => (wall, c),
            None => (wall + 1, 0),
        };

        *last = next;
        Ok(HlcTimestamp::encode(next.0, next.1))
    }

    /// The last emitted timestamp, without advancing the clock.
    pub fn last(&self) -> HlcTimestamp {
        let (wall, counter) = *self.last.lock();
        HlcTimestamp::encode(wall, counter)
    }

    /// Raw wall-clock reading, without advancing the clock.
    pub fn wall_now_ms(&self) -> u64 {
        self.wall.now_ms()
    }
}

impl fmt::Debug for HlcClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (wall, counter) = *self.last.lock();
        f.debug_struct("HlcClock")
            .field("last_wall", &wall)
            .field("last_counter", &counter)
            .finish()
    }
}
