//! Distributed 64-bit ID generator
//!
//! Layout (most significant first):
//!
//! ```text
//! | 32b seconds | 10b millis | 8b counter | 14b server id |
//! ```
//!
//! Each (server id, millisecond) pair owns a counter in the shared store.
//! A batch reserves a contiguous range with one `incr_by`; the part of the
//! range that falls inside the 256-slot window is issued, the remainder
//! rolls over to the next millisecond.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::Mutex;

use super::error::{TraceError, TraceResult};
use crate::data::cache::{CacheKey, CacheService};
use crate::utils::time::now_millis;

const SERVER_ID_BITS: u32 = 14;
const COUNTER_BITS: u32 = 8;
const MILLIS_BITS: u32 = 10;

const COUNTER_SHIFT: u32 = SERVER_ID_BITS;
const MILLIS_SHIFT: u32 = SERVER_ID_BITS + COUNTER_BITS;
const SECONDS_SHIFT: u32 = SERVER_ID_BITS + COUNTER_BITS + MILLIS_BITS;

pub const MAX_SERVER_ID: u16 = (1 << SERVER_ID_BITS) - 1;
pub const COUNTERS_PER_MILLI: i64 = 1 << COUNTER_BITS;

/// Millisecond slots tried per batch before giving up
const MAX_ITERATIONS: usize = 8;

/// Counter keys only need to outlive clock skew between allocators
const COUNTER_TTL: Duration = Duration::from_secs(10 * 60);

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Decoded view of a generated ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub seconds: u32,
    pub millis: u16,
    pub counter: u8,
    pub server_id: u16,
}

impl IdParts {
    pub fn decode(id: u64) -> Self {
        Self {
            seconds: (id >> SECONDS_SHIFT) as u32,
            millis: ((id >> MILLIS_SHIFT) & ((1 << MILLIS_BITS) - 1)) as u16,
            counter: ((id >> COUNTER_SHIFT) & ((1 << COUNTER_BITS) - 1)) as u8,
            server_id: (id & ((1 << SERVER_ID_BITS) - 1)) as u16,
        }
    }

    /// Millisecond timestamp this ID was issued in
    pub fn timestamp_ms(&self) -> i64 {
        self.seconds as i64 * 1_000 + self.millis as i64
    }
}

fn compose(ms: i64, counter: i64, server_id: u16) -> TraceResult<u64> {
    let seconds = ms.div_euclid(1_000);
    if !(0..=u32::MAX as i64).contains(&seconds) {
        return Err(TraceError::Config(format!(
            "timestamp {ms}ms does not fit the 32-bit seconds field"
        )));
    }
    let millis = ms.rem_euclid(1_000) as u64;
    Ok(((seconds as u64) << SECONDS_SHIFT)
        | (millis << MILLIS_SHIFT)
        | ((counter as u64) << COUNTER_SHIFT)
        | server_id as u64)
}

/// Batch ID allocator backed by the shared counter store
pub struct IdGenerator {
    cache: Arc<CacheService>,
    namespace: String,
    server_ids: Vec<u16>,
    /// Last millisecond handed out by this allocator
    last_ms: Mutex<i64>,
    clock: Clock,
}

impl IdGenerator {
    pub fn new(
        cache: Arc<CacheService>,
        namespace: impl Into<String>,
        server_ids: Vec<u16>,
    ) -> TraceResult<Self> {
        if server_ids.is_empty() {
            return Err(TraceError::Config(
                "id generator requires at least one server id".to_string(),
            ));
        }
        if let Some(id) = server_ids.iter().find(|id| **id > MAX_SERVER_ID) {
            return Err(TraceError::Config(format!(
                "server id {id} exceeds {SERVER_ID_BITS}-bit range"
            )));
        }
        Ok(Self {
            cache,
            namespace: namespace.into(),
            server_ids,
            last_ms: Mutex::new(0),
            clock: Arc::new(now_millis),
        })
    }

    /// Replace the wall clock (milliseconds since epoch)
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Allocate `n` unique IDs, strictly increasing in issue order.
    ///
    /// Fails with `idgen.insufficient` when the counter windows of
    /// [`MAX_ITERATIONS`] consecutive milliseconds could not cover `n`.
    pub async fn gen_multi_ids(&self, n: usize) -> TraceResult<Vec<u64>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let server_id = self.pick_server_id();

        // Held across the loop so concurrent batches see a monotonic clock
        let mut last_ms = self.last_ms.lock().await;
        let mut ms = *last_ms;
        let mut ids = Vec::with_capacity(n);
        let mut left = n as i64;

        for _ in 0..MAX_ITERATIONS {
            if left == 0 {
                break;
            }
            let now = (self.clock)();
            if now < ms {
                tracing::warn!(
                    now_ms = now,
                    last_ms = ms,
                    "Clock moved backwards; continuing from last issued millisecond"
                );
            }
            ms = now.max(ms + 1);

            let key = CacheKey::id_counter(&self.namespace, server_id, ms);
            let end = self
                .cache
                .incr_by(&key, left, Some(COUNTER_TTL))
                .await
                .map_err(|e| TraceError::Rpc(format!("id counter reservation failed: {e}")))?;

            if end < left {
                return Err(TraceError::IdCounterRecycle {
                    key,
                    counter: end,
                    requested: left,
                });
            }
            let start = end - left;
            if start >= COUNTERS_PER_MILLI {
                tracing::debug!(key = %key, start, "Counter window exhausted, advancing");
                continue;
            }

            let stop = end.min(COUNTERS_PER_MILLI);
            for counter in start..stop {
                ids.push(compose(ms, counter, server_id)?);
            }
            left -= stop - start;
        }
        *last_ms = ms;

        if left > 0 {
            return Err(TraceError::IdInsufficient {
                requested: n,
                allocated: ids.len(),
            });
        }
        Ok(ids)
    }

    /// Allocate a single ID
    pub async fn gen_id(&self) -> TraceResult<u64> {
        let ids = self.gen_multi_ids(1).await?;
        ids.into_iter().next().ok_or(TraceError::IdInsufficient {
            requested: 1,
            allocated: 0,
        })
    }

    fn pick_server_id(&self) -> u16 {
        self.server_ids
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_default()
    }
}
