//! Recursion detection for outbound calls that can loop back in.
//!
//! An outbound call (for example a webhook) can be configured to call back
//! into this system, which would fire the same outbound call again, without
//! bound. Every call chain carries a UUID in a propagated header; the set
//! of object ids that already fired under that UUID lives in the shared
//! store with a sliding TTL. A chain is cut off when an id repeats (an
//! exact cycle) or when the set reaches a cardinality cap (excessive
//! fan-out), while non-recursive chains of reasonable depth pass freely.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::Limits;
use crate::store::{KvStore, StoreError};

/// Header field propagating the chain UUID across process boundaries.
pub const CHAIN_HEADER: &str = "X-Ferry-Chain-Id";

/// Identity of one causal chain of outbound calls.
///
/// Constructed explicitly and passed by reference through the call path;
/// there is no process-global chain state. A chain starts without a UUID
/// and mints one lazily the first time it registers a call or renders its
/// propagation header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallChain {
    uuid: Option<Uuid>,
}

impl CallChain {
    /// A fresh top-level chain with no inherited identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt the chain identity from an inbound header, if present and
    /// well-formed. Malformed values are ignored rather than trusted.
    pub fn from_header(value: Option<&str>) -> Self {
        let uuid = value.and_then(|raw| Uuid::parse_str(raw.trim()).ok());
        Self { uuid }
    }

    /// The header value to propagate on outbound calls, minting the chain
    /// UUID if this is the chain's first outbound call.
    pub fn header(&mut self) -> String {
        self.ensure_uuid().to_string()
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    fn ensure_uuid(&mut self) -> Uuid {
        *self.uuid.get_or_insert_with(Uuid::new_v4)
    }
}

/// Store-backed cycle and fan-out detector for call chains.
#[derive(Clone)]
pub struct RecursionGuard {
    store: Arc<dyn KvStore>,
    id_cap: usize,
    ttl: Duration,
}

impl RecursionGuard {
    pub const DEFAULT_ID_CAP: usize = 100;
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            id_cap: Self::DEFAULT_ID_CAP,
            ttl: Self::DEFAULT_TTL,
        }
    }

    pub fn with_limits(store: Arc<dyn KvStore>, id_cap: usize, ttl: Duration) -> Self {
        Self { store, id_cap, ttl }
    }

    pub fn from_limits(store: Arc<dyn KvStore>, limits: &Limits) -> Self {
        Self::with_limits(
            store,
            limits.recursion_id_cap,
            Duration::from_millis(limits.recursion_ttl_ms),
        )
    }

    /// Whether a call for `id` must not be dispatched on this chain.
    ///
    /// Chains without a UUID are never blocked: they did not originate from
    /// within another call, and only recursive amplification is bounded.
    /// Detection is best-effort; a store failure logs and fails open.
    pub fn blocked(&self, chain: &CallChain, id: u64) -> bool {
        let Some(uuid) = chain.uuid() else {
            return false;
        };
        let key = chain_key(uuid);

        let seen = match self.store.set_contains(&key, &id.to_string()) {
            Ok(seen) => seen,
            Err(err) => return self.fail_open(uuid, id, &err),
        };
        if seen {
            tracing::info!(chain = %uuid, id, "blocking recursive call");
            return true;
        }

        match self.store.set_len(&key) {
            Ok(len) if len >= self.id_cap => {
                tracing::info!(chain = %uuid, id, len, "blocking call, chain fan-out cap reached");
                true
            }
            Ok(_) => false,
            Err(err) => self.fail_open(uuid, id, &err),
        }
    }

    /// Record that a call for `id` fired on this chain, minting the chain
    /// UUID if needed and refreshing the chain's sliding expiry.
    pub fn register(&self, chain: &mut CallChain, id: u64) -> Result<(), StoreError> {
        let uuid = chain.ensure_uuid();
        self.store
            .set_add(&chain_key(uuid), &id.to_string(), self.ttl)?;
        Ok(())
    }

    fn fail_open(&self, uuid: Uuid, id: u64, err: &StoreError) -> bool {
        tracing::warn!(chain = %uuid, id, error = %err, "recursion set unavailable, failing open");
        false
    }
}

fn chain_key(uuid: Uuid) -> String {
    format!("recursion:chain:{uuid}")
}
