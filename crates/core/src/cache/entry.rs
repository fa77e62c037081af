use std::sync::Arc;

use super::cancel::CancellationSource;
use super::key::CacheKey;

/// Opaque rendered bytes; cheap to clone out of the cache.
pub type Payload = Arc<[u8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Pending,
    Ready,
    /// The last build failed; the next access schedules a retry.
    Failed,
}

/// Who asked for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOrigin {
    /// Scheduled from the prediction window; cancelled when it leaves it.
    Predicted,
    /// Forced through `request_build`; never cancelled by prediction.
    Requested,
}

#[derive(Debug)]
pub struct CacheEntry {
    pub(crate) key: CacheKey,
    pub(crate) payload: Option<Payload>,
    pub(crate) size_bytes: usize,
    pub(crate) last_access: u64,
    pub(crate) build_state: BuildState,
    pub(crate) origin: BuildOrigin,
    pub(crate) build_id: u64,
    pub(crate) cancel: Option<CancellationSource>,
}

impl CacheEntry {
    pub(crate) fn pending(key: CacheKey, origin: BuildOrigin, build_id: u64, tick: u64) -> Self {
        Self {
            key,
            payload: None,
            size_bytes: 0,
            last_access: tick,
            build_state: BuildState::Pending,
            origin,
            build_id,
            cancel: Some(CancellationSource::new()),
        }
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    pub fn build_state(&self) -> BuildState {
        self.build_state
    }

    pub fn origin(&self) -> BuildOrigin {
        self.origin
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.build_state == BuildState::Pending
    }

    pub(crate) fn mark_ready(&mut self, payload: Payload, tick: u64) {
        self.size_bytes = payload.len();
        self.payload = Some(payload);
        self.build_state = BuildState::Ready;
        self.last_access = tick;
        self.cancel = None;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.payload = None;
        self.size_bytes = 0;
        self.build_state = BuildState::Failed;
        self.cancel = None;
    }

    /// Flag the in-flight build, if any, for abandonment.
    pub(crate) fn cancel_build(&self) {
        if let Some(source) = &self.cancel {
            source.cancel();
        }
    }
}
