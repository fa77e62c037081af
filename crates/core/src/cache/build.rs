use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::cancel::CancellationToken;
use super::error::BuildError;
use super::key::CacheKey;
use crate::source::SampleSource;

/// Per-build handle passed to a [`TileRenderer`].
#[derive(Debug, Clone)]
pub struct BuildContext {
    key: CacheKey,
    token: CancellationToken,
}

impl BuildContext {
    pub fn new(key: CacheKey, token: CancellationToken) -> Self {
        Self { key, token }
    }

    /// Context for a synchronous render that cannot be cancelled.
    pub fn uncancellable(key: CacheKey) -> Self {
        Self::new(key, CancellationToken::never())
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Call between incremental steps; bails out with
    /// [`BuildError::Cancelled`] once the build has been abandoned.
    pub fn checkpoint(&self) -> Result<(), BuildError> {
        if self.token.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Produces the opaque payload for one cache key. Runs on render workers.
pub trait TileRenderer: Send + Sync {
    fn render(&self, ctx: &BuildContext, source: &dyn SampleSource) -> Result<Vec<u8>, BuildError>;
}

impl<F> TileRenderer for F
where
    F: Fn(&BuildContext, &dyn SampleSource) -> Result<Vec<u8>, BuildError> + Send + Sync,
{
    fn render(&self, ctx: &BuildContext, source: &dyn SampleSource) -> Result<Vec<u8>, BuildError> {
        self(ctx, source)
    }
}

/// Run `renderer`, turning a panic inside it into [`BuildError::Panicked`]
/// so that a broken renderer fails one build instead of the worker.
pub(crate) fn render_guarded(
    renderer: &dyn TileRenderer,
    ctx: &BuildContext,
    source: &dyn SampleSource,
) -> Result<Vec<u8>, BuildError> {
    panic::catch_unwind(AssertUnwindSafe(|| renderer.render(ctx, source)))
        .unwrap_or_else(|payload| Err(BuildError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use depthsync_protocol::{DepthRange, QualityTier};

    use super::*;
    use crate::source::InMemorySource;

    fn ctx() -> BuildContext {
        let range = DepthRange::new(0.0, 10.0).unwrap();
        BuildContext::uncancellable(CacheKey::new(range, 1.0, QualityTier::Coarse))
    }

    #[test]
    fn panic_becomes_build_error() {
        let renderer = |_: &BuildContext, _: &dyn SampleSource| -> Result<Vec<u8>, BuildError> {
            panic!("bad tile")
        };
        let source = InMemorySource::default();
        match render_guarded(&renderer, &ctx(), &source) {
            Err(BuildError::Panicked(message)) => assert_eq!(message, "bad tile"),
            other => panic!("expected a panic error, got {other:?}"),
        }
    }

    #[test]
    fn normal_render_passes_through() {
        let renderer =
            |_: &BuildContext, _: &dyn SampleSource| Ok::<_, BuildError>(vec![1, 2]);
        let source = InMemorySource::default();
        assert_eq!(render_guarded(&renderer, &ctx(), &source).unwrap(), vec![1, 2]);
    }
}
