//! Contract between the engine and the panels that draw depth-indexed data.
//!
//! A panel never keeps a depth-to-pixel mapping between notifications. On
//! every change it receives a [`CoordinateMapper`] built from the range in
//! the notification and its own current geometry, and positions everything
//! through that.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use depthsync_protocol::{ChangedFields, DepthSnapshot, Notification, QualityTier, ViewportGeometry};
use tracing::warn;

use crate::cache::{BuildError, CacheKey, Payload, PredictiveRenderCache, TileGrid};
use crate::mapper::CoordinateMapper;
use crate::state::{DepthState, ListenerId};

pub trait ViewAdapter {
    /// Current drawing surface; may change between notifications.
    fn geometry(&self) -> ViewportGeometry;

    /// Fields this panel reacts to.
    fn interest(&self) -> ChangedFields {
        ChangedFields::all()
    }

    fn on_depth_change(&mut self, notification: &Notification, mapper: &CoordinateMapper);
}

/// Subscribe `adapter` to `state`, handing it a freshly built mapper with
/// every notification.
///
/// A notification that arrives while the panel is already borrowed (for
/// example when the panel itself mutates `state` from its handler) is held
/// on the returned [`Attachment`] until [`Attachment::catch_up`] delivers it.
/// Only the latest such notification is kept; its snapshot is complete.
pub fn attach<A>(state: &mut DepthState, adapter: Rc<RefCell<A>>) -> Attachment<A>
where
    A: ViewAdapter + 'static,
{
    let interest = adapter.borrow().interest();
    let missed = Rc::new(Cell::new(None));
    let id = {
        let adapter = Rc::clone(&adapter);
        let missed = Rc::clone(&missed);
        state.subscribe_to(interest, move |notification| {
            let Ok(mut panel) = adapter.try_borrow_mut() else {
                warn!(seq = notification.seq, "panel busy, notification deferred");
                missed.set(Some(*notification));
                return;
            };
            missed.set(None);
            deliver(&mut *panel, notification);
        })
    };
    Attachment { id, adapter, missed }
}

fn deliver<A: ViewAdapter + ?Sized>(panel: &mut A, notification: &Notification) {
    let mapper = CoordinateMapper::new(notification.snapshot.viewport, panel.geometry());
    panel.on_depth_change(notification, &mapper);
}

/// A panel's subscription, returned by [`attach`].
pub struct Attachment<A> {
    id: ListenerId,
    adapter: Rc<RefCell<A>>,
    missed: Rc<Cell<Option<Notification>>>,
}

impl<A: ViewAdapter> Attachment<A> {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn adapter(&self) -> &Rc<RefCell<A>> {
        &self.adapter
    }

    /// A notification was deferred because the panel was busy.
    pub fn has_missed(&self) -> bool {
        self.missed.get().is_some()
    }

    /// Deliver the deferred notification, if any. Returns whether one was
    /// delivered; `false` also when the panel is still borrowed.
    pub fn catch_up(&self) -> bool {
        let Some(notification) = self.missed.get() else {
            return false;
        };
        let Ok(mut panel) = self.adapter.try_borrow_mut() else {
            return false;
        };
        self.missed.set(None);
        deliver(&mut *panel, &notification);
        true
    }
}

impl<A> std::fmt::Debug for Attachment<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("id", &self.id)
            .field("missed", &self.missed.get().map(|n| n.seq))
            .finish_non_exhaustive()
    }
}

/// Where a placed tile's payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOrigin {
    Cached,
    /// Cache miss; rendered synchronously and not stored.
    Direct,
}

#[derive(Debug, Clone)]
pub struct PlacedTile {
    pub key: CacheKey,
    pub payload: Payload,
    pub origin: TileOrigin,
    /// Surface pixel of the tile's top edge; may be above the visible area.
    pub top_px: f64,
    pub height_px: f64,
}

/// Payloads for every tile under the viewport, cache first. A tile missing
/// from the cache is rendered directly at the fine tier.
pub fn resolve_tiles(
    cache: &PredictiveRenderCache,
    snapshot: &DepthSnapshot,
    geometry: ViewportGeometry,
) -> Result<Vec<PlacedTile>, BuildError> {
    let grid = TileGrid::new(snapshot.bounds, snapshot.default_span(), snapshot.zoom);
    let mapper = CoordinateMapper::new(snapshot.viewport, geometry);

    grid.tiles_overlapping(&snapshot.viewport)
        .into_iter()
        .map(|tile| -> Result<PlacedTile, BuildError> {
            let (key, payload, origin) = match cache.query_best(tile, snapshot.zoom) {
                Some((tier, payload)) => (
                    CacheKey::new(tile, snapshot.zoom, tier),
                    payload,
                    TileOrigin::Cached,
                ),
                None => {
                    let key = CacheKey::new(tile, snapshot.zoom, QualityTier::Fine);
                    (key, cache.render_direct(&key)?, TileOrigin::Direct)
                }
            };
            Ok(PlacedTile {
                key,
                payload,
                origin,
                top_px: mapper.depth_to_pixel(tile.from()),
                height_px: mapper.thickness_to_pixels(tile.span()),
            })
        })
        .collect()
}
