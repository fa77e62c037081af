mod panel;
mod script;

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use depthsync_core::{
    Attachment, DecimatingRenderer, DepthState, InMemorySource, InputEvent,
    PredictiveRenderCache, ScrollInputController, TileOrigin, attach, resolve_tiles,
};
use depthsync_protocol::{ChangedFields, EngineConfig, ViewportGeometry};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use panel::{SimPanel, lossy_depths, misaligned_depths};
use script::Gesture;

const SUBJECT_TOP: f64 = 0.0;
const SUBJECT_BOTTOM: f64 = 3000.0;
const SAMPLE_STEP: f64 = 0.25;
const PANEL_HEIGHT: f64 = 640.0;
const ALIGNMENT_PROBES: usize = 16;
const BUILD_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => EngineConfig::default(),
    };
    info!(?config, "engine configuration");

    Sim::new(config)?.run(&script::review_session())
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    EngineConfig::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Synthetic gamma-ray log.
fn gamma_ray(depth: f64) -> f64 {
    60.0 + 25.0 * (depth / 37.0).sin() + 10.0 * (depth / 5.3).cos()
}

struct Sim {
    config: EngineConfig,
    state: DepthState,
    controller: ScrollInputController,
    cache: PredictiveRenderCache,
    panels: Vec<Attachment<SimPanel>>,
    curves_geometry: ViewportGeometry,
    clock: Rc<Cell<Instant>>,
    frames: u64,
    misaligned: usize,
}

impl Sim {
    fn new(config: EngineConfig) -> Result<Self> {
        let source = Arc::new(InMemorySource::from_fn(
            SUBJECT_TOP,
            SUBJECT_BOTTOM,
            SAMPLE_STEP,
            gamma_ray,
        ));
        info!(samples = source.len(), "synthetic subject loaded");

        let mut state = DepthState::from_subject(&*source)?;
        let curves_geometry =
            ViewportGeometry::new(420.0, PANEL_HEIGHT).with_padding(32.0, 12.0, 8.0, 8.0);
        let lithology_geometry =
            ViewportGeometry::new(96.0, PANEL_HEIGHT).with_padding(32.0, 12.0, 0.0, 0.0);
        let controller = ScrollInputController::new(&config, curves_geometry);
        let cache = PredictiveRenderCache::new(
            config.clone(),
            Arc::new(DecimatingRenderer::default()),
            source,
        )?;

        // The cache follows the simulated clock rather than wall time so that
        // settle detection lines up with the scripted frames.
        let clock = Rc::new(Cell::new(Instant::now()));
        cache.observe(&state.snapshot(), 0.0, clock.get());
        {
            let cache = cache.clone();
            let probe = controller.velocity_probe();
            let clock = Rc::clone(&clock);
            state.subscribe_to(ChangedFields::RANGE | ChangedFields::ZOOM, move |n| {
                cache.observe(&n.snapshot, probe.get(), clock.get());
            });
        }

        let panels = [
            Rc::new(RefCell::new(SimPanel::new(
                "curves",
                curves_geometry,
                ChangedFields::all(),
            ))),
            Rc::new(RefCell::new(SimPanel::new(
                "lithology",
                lithology_geometry,
                ChangedFields::RANGE | ChangedFields::ZOOM,
            ))),
        ]
        .into_iter()
        .map(|panel| attach(&mut state, panel))
        .collect();

        Ok(Self {
            config,
            state,
            controller,
            cache,
            panels,
            curves_geometry,
            clock,
            frames: 0,
            misaligned: 0,
        })
    }

    fn run(mut self, script: &[Gesture]) -> Result<()> {
        for gesture in script {
            debug!(?gesture, "performing");
            self.perform(*gesture);
        }
        self.settle()?;

        let snapshot = self.state.snapshot();
        let tiles = resolve_tiles(&self.cache, &snapshot, self.curves_geometry)?;
        let cached = tiles
            .iter()
            .filter(|tile| tile.origin == TileOrigin::Cached)
            .count();
        info!(
            frames = self.frames,
            notifications = self.state.seq(),
            viewport = %snapshot.viewport,
            zoom = snapshot.zoom,
            cursor = ?snapshot.cursor,
            "gesture replay finished"
        );
        info!(tiles = tiles.len(), cached, "viewport resolved");
        for panel in &self.panels {
            let panel = panel.adapter().borrow();
            info!(panel = panel.name(), notifications = panel.notifications(), "panel");
        }
        let stats = self.cache.stats();
        info!(
            ready = stats.ready,
            failed = stats.failed,
            resident_bytes = stats.resident_bytes,
            budget_bytes = stats.budget_bytes,
            started = stats.builds_started,
            finished = stats.builds_finished,
            cancelled = stats.builds_cancelled,
            evictions = stats.evictions,
            "render cache"
        );

        if self.misaligned > 0 {
            bail!("alignment checks failed at {} probe depths", self.misaligned);
        }
        Ok(())
    }

    fn perform(&mut self, gesture: Gesture) {
        match gesture {
            Gesture::Zoom { factor, pixel_y } => {
                self.input(|at| InputEvent::Zoom {
                    factor,
                    pixel_y,
                    at,
                });
                self.frame();
            }
            Gesture::Drag {
                from_y,
                to_y,
                frames,
            } => {
                self.input(|at| InputEvent::DragStart { pixel_y: from_y, at });
                let frames = frames.max(1);
                for i in 1..=frames {
                    let pixel_y = from_y + (to_y - from_y) * f64::from(i) / f64::from(frames);
                    self.input(|at| InputEvent::DragMove { pixel_y, at });
                    self.frame();
                }
                self.input(|at| InputEvent::DragEnd { at });
            }
            Gesture::Wheel { delta_px, events } => {
                for _ in 0..events {
                    self.input(|at| InputEvent::Wheel { delta_px, at });
                    self.frame();
                }
            }
            Gesture::Key(command) => {
                self.input(|at| InputEvent::Key { command, at });
                self.frame();
            }
            Gesture::Click { pixel_y } => {
                self.input(|at| InputEvent::Click { pixel_y, at });
                self.frame();
            }
            Gesture::Idle { frames } => {
                for _ in 0..frames {
                    self.frame();
                }
            }
        }
    }

    fn input(&mut self, event: impl FnOnce(Instant) -> InputEvent) {
        let event = event(self.clock.get());
        self.controller.handle(&mut self.state, event);
    }

    fn frame(&mut self) {
        let now = self.clock.get() + self.controller.frame_interval();
        self.clock.set(now);
        self.controller.tick(&mut self.state, now);
        self.cache.poll(now);
        self.frames += 1;
        for panel in &self.panels {
            panel.catch_up();
        }
        self.check_alignment();
    }

    fn check_alignment(&mut self) {
        let mappers: Vec<_> = self
            .panels
            .iter()
            .filter_map(|panel| {
                let panel = panel.adapter().borrow();
                panel.mapper().map(|mapper| (panel.name(), mapper))
            })
            .collect();
        let Some(((reference_name, reference), rest)) = mappers.split_first() else {
            return;
        };
        let lossy = lossy_depths(reference, ALIGNMENT_PROBES, self.config.round_trip_epsilon);
        if !lossy.is_empty() {
            warn!(frame = self.frames, panel = reference_name, depths = ?lossy, "pixel round trip lost depth");
            self.misaligned += lossy.len();
        }
        for (name, mapper) in rest {
            let drifted = misaligned_depths(reference, mapper, ALIGNMENT_PROBES);
            if !drifted.is_empty() {
                warn!(
                    frame = self.frames,
                    reference = reference_name,
                    panel = name,
                    depths = ?drifted,
                    "panels disagree on pixel positions"
                );
                self.misaligned += drifted.len();
            }
        }
    }

    /// Wait for outstanding builds, let the view settle, then wait for the
    /// fine builds it triggers.
    fn settle(&mut self) -> Result<()> {
        self.wait_for_builds()?;
        let settled = self.clock.get() + self.config.settle_delay();
        self.clock.set(settled);
        let report = self.cache.poll(settled);
        debug!(?report, "view settled");
        self.wait_for_builds()
    }

    fn wait_for_builds(&self) -> Result<()> {
        let deadline = Instant::now() + BUILD_TIMEOUT;
        while !self.cache.is_idle() {
            if Instant::now() >= deadline {
                bail!("render builds did not finish within {BUILD_TIMEOUT:?}");
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}
