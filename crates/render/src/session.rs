use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::DVec3;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sunrise_common::Timestamp;
use sunrise_kernel::{Handle, ObjectKind, PixelFormat, RendererContext, ResourceScope, World, WorldError};
use sunrise_scene::{Ephemeris, LightRig, SceneAssembly, SceneError, SunPosition};

use crate::camera::{Camera, CameraState};
use crate::config::{RendererConfig, SessionConfig};
use crate::error::RenderError;
use crate::tile::{TileAddress, TileRenderer};
use crate::worker::{CancellationToken, RenderTask, RenderWorker, failed_task};

/// One tile to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub width: u32,
    pub height: u32,
    pub tile: TileAddress,
    pub position: DVec3,
    pub direction: DVec3,
    pub up: DVec3,
    pub time: Timestamp,
}

/// Cropped RGBA pixels, `width * height * 4` bytes, row-major from the top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderResponse {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Session lifecycle. A failed or cancelled request leaves the state as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Built,
    Rendering,
    Ready,
    Closed,
}

/// What the last successful render used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub tile: TileAddress,
    pub sun: SunPosition,
    pub camera: CameraState,
    pub instances: usize,
    pub lights: usize,
    pub elapsed: Duration,
}

struct Resources {
    world: World,
    rig: LightRig,
    camera: Camera,
    renderer: Handle,
    image_ops: Option<Handle>,
    scope: ResourceScope,
    last: Option<FrameInfo>,
}

impl Resources {
    fn close(mut self) {
        self.world.close();
        drop(self.rig);
        self.scope.close();
    }
}

/// State shared between a session and its worker thread.
pub(crate) struct SessionCore {
    ctx: RendererContext,
    tiles: TileRenderer,
    state: Mutex<SessionState>,
    // Held across the whole render: at most one request in flight.
    resources: Mutex<Option<Resources>>,
}

impl SessionCore {
    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    pub(crate) fn render(
        &self,
        request: &RenderRequest,
        cancel: &CancellationToken,
    ) -> Result<RenderResponse, RenderError> {
        let mut guard = self.resources.lock();
        let res = guard.as_mut().ok_or(RenderError::Closed)?;
        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Rendering);
        let result = self.render_locked(res, request, cancel);
        match &result {
            Ok(_) => self.set_state(SessionState::Ready),
            Err(e) => {
                self.set_state(previous);
                tracing::warn!(error = %e, tile = ?request.tile, "render failed");
            }
        }
        result
    }

    fn render_locked(
        &self,
        res: &mut Resources,
        request: &RenderRequest,
        cancel: &CancellationToken,
    ) -> Result<RenderResponse, RenderError> {
        let _span = tracing::info_span!(
            "render",
            width = request.width,
            height = request.height,
            row = %request.tile.row,
            col = %request.tile.col
        )
        .entered();
        let start = Instant::now();
        let ctx = &self.ctx;
        let transient = RenderError::TransientRenderFailure;

        let plan = self.tiles.plan(request.tile, request.width, request.height)?;
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let light_start = Instant::now();
        let lights = res
            .rig
            .update(ctx, request.time, request.position)
            .map_err(transient_scene)?;
        let sun = lights.sun();
        let light_count = lights.len();
        res.world.set_lights(Box::new(lights));
        res.world.commit().map_err(transient_world)?;
        tracing::debug!(
            elapsed_ns = light_start.elapsed().as_nanos() as u64,
            time = request.time.unix_seconds(),
            "lights recreated"
        );

        let camera = CameraState {
            position: request.position,
            direction: request.direction,
            up: request.up,
            aspect: request.width as f32 / request.height as f32,
            window: plan.padded,
        };
        res.camera.apply(ctx, camera).map_err(transient)?;

        let mut scope = ResourceScope::new("request");
        let frame_buffer = ctx
            .new_frame_buffer(&mut scope, plan.frame_width(), plan.frame_height(), PixelFormat::Srgba)
            .map_err(transient)?;
        if let Some(ops) = res.image_ops {
            ctx.set_object(frame_buffer, "imageOperation", ops).map_err(transient)?;
        }
        ctx.commit(frame_buffer).map_err(transient)?;

        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        ctx.render_frame_blocking(frame_buffer, res.renderer, res.camera.handle(), res.world.handle())
            .map_err(transient)?;

        let decode_start = Instant::now();
        let frame = ctx.read_frame_buffer(frame_buffer).map_err(transient)?;
        scope.close();
        let pixels = plan.crop(&frame)?;
        tracing::debug!(elapsed_ns = decode_start.elapsed().as_nanos() as u64, "frame decoded");

        let elapsed = start.elapsed();
        tracing::info!(elapsed_ns = elapsed.as_nanos() as u64, "tile rendered");
        res.last = Some(FrameInfo {
            tile: request.tile,
            sun,
            camera,
            instances: res.world.instance_count(),
            lights: light_count,
            elapsed,
        });
        Ok(RenderResponse {
            pixels,
            width: request.width,
            height: request.height,
        })
    }

    fn close(&self) {
        let taken = self.resources.lock().take();
        self.set_state(SessionState::Closed);
        if let Some(resources) = taken {
            resources.close();
            tracing::info!("session closed");
        }
    }
}

/// Engine failures while refreshing per-request state fail only that request.
fn transient_scene(error: SceneError) -> RenderError {
    match error {
        SceneError::Engine(e) => RenderError::TransientRenderFailure(e),
        SceneError::World(e) => transient_world(e),
        other => RenderError::Scene(other),
    }
}

fn transient_world(error: WorldError) -> RenderError {
    match error {
        WorldError::Engine(e) => RenderError::TransientRenderFailure(e),
        other => RenderError::World(other),
    }
}

/// A built scene plus renderer, camera and image operations, serving tile requests.
///
/// `render` calls are serialized; `render_async` queues onto a single worker
/// thread that goes through the same lock. Closing releases every engine
/// object the session acquired.
pub struct RenderSession {
    core: Arc<SessionCore>,
    worker: Mutex<Option<RenderWorker>>,
}

impl RenderSession {
    /// Load the scene described by `config` and prepare for rendering.
    ///
    /// Missing or corrupt geometry and an empty world abort construction.
    pub fn build(
        ctx: &RendererContext,
        config: &SessionConfig,
        ephemeris: Arc<dyn Ephemeris>,
    ) -> Result<Self, RenderError> {
        let _span = tracing::info_span!("session_build").entered();
        let mut world = World::new(ctx, config.instance_cap)?;
        SceneAssembly::new(ctx, &config.scene).populate(&mut world)?;
        let rig = LightRig::build(ctx, config.lights.clone(), ephemeris)?;
        Self::from_parts(ctx, world, rig, &config.renderer, config.ghost_margin)
    }

    /// Assemble a session from an already populated world.
    pub fn from_parts(
        ctx: &RendererContext,
        mut world: World,
        rig: LightRig,
        renderer: &RendererConfig,
        ghost_margin: u32,
    ) -> Result<Self, RenderError> {
        world.set_lights(Box::new(rig.update(ctx, Timestamp::REFERENCE_DAY, DVec3::Z)?));
        world.commit()?;

        let mut scope = ResourceScope::new("session");
        let renderer_handle = ctx.new_renderer(&mut scope, &renderer.renderer)?;
        ctx.set_int(renderer_handle, "pixelSamples", renderer.pixel_samples)?;
        ctx.set_vec4f(renderer_handle, "backgroundColor", renderer.background_color)?;
        ctx.commit(renderer_handle)?;

        let camera = Camera::new(ctx, &mut scope, &renderer.camera)?;

        let image_ops = if renderer.denoise {
            let denoiser = ctx.new_image_operation(&mut scope, "denoiser")?;
            ctx.commit(denoiser)?;
            Some(ctx.new_object_list(&mut scope, ObjectKind::ImageOperation, &[denoiser])?)
        } else {
            None
        };

        tracing::info!(
            instances = world.instance_count(),
            lights = world.light_count(),
            ghost_margin,
            "session built"
        );
        Ok(Self {
            core: Arc::new(SessionCore {
                ctx: ctx.clone(),
                tiles: TileRenderer::new(ghost_margin),
                state: Mutex::new(SessionState::Built),
                resources: Mutex::new(Some(Resources {
                    world,
                    rig,
                    camera,
                    renderer: renderer_handle,
                    image_ops,
                    scope,
                    last: None,
                })),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.core.state.lock()
    }

    pub fn ghost_margin(&self) -> u32 {
        self.core.tiles.ghost()
    }

    /// Details of the last successful render.
    pub fn last_frame(&self) -> Option<FrameInfo> {
        self.core.resources.lock().as_ref().and_then(|r| r.last)
    }

    /// Render one tile on the calling thread.
    pub fn render(&self, request: &RenderRequest) -> Result<RenderResponse, RenderError> {
        self.core.render(request, &CancellationToken::new())
    }

    /// Render on the calling thread unless `cancel` fires before the engine call.
    pub fn render_cancellable(
        &self,
        request: &RenderRequest,
        cancel: &CancellationToken,
    ) -> Result<RenderResponse, RenderError> {
        self.core.render(request, cancel)
    }

    /// Queue a render on the session's worker thread.
    pub fn render_async(&self, request: RenderRequest) -> RenderTask {
        if self.state() == SessionState::Closed {
            return failed_task(RenderError::Closed);
        }
        let mut worker = self.worker.lock();
        if worker.is_none() {
            match RenderWorker::spawn(Arc::clone(&self.core)) {
                Ok(spawned) => *worker = Some(spawned),
                Err(e) => {
                    tracing::error!(error = %e, "cannot spawn render worker");
                    return failed_task(RenderError::WorkerGone);
                }
            }
        }
        match worker.as_ref() {
            Some(w) => w.submit(request),
            None => failed_task(RenderError::WorkerGone),
        }
    }

    /// Release every engine object. Queued async renders resolve to `Closed`. Idempotent.
    pub fn close(&self) {
        self.core.close();
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.close();
    }
}
