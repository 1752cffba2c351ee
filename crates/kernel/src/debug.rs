use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::{
    DataType, Engine, EngineError, Handle, ObjectKind, Param, PixelFormat, SharedBytes,
};

/// Acquire/release accounting of a [`DebugEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub acquired: u64,
    pub released: u64,
    pub live: usize,
    pub renders: u64,
    /// Renders that started while another was still running.
    pub overlapping_renders: u64,
    /// Commits issued while a render was running.
    pub commits_during_render: u64,
}

#[derive(Debug)]
struct Object {
    kind: ObjectKind,
    subtype: Option<String>,
    pending: BTreeMap<String, Param>,
    committed: Option<BTreeMap<String, Param>>,
    items: Vec<Handle>,
    frame: Option<Frame>,
}

#[derive(Debug)]
struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    mapped: bool,
}

#[derive(Debug, Default)]
struct State {
    next: u64,
    objects: HashMap<Handle, Object>,
    stats: EngineStats,
    violations: Vec<String>,
    fail_renders: u32,
    fail_commits: Option<(ObjectKind, u32)>,
    render_delay: Duration,
}

impl State {
    fn insert(&mut self, object: Object) -> Handle {
        self.next += 1;
        let handle = Handle(self.next);
        self.objects.insert(handle, object);
        self.stats.acquired += 1;
        self.stats.live = self.objects.len();
        handle
    }

    fn committed(&self, handle: Handle, kind: ObjectKind) -> Result<&BTreeMap<String, Param>, EngineError> {
        let object = self
            .objects
            .get(&handle)
            .ok_or(EngineError::UnknownHandle(handle))?;
        if object.kind != kind {
            return Err(EngineError::Rejected {
                object: format!("{handle:?}"),
                reason: format!("expected {kind:?}, got {:?}", object.kind),
            });
        }
        object.committed.as_ref().ok_or_else(|| EngineError::Rejected {
            object: format!("{handle:?}"),
            reason: "not committed".into(),
        })
    }
}

/// In-process reference engine.
///
/// Records every object and its parameters, counts acquisitions and releases,
/// flags double or unknown releases, and renders a deterministic gradient of
/// the camera's image window: a pixel's red and green channels encode the
/// normalized screen position of its center. Adjacent tiles therefore agree on
/// overlapping pixels, which makes seam handling testable without a ray tracer.
#[derive(Debug, Default)]
pub struct DebugEngine {
    state: Mutex<State>,
    in_flight: AtomicUsize,
}

impl DebugEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> EngineStats {
        self.state.lock().stats
    }

    /// Release-discipline violations observed so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Make the next `count` renders fail with [`EngineError::RenderFailed`].
    pub fn fail_next_renders(&self, count: u32) {
        self.state.lock().fail_renders = count;
    }

    /// Make the next `count` commits of `kind` objects fail with [`EngineError::Rejected`].
    pub fn fail_next_commits(&self, kind: ObjectKind, count: u32) {
        self.state.lock().fail_commits = Some((kind, count));
    }

    /// Hold every render for `delay` before producing the frame.
    pub fn set_render_delay(&self, delay: Duration) {
        self.state.lock().render_delay = delay;
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.state.lock().objects.contains_key(&handle)
    }

    pub fn is_committed(&self, handle: Handle) -> bool {
        self.state
            .lock()
            .objects
            .get(&handle)
            .is_some_and(|o| o.committed.is_some())
    }

    /// Committed value of `name` on `handle`.
    pub fn param(&self, handle: Handle, name: &str) -> Option<Param> {
        let state = self.state.lock();
        state
            .objects
            .get(&handle)?
            .committed
            .as_ref()?
            .get(name)
            .cloned()
    }

    pub fn kind(&self, handle: Handle) -> Option<ObjectKind> {
        self.state.lock().objects.get(&handle).map(|o| o.kind)
    }

    pub fn subtype(&self, handle: Handle) -> Option<String> {
        self.state.lock().objects.get(&handle)?.subtype.clone()
    }

    /// Items of an object list.
    pub fn list_items(&self, handle: Handle) -> Vec<Handle> {
        self.state
            .lock()
            .objects
            .get(&handle)
            .map(|o| o.items.clone())
            .unwrap_or_default()
    }

    /// Live objects of a kind.
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state
            .lock()
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .count()
    }

    fn draw(
        &self,
        frame_buffer: Handle,
        renderer: Handle,
        camera: Handle,
        world: Handle,
    ) -> Result<f32, EngineError> {
        let mut state = self.state.lock();
        state.committed(renderer, ObjectKind::Renderer)?;
        let world_params = state.committed(world, ObjectKind::World)?;
        let lights = list_len(&state, world_params, "light");
        let camera_params = state.committed(camera, ObjectKind::Camera)?;
        let start = vec2(camera_params, "imageStart", [0.0, 0.0]);
        let end = vec2(camera_params, "imageEnd", [1.0, 1.0]);
        state.committed(frame_buffer, ObjectKind::FrameBuffer)?;

        if state.fail_renders > 0 {
            state.fail_renders -= 1;
            return Err(EngineError::RenderFailed("injected failure".into()));
        }

        state.stats.renders += 1;
        let frame = state
            .objects
            .get_mut(&frame_buffer)
            .and_then(|o| o.frame.as_mut())
            .ok_or(EngineError::UnknownHandle(frame_buffer))?;
        frame.pixels = gradient(frame.width, frame.height, start, end, lights);
        Ok(0.0)
    }
}

fn vec2(params: &BTreeMap<String, Param>, name: &str, default: [f32; 2]) -> [f32; 2] {
    match params.get(name) {
        Some(Param::Vec2f(v)) => *v,
        _ => default,
    }
}

fn list_len(state: &State, params: &BTreeMap<String, Param>, name: &str) -> usize {
    match params.get(name) {
        Some(Param::Object(list)) => state.objects.get(list).map_or(0, |o| o.items.len()),
        _ => 0,
    }
}

fn gradient(width: u32, height: u32, start: [f32; 2], end: [f32; 2], lights: usize) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    let (w, h) = (f64::from(width), f64::from(height));
    let blue = u8::try_from(lights.saturating_mul(32)).unwrap_or(u8::MAX);
    for j in 0..height {
        let v = f64::from(start[1]) + (f64::from(j) + 0.5) / h * f64::from(end[1] - start[1]);
        for i in 0..width {
            let u = f64::from(start[0]) + (f64::from(i) + 0.5) / w * f64::from(end[0] - start[0]);
            pixels.push((u.clamp(0.0, 1.0) * 255.0).round() as u8);
            pixels.push((v.clamp(0.0, 1.0) * 255.0).round() as u8);
            pixels.push(blue);
            pixels.push(255);
        }
    }
    pixels
}

impl Engine for DebugEngine {
    fn new_object(&self, kind: ObjectKind, subtype: Option<&str>) -> Result<Handle, EngineError> {
        let mut state = self.state.lock();
        Ok(state.insert(Object {
            kind,
            subtype: subtype.map(str::to_owned),
            pending: BTreeMap::new(),
            committed: None,
            items: Vec::new(),
            frame: None,
        }))
    }

    fn new_shared_data(
        &self,
        bytes: SharedBytes,
        data_type: DataType,
        count: usize,
    ) -> Result<Handle, EngineError> {
        let available = (*bytes).as_ref().len();
        if available < count * data_type.size() {
            return Err(EngineError::Rejected {
                object: "shared data".into(),
                reason: format!("{count} x {data_type:?} needs more than {available} bytes"),
            });
        }
        let mut state = self.state.lock();
        Ok(state.insert(Object {
            kind: ObjectKind::Data,
            subtype: Some(format!("{data_type:?}")),
            pending: BTreeMap::new(),
            committed: None,
            items: Vec::new(),
            frame: None,
        }))
    }

    fn new_object_list(&self, kind: ObjectKind, items: &[Handle]) -> Result<Handle, EngineError> {
        let mut state = self.state.lock();
        for item in items {
            match state.objects.get(item) {
                Some(o) if o.kind == kind => {}
                Some(o) => {
                    return Err(EngineError::Rejected {
                        object: format!("{kind:?} list"),
                        reason: format!("{item:?} is a {:?}", o.kind),
                    });
                }
                None => return Err(EngineError::UnknownHandle(*item)),
            }
        }
        Ok(state.insert(Object {
            kind: ObjectKind::Data,
            subtype: Some(format!("{kind:?}[]")),
            pending: BTreeMap::new(),
            committed: None,
            items: items.to_vec(),
            frame: None,
        }))
    }

    fn new_frame_buffer(
        &self,
        width: u32,
        height: u32,
        _format: PixelFormat,
    ) -> Result<Handle, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::Rejected {
                object: "frame buffer".into(),
                reason: format!("empty size {width}x{height}"),
            });
        }
        let mut state = self.state.lock();
        Ok(state.insert(Object {
            kind: ObjectKind::FrameBuffer,
            subtype: None,
            pending: BTreeMap::new(),
            committed: None,
            items: Vec::new(),
            frame: Some(Frame {
                width,
                height,
                pixels: Vec::new(),
                mapped: false,
            }),
        }))
    }

    fn set_param(&self, handle: Handle, name: &str, value: Param) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if let Param::Object(target) = &value {
            if !state.objects.contains_key(target) {
                return Err(EngineError::UnknownHandle(*target));
            }
        }
        let object = state
            .objects
            .get_mut(&handle)
            .ok_or(EngineError::UnknownHandle(handle))?;
        object.pending.insert(name.to_owned(), value);
        Ok(())
    }

    fn commit(&self, handle: Handle) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if self.in_flight.load(Ordering::Acquire) > 0 {
            state.stats.commits_during_render += 1;
        }
        let kind = state
            .objects
            .get(&handle)
            .ok_or(EngineError::UnknownHandle(handle))?
            .kind;
        if let Some((failing, remaining)) = state.fail_commits.as_mut() {
            if *failing == kind && *remaining > 0 {
                *remaining -= 1;
                return Err(EngineError::Rejected {
                    object: format!("{handle:?}"),
                    reason: "injected commit failure".into(),
                });
            }
        }
        let object = state
            .objects
            .get_mut(&handle)
            .ok_or(EngineError::UnknownHandle(handle))?;
        object.committed = Some(object.pending.clone());
        Ok(())
    }

    fn render_frame_blocking(
        &self,
        frame_buffer: Handle,
        renderer: Handle,
        camera: Handle,
        world: Handle,
    ) -> Result<f32, EngineError> {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) > 0 {
            self.state.lock().stats.overlapping_renders += 1;
        }
        let delay = self.state.lock().render_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let result = self.draw(frame_buffer, renderer, camera, world);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn map_frame_buffer(&self, frame_buffer: Handle) -> Result<Vec<u8>, EngineError> {
        let mut state = self.state.lock();
        let frame = state
            .objects
            .get_mut(&frame_buffer)
            .and_then(|o| o.frame.as_mut())
            .ok_or(EngineError::UnknownHandle(frame_buffer))?;
        frame.mapped = true;
        Ok(frame.pixels.clone())
    }

    fn unmap_frame_buffer(&self, frame_buffer: Handle) {
        let mut state = self.state.lock();
        match state.objects.get_mut(&frame_buffer).and_then(|o| o.frame.as_mut()) {
            Some(frame) if frame.mapped => frame.mapped = false,
            _ => state
                .violations
                .push(format!("unmap of unmapped frame buffer {frame_buffer:?}")),
        }
    }

    fn release(&self, handle: Handle) {
        let mut state = self.state.lock();
        match state.objects.remove(&handle) {
            Some(object) => {
                if object.frame.as_ref().is_some_and(|f| f.mapped) {
                    state
                        .violations
                        .push(format!("release of mapped frame buffer {handle:?}"));
                }
                state.stats.released += 1;
                state.stats.live = state.objects.len();
            }
            None => {
                tracing::warn!(?handle, "release of unknown handle");
                state
                    .violations
                    .push(format!("release of unknown handle {handle:?}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;

    fn render_setup(engine: &DebugEngine, start: [f32; 2], end: [f32; 2]) -> (Handle, Handle, Handle) {
        let renderer = engine.new_object(ObjectKind::Renderer, Some("scivis")).unwrap();
        engine.commit(renderer).unwrap();
        let camera = engine.new_object(ObjectKind::Camera, Some("perspective")).unwrap();
        engine.set_param(camera, "imageStart", Param::Vec2f(start)).unwrap();
        engine.set_param(camera, "imageEnd", Param::Vec2f(end)).unwrap();
        engine.commit(camera).unwrap();
        let world = engine.new_object(ObjectKind::World, None).unwrap();
        engine.commit(world).unwrap();
        (renderer, camera, world)
    }

    #[test]
    fn double_release_is_flagged() {
        let engine = DebugEngine::new();
        let h = engine.new_object(ObjectKind::Light, Some("ambient")).unwrap();
        engine.release(h);
        engine.release(h);
        assert_eq!(engine.violations().len(), 1);
        assert_eq!(engine.stats().released, 1);
    }

    #[test]
    fn params_visible_only_after_commit() {
        let engine = DebugEngine::new();
        let h = engine.new_object(ObjectKind::Light, Some("distant")).unwrap();
        engine.set_param(h, "intensity", Param::Float(3.0)).unwrap();
        assert_eq!(engine.param(h, "intensity"), None);
        engine.commit(h).unwrap();
        assert_eq!(engine.param(h, "intensity"), Some(Param::Float(3.0)));
    }

    #[test]
    fn render_requires_committed_camera() {
        let engine = DebugEngine::new();
        let (renderer, _, world) = render_setup(&engine, [0.0, 0.0], [1.0, 1.0]);
        let camera = engine.new_object(ObjectKind::Camera, Some("perspective")).unwrap();
        let fb = engine.new_frame_buffer(4, 4, PixelFormat::Srgba).unwrap();
        engine.commit(fb).unwrap();
        assert!(engine.render_frame_blocking(fb, renderer, camera, world).is_err());
    }

    #[test]
    fn gradient_follows_image_window() {
        let engine = DebugEngine::new();
        let (renderer, camera, world) = render_setup(&engine, [0.5, 0.0], [1.0, 0.5]);
        let fb = engine.new_frame_buffer(2, 2, PixelFormat::Srgba).unwrap();
        engine.commit(fb).unwrap();
        engine.render_frame_blocking(fb, renderer, camera, world).unwrap();
        let pixels = engine.map_frame_buffer(fb).unwrap();
        engine.unmap_frame_buffer(fb);
        assert_eq!(pixels.len(), 16);
        // first pixel center at u = 0.625, v = 0.125
        assert_eq!(pixels[0], (0.625f64 * 255.0).round() as u8);
        assert_eq!(pixels[1], (0.125f64 * 255.0).round() as u8);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let engine = DebugEngine::new();
        let (renderer, camera, world) = render_setup(&engine, [0.0, 0.0], [1.0, 1.0]);
        let fb = engine.new_frame_buffer(1, 1, PixelFormat::Srgba).unwrap();
        engine.commit(fb).unwrap();
        engine.fail_next_renders(1);
        assert!(matches!(
            engine.render_frame_blocking(fb, renderer, camera, world),
            Err(EngineError::RenderFailed(_))
        ));
        assert!(engine.render_frame_blocking(fb, renderer, camera, world).is_ok());
    }

    #[test]
    fn object_list_rejects_wrong_kind() {
        let engine = DebugEngine::new();
        let light = engine.new_object(ObjectKind::Light, Some("ambient")).unwrap();
        assert!(engine.new_object_list(ObjectKind::Instance, &[light]).is_err());
        let list = engine.new_object_list(ObjectKind::Light, &[light]).unwrap();
        assert_eq!(engine.list_items(list), vec![light]);
    }

    #[test]
    fn light_count_shade_saturates() {
        let shade = |lights| gradient(1, 1, [0.0, 0.0], [1.0, 1.0], lights)[2];
        assert_eq!(shade(0), 0);
        assert_eq!(shade(1), 32);
        assert_eq!(shade(7), 224);
        assert_eq!(shade(8), 255);
        assert_eq!(shade(usize::MAX), 255);
    }

    #[test]
    fn injected_commit_failure_targets_one_kind() {
        let engine = DebugEngine::new();
        let light = engine.new_object(ObjectKind::Light, Some("distant")).unwrap();
        let camera = engine.new_object(ObjectKind::Camera, Some("perspective")).unwrap();
        engine.fail_next_commits(ObjectKind::Light, 1);
        engine.commit(camera).unwrap();
        assert!(matches!(engine.commit(light), Err(EngineError::Rejected { .. })));
        assert!(!engine.is_committed(light));
        engine.commit(light).unwrap();
        assert!(engine.is_committed(light));
    }

    #[test]
    fn concurrent_renders_and_commits_are_counted() {
        let engine = Arc::new(DebugEngine::new());
        let (renderer, camera, world) = render_setup(&engine, [0.0, 0.0], [1.0, 1.0]);
        engine.set_render_delay(Duration::from_millis(300));
        let barrier = Arc::new(Barrier::new(2));
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let fb = engine.new_frame_buffer(1, 1, PixelFormat::Srgba).unwrap();
                    engine.commit(fb).unwrap();
                    barrier.wait();
                    engine.render_frame_blocking(fb, renderer, camera, world).unwrap();
                })
            })
            .collect();
        std::thread::sleep(Duration::from_millis(100));
        engine.commit(camera).unwrap();
        for worker in workers {
            worker.join().unwrap();
        }
        let stats = engine.stats();
        assert_eq!(stats.renders, 2);
        assert_eq!(stats.overlapping_renders, 1);
        assert_eq!(stats.commits_during_render, 1);
    }
}
