use sunrise_common::InstanceId;

use crate::engine::{EngineError, Handle, ObjectKind, RendererContext};
use crate::scope::ResourceScope;

/// Default upper bound on placed instances.
pub const DEFAULT_INSTANCE_CAP: usize = 30_000;

/// Something placed in the world: a committed engine instance owning its resources.
pub trait WorldInstance: Send {
    fn id(&self) -> InstanceId;
    fn handle(&self) -> Handle;
    /// Whether this is the backdrop. A world holds at most one.
    fn is_background(&self) -> bool {
        false
    }
}

/// A light set that can be swapped into the world as a unit.
pub trait WorldLights: Send {
    /// Committed light handles, in list order.
    fn handles(&self) -> Vec<Handle>;
}

/// Errors from world assembly and commit.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("world not ready: {instances} instances, {lights} lights")]
    WorldNotReady { instances: usize, lights: usize },
    #[error("instance cap of {cap} reached")]
    InstanceCapExceeded { cap: usize },
    #[error("world already has a background instance")]
    BackgroundAlreadySet,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// The engine's live container of instances and lights for one session.
///
/// The instance set is append-only. The light set is replaced as a unit; the
/// replaced set stays alive until the next successful commit so the engine
/// never observes a released light.
pub struct World {
    ctx: RendererContext,
    handle: Handle,
    scope: ResourceScope,
    cap: usize,
    instances: Vec<Box<dyn WorldInstance>>,
    instance_list: Option<ResourceScope>,
    instances_dirty: bool,
    lights: Option<Box<dyn WorldLights>>,
    light_count: usize,
    light_list: Option<ResourceScope>,
    lights_dirty: bool,
    retired: Vec<Retired>,
    commits: u64,
}

enum Retired {
    Lights(Box<dyn WorldLights>),
    List(ResourceScope),
}

impl World {
    /// Create the engine world object.
    pub fn new(ctx: &RendererContext, cap: usize) -> Result<Self, WorldError> {
        let mut scope = ResourceScope::new("world");
        let handle = ctx.new_world(&mut scope)?;
        ctx.set_bool(handle, "dynamicScene", false)?;
        ctx.set_bool(handle, "compactMode", true)?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
            scope,
            cap,
            instances: Vec::new(),
            instance_list: None,
            instances_dirty: false,
            lights: None,
            light_count: 0,
            light_list: None,
            lights_dirty: false,
            retired: Vec::new(),
            commits: 0,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn light_count(&self) -> usize {
        self.light_count
    }

    pub fn instance_cap(&self) -> usize {
        self.cap
    }

    /// Number of successful commits.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Ids of all placed instances, in placement order.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.iter().map(|i| i.id()).collect()
    }

    pub fn has_background(&self) -> bool {
        self.instances.iter().any(|i| i.is_background())
    }

    /// Append an instance. Takes effect at the next commit.
    pub fn add_instance(&mut self, instance: Box<dyn WorldInstance>) -> Result<(), WorldError> {
        if self.instances.len() >= self.cap {
            return Err(WorldError::InstanceCapExceeded { cap: self.cap });
        }
        if instance.is_background() && self.has_background() {
            return Err(WorldError::BackgroundAlreadySet);
        }
        tracing::debug!(id = ?instance.id(), handle = ?instance.handle(), "instance added");
        self.instances.push(instance);
        self.instances_dirty = true;
        Ok(())
    }

    /// Stage a new light set. The previous set is released after the next
    /// successful commit.
    pub fn set_lights(&mut self, lights: Box<dyn WorldLights>) {
        self.light_count = lights.handles().len();
        if let Some(previous) = self.lights.replace(lights) {
            self.retired.push(Retired::Lights(previous));
        }
        self.lights_dirty = true;
    }

    /// Push staged instances and lights to the engine and commit the world.
    ///
    /// Fails with [`WorldError::WorldNotReady`] when either set is empty.
    /// A background is not required here; at most one is admitted by
    /// [`World::add_instance`], and scene loading always places it first.
    pub fn commit(&mut self) -> Result<(), WorldError> {
        if self.instances.is_empty() || self.light_count == 0 {
            return Err(WorldError::WorldNotReady {
                instances: self.instances.len(),
                lights: self.light_count,
            });
        }

        if self.instances_dirty {
            let handles: Vec<Handle> = self.instances.iter().map(|i| i.handle()).collect();
            let mut scope = ResourceScope::new("world.instances");
            let list = self
                .ctx
                .new_object_list(&mut scope, ObjectKind::Instance, &handles)?;
            self.ctx.set_object(self.handle, "instance", list)?;
            if let Some(old) = self.instance_list.replace(scope) {
                self.retired.push(Retired::List(old));
            }
            self.instances_dirty = false;
        }

        if self.lights_dirty {
            let handles = self.lights.as_ref().map(|l| l.handles()).unwrap_or_default();
            let mut scope = ResourceScope::new("world.lights");
            let list = self.ctx.new_object_list(&mut scope, ObjectKind::Light, &handles)?;
            self.ctx.set_object(self.handle, "light", list)?;
            if let Some(old) = self.light_list.replace(scope) {
                self.retired.push(Retired::List(old));
            }
            self.lights_dirty = false;
        }

        self.ctx.commit(self.handle)?;
        self.commits += 1;

        let retired = std::mem::take(&mut self.retired);
        tracing::debug!(
            instances = self.instances.len(),
            lights = self.light_count,
            retired = retired.len(),
            "world committed"
        );
        // Newest first, matching the scope discipline.
        for entry in retired.into_iter().rev() {
            match entry {
                Retired::Lights(lights) => drop(lights),
                Retired::List(mut scope) => scope.close(),
            }
        }
        Ok(())
    }

    /// Release the world object, then lists, lights, and instances, newest first.
    pub fn close(&mut self) {
        if self.scope.is_closed() {
            return;
        }
        self.scope.close();
        if let Some(mut list) = self.light_list.take() {
            list.close();
        }
        if let Some(mut list) = self.instance_list.take() {
            list.close();
        }
        while let Some(entry) = self.retired.pop() {
            if let Retired::List(mut scope) = entry {
                scope.close();
            }
        }
        self.lights = None;
        while let Some(instance) = self.instances.pop() {
            drop(instance);
        }
        tracing::debug!("world closed");
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugEngine;
    use crate::engine::Param;
    use std::sync::Arc;

    struct TestInstance {
        id: InstanceId,
        handle: Handle,
        background: bool,
        _scope: ResourceScope,
    }

    impl WorldInstance for TestInstance {
        fn id(&self) -> InstanceId {
            self.id
        }
        fn handle(&self) -> Handle {
            self.handle
        }
        fn is_background(&self) -> bool {
            self.background
        }
    }

    struct TestLights {
        handles: Vec<Handle>,
        _scope: ResourceScope,
    }

    impl WorldLights for TestLights {
        fn handles(&self) -> Vec<Handle> {
            self.handles.clone()
        }
    }

    fn setup() -> (Arc<DebugEngine>, RendererContext) {
        let engine = Arc::new(DebugEngine::new());
        let ctx = RendererContext::new(engine.clone());
        (engine, ctx)
    }

    fn instance(ctx: &RendererContext, background: bool) -> Box<dyn WorldInstance> {
        let mut scope = ResourceScope::new("instance");
        let handle = ctx.new_instance(&mut scope).unwrap();
        ctx.commit(handle).unwrap();
        Box::new(TestInstance {
            id: InstanceId::new(),
            handle,
            background,
            _scope: scope,
        })
    }

    fn lights(ctx: &RendererContext, n: usize) -> (Box<dyn WorldLights>, Vec<Handle>) {
        let mut scope = ResourceScope::new("lights");
        let handles: Vec<Handle> = (0..n)
            .map(|_| {
                let h = ctx.new_light(&mut scope, "distant").unwrap();
                ctx.commit(h).unwrap();
                h
            })
            .collect();
        (
            Box::new(TestLights {
                handles: handles.clone(),
                _scope: scope,
            }),
            handles,
        )
    }

    #[test]
    fn empty_world_is_not_ready() {
        let (_engine, ctx) = setup();
        let mut world = World::new(&ctx, 10).unwrap();
        match world.commit() {
            Err(WorldError::WorldNotReady { instances, lights }) => {
                assert_eq!(instances, 0);
                assert_eq!(lights, 0);
            }
            other => panic!("expected WorldNotReady, got {other:?}"),
        }
    }

    #[test]
    fn world_without_lights_is_not_ready() {
        let (_engine, ctx) = setup();
        let mut world = World::new(&ctx, 10).unwrap();
        world.add_instance(instance(&ctx, false)).unwrap();
        assert!(matches!(
            world.commit(),
            Err(WorldError::WorldNotReady { instances: 1, lights: 0 })
        ));
    }

    #[test]
    fn commit_lists_every_instance() {
        let (engine, ctx) = setup();
        let mut world = World::new(&ctx, 10).unwrap();
        world.add_instance(instance(&ctx, true)).unwrap();
        for _ in 0..3 {
            world.add_instance(instance(&ctx, false)).unwrap();
        }
        world.set_lights(lights(&ctx, 2).0);
        world.commit().unwrap();

        let Some(Param::Object(list)) = engine.param(world.handle(), "instance") else {
            panic!("instance list not set");
        };
        assert_eq!(engine.list_items(list).len(), 4);
        assert_eq!(world.commits(), 1);
    }

    #[test]
    fn instance_cap_enforced() {
        let (_engine, ctx) = setup();
        let mut world = World::new(&ctx, 2).unwrap();
        world.add_instance(instance(&ctx, false)).unwrap();
        world.add_instance(instance(&ctx, false)).unwrap();
        assert!(matches!(
            world.add_instance(instance(&ctx, false)),
            Err(WorldError::InstanceCapExceeded { cap: 2 })
        ));
    }

    #[test]
    fn single_background() {
        let (_engine, ctx) = setup();
        let mut world = World::new(&ctx, 10).unwrap();
        world.add_instance(instance(&ctx, true)).unwrap();
        assert!(matches!(
            world.add_instance(instance(&ctx, true)),
            Err(WorldError::BackgroundAlreadySet)
        ));
    }

    #[test]
    fn old_lights_released_only_after_commit() {
        let (engine, ctx) = setup();
        let mut world = World::new(&ctx, 10).unwrap();
        world.add_instance(instance(&ctx, false)).unwrap();
        let (first, first_handles) = lights(&ctx, 2);
        world.set_lights(first);
        world.commit().unwrap();

        let (second, second_handles) = lights(&ctx, 2);
        world.set_lights(second);
        for h in &first_handles {
            assert!(engine.is_live(*h), "old light released before commit");
        }
        world.commit().unwrap();
        for h in &first_handles {
            assert!(!engine.is_live(*h));
        }
        for h in &second_handles {
            assert!(engine.is_live(*h));
        }
    }

    #[test]
    fn close_releases_everything() {
        let (engine, ctx) = setup();
        {
            let mut world = World::new(&ctx, 10).unwrap();
            world.add_instance(instance(&ctx, false)).unwrap();
            world.set_lights(lights(&ctx, 1).0);
            world.commit().unwrap();
            world.set_lights(lights(&ctx, 1).0);
        }
        let stats = engine.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.acquired, stats.released);
        assert!(engine.violations().is_empty());
    }
}
