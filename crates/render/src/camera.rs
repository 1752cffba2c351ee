use glam::DVec3;
use sunrise_kernel::{EngineError, Handle, RendererContext, ResourceScope};

use crate::tile::ImageWindow;

/// Per-request camera parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub position: DVec3,
    pub direction: DVec3,
    pub up: DVec3,
    /// Width over height of the requested tile.
    pub aspect: f32,
    /// Rendered part of the image plane.
    pub window: ImageWindow,
}

/// The session's engine camera; re-parameterized and re-committed per request.
#[derive(Debug)]
pub struct Camera {
    handle: Handle,
    state: Option<CameraState>,
}

impl Camera {
    pub fn new(ctx: &RendererContext, scope: &mut ResourceScope, subtype: &str) -> Result<Self, EngineError> {
        let handle = ctx.new_camera(scope, subtype)?;
        ctx.commit(handle)?;
        Ok(Self { handle, state: None })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Last committed parameters.
    pub fn state(&self) -> Option<&CameraState> {
        self.state.as_ref()
    }

    pub fn apply(&mut self, ctx: &RendererContext, state: CameraState) -> Result<(), EngineError> {
        let h = self.handle;
        ctx.set_float(h, "aspect", state.aspect)?;
        ctx.set_vec3f(h, "position", state.position.as_vec3())?;
        ctx.set_vec3f(h, "direction", state.direction.as_vec3())?;
        ctx.set_vec3f(h, "up", state.up.as_vec3())?;
        ctx.set_vec2f(h, "imageStart", state.window.start.as_vec2())?;
        ctx.set_vec2f(h, "imageEnd", state.window.end.as_vec2())?;
        ctx.commit(h)?;
        self.state = Some(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::DVec2;
    use sunrise_kernel::{DebugEngine, Param};

    use super::*;

    #[test]
    fn apply_commits_window_and_pose() {
        let engine = Arc::new(DebugEngine::new());
        let ctx = RendererContext::new(engine.clone());
        let mut scope = ResourceScope::new("camera");
        let mut camera = Camera::new(&ctx, &mut scope, "perspective").unwrap();
        assert!(camera.state().is_none());

        let state = CameraState {
            position: DVec3::new(1.0, 2.0, 3.0),
            direction: DVec3::NEG_Z,
            up: DVec3::Y,
            aspect: 2.0,
            window: ImageWindow {
                start: DVec2::new(0.25, 0.0),
                end: DVec2::new(0.5, 0.5),
            },
        };
        camera.apply(&ctx, state).unwrap();
        assert_eq!(camera.state(), Some(&state));
        assert_eq!(engine.param(camera.handle(), "imageStart"), Some(Param::Vec2f([0.25, 0.0])));
        assert_eq!(engine.param(camera.handle(), "imageEnd"), Some(Param::Vec2f([0.5, 0.5])));
        assert_eq!(engine.param(camera.handle(), "aspect"), Some(Param::Float(2.0)));

        scope.close();
        assert_eq!(engine.stats().live, 0);
    }
}
