//! GPU rendering with OpenGL ES
//!
//! Handles:
//! - EGL context creation (XCB platform)
//! - Shaders, textures, planes and the offscreen render target
//! - The two-pass lock screen pipeline and its frame pacing

pub mod context;
pub mod fbo;
pub mod frame_clock;
pub mod pipeline;
pub mod plane;
pub mod shader;
pub mod texture;

pub use context::{EglContext, GlRenderer};
pub use frame_clock::FrameClock;
pub use pipeline::RenderPipeline;

/// GPU object that is released explicitly while its context is current
pub trait GlResource<G = glow::Context> {
    fn release(&self, gl: &G);
}

/// Release the objects a constructor created so far, newest first
pub fn release_created<G>(gl: &G, created: &[&dyn GlResource<G>]) {
    for resource in created.iter().rev() {
        resource.release(gl);
    }
}

/// Pass `result` through, releasing `created` first when it is an error
pub fn or_release<G, T, E>(
    gl: &G,
    created: &[&dyn GlResource<G>],
    result: Result<T, E>,
) -> Result<T, E> {
    if result.is_err() {
        release_created(gl, created);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    type Log = RefCell<Vec<&'static str>>;

    struct Fake(&'static str);

    impl GlResource<Log> for Fake {
        fn release(&self, log: &Log) {
            log.borrow_mut().push(self.0);
        }
    }

    #[test]
    fn test_release_created_newest_first() {
        let log = Log::default();
        let (a, b, c) = (Fake("program"), Fake("target"), Fake("plane"));
        release_created(&log, &[&a, &b, &c]);
        assert_eq!(*log.borrow(), vec!["plane", "target", "program"]);
    }

    #[test]
    fn test_or_release_only_on_error() {
        let log = Log::default();
        let (a, b) = (Fake("program"), Fake("texture"));

        let ok: Result<u32, &str> = or_release(&log, &[&a, &b], Ok(7));
        assert_eq!(ok, Ok(7));
        assert!(log.borrow().is_empty());

        let err: Result<u32, &str> = or_release(&log, &[&a, &b], Err("no memory"));
        assert_eq!(err, Err("no memory"));
        assert_eq!(*log.borrow(), vec!["texture", "program"]);
    }
}
