//! Lock session runner
//!
//! Wires the X11 backend, the password task and the render loop together:
//!
//! 1. Capture the screen (before any window of ours exists)
//! 2. Create the EGL context, lock window and render pipeline
//! 3. Grab keyboard and pointer (all-or-nothing, with retries)
//! 4. Map the lock window, raise cover windows on secondary displays
//! 5. Start the password task, run the render loop until the close flag is set
//! 6. Tear down exactly once: grab, covers, GPU, window, cursor

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;
use x11rb::protocol::xproto::Cursor;
use x11rb::xcb_ffi::XCBConnection;

use super::lifecycle::{Lifecycle, SessionState};
use super::signal::{install_interrupt_handlers, oneshot, CloseFlag, CloseReason, OneShotReceiver};
use crate::auth::{run_matcher, MatcherExit, PamAuthenticator, PasswordStateMachine};
use crate::capture::{load_image, FileCapture, ScreenCapture, Snapshot};
use crate::config::{Config, RenderConfig};
use crate::gpu::{EglContext, FrameClock, GlRenderer, RenderPipeline};
use crate::input::{GrabPolicy, InputGrab};
use crate::x11::{
    classify_event, connect_input, split_primary, CoverWindowManager, Display, LockWindow,
    Monitor, RootWindowCapture, WindowEvent, X11Grab, XkbKeySource,
};

/// Per-invocation inputs (from the command line)
#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// Background image instead of a root window capture
    pub background: Option<PathBuf>,
    /// Image drawn centered on top of the effect
    pub overlay: Option<PathBuf>,
}

/// GL renderer plus the resources created on it
struct Gpu {
    renderer: GlRenderer,
    pipeline: RenderPipeline,
}

impl Drop for Gpu {
    fn drop(&mut self) {
        self.pipeline.destroy(self.renderer.gl());
        debug!("GPU resources released");
    }
}

/// One releasable part of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Grab,
    Covers,
    Gpu,
    Egl,
    Window,
    Cursor,
}

/// Release order: input first, GL objects before their context, windows
/// before the cursor they show
const TEARDOWN_ORDER: [Part; 6] = [
    Part::Grab,
    Part::Covers,
    Part::Gpu,
    Part::Egl,
    Part::Window,
    Part::Cursor,
];

/// Everything a session holds on the display connection
struct Resources {
    grab: Option<InputGrab<X11Grab>>,
    covers: Option<CoverWindowManager>,
    gpu: Option<Gpu>,
    egl: Option<EglContext>,
    window: Option<LockWindow>,
    cursor: Option<Cursor>,
    display: Display,
}

impl Resources {
    fn release(&mut self, part: Part) {
        match part {
            Part::Grab => {
                if let Some(mut grab) = self.grab.take() {
                    grab.release();
                }
            }
            Part::Covers => {
                if let Some(mut covers) = self.covers.take() {
                    covers.destroy_all();
                }
            }
            Part::Gpu => drop(self.gpu.take()),
            Part::Egl => drop(self.egl.take()),
            Part::Window => drop(self.window.take()),
            Part::Cursor => {
                if let Some(cursor) = self.cursor.take() {
                    self.display.free_cursor(cursor);
                }
            }
        }
    }

    fn cursor(&self) -> Cursor {
        self.cursor.unwrap_or(x11rb::NONE)
    }
}

/// Resources of one lock session, released in [`Session::teardown`]
struct Session {
    lifecycle: Lifecycle,
    res: Resources,
}

impl Session {
    fn new(display: Display) -> Result<Self> {
        let cursor = display.invisible_cursor()?;
        Ok(Self {
            lifecycle: Lifecycle::new(),
            res: Resources {
                grab: None,
                covers: None,
                gpu: None,
                egl: None,
                window: None,
                cursor: Some(cursor),
                display,
            },
        })
    }

    /// Graphics context, lock window and render pipeline
    fn create_surface(
        &mut self,
        primary: &Monitor,
        snapshot: &Snapshot,
        overlay: Option<&RgbaImage>,
    ) -> Result<()> {
        let res = &mut self.res;
        let mut egl = EglContext::new(res.display.raw_xcb_connection(), res.display.screen_num())?;
        let visual = egl.native_visual_id()?;
        let window = LockWindow::create(&res.display, primary, visual, res.cursor())?;
        egl.attach_window(window.id())?;
        let (width, height) = window.size();
        res.window = Some(window);

        let renderer = GlRenderer::new(&egl)?;
        res.egl = Some(egl);

        let capture = snapshot.for_monitor(primary);
        let pipeline = RenderPipeline::new(&renderer, width, height, &capture, overlay)?;
        res.gpu = Some(Gpu { renderer, pipeline });
        Ok(())
    }

    /// Poll window events, the password task and the close flag; render
    /// when the frame clock allows. Returns once the close flag is set.
    fn render_loop(
        &self,
        close: &CloseFlag,
        done: &mut OneShotReceiver<MatcherExit>,
        config: &RenderConfig,
    ) -> Result<CloseReason> {
        let res = &self.res;
        let (window, egl, gpu) = match (&res.window, &res.egl, &res.gpu) {
            (Some(window), Some(egl), Some(gpu)) => (window, egl, gpu),
            _ => return Err(anyhow!("Render loop started without a surface")),
        };
        let lock = window.id();
        let mut clock = FrameClock::new(config.frame_interval());
        let idle_sleep = config.idle_sleep();
        let start = Instant::now();

        info!(
            "Render loop running ({:.1} ms per frame)",
            clock.interval().as_secs_f64() * 1000.0
        );

        loop {
            match done.try_take() {
                Some(MatcherExit::Unlocked) => {
                    close.request(CloseReason::Unlocked);
                }
                Some(MatcherExit::InputFailed) => {
                    close.request(CloseReason::InputFailed);
                }
                Some(exit) => debug!("Password task ended: {:?}", exit),
                None => {}
            }

            for event in res.display.poll_events()? {
                match classify_event(&event, res.display.atoms(), lock) {
                    WindowEvent::CloseRequested => {
                        info!("Window system requested close");
                        close.request(CloseReason::WindowClosed);
                    }
                    WindowEvent::Obscured(w) if w == lock => window.raise()?,
                    WindowEvent::Obscured(w) => {
                        if let Some(covers) = &res.covers {
                            covers.handle_obscured(w)?;
                        }
                    }
                    WindowEvent::Other => {}
                }
            }

            if close.is_set() {
                break;
            }

            let now = Instant::now();
            if clock.should_render(now) {
                gpu.pipeline
                    .render(&gpu.renderer, (now - start).as_secs_f32());
                egl.swap_buffers()?;
            } else {
                thread::sleep(clock.remaining(now).min(idle_sleep));
            }
        }

        close
            .reason()
            .ok_or_else(|| anyhow!("Close flag set without a reason"))
    }

    /// Release everything; only the first call does any work
    fn teardown(&mut self) {
        let Self { lifecycle, res } = self;
        lifecycle.terminate(|| {
            for part in TEARDOWN_ORDER {
                res.release(part);
            }
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Start the password task on its own thread.
///
/// The xkb state and PAM handle are built on that thread; startup errors
/// are reported back before this returns.
fn spawn_password_task(
    conn: Arc<XCBConnection>,
    config: &Config,
    close: CloseFlag,
) -> Result<OneShotReceiver<MatcherExit>> {
    let (done_tx, done_rx) = oneshot();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

    let service = config.auth.service.clone();
    let policy = GrabPolicy::from(&config.grab);
    let timeout = config.password.timeout();
    let on_error = config.input.on_error;
    let log_secrets = config.security.log_secrets && log::log_enabled!(log::Level::Debug);
    if log_secrets {
        warn!("Password contents will be logged");
    }

    thread::Builder::new()
        .name("password".to_string())
        .spawn(move || {
            let setup = XkbKeySource::new(conn, policy)
                .and_then(|source| Ok((source, PamAuthenticator::new(&service)?)));
            let (mut source, auth) = match setup {
                Ok(parts) => {
                    let _ = ready_tx.send(Ok(()));
                    parts
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let mut machine =
                PasswordStateMachine::new(auth, timeout, Instant::now()).with_secret_logging(log_secrets);
            let exit = run_matcher(&mut source, &mut machine, Instant::now, &done_tx, &close, on_error);
            debug!("Password task finished: {:?}", exit);
        })
        .context("Failed to spawn password thread")?;

    ready_rx
        .recv()
        .context("Password thread exited during startup")?
        .context("Failed to start password task")?;
    Ok(done_rx)
}

/// Lock the screen until the password is entered or the session is closed
pub fn run(config: &Config, options: &LockOptions) -> Result<CloseReason> {
    let close = CloseFlag::new();
    install_interrupt_handlers(&close);

    let display = Display::connect()?;
    let monitors = display.monitors();
    let (primary, secondaries) =
        split_primary(&monitors).ok_or_else(|| anyhow!("No monitors found"))?;
    info!(
        "Primary display {} ({}x{}), {} secondary",
        primary.name,
        primary.width,
        primary.height,
        secondaries.len()
    );

    // Initializing: capture before any lock window exists
    let snapshot = match &options.background {
        Some(path) => FileCapture::new(path).capture()?,
        None => RootWindowCapture::new(&display).capture()?,
    };
    let overlay = options.overlay.as_deref().map(load_image).transpose()?;

    let mut session = Session::new(display)?;
    session.create_surface(&primary, &snapshot, overlay.as_ref())?;

    // Grabbing: failure drops the session, which tears down what exists
    session.lifecycle.advance(SessionState::Grabbing)?;
    let (input_conn, root) = connect_input()?;
    let grab = InputGrab::acquire_with_policy(
        X11Grab::new(input_conn.clone(), root),
        GrabPolicy::from(&config.grab),
    )
    .context("Failed to grab keyboard and pointer")?;
    session.res.grab = Some(grab);

    // Active
    if let Some(window) = session.res.window.as_mut() {
        window.map()?;
    }
    session.lifecycle.advance(SessionState::Active)?;
    let covers = CoverWindowManager::raise_all(
        &session.res.display,
        &secondaries,
        &config.cover,
        session.res.cursor(),
        |monitor| snapshot.region(monitor),
    )?;
    session.res.covers = Some(covers);
    drop(snapshot);

    let mut done = spawn_password_task(input_conn, config, close.clone())?;
    let result = session.render_loop(&close, &mut done, &config.render);

    if let Ok(CloseReason::Unlocked) = result {
        session.lifecycle.advance(SessionState::Unlocking)?;
    }
    debug!("Render loop ended in {:?}", session.lifecycle.state());
    session.teardown();
    result
}
