// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use trine_core::init_tracing;
use trine_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use trine_platform::{drawable_size, translate, PlatformEvent};
use trine_render::{FrameOutcome, Renderer, SurfaceState};
use trine_render_vk::VkRenderer;

mod config;

use config::{AppCfg, Args};

/// Unrecoverable: one line on stdout (logs go to stderr), then out without
/// unwinding.
fn fatal(msg: impl std::fmt::Display) -> ! {
    error!("{msg}");
    println!("{msg}");
    std::process::exit(1);
}

struct App {
    cfg: AppCfg,
    // declared before `window`: the surface must go before the window it wraps
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    minimized: bool,

    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            renderer: None,
            window: None,
            minimized: false,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn redraw(&mut self) {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return;
        };
        match renderer.render(drawable_size(window)) {
            Ok(FrameOutcome::Presented { .. }) => {
                self.frames = self.frames.saturating_add(1);
            }
            Ok(FrameOutcome::Skipped | FrameOutcome::Minimized) => {}
            Err(e) => fatal(format!("render: {e:#}")),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height))
            .with_resizable(true);
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => fatal(format!("create_window: {e}")),
        };

        let size = drawable_size(&window);
        let mut renderer = match VkRenderer::new(&window, &window, size, self.cfg.vk()) {
            Ok(r) => r,
            Err(e) => fatal(format!("vk init failed: {e:#}")),
        };
        renderer.set_clear_color(self.cfg.render.clear_color);

        let extent = renderer.swapchain_extent();
        info!(
            "renderer up: swapchain {}x{} for a {}x{} window, {} frames in flight",
            extent.width,
            extent.height,
            size.width,
            size.height,
            renderer.frames_in_flight()
        );

        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(Window::id) != Some(window_id) {
            return;
        }

        if let WindowEvent::RedrawRequested = event {
            self.redraw();
            return;
        }

        let Some(ev) = translate(&event, self.minimized) else {
            return;
        };
        match ev {
            PlatformEvent::Quit => {
                info!("close requested");
                // full device drain + ordered teardown happen in the renderer's Drop
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }
            PlatformEvent::Minimized => {
                self.minimized = true;
                if let Some(r) = &mut self.renderer {
                    r.minimized();
                }
            }
            PlatformEvent::Restored => {
                self.minimized = false;
                if let Some(r) = &mut self.renderer {
                    r.restored();
                }
            }
            PlatformEvent::Resized(size) => {
                if let Some(r) = &mut self.renderer {
                    r.resize(size);
                }
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(renderer)) = (&self.window, &self.renderer) else {
            return;
        };

        event_loop.set_control_flow(ControlFlow::Wait);
        // parked: no redraw until the window has pixels again
        let parked = renderer.surface_state() == SurfaceState::Minimized
            && drawable_size(window).is_empty();
        if parked {
            self.frames = 0;
            return;
        }
        window.request_redraw();

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant) >= Duration::from_secs(1) {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = AppCfg::load(&args.config);
    cfg.apply_args(&args);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;
    Ok(())
}
