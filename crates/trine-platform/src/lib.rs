// SPDX-License-Identifier: CEPL-1.0
//! Window-system collaborator: `winit` plus the narrow event set the renderer
//! cares about.

pub use winit;

use tracing::debug;
use trine_render::RenderSize;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformEvent {
    Quit,
    Resized(RenderSize),
    Minimized,
    Restored,
}

#[inline]
pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Maps a raw window event. `was_minimized` is the caller's view of the window
/// before this event; a non-zero size after a minimize reads as a restore.
pub fn translate(event: &WindowEvent, was_minimized: bool) -> Option<PlatformEvent> {
    match event {
        WindowEvent::CloseRequested | WindowEvent::Destroyed => Some(PlatformEvent::Quit),
        WindowEvent::Resized(size) => {
            let size = render_size(*size);
            let ev = match (size.is_empty(), was_minimized) {
                (true, true) => return None,
                (true, false) => PlatformEvent::Minimized,
                (false, true) => PlatformEvent::Restored,
                (false, false) => PlatformEvent::Resized(size),
            };
            debug!("window {}x{} -> {ev:?}", size.width, size.height);
            Some(ev)
        }
        _ => None,
    }
}

/// Current drawable size in pixels; zero while minimized. Some platforms keep
/// reporting the last inner size when minimized, so ask explicitly first.
pub fn drawable_size(window: &Window) -> RenderSize {
    if window.is_minimized() == Some(true) {
        return RenderSize::ZERO;
    }
    render_size(window.inner_size())
}
