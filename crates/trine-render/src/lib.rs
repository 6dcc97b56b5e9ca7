// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod error;
pub mod pacing;

pub use error::RenderError;
pub use pacing::{
    Acquired, FrameCursor, FrameOutcome, FramePacer, FrameTarget, Presented, SurfaceState,
    DEFAULT_FRAMES_IN_FLIGHT,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const ZERO: RenderSize = RenderSize {
        width: 0,
        height: 0,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-area drawable means the window is minimized.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub trait Renderer {
    type Config;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: Self::Config,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Platform reported a resize / size change.
    fn resize(&mut self, size: RenderSize);
    fn minimized(&mut self);
    fn restored(&mut self);

    /// One render-loop iteration. `Err` is always fatal.
    fn render(&mut self, drawable: RenderSize) -> Result<FrameOutcome>;

    fn surface_state(&self) -> SurfaceState;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
