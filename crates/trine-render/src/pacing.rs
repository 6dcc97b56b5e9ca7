// SPDX-License-Identifier: CEPL-1.0
//! Frames-in-flight pacing and the surface invalidation state machine.
//!
//! [`FramePacer`] owns the round-robin slot cursor and the surface state. The
//! GPU work itself goes through [`FrameTarget`], which the backend implements
//! over its fences, semaphores, command buffers and swapchain.
//!
//! Per tick, in this order:
//!
//! ```text
//! slot = cursor; cursor += 1 (mod N)
//! wait   slot.fence                      (bounds frames in flight to N)
//! acquire image, signal slot.image_available
//!   out of date -> PendingRecreate, return Skipped (fence NOT reset)
//! reset  slot.fence
//! record slot.cmd against framebuffer[image]
//! submit wait image_available @ COLOR_ATTACHMENT_OUTPUT,
//!        signal render_finished + slot.fence
//! present wait render_finished
//!   stale / suboptimal / resize flag -> PendingRecreate
//! ```
//!
//! Surface states:
//!
//! ```text
//! Valid --(out of date, suboptimal, resize, minimize)--> PendingRecreate
//! PendingRecreate --(zero drawable)--> Minimized
//! Minimized --(restore)--> PendingRecreate
//! PendingRecreate --(wait_idle, rebuild)--> Valid
//! ```

use tracing::{debug, info};

use crate::{RenderError, RenderSize};

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceState {
    Valid,
    PendingRecreate,
    Minimized,
}

/// Result of asking the swapchain for the next presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Done,
    /// Out of date or suboptimal.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize, image: u32 },
    /// Acquire reported out of date; nothing was drawn this tick.
    Skipped,
    /// Zero drawable area; no GPU work was issued.
    Minimized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCursor {
    index: usize,
    len: usize,
}

impl FrameCursor {
    pub fn new(len: usize) -> Self {
        Self {
            index: 0,
            len: len.max(1),
        }
    }

    #[inline]
    pub fn current(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the slot for this frame and moves on to the next one.
    #[inline]
    pub fn advance(&mut self) -> usize {
        let slot = self.index;
        self.index = (self.index + 1) % self.len;
        slot
    }
}

/// GPU-side operations the pacer sequences. `slot` is always `< N`.
pub trait FrameTarget {
    /// Block until the slot's in-flight fence is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError>;
    /// Acquire the next image, signaling the slot's image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, RenderError>;
    /// Reset the slot's fence to unsignaled.
    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError>;
    /// Reset and re-record the slot's command buffer against `image`.
    fn record(&mut self, slot: usize, image: u32) -> Result<(), RenderError>;
    fn submit(&mut self, slot: usize) -> Result<(), RenderError>;
    fn present(&mut self, slot: usize, image: u32) -> Result<Presented, RenderError>;
    /// Drain every queue on the device.
    fn wait_idle(&mut self) -> Result<(), RenderError>;
    /// Destroy the current chain and build a new one for `drawable`.
    /// Only called after [`FrameTarget::wait_idle`].
    fn rebuild_swapchain(&mut self, drawable: RenderSize) -> Result<(), RenderError>;
}

#[derive(Debug)]
pub struct FramePacer {
    cursor: FrameCursor,
    state: SurfaceState,
    resized: bool,
}

impl FramePacer {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            cursor: FrameCursor::new(frames_in_flight),
            state: SurfaceState::Valid,
            resized: false,
        }
    }

    #[inline]
    pub fn state(&self) -> SurfaceState {
        self.state
    }

    #[inline]
    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.cursor.len()
    }

    /// Resize or size-changed event. Acts as a restore while minimized.
    pub fn notify_resized(&mut self) {
        if self.state == SurfaceState::Minimized {
            self.transition(SurfaceState::PendingRecreate, "restored by resize");
        } else {
            self.resized = true;
        }
    }

    pub fn notify_minimized(&mut self) {
        self.invalidate("window minimized");
    }

    pub fn notify_restored(&mut self) {
        if self.state == SurfaceState::Minimized {
            self.transition(SurfaceState::PendingRecreate, "window restored");
        }
    }

    /// `Valid -> PendingRecreate`; no-op in any other state.
    pub fn invalidate(&mut self, cause: &str) {
        if self.state == SurfaceState::Valid {
            self.transition(SurfaceState::PendingRecreate, cause);
        }
    }

    /// Drives `PendingRecreate` toward `Valid`. Returns the resulting state.
    ///
    /// With a zero drawable the surface parks in `Minimized` and no device call
    /// is made. Otherwise the device is drained before the old chain is torn
    /// down.
    pub fn recreate<T: FrameTarget + ?Sized>(
        &mut self,
        target: &mut T,
        drawable: RenderSize,
    ) -> Result<SurfaceState, RenderError> {
        match self.state {
            SurfaceState::Valid => return Ok(SurfaceState::Valid),
            SurfaceState::Minimized if drawable.is_empty() => {
                return Ok(SurfaceState::Minimized);
            }
            SurfaceState::Minimized => {
                self.transition(SurfaceState::PendingRecreate, "drawable area is back");
            }
            SurfaceState::PendingRecreate => {}
        }

        if drawable.is_empty() {
            self.transition(SurfaceState::Minimized, "zero drawable area");
            return Ok(SurfaceState::Minimized);
        }

        target.wait_idle()?;
        target.rebuild_swapchain(drawable)?;

        // the new chain already matches the current drawable
        self.resized = false;
        self.transition(SurfaceState::Valid, "swapchain rebuilt");
        Ok(SurfaceState::Valid)
    }

    /// One render-loop iteration.
    pub fn tick<T: FrameTarget + ?Sized>(
        &mut self,
        target: &mut T,
        drawable: RenderSize,
    ) -> Result<FrameOutcome, RenderError> {
        if drawable.is_empty() {
            self.invalidate("zero drawable area");
        }
        if self.recreate(target, drawable)? == SurfaceState::Minimized {
            return Ok(FrameOutcome::Minimized);
        }
        self.draw(target)
    }

    fn draw<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> Result<FrameOutcome, RenderError> {
        // advance first so an early return keeps the round-robin intact
        let slot = self.cursor.advance();

        target.wait_for_slot(slot)?;

        let (image, suboptimal) = match target.acquire_image(slot)? {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::OutOfDate => {
                // fence stays signaled, otherwise the next wait on it deadlocks
                self.invalidate("acquire: out of date");
                return Ok(FrameOutcome::Skipped);
            }
        };

        target.reset_slot(slot)?;
        target.record(slot, image)?;
        target.submit(slot)?;
        let presented = target.present(slot, image)?;

        let resized = std::mem::take(&mut self.resized);
        if presented == Presented::Stale {
            self.invalidate("present: out of date or suboptimal");
        } else if suboptimal {
            self.invalidate("acquire: suboptimal");
        } else if resized {
            self.invalidate("resize event");
        }

        debug!(slot, image, "frame presented");
        Ok(FrameOutcome::Presented { slot, image })
    }

    fn transition(&mut self, to: SurfaceState, cause: &str) {
        info!("surface {:?} -> {:?} ({cause})", self.state, to);
        self.state = to;
    }
}
