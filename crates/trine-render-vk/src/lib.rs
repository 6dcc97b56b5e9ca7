// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use trine_core::{mib, Arena};
use trine_render::{
    Acquired, FrameOutcome, FramePacer, FrameTarget, Presented, RenderError, RenderSize,
    Renderer, SurfaceState, DEFAULT_FRAMES_IN_FLIGHT,
};

pub mod context;
pub mod frame;
pub mod pipeline;
pub mod record;
pub mod swapchain;
pub mod vertex;

use context::Context;
use frame::FrameSlot;
use pipeline::{Pipeline, ShaderPaths};
use record::DrawTarget;
use swapchain::Swapchain;
use vertex::{VertexBuffer, VERTICES};

#[derive(Clone, Debug)]
pub struct VkConfig {
    pub app_name: String,
    pub frames_in_flight: usize,
    pub validation: bool,
    pub shaders: ShaderPaths,
    pub arena_bytes: usize,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            app_name: "trine".into(),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            validation: cfg!(debug_assertions),
            shaders: ShaderPaths {
                vertex: PathBuf::from("res/shaders/vert.spv"),
                fragment: PathBuf::from("res/shaders/frag.spv"),
            },
            arena_bytes: mib(100),
        }
    }
}

pub struct VkRenderer {
    pacer: FramePacer,
    gpu: Gpu,
}

/// GPU side of the frame loop; the pacer drives it through [`FrameTarget`].
struct Gpu {
    ctx: Context,
    swapchain: Swapchain,
    pipeline: Pipeline,
    shaders: ShaderPaths,
    cmd_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    vertices: VertexBuffer,
    clear: [f32; 4],
    arena: Arena,
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle(): nothing in flight may reference what follows
// - frame slot semaphores/fences, then the command pool (frees the buffers)
// - vertex buffer + memory
// - framebuffers -> views -> swapchain
// - pipeline -> layout -> render pass
// - device -> debug messenger -> surface -> instance
impl Drop for Gpu {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;
            d.device_wait_idle().ok();

            frame::destroy_slots(d, &mut self.slots);
            d.destroy_command_pool(self.cmd_pool, None);
            self.vertices.destroy(d);
            self.swapchain.destroy(&self.ctx);
            self.pipeline.destroy(&self.ctx.device);

            self.ctx.destroy();
        }
        debug!("vk: teardown complete");
    }
}

unsafe fn build_gpu(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    cfg: &VkConfig,
) -> Result<Gpu> {
    let arena = Arena::new(cfg.arena_bytes).context("allocating the transient arena")?;

    // 1) instance, surface, device, queues
    let ctx = Context::new(window, display, &cfg.app_name, cfg.validation, &arena)?;

    // 2) swapchain, then everything that depends on its format
    let mut swapchain = Swapchain::create(&ctx, size, &arena).context("create swapchain")?;
    let pipeline = Pipeline::new(&ctx.device, swapchain.format, &cfg.shaders, &arena)
        .context("create graphics pipeline")?;
    swapchain
        .create_views_and_framebuffers(&ctx.device, pipeline.render_pass)
        .context("create image views / framebuffers")?;

    // 3) per-frame slots
    let cmd_pool = frame::create_command_pool(&ctx.device, ctx.families.graphics)?;
    let slots = frame::create_slots(&ctx.device, cmd_pool, cfg.frames_in_flight.max(1))?;

    // 4) the triangle
    let vertices = VertexBuffer::new(&ctx).context("create vertex buffer")?;

    info!(
        "vk: {} framebuffers, {} frames in flight, arena {}/{} bytes after bootstrap",
        swapchain.len(),
        slots.len(),
        arena.used(),
        arena.capacity()
    );

    Ok(Gpu {
        ctx,
        swapchain,
        pipeline,
        shaders: cfg.shaders.clone(),
        cmd_pool,
        slots,
        vertices,
        clear: [0.0, 0.0, 0.0, 1.0],
        arena,
    })
}

impl Gpu {
    fn slot(&self, slot: usize) -> Result<FrameSlot, RenderError> {
        self.slots
            .get(slot)
            .copied()
            .ok_or_else(|| RenderError::api("frame slot", format!("index {slot} out of range")))
    }
}

impl FrameTarget for Gpu {
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let s = self.slot(slot)?;
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[s.in_flight], true, u64::MAX)
                .map_err(|e| RenderError::api("vkWaitForFences", e))
        }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, RenderError> {
        let s = self.slot(slot)?;
        let acquired = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                s.image_available,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(RenderError::api("vkAcquireNextImageKHR", e)),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let s = self.slot(slot)?;
        unsafe {
            self.ctx
                .device
                .reset_fences(&[s.in_flight])
                .map_err(|e| RenderError::api("vkResetFences", e))
        }
    }

    fn record(&mut self, slot: usize, image: u32) -> Result<(), RenderError> {
        let s = self.slot(slot)?;
        let framebuffer = self
            .swapchain
            .images
            .get(image as usize)
            .map(|img| img.framebuffer)
            .ok_or_else(|| RenderError::api("record", format!("image {image} out of range")))?;
        let target = DrawTarget {
            render_pass: self.pipeline.render_pass,
            framebuffer,
            extent: self.swapchain.extent,
            pipeline: self.pipeline.handle,
            vertex_buffer: self.vertices.buffer,
            vertex_count: VERTICES.len() as u32,
            clear: self.clear,
        };
        unsafe { record::record_draw(&self.ctx.device, s.cmd, &target) }
    }

    fn submit(&mut self, slot: usize) -> Result<(), RenderError> {
        let s = self.slot(slot)?;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &s.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(
                    self.ctx.graphics_queue,
                    std::slice::from_ref(&submit),
                    s.in_flight,
                )
                .map_err(|e| RenderError::api("vkQueueSubmit", e))
        }
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Presented, RenderError> {
        let s = self.slot(slot)?;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present)
        } {
            Ok(false) => Ok(Presented::Done),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::Stale),
            Err(e) => Err(RenderError::api("vkQueuePresentKHR", e)),
        }
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        unsafe {
            self.ctx
                .device
                .device_wait_idle()
                .map_err(|e| RenderError::api("vkDeviceWaitIdle", e))
        }
    }

    fn rebuild_swapchain(&mut self, drawable: RenderSize) -> Result<(), RenderError> {
        // STRICT ORDER (recreate), device already idle:
        // 1) framebuffers -> views -> swapchain destroyed
        // 2) new swapchain negotiated for the current drawable
        // 3) render pass + pipeline rebuilt ONLY if the format changed
        // 4) views + framebuffers against the (possibly new) render pass
        unsafe {
            let format_changed = self.swapchain.recreate(&self.ctx, drawable, &self.arena)?;
            if format_changed {
                info!(
                    "vk: swapchain format {:?} -> {:?}, rebuilding pipeline",
                    self.pipeline.format, self.swapchain.format
                );
                let pipeline = Pipeline::new(
                    &self.ctx.device,
                    self.swapchain.format,
                    &self.shaders,
                    &self.arena,
                )?;
                self.pipeline.destroy(&self.ctx.device);
                self.pipeline = pipeline;
            }
            self.swapchain
                .create_views_and_framebuffers(&self.ctx.device, self.pipeline.render_pass)
        }
    }
}

impl VkRenderer {
    pub fn frames_in_flight(&self) -> usize {
        self.pacer.frames_in_flight()
    }

    pub fn swapchain_extent(&self) -> RenderSize {
        let e = self.gpu.swapchain.extent;
        RenderSize::new(e.width, e.height)
    }
}

impl Renderer for VkRenderer {
    type Config = VkConfig;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: VkConfig,
    ) -> Result<Self> {
        let gpu = unsafe { build_gpu(window, display, size, &cfg)? };
        Ok(Self {
            pacer: FramePacer::new(gpu.slots.len()),
            gpu,
        })
    }

    fn resize(&mut self, size: RenderSize) {
        debug!("vk: resize to {}x{}", size.width, size.height);
        self.pacer.notify_resized();
    }

    fn minimized(&mut self) {
        self.pacer.notify_minimized();
    }

    fn restored(&mut self) {
        self.pacer.notify_restored();
    }

    fn render(&mut self, drawable: RenderSize) -> Result<FrameOutcome> {
        // nothing allocated last iteration is still referenced
        self.gpu.arena.reset();
        Ok(self.pacer.tick(&mut self.gpu, drawable)?)
    }

    fn surface_state(&self) -> SurfaceState {
        self.pacer.state()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        // recorded fresh every frame, so the next frame picks it up
        self.gpu.clear = rgba;
    }
}
