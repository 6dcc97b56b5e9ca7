// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use trine_render::RenderError;

/// Per-frame-in-flight resources. Created once, reused until shutdown.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

pub unsafe fn create_command_pool(
    device: &ash::Device,
    graphics_family: u32,
) -> Result<vk::CommandPool, RenderError> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: graphics_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    device
        .create_command_pool(&pool_info, None)
        .map_err(|e| RenderError::api("vkCreateCommandPool", e))
}

/// `count` slots; fences start signaled so the first wait on each returns.
pub unsafe fn create_slots(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<FrameSlot>, RenderError> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    let cmds = device
        .allocate_command_buffers(&alloc_info)
        .map_err(|e| RenderError::api("vkAllocateCommandBuffers", e))?;

    let sem_ci = vk::SemaphoreCreateInfo::default();
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };

    let mut slots = Vec::with_capacity(count);
    for cmd in cmds {
        let sem = || {
            device
                .create_semaphore(&sem_ci, None)
                .map_err(|e| RenderError::api("vkCreateSemaphore", e))
        };
        slots.push(FrameSlot {
            cmd,
            image_available: sem()?,
            render_finished: sem()?,
            in_flight: device
                .create_fence(&fence_ci, None)
                .map_err(|e| RenderError::api("vkCreateFence", e))?,
        });
    }
    Ok(slots)
}

/// Semaphores and fences only; command buffers go with their pool.
pub unsafe fn destroy_slots(device: &ash::Device, slots: &mut Vec<FrameSlot>) {
    for s in slots.drain(..) {
        device.destroy_semaphore(s.image_available, None);
        device.destroy_semaphore(s.render_finished, None);
        device.destroy_fence(s.in_flight, None);
    }
}
