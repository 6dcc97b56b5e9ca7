// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use trine_render::RenderError;

/// Everything one frame's command buffer references.
#[derive(Clone, Copy, Debug)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub clear: [f32; 4],
}

pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

/// Resets `cmd` and records: begin pass with the clear colour, bind pipeline,
/// viewport + scissor, vertex buffer, draw, end pass.
pub unsafe fn record_draw(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &DrawTarget,
) -> Result<(), RenderError> {
    device
        .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        .map_err(|e| RenderError::api("vkResetCommandBuffer", e))?;
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &begin)
        .map_err(|e| RenderError::api("vkBeginCommandBuffer", e))?;

    let (viewport, scissor) = full_viewport(target.extent);
    let clear = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: target.clear,
        },
    };
    let pass_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: target.render_pass,
        framebuffer: target.framebuffer,
        render_area: scissor,
        clear_value_count: 1,
        p_clear_values: &clear,
        ..Default::default()
    };

    device.cmd_begin_render_pass(cmd, &pass_begin, vk::SubpassContents::INLINE);
    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, target.pipeline);
    device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
    device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
    device.cmd_bind_vertex_buffers(cmd, 0, &[target.vertex_buffer], &[0]);
    device.cmd_draw(cmd, target.vertex_count, 1, 0, 0);
    device.cmd_end_render_pass(cmd);

    device
        .end_command_buffer(cmd)
        .map_err(|e| RenderError::api("vkEndCommandBuffer", e))
}
