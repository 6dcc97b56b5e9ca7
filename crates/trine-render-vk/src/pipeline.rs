// SPDX-License-Identifier: CEPL-1.0
//! Render pass, shader modules and the triangle pipeline.

use std::borrow::Cow;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ash::vk;
use tracing::{debug, warn};
use trine_core::Arena;
use trine_render::RenderError;

use crate::vertex::Vertex;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Stages compiled from `res/shaders` at build time.
pub const BUILTIN_VERTEX: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/vert.spv"));
pub const BUILTIN_FRAGMENT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/frag.spv"));

#[derive(Clone, Debug)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

/// Reads a stage from disk. A missing file falls back to the built-in
/// binary; any other read failure is an error.
pub fn read_stage<'a>(path: &Path, builtin: &'a [u8]) -> Result<Cow<'a, [u8]>, RenderError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Cow::Owned(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("shader {} not found, using the built-in stage", path.display());
            Ok(Cow::Borrowed(builtin))
        }
        Err(e) => Err(RenderError::Shader {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Copies a SPIR-V binary into arena words after checking its length and
/// magic number.
pub fn spirv_words<'a>(
    arena: &'a Arena,
    path: &Path,
    bytes: &[u8],
) -> Result<&'a [u32], RenderError> {
    let bad = |reason: &str| RenderError::Shader {
        path: path.display().to_string(),
        reason: reason.to_owned(),
    };
    if bytes.len() < 4 || bytes.len() % 4 != 0 {
        return Err(bad("length is not a non-zero multiple of 4"));
    }
    let words = arena.alloc_slice::<u32>(bytes.len() / 4)?;
    bytemuck::cast_slice_mut::<u32, u8>(words).copy_from_slice(bytes);
    if words[0] != SPIRV_MAGIC {
        return Err(bad("missing SPIR-V magic number"));
    }
    Ok(&*words)
}

unsafe fn shader_module(
    device: &ash::Device,
    path: &Path,
    builtin: &[u8],
    arena: &Arena,
) -> Result<vk::ShaderModule, RenderError> {
    let bytes = read_stage(path, builtin)?;
    let code = spirv_words(arena, path, &bytes)?;
    debug!("shader {}: {} words", path.display(), code.len());

    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: code.len() * 4,
        p_code: code.as_ptr(),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .map_err(|e| RenderError::api("vkCreateShaderModule", e))
}

pub unsafe fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> Result<vk::RenderPass, RenderError> {
    let color_attachment = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    // the acquire semaphore is waited at colour output, so the layout
    // transition has to wait there too
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_attachment,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&info, None)
        .map_err(|e| RenderError::api("vkCreateRenderPass", e))
}

/// Everything tied to the swapchain image format.
#[derive(Debug)]
pub struct Pipeline {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub handle: vk::Pipeline,
    pub format: vk::Format,
}

impl Pipeline {
    pub unsafe fn new(
        device: &ash::Device,
        format: vk::Format,
        shaders: &ShaderPaths,
        arena: &Arena,
    ) -> Result<Self, RenderError> {
        let render_pass = create_render_pass(device, format)?;

        let vs = shader_module(device, &shaders.vertex, BUILTIN_VERTEX, arena)?;
        let fs = shader_module(device, &shaders.fragment, BUILTIN_FRAGMENT, arena)?;

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: c"main".as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: c"main".as_ptr(),
                ..Default::default()
            },
        ];

        let binding = Vertex::binding();
        let attributes = Vertex::attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &binding,
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: 1.0,
            ..Default::default()
        };
        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| RenderError::api("vkCreatePipelineLayout", e))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let created = device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        );
        // modules are only needed during pipeline creation
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);

        let handle = match created {
            Ok(p) => p[0],
            Err((_, e)) => return Err(RenderError::api("vkCreateGraphicsPipelines", e)),
        };

        Ok(Self {
            render_pass,
            layout,
            handle,
            format,
        })
    }

    /// Pipeline, layout, render pass.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.handle, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_render_pass(self.render_pass, None);
    }
}
