// SPDX-License-Identifier: CEPL-1.0
use std::mem::{offset_of, size_of, size_of_val};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use trine_render::RenderError;

use crate::context::Context;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec2,
    pub color: Vec3,
}

pub const VERTICES: [Vertex; 3] = [
    Vertex {
        pos: Vec2::new(0.0, -0.5),
        color: Vec3::new(1.0, 0.0, 0.0),
    },
    Vertex {
        pos: Vec2::new(0.5, 0.5),
        color: Vec3::new(0.0, 1.0, 0.0),
    },
    Vertex {
        pos: Vec2::new(-0.5, 0.5),
        color: Vec3::new(0.0, 0.0, 1.0),
    },
];

impl Vertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

/// First memory type allowed by `filter` whose flags contain all of `wanted`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    filter: u32,
    wanted: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        filter & (1 << i) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(wanted)
    })
}

/// The triangle, uploaded once through a host-visible, host-coherent mapping.
pub struct VertexBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
}

impl VertexBuffer {
    pub unsafe fn new(ctx: &Context) -> Result<Self, RenderError> {
        let d = &ctx.device;
        let size = size_of_val(&VERTICES) as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = d
            .create_buffer(&buffer_info, None)
            .map_err(|e| RenderError::api("vkCreateBuffer", e))?;

        let req = d.get_buffer_memory_requirements(buffer);
        let memory_type_index = find_memory_type(
            &ctx.memory_properties(),
            req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .ok_or(RenderError::NoMemoryType)?;

        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = d
            .allocate_memory(&alloc, None)
            .map_err(|e| RenderError::api("vkAllocateMemory", e))?;
        d.bind_buffer_memory(buffer, memory, 0)
            .map_err(|e| RenderError::api("vkBindBufferMemory", e))?;

        let bytes: &[u8] = bytemuck::cast_slice(&VERTICES);
        let dst = d
            .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
            .map_err(|e| RenderError::api("vkMapMemory", e))?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), bytes.len());
        d.unmap_memory(memory);

        Ok(Self { buffer, memory })
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 20);
        assert_eq!(Vertex::binding().stride, 20);
        let [pos, color] = Vertex::attributes();
        assert_eq!((pos.location, pos.offset), (0, 0));
        assert_eq!((color.location, color.offset), (1, 8));
        assert_eq!(bytemuck::cast_slice::<_, u8>(&VERTICES).len(), 60);
    }

    #[test]
    fn triangle_corners() {
        assert_eq!(VERTICES[0].pos, Vec2::new(0.0, -0.5));
        assert_eq!(VERTICES[1].color, Vec3::Y);
        assert_eq!(VERTICES[2].color, Vec3::Z);
    }

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in p.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        p
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
            host,
        ]);
        assert_eq!(find_memory_type(&p, 0b1111, host), Some(2));
        assert_eq!(find_memory_type(&p, 0b1011, host), Some(3));
        assert_eq!(find_memory_type(&p, 0b0011, host), None);
        assert_eq!(
            find_memory_type(&p, u32::MAX, vk::MemoryPropertyFlags::empty()),
            Some(0)
        );
    }
}
