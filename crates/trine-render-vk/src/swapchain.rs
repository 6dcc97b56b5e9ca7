// SPDX-License-Identifier: CEPL-1.0
//! Swapchain negotiation and the per-image resources built on top of it.

use ash::vk;
use tracing::info;
use trine_core::Arena;
use trine_render::{RenderError, RenderSize};

use crate::context::{Context, QueueFamilies};

/// One presentable image with the view and framebuffer that render into it.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

#[derive(Debug)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<SwapchainImage>,
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX when offered, FIFO otherwise. FIFO is always supported.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: drawable
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: drawable
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

/// Concurrent sharing naming both families when they differ, else exclusive.
/// The index list lives in the arena.
pub fn sharing_mode<'a>(
    families: QueueFamilies,
    arena: &'a Arena,
) -> Result<(vk::SharingMode, &'a [u32]), RenderError> {
    if families.shared() {
        let none: &[u32] = &[];
        return Ok((vk::SharingMode::EXCLUSIVE, none));
    }
    let indices = arena.alloc_slice::<u32>(2)?;
    indices[0] = families.graphics;
    indices[1] = families.present;
    Ok((vk::SharingMode::CONCURRENT, &*indices))
}

impl Swapchain {
    /// Negotiates and creates the chain. Views and framebuffers are left null
    /// until [`Swapchain::create_views_and_framebuffers`].
    pub unsafe fn create(
        ctx: &Context,
        drawable: RenderSize,
        arena: &Arena,
    ) -> Result<Self, RenderError> {
        let caps = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.phys, ctx.surface)
            .map_err(|e| RenderError::api("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?;
        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(ctx.phys, ctx.surface)
            .map_err(|e| RenderError::api("vkGetPhysicalDeviceSurfaceFormatsKHR", e))?;
        let modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.phys, ctx.surface)
            .map_err(|e| RenderError::api("vkGetPhysicalDeviceSurfacePresentModesKHR", e))?;

        let surface_format =
            choose_surface_format(&formats).ok_or(RenderError::SwapchainUnsupported)?;
        if modes.is_empty() {
            return Err(RenderError::SwapchainUnsupported);
        }
        let present_mode = choose_present_mode(&modes);
        let extent = choose_extent(&caps, drawable);
        let image_count = choose_image_count(&caps);
        let (sharing, queue_families) = sharing_mode(ctx.families, arena)?;

        info!(
            "swapchain: {:?} / {:?}, {:?}, {}x{}, images(min={} -> {}), {:?}",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            caps.min_image_count,
            image_count,
            sharing,
        );

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: image_count,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: queue_families.len() as u32,
            p_queue_family_indices: queue_families.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let handle = ctx
            .swapchain_loader
            .create_swapchain(&info, None)
            .map_err(|e| RenderError::api("vkCreateSwapchainKHR", e))?;
        let images = ctx
            .swapchain_loader
            .get_swapchain_images(handle)
            .map_err(|e| RenderError::api("vkGetSwapchainImagesKHR", e))?
            .into_iter()
            .map(|image| SwapchainImage {
                image,
                view: vk::ImageView::null(),
                framebuffer: vk::Framebuffer::null(),
            })
            .collect();

        Ok(Self {
            handle,
            format: surface_format.format,
            extent,
            images,
        })
    }

    /// One 2D colour view and one single-attachment framebuffer per image.
    pub unsafe fn create_views_and_framebuffers(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
    ) -> Result<(), RenderError> {
        for img in &mut self.images {
            let view_ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: img.image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format,
                components: vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                },
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            img.view = device
                .create_image_view(&view_ci, None)
                .map_err(|e| RenderError::api("vkCreateImageView", e))?;

            let fb_ci = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: 1,
                p_attachments: &img.view,
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            img.framebuffer = device
                .create_framebuffer(&fb_ci, None)
                .map_err(|e| RenderError::api("vkCreateFramebuffer", e))?;
        }
        Ok(())
    }

    /// Framebuffers, then views, then the swapchain. Leaves `self` empty, so a
    /// second call is harmless.
    pub unsafe fn destroy(&mut self, ctx: &Context) {
        for img in &self.images {
            ctx.device.destroy_framebuffer(img.framebuffer, None);
        }
        for img in &self.images {
            ctx.device.destroy_image_view(img.view, None);
        }
        ctx.swapchain_loader.destroy_swapchain(self.handle, None);
        self.images.clear();
        self.handle = vk::SwapchainKHR::null();
    }

    /// Replaces the whole chain for `drawable`. The device must be idle.
    /// Returns whether the image format changed, in which case anything built
    /// against the old format must be rebuilt before the new framebuffers.
    pub unsafe fn recreate(
        &mut self,
        ctx: &Context,
        drawable: RenderSize,
        arena: &Arena,
    ) -> Result<bool, RenderError> {
        let old_format = self.format;
        self.destroy(ctx);
        *self = Swapchain::create(ctx, drawable, arena)?;
        Ok(self.format != old_format)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.images.len()
    }
}
