//! Swapchain lifecycle: selection rules, the presentable image chain with its
//! views, the shared depth buffer and the per-image framebuffers.

use anyhow::Result;
use ash::vk;
use ash::Device;
use log::*;

use crate::error::RendererError;
use crate::handle::{DeviceScoped, Scoped};
use crate::negotiator::{GpuContext, SwapchainSupport};
use crate::upload::{self, AllocatedImage, Uploader};

//==================================================================================================
// SECTION: Selection rules
//==================================================================================================

/// Prefers 8-bit BGRA sRGB with a non-linear sRGB color space, else the first pair.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, RendererError> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .ok_or(RendererError::NoSurfaceFormat)
}

/// Mailbox when offered; FIFO is always available.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's fixed extent, or the framebuffer size clamped to the surface
/// bounds when the surface reports "any size" (`u32::MAX`).
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: framebuffer.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, capped by the maximum when it is bounded (non-zero).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// Everything decided about a swapchain before creating it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(
        support: &SwapchainSupport,
        framebuffer: vk::Extent2D,
    ) -> Result<Self, RendererError> {
        Ok(Self {
            image_count: choose_image_count(&support.capabilities),
            surface_format: choose_surface_format(&support.formats)?,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, framebuffer),
            transform: support.capabilities.current_transform,
        })
    }
}

//==================================================================================================
// SECTION: Swapchain and image views
//==================================================================================================

/// The presentable image chain. Views are released before the swapchain.
pub struct Swapchain {
    views: Vec<DeviceScoped<vk::ImageView>>,
    handle: Scoped<vk::SwapchainKHR, ash::khr::swapchain::Device>,
    images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(ctx: &GpuContext, framebuffer: vk::Extent2D) -> Result<Self> {
        let support = ctx.swapchain_support()?;
        let plan = SwapchainPlan::new(&support, framebuffer)?;
        debug!(
            "Swapchain plan: {} images, {:?}/{:?}, {:?}, {}x{}.",
            plan.image_count,
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height
        );

        let families = ctx.families;
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, shared_families): (_, &[u32]) =
            if families.graphics != families.present {
                (vk::SharingMode::CONCURRENT, &family_indices)
            } else {
                (vk::SharingMode::EXCLUSIVE, &[])
            };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface())
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(plan.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let loader = ctx.swapchain_loader.clone();
        // SAFETY: the surface is alive and the previous swapchain (if any) was destroyed.
        let handle = Scoped::new(loader, unsafe {
            ctx.swapchain_loader.create_swapchain(&create_info, None)?
        });
        // SAFETY: `handle` was just created by this loader.
        let images = unsafe { ctx.swapchain_loader.get_swapchain_images(handle.get())? };

        let mut swapchain = Self {
            views: Vec::with_capacity(images.len()),
            handle,
            images,
            format: plan.surface_format.format,
            extent: plan.extent,
        };
        for &image in &swapchain.images {
            swapchain.views.push(upload::create_image_view(
                &ctx.device,
                image,
                swapchain.format,
                vk::ImageAspectFlags::COLOR,
            )?);
        }
        Ok(swapchain)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle.get()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> impl Iterator<Item = vk::ImageView> + '_ {
        self.views.iter().map(|view| view.get())
    }
}

//==================================================================================================
// SECTION: Depth buffer and framebuffers
//==================================================================================================

/// Depth attachment shared by every framebuffer of one swapchain epoch.
pub struct DepthBuffer {
    view: DeviceScoped<vk::ImageView>,
    _image: AllocatedImage,
}

impl DepthBuffer {
    pub fn new(uploader: &Uploader<'_>, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        let ctx = uploader.context();
        let image = upload::create_image(
            ctx,
            extent,
            format,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let view = upload::create_image_view(
            &ctx.device,
            image.handle(),
            format,
            vk::ImageAspectFlags::DEPTH,
        )?;
        uploader.transition_image_layout(
            image.handle(),
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )?;
        Ok(Self {
            view,
            _image: image,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view.get()
    }
}

/// Attachment lists for the framebuffers: one per color view, in view order,
/// each paired with the shared depth view.
pub fn framebuffer_attachments(
    views: impl IntoIterator<Item = vk::ImageView>,
    depth: vk::ImageView,
) -> Vec<[vk::ImageView; 2]> {
    views.into_iter().map(|view| [view, depth]).collect()
}

/// One framebuffer per swapchain view, each sharing the depth view.
pub fn create_framebuffers(
    device: &Device,
    render_pass: vk::RenderPass,
    swapchain: &Swapchain,
    depth: &DepthBuffer,
) -> Result<Vec<DeviceScoped<vk::Framebuffer>>> {
    let attachment_sets = framebuffer_attachments(swapchain.views(), depth.view());
    let mut framebuffers = Vec::with_capacity(attachment_sets.len());
    for attachments in &attachment_sets {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(swapchain.extent.width)
            .height(swapchain.extent.height)
            .layers(1);
        // SAFETY: both attachments and the render pass are alive and compatible.
        let framebuffer = unsafe { device.create_framebuffer(&create_info, None)? };
        framebuffers.push(Scoped::new(device.clone(), framebuffer));
    }
    Ok(framebuffers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn resizable_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn srgb_format_is_preferred() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), formats[1]);
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), formats[0]);
    }

    #[test]
    fn no_formats_is_an_error() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RendererError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn mailbox_wins_when_offered() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_surface_extent_is_used_verbatim() {
        let mut caps = resizable_caps();
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
        );
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn framebuffer_size_is_clamped_to_surface_bounds() {
        let caps = resizable_caps();
        let cases = [
            ((1280, 720), (1280, 720)),
            ((10, 10), (64, 64)),
            ((5000, 5000), (4096, 2048)),
        ];
        for ((width, height), expected) in cases {
            let extent = choose_extent(&caps, vk::Extent2D { width, height });
            assert_eq!((extent.width, extent.height), expected);
        }
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        let mut caps = resizable_caps();
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn plan_combines_every_rule() {
        let support = SwapchainSupport {
            capabilities: resizable_caps(),
            formats: vec![format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let plan = SwapchainPlan::new(
            &support,
            vk::Extent2D {
                width: 1024,
                height: 768,
            },
        )
        .unwrap();
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(plan.extent.width, 1024);
        assert_eq!(plan.extent.height, 768);
    }

    #[test]
    fn every_view_gets_a_framebuffer_sharing_the_depth_view() {
        use ash::vk::Handle;

        let views: Vec<vk::ImageView> = (1..=3).map(vk::ImageView::from_raw).collect();
        let depth = vk::ImageView::from_raw(99);
        let sets = framebuffer_attachments(views.iter().copied(), depth);
        assert_eq!(sets.len(), views.len());
        for (set, view) in sets.iter().zip(&views) {
            assert_eq!(set, &[*view, depth]);
        }
        assert!(framebuffer_attachments(Vec::new(), depth).is_empty());
    }
}
