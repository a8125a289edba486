//! Resource upload: buffer/image allocation, staged host-to-device copies,
//! image layout transitions and format capability queries.

use std::mem::size_of_val;
use std::ptr::copy_nonoverlapping as memcpy;
use std::ptr::NonNull;

use anyhow::{anyhow, Result};
use ash::vk;
use ash::Device;
use log::*;

use crate::assets::TexturePixels;
use crate::error::RendererError;
use crate::handle::{CommandBuffers, DeviceScoped, Scoped};
use crate::negotiator::GpuContext;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

//==================================================================================================
// SECTION: Capability queries
//==================================================================================================

/// First memory type allowed by `type_filter` whose flags contain `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, RendererError> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_filter & (1 << i) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
        .ok_or(RendererError::NoMemoryType {
            type_filter,
            properties,
        })
}

/// First candidate whose tiling features contain `features`.
pub fn find_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    format_properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format, RendererError> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let properties = format_properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| RendererError::NoSupportedFormat(candidates.to_vec()))
}

pub fn find_depth_format(ctx: &GpuContext) -> Result<vk::Format> {
    let format = find_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| ctx.format_properties(format),
    )?;
    Ok(format)
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Aspects an image of `format` exposes to views and barriers.
pub fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if DEPTH_FORMAT_CANDIDATES.contains(&format) {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Access and stage masks for one supported layout transition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for the fixed set of transitions the renderer performs.
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<TransitionMasks, RendererError> {
    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        _ => return Err(RendererError::UnsupportedLayoutTransition { old, new }),
    };
    Ok(TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

//==================================================================================================
// SECTION: Allocation
//==================================================================================================

/// A buffer and its backing memory; the buffer is released first.
pub struct AllocatedBuffer {
    pub buffer: DeviceScoped<vk::Buffer>,
    pub memory: DeviceScoped<vk::DeviceMemory>,
    pub size: vk::DeviceSize,
}

impl AllocatedBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.get()
    }
}

/// An image and its backing memory; the image is released first.
pub struct AllocatedImage {
    pub image: DeviceScoped<vk::Image>,
    pub memory: DeviceScoped<vk::DeviceMemory>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl AllocatedImage {
    pub fn handle(&self) -> vk::Image {
        self.image.get()
    }
}

fn allocate(
    ctx: &GpuContext,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<DeviceScoped<vk::DeviceMemory>> {
    let memory_type_index = find_memory_type(
        &ctx.memory_properties,
        requirements.memory_type_bits,
        properties,
    )?;
    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);
    // SAFETY: the allocation info is fully initialized.
    let memory = unsafe { ctx.device.allocate_memory(&alloc_info, None)? };
    Ok(Scoped::new(ctx.device.clone(), memory))
}

pub fn create_buffer(
    ctx: &GpuContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<AllocatedBuffer> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    // SAFETY: the create info is fully initialized.
    let buffer = Scoped::new(ctx.device.clone(), unsafe {
        ctx.device.create_buffer(&buffer_info, None)?
    });
    // SAFETY: `buffer` is a live buffer of this device.
    let requirements = unsafe { ctx.device.get_buffer_memory_requirements(buffer.get()) };
    let memory = allocate(ctx, requirements, properties)?;
    // SAFETY: fresh memory of a compatible type, bound once at offset zero.
    unsafe { ctx.device.bind_buffer_memory(buffer.get(), memory.get(), 0)? };

    Ok(AllocatedBuffer {
        buffer,
        memory,
        size,
    })
}

pub fn create_image(
    ctx: &GpuContext,
    extent: vk::Extent2D,
    format: vk::Format,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<AllocatedImage> {
    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(tiling)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(vk::SampleCountFlags::TYPE_1);

    // SAFETY: the create info is fully initialized.
    let image = Scoped::new(ctx.device.clone(), unsafe {
        ctx.device.create_image(&image_info, None)?
    });
    // SAFETY: `image` is a live image of this device.
    let requirements = unsafe { ctx.device.get_image_memory_requirements(image.get()) };
    let memory = allocate(ctx, requirements, properties)?;
    // SAFETY: fresh memory of a compatible type, bound once at offset zero.
    unsafe { ctx.device.bind_image_memory(image.get(), memory.get(), 0)? };

    Ok(AllocatedImage {
        image,
        memory,
        format,
        extent,
    })
}

pub fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspects: vk::ImageAspectFlags,
) -> Result<DeviceScoped<vk::ImageView>> {
    let subresource_range = vk::ImageSubresourceRange::default()
        .aspect_mask(aspects)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(subresource_range);

    // SAFETY: `image` is a live image of `device`.
    let view = unsafe { device.create_image_view(&create_info, None)? };
    Ok(Scoped::new(device.clone(), view))
}

/// Copies `data` into host-visible memory through a temporary mapping.
pub fn write_memory<T: Copy>(
    device: &Device,
    memory: vk::DeviceMemory,
    data: &[T],
) -> Result<()> {
    let size = size_of_val(data);
    // SAFETY: `memory` is host-visible and at least `size` bytes long; the
    // mapping is released before returning.
    unsafe {
        let ptr = device.map_memory(memory, 0, size as u64, vk::MemoryMapFlags::empty())?;
        memcpy(data.as_ptr().cast::<u8>(), ptr.cast::<u8>(), size);
        device.unmap_memory(memory);
    }
    Ok(())
}

/// A host-visible, host-coherent buffer that stays mapped for its lifetime.
///
/// Freeing the memory implicitly unmaps it, so no explicit unmap is needed.
pub struct MappedBuffer {
    ptr: NonNull<u8>,
    buffer: AllocatedBuffer,
}

impl MappedBuffer {
    pub fn new(ctx: &GpuContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Self> {
        let buffer = create_buffer(
            ctx,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        // SAFETY: host-visible memory, mapped once for the buffer's whole lifetime.
        let ptr = unsafe {
            ctx.device
                .map_memory(buffer.memory.get(), 0, size, vk::MemoryMapFlags::empty())?
        };
        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| anyhow!("map_memory returned null"))?;
        Ok(Self { ptr, buffer })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size
    }

    /// Overwrites the start of the buffer with `value`.
    pub fn write<T: Copy>(&mut self, value: &T) {
        let len = std::mem::size_of::<T>();
        assert!(len as u64 <= self.buffer.size, "write exceeds mapped buffer");
        // SAFETY: the mapping is live and at least `len` bytes; host-coherent
        // memory needs no flush.
        unsafe { memcpy((value as *const T).cast::<u8>(), self.ptr.as_ptr(), len) };
    }
}

//==================================================================================================
// SECTION: One-shot transfer commands
//==================================================================================================

/// Records short-lived command buffers on the graphics queue and waits for them.
pub struct Uploader<'a> {
    ctx: &'a GpuContext,
    pool: vk::CommandPool,
}

impl<'a> Uploader<'a> {
    pub fn new(ctx: &'a GpuContext, pool: vk::CommandPool) -> Self {
        Self { ctx, pool }
    }

    pub fn context(&self) -> &'a GpuContext {
        self.ctx
    }

    /// Allocates a command buffer, records `record` into it, submits it to the
    /// graphics queue, waits for completion, then frees it.
    pub fn one_shot(&self, record: impl FnOnce(&Device, vk::CommandBuffer)) -> Result<()> {
        let device = &self.ctx.device;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.pool)
            .command_buffer_count(1);

        // SAFETY: `pool` belongs to this device.
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };
        let command_buffer = buffers[0];
        let _guard = Scoped::new(
            device.clone(),
            CommandBuffers {
                pool: self.pool,
                buffers,
            },
        );

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: freshly allocated command buffer in the initial state.
        unsafe { device.begin_command_buffer(command_buffer, &begin_info)? };
        record(device, command_buffer);
        // SAFETY: recording began above.
        unsafe { device.end_command_buffer(command_buffer)? };

        let submit_info =
            vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&command_buffer));
        // SAFETY: the queue belongs to this device; waiting idle before the
        // guard frees the command buffer.
        unsafe {
            device.queue_submit(self.ctx.graphics_queue, &[submit_info], vk::Fence::null())?;
            device.queue_wait_idle(self.ctx.graphics_queue)?;
        }
        Ok(())
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> Result<()> {
        self.one_shot(|device, command_buffer| {
            let region = vk::BufferCopy::default().size(size);
            // SAFETY: both buffers are live and at least `size` bytes.
            unsafe { device.cmd_copy_buffer(command_buffer, src, dst, &[region]) };
        })
    }

    /// Copies tightly packed pixels from `buffer` into a transfer-destination image.
    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.one_shot(|device, command_buffer| {
            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            // SAFETY: the image is in TRANSFER_DST_OPTIMAL and large enough.
            unsafe {
                device.cmd_copy_buffer_to_image(
                    command_buffer,
                    buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        })
    }

    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let masks = transition_masks(old_layout, new_layout)?;
        let subresource = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_mask(format))
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource)
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        self.one_shot(|device, command_buffer| {
            // SAFETY: `image` is live and currently in `old_layout`.
            unsafe {
                device.cmd_pipeline_barrier(
                    command_buffer,
                    masks.src_stage,
                    masks.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            }
        })
    }

    fn staging_buffer<T: Copy>(&self, data: &[T]) -> Result<AllocatedBuffer> {
        let size = size_of_val(data) as vk::DeviceSize;
        let staging = create_buffer(
            self.ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        write_memory(&self.ctx.device, staging.memory.get(), data)?;
        Ok(staging)
    }

    /// Uploads `data` into a new device-local buffer through a staging buffer.
    pub fn device_local_buffer<T: Copy>(
        &self,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<AllocatedBuffer> {
        let staging = self.staging_buffer(data)?;
        let buffer = create_buffer(
            self.ctx,
            staging.size,
            vk::BufferUsageFlags::TRANSFER_DST | usage,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.copy_buffer(staging.handle(), buffer.handle(), staging.size)?;
        trace!("Uploaded {} bytes ({:?}).", staging.size, usage);
        Ok(buffer)
    }

    /// Uploads RGBA8 pixels into a sampled, device-local image left in
    /// SHADER_READ_ONLY_OPTIMAL.
    pub fn texture_image(&self, texture: &TexturePixels) -> Result<AllocatedImage> {
        let staging = self.staging_buffer(texture.pixels.as_slice())?;
        let extent = vk::Extent2D {
            width: texture.width,
            height: texture.height,
        };
        let image = create_image(
            self.ctx,
            extent,
            TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        self.transition_image_layout(
            image.handle(),
            TEXTURE_FORMAT,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        self.copy_buffer_to_image(staging.handle(), image.handle(), extent)?;
        self.transition_image_layout(
            image.handle(),
            TEXTURE_FORMAT,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        debug!("Texture image uploaded ({}x{}).", extent.width, extent.height);
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (memory_type, &flags) in properties.memory_types.iter_mut().zip(flags) {
            memory_type.property_flags = flags;
        }
        properties
    }

    fn supports(formats: &[vk::Format]) -> impl Fn(vk::Format) -> vk::FormatProperties + '_ {
        move |format| vk::FormatProperties {
            optimal_tiling_features: if formats.contains(&format) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn memory_type_is_first_superset_within_filter() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let index = find_memory_type(
            &properties,
            0b110,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn memory_type_outside_filter_is_ignored() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let index = find_memory_type(&properties, 0b10, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index.unwrap(), 1);
    }

    #[test]
    fn no_matching_memory_type_is_an_error() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        let err = find_memory_type(&properties, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert!(matches!(err, Err(RendererError::NoMemoryType { type_filter: 1, .. })));
    }

    #[test]
    fn depth_format_falls_back_in_list_order() {
        let query = supports(&[vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D24_UNORM_S8_UINT]);
        let format = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            query,
        )
        .unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn linear_tiling_checks_linear_features() {
        let query = supports(&[vk::Format::D32_SFLOAT]);
        let err = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            query,
        );
        assert!(matches!(err, Err(RendererError::NoSupportedFormat(ref c)) if c.len() == 3));
    }

    #[test]
    fn stencil_formats_expose_both_aspects() {
        assert_eq!(aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_mask(TEXTURE_FORMAT), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn supported_transitions_have_expected_stages() {
        let upload = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(upload.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let sample = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(sample.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(sample.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let depth = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn unhandled_transition_is_rejected() {
        let err = transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert!(matches!(
            err,
            Err(RendererError::UnsupportedLayoutTransition { .. })
        ));
    }
}
