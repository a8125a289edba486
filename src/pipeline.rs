//! Render pass, graphics pipeline and the descriptor plumbing they consume.

use std::io::Cursor;

use anyhow::{anyhow, Result};
use ash::vk;
use ash::Device;
use log::*;

use crate::error::RendererError;
use crate::handle::{DeviceScoped, Scoped};
use crate::mesh::Vertex;

//==================================================================================================
// SECTION: Render pass
//==================================================================================================

/// One subpass with a cleared color attachment (presented afterwards) and a
/// cleared depth attachment.
pub fn create_render_pass(
    device: &Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<DeviceScoped<vk::RenderPass>> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);
    let color_attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_attachment = vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    let depth_attachment_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_attachment_ref))
        .depth_stencil_attachment(&depth_attachment_ref);

    // Wait for the presentation engine to release the image before writing it.
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let attachments = [color_attachment, depth_attachment];
    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    // SAFETY: every pointer in `create_info` refers to a local above.
    let render_pass = unsafe { device.create_render_pass(&create_info, None)? };
    Ok(Scoped::new(device.clone(), render_pass))
}

//==================================================================================================
// SECTION: Layouts
//==================================================================================================

/// Binding 0 is the vertex-stage uniform block, binding 1 the fragment-stage
/// combined image sampler.
pub fn descriptor_set_layout_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX),
        vk::DescriptorSetLayoutBinding::default()
            .binding(1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ]
}

/// The descriptor set layout and the pipeline layout built on it. Both live
/// for the whole device lifetime and survive swapchain rebuilds.
pub struct Layouts {
    pub pipeline: DeviceScoped<vk::PipelineLayout>,
    pub descriptor_set: DeviceScoped<vk::DescriptorSetLayout>,
}

impl Layouts {
    pub fn new(device: &Device) -> Result<Self> {
        let bindings = descriptor_set_layout_bindings();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        // SAFETY: `bindings` outlives the call.
        let descriptor_set = Scoped::new(device.clone(), unsafe {
            device.create_descriptor_set_layout(&create_info, None)?
        });

        let set_layouts = [descriptor_set.get()];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        // SAFETY: the set layout was created above on the same device.
        let pipeline = Scoped::new(device.clone(), unsafe {
            device.create_pipeline_layout(&layout_info, None)?
        });

        Ok(Self {
            pipeline,
            descriptor_set,
        })
    }
}

//==================================================================================================
// SECTION: Graphics pipeline
//==================================================================================================

/// Wraps SPIR-V bytes in a shader module. The module is only needed until the
/// pipeline that uses it has been created.
pub fn create_shader_module(
    device: &Device,
    bytecode: &[u8],
) -> Result<DeviceScoped<vk::ShaderModule>> {
    let code = ash::util::read_spv(&mut Cursor::new(bytecode))
        .map_err(|e| anyhow!("Failed to read SPIR-V: {}", e))?;
    if code.is_empty() {
        return Err(RendererError::EmptyShader.into());
    }
    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
    // SAFETY: `code` is aligned, non-empty SPIR-V words.
    let module = unsafe { device.create_shader_module(&create_info, None)? };
    Ok(Scoped::new(device.clone(), module))
}

pub fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport::default()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
}

pub fn scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D::default()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(extent)
}

/// Filled polygons, back faces culled, counter-clockwise front faces.
pub fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false)
}

/// Depth test and write on, closer fragments win, no stencil.
pub fn depth_stencil_state() -> vk::PipelineDepthStencilStateCreateInfo<'static> {
    vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .min_depth_bounds(0.0)
        .max_depth_bounds(1.0)
        .stencil_test_enable(false)
}

pub fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
}

/// Builds the single graphics pipeline for `render_pass` at `extent`.
///
/// Shader modules are created from the given bytecode and destroyed again
/// before returning, whether or not pipeline creation succeeded.
pub fn create_graphics_pipeline(
    device: &Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vertex_shader: &[u8],
    fragment_shader: &[u8],
) -> Result<DeviceScoped<vk::Pipeline>> {
    let vert_module = create_shader_module(device, vertex_shader)?;
    let frag_module = create_shader_module(device, fragment_shader)?;

    let entry_point = c"main";
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module.get())
            .name(entry_point),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module.get())
            .name(entry_point),
    ];

    let binding_descriptions = [Vertex::binding_description()];
    let attribute_descriptions = Vertex::attribute_descriptions();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport = viewport(extent);
    let scissor = scissor(extent);
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(std::slice::from_ref(&viewport))
        .scissors(std::slice::from_ref(&scissor));

    let rasterization_state = rasterization_state();
    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil_state = depth_stencil_state();

    let blend_attachment = color_blend_attachment();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(std::slice::from_ref(&blend_attachment))
        .blend_constants([0.0, 0.0, 0.0, 0.0]);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    // SAFETY: all state referenced by `pipeline_info` lives until the call returns.
    let pipeline = unsafe {
        match device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) {
            Ok(pipelines) => pipelines[0],
            Err((pipelines, err)) => {
                for pipeline in pipelines {
                    if pipeline != vk::Pipeline::null() {
                        device.destroy_pipeline(pipeline, None);
                    }
                }
                return Err(err.into());
            }
        }
    };
    debug!(
        "Graphics pipeline created for {}x{}.",
        extent.width, extent.height
    );
    Ok(Scoped::new(device.clone(), pipeline))
}

//==================================================================================================
// SECTION: Sampler and descriptors
//==================================================================================================

/// Linear filtering, repeat addressing, anisotropy up to 16x or the device limit.
pub fn sampler_create_info(max_sampler_anisotropy: f32) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(max_sampler_anisotropy.min(16.0))
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0)
}

pub fn create_sampler(
    device: &Device,
    limits: &vk::PhysicalDeviceLimits,
) -> Result<DeviceScoped<vk::Sampler>> {
    let create_info = sampler_create_info(limits.max_sampler_anisotropy);
    // SAFETY: plain create info; anisotropy was enabled on the logical device.
    let sampler = unsafe { device.create_sampler(&create_info, None)? };
    Ok(Scoped::new(device.clone(), sampler))
}

/// A pool sized for exactly one set, and that set written with the uniform
/// buffer and the sampled texture. The set is freed together with the pool.
pub struct Descriptors {
    _pool: DeviceScoped<vk::DescriptorPool>,
    set: vk::DescriptorSet,
}

/// What the descriptor set points at.
pub struct DescriptorBindings {
    pub uniform_buffer: vk::Buffer,
    pub uniform_range: vk::DeviceSize,
    pub texture_view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl Descriptors {
    pub fn new(
        device: &Device,
        layout: vk::DescriptorSetLayout,
        bindings: &DescriptorBindings,
    ) -> Result<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1),
        ];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        // SAFETY: `pool_sizes` outlives the call.
        let pool = Scoped::new(device.clone(), unsafe {
            device.create_descriptor_pool(&create_info, None)?
        });

        let set_layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.get())
            .set_layouts(&set_layouts);
        // SAFETY: the pool has room for exactly this one set.
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info)? }[0];

        let buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(bindings.uniform_buffer)
            .offset(0)
            .range(bindings.uniform_range);
        let image_info = vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(bindings.texture_view)
            .sampler(bindings.sampler);
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(std::slice::from_ref(&buffer_info)),
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(1)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(std::slice::from_ref(&image_info)),
        ];
        // SAFETY: every handle in `writes` is alive and matches the layout.
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        Ok(Self { _pool: pool, set })
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }
}
