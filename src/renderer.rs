//! Owns every GPU object and runs frames against them.
//!
//! Objects are grouped by lifetime: the device context, device-scoped state
//! (command pool, layouts, uploaded scene), the swapchain epoch that is torn
//! down and rebuilt on resize, and the frame semaphores. Struct fields are
//! declared in reverse creation order so dropping releases children first.

use std::mem::size_of;
use std::time::Duration;

use anyhow::{anyhow, Result};
use ash::vk;
use log::*;
use winit::window::Window;

use crate::assets;
use crate::config::RendererConfig;
use crate::frame::{
    self, Acquire, DrawCommands, FrameLoop, FrameOutcome, FrameSync, FrameTarget, Present,
    UniformBufferObject,
};
use crate::handle::{CommandBuffers, DeviceScoped, Scoped};
use crate::negotiator::GpuContext;
use crate::pipeline::{self, DescriptorBindings, Descriptors, Layouts};
use crate::swapchain::{self, DepthBuffer, Swapchain};
use crate::upload::{self, AllocatedBuffer, AllocatedImage, MappedBuffer, Uploader};

/// Compiled shader bytecode, kept so the pipeline can be rebuilt.
pub struct ShaderCode {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

/// Uploaded, immutable scene data plus the descriptor set pointing at it.
/// Underscored fields are only read through the descriptor set.
struct Scene {
    descriptors: Descriptors,
    uniforms: MappedBuffer,
    index_buffer: AllocatedBuffer,
    vertex_buffer: AllocatedBuffer,
    _sampler: DeviceScoped<vk::Sampler>,
    _texture_view: DeviceScoped<vk::ImageView>,
    _texture: AllocatedImage,
    index_count: u32,
}

impl Scene {
    fn new(uploader: &Uploader<'_>, layouts: &Layouts, config: &RendererConfig) -> Result<Self> {
        let ctx = uploader.context();
        let device = &ctx.device;

        let mesh = assets::load_model(&config.model)?;
        if mesh.is_empty() {
            return Err(anyhow!(
                "Model '{}' contains no triangles.",
                config.model.display()
            ));
        }
        let pixels = assets::load_texture(&config.texture)?;

        let texture = uploader.texture_image(&pixels)?;
        let texture_view = upload::create_image_view(
            device,
            texture.handle(),
            texture.format,
            vk::ImageAspectFlags::COLOR,
        )?;
        let sampler = pipeline::create_sampler(device, &ctx.properties.limits)?;

        let vertex_buffer =
            uploader.device_local_buffer(mesh.vertices(), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index_buffer =
            uploader.device_local_buffer(mesh.indices(), vk::BufferUsageFlags::INDEX_BUFFER)?;
        let uniforms = MappedBuffer::new(
            ctx,
            size_of::<UniformBufferObject>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;

        let descriptors = Descriptors::new(
            device,
            layouts.descriptor_set.get(),
            &DescriptorBindings {
                uniform_buffer: uniforms.handle(),
                uniform_range: uniforms.size(),
                texture_view: texture_view.get(),
                sampler: sampler.get(),
            },
        )?;

        Ok(Self {
            descriptors,
            uniforms,
            index_buffer,
            vertex_buffer,
            _sampler: sampler,
            _texture_view: texture_view,
            _texture: texture,
            index_count: mesh.index_count(),
        })
    }
}

/// Everything sized by the swapchain. Rebuilt as a unit.
/// Underscored fields are only referenced by the recorded command buffers.
struct SwapchainEpoch {
    command_buffers: DeviceScoped<CommandBuffers>,
    _framebuffers: Vec<DeviceScoped<vk::Framebuffer>>,
    _depth: DepthBuffer,
    _pipeline: DeviceScoped<vk::Pipeline>,
    _render_pass: DeviceScoped<vk::RenderPass>,
    swapchain: Swapchain,
}

impl SwapchainEpoch {
    fn build(
        uploader: &Uploader<'_>,
        command_pool: vk::CommandPool,
        layouts: &Layouts,
        scene: &Scene,
        shaders: &ShaderCode,
        depth_format: vk::Format,
        framebuffer: vk::Extent2D,
    ) -> Result<Self> {
        let ctx = uploader.context();
        let device = &ctx.device;

        let swapchain = Swapchain::new(ctx, framebuffer)?;
        let render_pass = pipeline::create_render_pass(device, swapchain.format, depth_format)?;
        let pipeline = pipeline::create_graphics_pipeline(
            device,
            render_pass.get(),
            layouts.pipeline.get(),
            swapchain.extent,
            &shaders.vertex,
            &shaders.fragment,
        )?;
        let depth = DepthBuffer::new(uploader, depth_format, swapchain.extent)?;
        let framebuffers =
            swapchain::create_framebuffers(device, render_pass.get(), &swapchain, &depth)?;

        let framebuffer_handles: Vec<vk::Framebuffer> =
            framebuffers.iter().map(|fb| fb.get()).collect();
        let command_buffers = frame::record_command_buffers(
            device,
            command_pool,
            &DrawCommands {
                render_pass: render_pass.get(),
                pipeline: pipeline.get(),
                pipeline_layout: layouts.pipeline.get(),
                descriptor_set: scene.descriptors.set(),
                vertex_buffer: scene.vertex_buffer.handle(),
                index_buffer: scene.index_buffer.handle(),
                index_count: scene.index_count,
                extent: swapchain.extent,
                framebuffers: &framebuffer_handles,
            },
        )?;

        info!(
            "Swapchain built: {} images at {}x{}.",
            swapchain.image_count(),
            swapchain.extent.width,
            swapchain.extent.height
        );
        Ok(Self {
            command_buffers,
            _framebuffers: framebuffers,
            _depth: depth,
            _pipeline: pipeline,
            _render_pass: render_pass,
            swapchain,
        })
    }

    fn command_buffer(&self, image_index: u32) -> Result<vk::CommandBuffer> {
        self.command_buffers
            .as_ref()
            .and_then(|c| c.buffers.get(image_index as usize))
            .copied()
            .ok_or_else(|| anyhow!("No command buffer for swapchain image {}.", image_index))
    }
}

/// The GPU side of the renderer. Driven frame by frame through [`FrameTarget`].
pub struct RenderState {
    sync: FrameSync,
    epoch: Option<SwapchainEpoch>,
    scene: Scene,
    layouts: Layouts,
    command_pool: DeviceScoped<vk::CommandPool>,
    shaders: ShaderCode,
    depth_format: vk::Format,
    ctx: GpuContext,
}

impl RenderState {
    /// Creates every GPU object in dependency order.
    pub fn new(window: &Window, config: &RendererConfig) -> Result<Self> {
        let shaders = ShaderCode {
            vertex: assets::load_shader(&config.vertex_shader)?,
            fragment: assets::load_shader(&config.fragment_shader)?,
        };

        let ctx = GpuContext::new(window, config)?;
        let device = &ctx.device;

        let pool_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(ctx.families.graphics);
        // SAFETY: the graphics family index was validated during device selection.
        let command_pool = Scoped::new(device.clone(), unsafe {
            device.create_command_pool(&pool_info, None)?
        });
        let uploader = Uploader::new(&ctx, command_pool.get());

        let layouts = Layouts::new(device)?;
        let scene = Scene::new(&uploader, &layouts, config)?;
        let depth_format = upload::find_depth_format(&ctx)?;

        let size = window.inner_size();
        let epoch = SwapchainEpoch::build(
            &uploader,
            command_pool.get(),
            &layouts,
            &scene,
            &shaders,
            depth_format,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
        )?;
        let sync = FrameSync::new(device)?;

        Ok(Self {
            sync,
            epoch: Some(epoch),
            scene,
            layouts,
            command_pool,
            shaders,
            depth_format,
            ctx,
        })
    }

    fn epoch(&self) -> Result<&SwapchainEpoch> {
        self.epoch
            .as_ref()
            .ok_or_else(|| anyhow!("Swapchain is not built."))
    }
}

impl FrameTarget for RenderState {
    fn wait_for_previous_frame(&mut self) -> Result<()> {
        // SAFETY: the fence is alive and was either created signaled or passed
        // to the last submit.
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[self.sync.in_flight.get()], true, u64::MAX)?
        };
        Ok(())
    }

    fn acquire(&mut self) -> Result<Acquire> {
        let swapchain = self.epoch()?.swapchain.handle();
        // SAFETY: the swapchain and semaphore are alive; the semaphore is
        // unsignaled because the previous submit that waited on it completed.
        let result = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                swapchain,
                u64::MAX,
                self.sync.image_available.get(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(Acquire::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(anyhow!("Failed to acquire swapchain image: {}", e)),
        }
    }

    fn update_uniforms(&mut self, _image_index: u32, elapsed: Duration) -> Result<()> {
        let extent = self.epoch()?.swapchain.extent;
        let ubo = UniformBufferObject::animated(elapsed, extent);
        self.scene.uniforms.write(&ubo);
        Ok(())
    }

    fn submit(&mut self, image_index: u32) -> Result<()> {
        let command_buffer = self.epoch()?.command_buffer(image_index)?;
        let wait_semaphores = [self.sync.image_available.get()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [self.sync.render_finished.get()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let in_flight = self.sync.in_flight.get();
        // SAFETY: the command buffer was recorded against the live epoch and the
        // fence is signaled, so nothing pending still uses it.
        unsafe {
            self.ctx.device.reset_fences(&[in_flight])?;
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, &[submit_info], in_flight)?
        };
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<Present> {
        let swapchains = [self.epoch()?.swapchain.handle()];
        let wait_semaphores = [self.sync.render_finished.get()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: `image_index` was acquired from this swapchain this frame.
        let result = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present_info)
        };
        match result {
            Ok(false) => Ok(Present::Optimal),
            Ok(true) => Ok(Present::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
            Err(e) => Err(anyhow!("Failed to present swapchain image: {}", e)),
        }
    }

    fn rebuild(&mut self, framebuffer: vk::Extent2D) -> Result<()> {
        self.ctx.wait_idle()?;
        // The old epoch must be fully released before the new swapchain is
        // created on the same surface.
        self.epoch = None;

        let uploader = Uploader::new(&self.ctx, self.command_pool.get());
        let epoch = SwapchainEpoch::build(
            &uploader,
            self.command_pool.get(),
            &self.layouts,
            &self.scene,
            &self.shaders,
            self.depth_format,
            framebuffer,
        )?;
        self.epoch = Some(epoch);
        Ok(())
    }
}

impl Drop for RenderState {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            error!("Failed to wait for device idle during shutdown: {}", e);
        }
        debug!("Releasing GPU objects.");
    }
}

/// A window's renderer: GPU state plus the frame loop that drives it.
pub struct Renderer {
    frames: FrameLoop,
    state: RenderState,
}

impl Renderer {
    pub fn new(window: &Window, config: &RendererConfig) -> Result<Self> {
        let state = RenderState::new(window, config)?;
        let size = window.inner_size();
        Ok(Self {
            frames: FrameLoop::new(vk::Extent2D {
                width: size.width,
                height: size.height,
            }),
            state,
        })
    }

    pub fn draw_frame(&mut self) -> Result<FrameOutcome> {
        self.frames.draw_frame(&mut self.state)
    }

    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.frames.notify_resized(width, height);
    }

    pub fn is_minimized(&self) -> bool {
        self.frames.is_minimized()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let stats = self.frames.stats();
        info!(
            "Renderer shutting down: {} frames presented, {} abandoned, {} swapchain rebuilds.",
            stats.presented, stats.abandoned, stats.rebuilds
        );
    }
}
