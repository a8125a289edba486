//! The per-frame cycle: acquire, update, submit, present, and rebuild the
//! swapchain when the surface or window says it no longer fits.

use std::time::{Duration, Instant};

use anyhow::Result;
use ash::vk;
use ash::Device;
use log::*;
use nalgebra::Point3;

use crate::handle::{CommandBuffers, DeviceScoped, Scoped};
use crate::mesh::Vec3;

pub type Mat4 = nalgebra::Matrix4<f32>;

//==================================================================================================
// SECTION: Uniform data
//==================================================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Degrees per second the model turns around +Z.
    pub const SPIN_DEGREES_PER_SEC: f32 = 90.0;

    /// Model spinning around +Z, viewed from (2, 2, 2) with Z up, projected
    /// for Vulkan clip space (Y down, depth in [0, 1]).
    pub fn animated(elapsed: Duration, extent: vk::Extent2D) -> Self {
        let angle = (Self::SPIN_DEGREES_PER_SEC * elapsed.as_secs_f32()).to_radians();
        let model = Mat4::from_axis_angle(&Vec3::z_axis(), angle);

        let view = Mat4::look_at_rh(
            &Point3::new(2.0, 2.0, 2.0),
            &Point3::origin(),
            &Vec3::z(),
        );

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj =
            depth_zero_to_one() * Mat4::new_perspective(aspect, 45f32.to_radians(), 0.1, 10.0);
        proj[(1, 1)] *= -1.0;

        Self { model, view, proj }
    }
}

/// Remaps OpenGL-style clip depth [-w, w] to Vulkan's [0, w].
fn depth_zero_to_one() -> Mat4 {
    #[rustfmt::skip]
    let m = Mat4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 0.5, 0.5,
        0.0, 0.0, 0.0, 1.0,
    );
    m
}

//==================================================================================================
// SECTION: Command recording and synchronization objects
//==================================================================================================

pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
pub const CLEAR_DEPTH: f32 = 1.0;

pub fn clear_values() -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: CLEAR_DEPTH,
                stencil: 0,
            },
        },
    ]
}

/// Everything one recorded draw refers to.
pub struct DrawCommands<'a> {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub extent: vk::Extent2D,
    pub framebuffers: &'a [vk::Framebuffer],
}

/// Allocates one primary command buffer per framebuffer and records the whole
/// scene into each. They are replayed unchanged until the next rebuild.
pub fn record_command_buffers(
    device: &Device,
    pool: vk::CommandPool,
    draw: &DrawCommands<'_>,
) -> Result<DeviceScoped<CommandBuffers>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(draw.framebuffers.len() as u32);
    // SAFETY: `pool` belongs to `device`.
    let buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };
    let command_buffers = Scoped::new(device.clone(), CommandBuffers { pool, buffers });

    let clear_values = clear_values();
    let render_area = vk::Rect2D::default().extent(draw.extent);
    let recorded = command_buffers
        .as_ref()
        .map(|c| c.buffers.as_slice())
        .unwrap_or_default();
    for (&command_buffer, &framebuffer) in recorded.iter().zip(draw.framebuffers) {
        let begin_info = vk::CommandBufferBeginInfo::default();
        let render_pass_begin = vk::RenderPassBeginInfo::default()
            .render_pass(draw.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        // SAFETY: every handle in `draw` is alive and the buffer was just allocated.
        unsafe {
            device.begin_command_buffer(command_buffer, &begin_info)?;
            device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                draw.pipeline,
            );
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[draw.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(
                command_buffer,
                draw.index_buffer,
                0,
                vk::IndexType::UINT32,
            );
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                draw.pipeline_layout,
                0,
                &[draw.descriptor_set],
                &[],
            );
            device.cmd_draw_indexed(command_buffer, draw.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(command_buffer);
            device.end_command_buffer(command_buffer)?;
        }
    }
    Ok(command_buffers)
}

/// The two binary semaphores that order acquire, render and present, plus
/// the fence the host waits on before starting the next frame.
///
/// One frame is in flight at a time: the uniform buffer and both semaphores
/// are only touched again once the fence reports the previous submit done.
pub struct FrameSync {
    pub in_flight: DeviceScoped<vk::Fence>,
    pub render_finished: DeviceScoped<vk::Semaphore>,
    pub image_available: DeviceScoped<vk::Semaphore>,
}

impl FrameSync {
    pub fn new(device: &Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Signaled so the first frame does not wait.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        // SAFETY: plain semaphore and fence creation on a live device.
        unsafe {
            let image_available = device.create_semaphore(&semaphore_info, None)?;
            let image_available = Scoped::new(device.clone(), image_available);
            let render_finished = device.create_semaphore(&semaphore_info, None)?;
            let render_finished = Scoped::new(device.clone(), render_finished);
            let in_flight = Scoped::new(device.clone(), device.create_fence(&fence_info, None)?);
            Ok(Self {
                in_flight,
                render_finished,
                image_available,
            })
        }
    }
}

//==================================================================================================
// SECTION: Frame loop
//==================================================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Waiting,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// Result of asking the swapchain for the next image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Acquire {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Present {
    Optimal,
    Suboptimal,
    OutOfDate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The image was queued for presentation; `rebuilt` tells whether the
    /// swapchain was rebuilt afterwards.
    Presented { image_index: u32, rebuilt: bool },
    /// Acquisition reported the swapchain out of date; it was rebuilt and
    /// nothing was drawn.
    Abandoned,
    /// The window has no area; nothing happened.
    Skipped,
}

/// The GPU side of a frame, as seen by [`FrameLoop`].
pub trait FrameTarget {
    /// Blocks until the previously submitted frame has finished on the GPU.
    fn wait_for_previous_frame(&mut self) -> Result<()>;
    fn acquire(&mut self) -> Result<Acquire>;
    fn update_uniforms(&mut self, image_index: u32, elapsed: Duration) -> Result<()>;
    fn submit(&mut self, image_index: u32) -> Result<()>;
    fn present(&mut self, image_index: u32) -> Result<Present>;
    /// Tears down and recreates everything sized by the swapchain.
    fn rebuild(&mut self, framebuffer: vk::Extent2D) -> Result<()>;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub abandoned: u64,
    pub rebuilds: u64,
}

/// Drives [`FrameTarget`] through one frame per call and owns the resize flag.
pub struct FrameLoop {
    state: FrameState,
    framebuffer: vk::Extent2D,
    resized: bool,
    start: Instant,
    stats: FrameStats,
}

impl FrameLoop {
    pub fn new(framebuffer: vk::Extent2D) -> Self {
        Self {
            state: FrameState::Idle,
            framebuffer,
            resized: false,
            start: Instant::now(),
            stats: FrameStats::default(),
        }
    }

    /// Records a new framebuffer size. A zero-area size only marks the window
    /// as minimized; the swapchain is rebuilt once it has area again.
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.framebuffer = vk::Extent2D { width, height };
        if width > 0 && height > 0 {
            self.resized = true;
        } else {
            debug!("Framebuffer has no area; frames are skipped until restored.");
        }
    }

    pub fn is_minimized(&self) -> bool {
        self.framebuffer.width == 0 || self.framebuffer.height == 0
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Runs one frame. Out-of-date and suboptimal results are handled here by
    /// rebuilding; any other failure is returned and treated as fatal.
    pub fn draw_frame<T: FrameTarget>(&mut self, target: &mut T) -> Result<FrameOutcome> {
        if self.is_minimized() {
            return Ok(FrameOutcome::Skipped);
        }
        let outcome = self.run_frame(target);
        self.state = FrameState::Idle;
        outcome
    }

    fn run_frame<T: FrameTarget>(&mut self, target: &mut T) -> Result<FrameOutcome> {
        self.state = FrameState::Waiting;
        target.wait_for_previous_frame()?;

        self.state = FrameState::Acquiring;
        let image_index = match target.acquire()? {
            Acquire::Ready { image_index, .. } => image_index,
            Acquire::OutOfDate => {
                debug!("Swapchain out of date on acquire; frame abandoned.");
                self.stats.abandoned += 1;
                self.rebuild(target)?;
                return Ok(FrameOutcome::Abandoned);
            }
        };

        self.state = FrameState::Recording;
        target.update_uniforms(image_index, self.start.elapsed())?;

        self.state = FrameState::Submitted;
        target.submit(image_index)?;

        self.state = FrameState::Presenting;
        let presented = target.present(image_index)?;
        if presented != Present::OutOfDate {
            self.stats.presented += 1;
        }

        // Consume the flag unconditionally so one resize causes one rebuild.
        let resized = std::mem::take(&mut self.resized);
        let rebuilt = presented != Present::Optimal || resized;
        if rebuilt {
            trace!("Rebuilding after present ({:?}, resized: {}).", presented, resized);
            self.rebuild(target)?;
        }
        Ok(FrameOutcome::Presented {
            image_index,
            rebuilt,
        })
    }

    fn rebuild<T: FrameTarget>(&mut self, target: &mut T) -> Result<()> {
        self.resized = false;
        target.rebuild(self.framebuffer)?;
        self.stats.rebuilds += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapchain::{choose_extent, choose_image_count, framebuffer_attachments};
    use ash::vk::Handle;
    use nalgebra::Vector4;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Wait,
        Acquire,
        Update(u32),
        Submit(u32),
        Present(u32),
        Rebuild(u32, u32),
    }

    /// Behaves like a resizable surface with 2..=4096 extents and min 2 images.
    struct FakeTarget {
        calls: Vec<Call>,
        acquires: VecDeque<Acquire>,
        presents: VecDeque<Present>,
        caps: vk::SurfaceCapabilitiesKHR,
        extent: vk::Extent2D,
        images: u32,
        framebuffers: u32,
        next_image: u32,
    }

    impl FakeTarget {
        fn new() -> Self {
            let caps = vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 2,
                    height: 2,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            };
            let mut target = Self {
                calls: Vec::new(),
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                caps,
                extent: vk::Extent2D::default(),
                images: 0,
                framebuffers: 0,
                next_image: 0,
            };
            target.build(vk::Extent2D {
                width: 800,
                height: 600,
            });
            target.calls.clear();
            target
        }

        fn build(&mut self, framebuffer: vk::Extent2D) {
            self.extent = choose_extent(&self.caps, framebuffer);
            self.images = choose_image_count(&self.caps);
            let views = (0..self.images).map(|i| vk::ImageView::from_raw(u64::from(i) + 1));
            self.framebuffers =
                framebuffer_attachments(views, vk::ImageView::from_raw(u64::MAX)).len() as u32;
            self.next_image = 0;
        }

        fn rebuilds(&self) -> usize {
            self.calls
                .iter()
                .filter(|c| matches!(c, Call::Rebuild(..)))
                .count()
        }
    }

    impl FrameTarget for FakeTarget {
        fn wait_for_previous_frame(&mut self) -> Result<()> {
            self.calls.push(Call::Wait);
            Ok(())
        }

        fn acquire(&mut self) -> Result<Acquire> {
            self.calls.push(Call::Acquire);
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.images;
                Acquire::Ready {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn update_uniforms(&mut self, image_index: u32, _elapsed: Duration) -> Result<()> {
            self.calls.push(Call::Update(image_index));
            Ok(())
        }

        fn submit(&mut self, image_index: u32) -> Result<()> {
            self.calls.push(Call::Submit(image_index));
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<Present> {
            self.calls.push(Call::Present(image_index));
            Ok(self.presents.pop_front().unwrap_or(Present::Optimal))
        }

        fn rebuild(&mut self, framebuffer: vk::Extent2D) -> Result<()> {
            self.calls.push(Call::Rebuild(framebuffer.width, framebuffer.height));
            self.build(framebuffer);
            Ok(())
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn steady_frame_acquires_submits_and_presents() {
        let mut frames = FrameLoop::new(extent(800, 600));
        let mut target = FakeTarget::new();

        let outcome = frames.draw_frame(&mut target).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                image_index: 0,
                rebuilt: false
            }
        );
        assert_eq!(
            target.calls,
            [
                Call::Wait,
                Call::Acquire,
                Call::Update(0),
                Call::Submit(0),
                Call::Present(0)
            ]
        );
        assert_eq!(frames.state(), FrameState::Idle);
        assert_eq!(frames.stats().presented, 1);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_submitting() {
        let mut frames = FrameLoop::new(extent(800, 600));
        let mut target = FakeTarget::new();
        target.acquires.push_back(Acquire::OutOfDate);

        let outcome = frames.draw_frame(&mut target).unwrap();
        assert_eq!(outcome, FrameOutcome::Abandoned);
        assert_eq!(
            target.calls,
            [Call::Wait, Call::Acquire, Call::Rebuild(800, 600)]
        );
        assert_eq!(frames.stats().presented, 0);
        assert_eq!(frames.stats().rebuilds, 1);
    }

    #[test]
    fn suboptimal_or_out_of_date_present_triggers_rebuild() {
        for status in [Present::Suboptimal, Present::OutOfDate] {
            let mut frames = FrameLoop::new(extent(800, 600));
            let mut target = FakeTarget::new();
            target.presents.push_back(status);

            let outcome = frames.draw_frame(&mut target).unwrap();
            assert_eq!(
                outcome,
                FrameOutcome::Presented {
                    image_index: 0,
                    rebuilt: true
                }
            );
            assert_eq!(target.calls.last(), Some(&Call::Rebuild(800, 600)));
        }
    }

    #[test]
    fn out_of_date_present_is_not_counted_as_presented() {
        let mut frames = FrameLoop::new(extent(800, 600));
        let mut target = FakeTarget::new();
        target.presents.push_back(Present::OutOfDate);
        target.presents.push_back(Present::Suboptimal);

        frames.draw_frame(&mut target).unwrap();
        assert_eq!(frames.stats().presented, 0);
        frames.draw_frame(&mut target).unwrap();
        assert_eq!(frames.stats().presented, 1);
        assert_eq!(frames.stats().rebuilds, 2);
    }

    #[test]
    fn each_frame_waits_for_the_previous_one_before_acquiring() {
        let mut frames = FrameLoop::new(extent(800, 600));
        let mut target = FakeTarget::new();
        target.acquires.push_back(Acquire::Ready {
            image_index: 0,
            suboptimal: false,
        });
        target.acquires.push_back(Acquire::OutOfDate);

        for _ in 0..4 {
            frames.draw_frame(&mut target).unwrap();
        }

        let acquires: Vec<usize> = target
            .calls
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Call::Acquire)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(acquires.len(), 4);
        for i in acquires {
            assert!(i > 0);
            assert_eq!(target.calls[i - 1], Call::Wait);
        }
        // Nothing from the previous frame is overwritten before the wait.
        let first_present = target.calls.iter().position(|c| *c == Call::Present(0));
        let second_wait = target
            .calls
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Call::Wait)
            .nth(1)
            .map(|(i, _)| i);
        assert!(first_present < second_wait);
    }

    #[test]
    fn suboptimal_acquire_still_draws() {
        let mut frames = FrameLoop::new(extent(800, 600));
        let mut target = FakeTarget::new();
        target.acquires.push_back(Acquire::Ready {
            image_index: 1,
            suboptimal: true,
        });

        frames.draw_frame(&mut target).unwrap();
        assert!(target.calls.contains(&Call::Submit(1)));
        assert_eq!(target.rebuilds(), 0);
    }

    #[test]
    fn resize_flag_is_consumed_once() {
        let mut frames = FrameLoop::new(extent(800, 600));
        let mut target = FakeTarget::new();

        frames.notify_resized(1024, 768);
        frames.notify_resized(1280, 720);
        frames.draw_frame(&mut target).unwrap();
        assert_eq!(target.rebuilds(), 1);
        assert_eq!(target.calls.last(), Some(&Call::Rebuild(1280, 720)));

        frames.draw_frame(&mut target).unwrap();
        assert_eq!(target.rebuilds(), 1);
    }

    #[test]
    fn out_of_date_present_and_resize_rebuild_once() {
        let mut frames = FrameLoop::new(extent(800, 600));
        let mut target = FakeTarget::new();
        frames.notify_resized(640, 480);
        target.presents.push_back(Present::OutOfDate);

        frames.draw_frame(&mut target).unwrap();
        assert_eq!(target.rebuilds(), 1);
    }

    #[test]
    fn rebuild_follows_every_resize() {
        let mut frames = FrameLoop::new(extent(800, 600));
        let mut target = FakeTarget::new();

        let sizes = [(1024, 768), (1, 1), (5000, 300), (640, 480), (4096, 4096)];
        for (width, height) in sizes {
            frames.notify_resized(width, height);
            frames.draw_frame(&mut target).unwrap();

            let expected = choose_extent(&target.caps, extent(width, height));
            assert_eq!(target.extent, expected);
            assert!(target.extent.width >= 2 && target.extent.width <= 4096);
            assert!(target.extent.height >= 2 && target.extent.height <= 4096);
            assert_eq!(target.framebuffers, target.images);
        }
        assert_eq!(frames.stats().rebuilds, sizes.len() as u64);
    }

    #[test]
    fn minimized_window_skips_frames_and_never_rebuilds_at_zero_size() {
        let mut frames = FrameLoop::new(extent(800, 600));
        let mut target = FakeTarget::new();

        frames.notify_resized(0, 0);
        assert!(frames.is_minimized());
        assert_eq!(frames.draw_frame(&mut target).unwrap(), FrameOutcome::Skipped);
        assert!(target.calls.is_empty());

        frames.notify_resized(800, 0);
        assert_eq!(frames.draw_frame(&mut target).unwrap(), FrameOutcome::Skipped);

        frames.notify_resized(800, 600);
        frames.draw_frame(&mut target).unwrap();
        assert_eq!(target.calls.last(), Some(&Call::Rebuild(800, 600)));
    }

    #[test]
    fn projection_flips_y_and_maps_depth_to_unit_range() {
        let ubo = UniformBufferObject::animated(Duration::ZERO, extent(800, 600));

        let near = ubo.proj * Vector4::new(0.0, 0.0, -0.1, 1.0);
        let far = ubo.proj * Vector4::new(0.0, 0.0, -10.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-4);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);

        let up = ubo.proj * Vector4::new(0.0, 1.0, -1.0, 1.0);
        assert!(up.y < 0.0);
    }

    #[test]
    fn model_spins_ninety_degrees_per_second() {
        let ubo = UniformBufferObject::animated(Duration::from_secs(1), extent(800, 600));
        let x = ubo.model * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert!(x.x.abs() < 1e-5);
        assert!((x.y - 1.0).abs() < 1e-5);
        assert!((ubo.model[(2, 2)] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn uniform_layout_is_three_matrices() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 3 * 64);
    }

    #[test]
    fn clear_values_are_opaque_black_and_far_depth() {
        let [color, depth] = clear_values();
        // SAFETY: the union fields read are the ones written.
        unsafe {
            assert_eq!(color.color.float32, [0.0, 0.0, 0.0, 1.0]);
            assert_eq!(depth.depth_stencil.depth, 1.0);
        }
    }
}
