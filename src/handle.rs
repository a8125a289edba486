//! Scoped ownership of Vulkan handles.
//!
//! A [`Scoped`] owns one driver object together with a clone of the parent the
//! object was created from (a logical device, or one of the extension loaders).
//! The object is released exactly once: when the wrapper is dropped, when
//! [`Scoped::release`] is called, or when [`Scoped::replace`] installs a
//! successor. Parents are cloned loader tables, not the driver parent itself,
//! so callers keep children-before-parents ordering by declaring child fields
//! ahead of the fields that own the parent.

use ash::vk;
use ash::Device;

/// A driver object that is destroyed through its parent.
pub trait Destroy<P> {
    /// Releases the driver object.
    ///
    /// # Safety
    ///
    /// `self` must have been created from `parent`, must not be in use by the
    /// GPU, and must not be released again.
    unsafe fn destroy(self, parent: &P);
}

/// Owns a driver object and releases it through its parent at most once.
pub struct Scoped<T: Destroy<P>, P> {
    handle: Option<T>,
    parent: P,
}

impl<T: Destroy<P>, P> Scoped<T, P> {
    pub fn new(parent: P, handle: T) -> Self {
        Self {
            handle: Some(handle),
            parent,
        }
    }

    /// A wrapper with nothing installed yet.
    pub fn empty(parent: P) -> Self {
        Self {
            handle: None,
            parent,
        }
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    pub fn as_ref(&self) -> Option<&T> {
        self.handle.as_ref()
    }

    /// Releases the current object (if any) before installing `handle`.
    pub fn replace(&mut self, handle: T) {
        self.release();
        self.handle = Some(handle);
    }

    /// Releases the current object now. Later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            // SAFETY: `handle` was created from `parent` and `take` guarantees it
            // is never seen again. Callers drive the device idle before release.
            unsafe { handle.destroy(&self.parent) };
        }
    }
}

impl<T: Destroy<P> + Copy + Default, P> Scoped<T, P> {
    /// The raw handle, or a null handle once released.
    pub fn get(&self) -> T {
        self.handle.unwrap_or_default()
    }
}

impl<T: Destroy<P>, P> Drop for Scoped<T, P> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Destroy<P> + std::fmt::Debug, P> std::fmt::Debug for Scoped<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Scoped").field(&self.handle).finish()
    }
}

/// Device-owned object wrapper.
pub type DeviceScoped<T> = Scoped<T, Device>;

macro_rules! device_children {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl Destroy<Device> for $ty {
                unsafe fn destroy(self, device: &Device) {
                    // SAFETY: upheld by the caller of `destroy`.
                    unsafe { device.$destroy(self, None) }
                }
            }
        )*
    };
}

device_children! {
    vk::Buffer => destroy_buffer,
    vk::DeviceMemory => free_memory,
    vk::Image => destroy_image,
    vk::ImageView => destroy_image_view,
    vk::Sampler => destroy_sampler,
    vk::RenderPass => destroy_render_pass,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::Pipeline => destroy_pipeline,
    vk::ShaderModule => destroy_shader_module,
    vk::Framebuffer => destroy_framebuffer,
    vk::CommandPool => destroy_command_pool,
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
}

/// Primary command buffers freed back to the pool they came from as one batch.
#[derive(Debug, Default)]
pub struct CommandBuffers {
    pub pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
}

impl Destroy<Device> for CommandBuffers {
    unsafe fn destroy(self, device: &Device) {
        if !self.buffers.is_empty() {
            // SAFETY: the buffers were allocated from `self.pool` on `device`.
            unsafe { device.free_command_buffers(self.pool, &self.buffers) };
        }
    }
}

impl Destroy<ash::khr::swapchain::Device> for vk::SwapchainKHR {
    unsafe fn destroy(self, loader: &ash::khr::swapchain::Device) {
        // SAFETY: upheld by the caller of `destroy`.
        unsafe { loader.destroy_swapchain(self, None) }
    }
}

impl Destroy<ash::khr::surface::Instance> for vk::SurfaceKHR {
    unsafe fn destroy(self, loader: &ash::khr::surface::Instance) {
        // SAFETY: upheld by the caller of `destroy`.
        unsafe { loader.destroy_surface(self, None) }
    }
}

impl Destroy<ash::ext::debug_utils::Instance> for vk::DebugUtilsMessengerEXT {
    unsafe fn destroy(self, loader: &ash::ext::debug_utils::Instance) {
        // SAFETY: upheld by the caller of `destroy`.
        unsafe { loader.destroy_debug_utils_messenger(self, None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Journal(Rc<RefCell<Vec<&'static str>>>);

    impl Journal {
        fn entries(&self) -> Vec<&'static str> {
            self.0.borrow().clone()
        }
    }

    #[derive(Debug)]
    struct Fake(&'static str);

    impl Destroy<Journal> for Fake {
        unsafe fn destroy(self, journal: &Journal) {
            journal.0.borrow_mut().push(self.0);
        }
    }

    #[test]
    fn drop_releases_exactly_once() {
        let journal = Journal::default();
        {
            let mut scoped = Scoped::new(journal.clone(), Fake("buffer"));
            scoped.release();
            scoped.release();
            assert!(!scoped.is_live());
        }
        assert_eq!(journal.entries(), ["buffer"]);
    }

    #[test]
    fn replace_releases_old_before_installing_new() {
        let journal = Journal::default();
        let mut scoped = Scoped::new(journal.clone(), Fake("old"));
        scoped.replace(Fake("new"));
        assert_eq!(journal.entries(), ["old"]);
        assert_eq!(scoped.as_ref().map(|f| f.0), Some("new"));
        drop(scoped);
        assert_eq!(journal.entries(), ["old", "new"]);
    }

    #[test]
    fn empty_wrapper_releases_nothing() {
        let journal = Journal::default();
        let mut scoped: Scoped<Fake, Journal> = Scoped::empty(journal.clone());
        scoped.release();
        drop(scoped);
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn fields_declared_child_first_are_released_child_first() {
        struct Chain {
            _framebuffer: Scoped<Fake, Journal>,
            _image_view: Scoped<Fake, Journal>,
            _swapchain: Scoped<Fake, Journal>,
        }

        let journal = Journal::default();
        let chain = Chain {
            _framebuffer: Scoped::new(journal.clone(), Fake("framebuffer")),
            _image_view: Scoped::new(journal.clone(), Fake("image view")),
            _swapchain: Scoped::new(journal.clone(), Fake("swapchain")),
        };
        drop(chain);
        assert_eq!(journal.entries(), ["framebuffer", "image view", "swapchain"]);
    }

    #[test]
    fn get_yields_null_after_release() {
        #[derive(Clone, Copy, Default, PartialEq, Debug)]
        struct Raw(u64);

        impl Destroy<Journal> for Raw {
            unsafe fn destroy(self, journal: &Journal) {
                journal.0.borrow_mut().push("raw");
            }
        }

        let journal = Journal::default();
        let mut scoped = Scoped::new(journal.clone(), Raw(7));
        assert_eq!(scoped.get(), Raw(7));
        scoped.release();
        assert_eq!(scoped.get(), Raw(0));
        assert_eq!(journal.entries(), ["raw"]);
    }
}
