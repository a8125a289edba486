//! Capability negotiation: instance, debug messenger, surface, physical device
//! selection and logical device creation.

use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};

use anyhow::{anyhow, Result};
use ash::vk;
use ash::{Device, Entry, Instance};
use log::*;
use winit::window::Window;

use crate::config::RendererConfig;
use crate::error::{RendererError, SuitabilityError};
use crate::handle::Scoped;
use crate::vk_window;

pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";
pub const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

//==================================================================================================
// SECTION: Queue families and swapchain support
//==================================================================================================

/// Graphics and present queue family indices; they may coincide.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scans queue families in order and stops once both roles are filled.
    ///
    /// A later family that supports graphics overwrites an earlier one until
    /// the set is complete, so a family serving both roles wins when it comes
    /// first to complete the pair.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let mut indices = Self::default();
        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }
            if family.queue_count > 0 && supports_present(index)? {
                indices.present = Some(index);
            }
            if indices.is_complete() {
                break;
            }
        }
        Ok(indices)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// The distinct family indices to open queues on.
    pub fn unique(&self) -> Vec<u32> {
        let mut unique = Vec::with_capacity(2);
        for index in [self.graphics, self.present].into_iter().flatten() {
            if !unique.contains(&index) {
                unique.push(index);
            }
        }
        unique
    }
}

/// Queue family indices once both have been found.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl TryFrom<QueueFamilyIndices> for QueueFamilies {
    type Error = SuitabilityError;

    fn try_from(indices: QueueFamilyIndices) -> Result<Self, Self::Error> {
        match (indices.graphics, indices.present) {
            (Some(graphics), Some(present)) => Ok(Self { graphics, present }),
            _ => Err(SuitabilityError::Static("Missing required queue families.")),
        }
    }
}

/// Surface limits, formats and present modes as reported for one device.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        // SAFETY: `physical_device` and `surface` belong to the instance `loader` was built from.
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: loader.get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// What a physical device offers, gathered before deciding whether to use it.
#[derive(Clone, Debug)]
pub struct DeviceReport {
    pub indices: QueueFamilyIndices,
    pub missing_extensions: Vec<String>,
    pub support: SwapchainSupport,
    pub sampler_anisotropy: bool,
}

impl DeviceReport {
    pub fn check(&self) -> Result<QueueFamilies, SuitabilityError> {
        let families = QueueFamilies::try_from(self.indices)?;
        if let Some(missing) = self.missing_extensions.first() {
            return Err(SuitabilityError::Dynamic(format!(
                "Missing required device extension: {}",
                missing
            )));
        }
        if !self.support.is_adequate() {
            return Err(SuitabilityError::Static("Insufficient swapchain support."));
        }
        if !self.sampler_anisotropy {
            return Err(SuitabilityError::Static("Sampler anisotropy not supported."));
        }
        Ok(families)
    }
}

/// Lists required extensions absent from `available`, in requirement order.
pub fn missing_extensions(required: &[&CStr], available: &HashSet<&CStr>) -> Vec<String> {
    required
        .iter()
        .filter(|ext| !available.contains(*ext))
        .map(|ext| ext.to_string_lossy().into_owned())
        .collect()
}

//==================================================================================================
// SECTION: Instance, debug messenger and surface
//==================================================================================================

/// Instance-scoped objects. Dropping releases the surface and messenger
/// before the instance itself.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: ash::khr::surface::Instance,
    messenger: Option<Scoped<vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance>>,
    surface: Scoped<vk::SurfaceKHR, ash::khr::surface::Instance>,
}

impl InstanceContext {
    pub fn new(window: &Window, config: &RendererConfig) -> Result<Self> {
        // SAFETY: loading the Vulkan library has no preconditions beyond it being a real loader.
        let entry =
            unsafe { Entry::load().map_err(|e| anyhow!("Failed to load Vulkan entry: {}", e))? };

        let app_name = CString::new(config.title.as_str())?;
        let engine_name = CString::new("No Engine")?;
        let application_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        if config.validation_enabled() {
            // SAFETY: `layer_name` is a NUL-terminated array filled in by the loader.
            let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
            let found = available_layers.iter().any(|layer| {
                layer.layer_name_as_c_str().ok() == Some(VALIDATION_LAYER_NAME)
            });
            if !found {
                return Err(anyhow!(RendererError::MissingValidationLayer(
                    VALIDATION_LAYER_NAME.to_string_lossy().into_owned()
                )));
            }
        }

        let mut extensions: Vec<*const c_char> = vk_window::required_instance_extensions(window)?
            .iter()
            .map(|e| e.as_ptr())
            .collect();
        let mut layers = Vec::new();
        if config.validation_enabled() {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER_NAME.as_ptr());
        }

        let mut debug_info = debug_messenger_info();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);
        if config.validation_enabled() {
            create_info = create_info.push_next(&mut debug_info);
        }

        // SAFETY: every pointer in `create_info` outlives this call.
        let instance = unsafe { entry.create_instance(&create_info, None)? };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let mut context = Self {
            surface: Scoped::empty(surface_loader.clone()),
            messenger: None,
            surface_loader,
            instance,
            entry,
        };

        if config.validation_enabled() {
            let loader = ash::ext::debug_utils::Instance::new(&context.entry, &context.instance);
            // SAFETY: the instance was created with the debug-utils extension enabled.
            let messenger = unsafe { loader.create_debug_utils_messenger(&debug_info, None)? };
            context.messenger = Some(Scoped::new(loader, messenger));
            debug!("Debug messenger registered.");
        }

        // SAFETY: the window outlives the renderer that owns this context.
        let surface = unsafe {
            vk_window::create_surface(&context.entry, &context.instance, window, window)?
        };
        context.surface.replace(surface);
        Ok(context)
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.get()
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        self.surface.release();
        if let Some(mut messenger) = self.messenger.take() {
            messenger.release();
        }
        // SAFETY: every instance child has been released above.
        unsafe { self.instance.destroy_instance(None) };
        debug!("Instance destroyed.");
    }
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// Routes driver diagnostics into the log.
extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback-data struct for the duration of the call.
    let callback_data = unsafe { &*data };
    // SAFETY: `message_as_c_str` reads the loader-provided NUL-terminated message.
    let message = unsafe { callback_data.message_as_c_str() }
        .map(|m| m.to_string_lossy())
        .unwrap_or_default();

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!("({:?}) {}", type_, message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!("({:?}) {}", type_, message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!("({:?}) {}", type_, message);
    } else {
        trace!("({:?}) {}", type_, message);
    }
    vk::FALSE
}

//==================================================================================================
// SECTION: Physical and logical device
//==================================================================================================

/// The opened logical device plus everything negotiated to get there.
///
/// Field order matters: `instance` is declared last so it is dropped after
/// `Drop::drop` has destroyed the logical device.
pub struct GpuContext {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub families: QueueFamilies,
    pub device: Device,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub instance: InstanceContext,
}

impl GpuContext {
    pub fn new(window: &Window, config: &RendererConfig) -> Result<Self> {
        let instance = InstanceContext::new(window, config)?;
        let (physical_device, families) = pick_physical_device(&instance)?;
        let device = create_logical_device(&instance.instance, physical_device, families)?;

        // SAFETY: `physical_device` was enumerated from this instance.
        let (properties, memory_properties) = unsafe {
            (
                instance.instance.get_physical_device_properties(physical_device),
                instance
                    .instance
                    .get_physical_device_memory_properties(physical_device),
            )
        };
        // SAFETY: both families were requested with one queue each at device creation.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
            )
        };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance.instance, &device);

        Ok(Self {
            physical_device,
            properties,
            memory_properties,
            families,
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            instance,
        })
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.instance.surface()
    }

    /// Fresh surface limits for this device; queried again on every rebuild.
    pub fn swapchain_support(&self) -> Result<SwapchainSupport> {
        SwapchainSupport::query(
            &self.instance.surface_loader,
            self.physical_device,
            self.surface(),
        )
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        // SAFETY: `physical_device` was enumerated from this instance.
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: the device is alive for as long as `self`.
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // SAFETY: owners of device children hold this context by field order and
        // are dropped first; the renderer drives the device idle before that.
        unsafe { self.device.destroy_device(None) };
        debug!("Logical device destroyed.");
    }
}

/// Selects the first enumerated device that passes every suitability check.
fn pick_physical_device(context: &InstanceContext) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    // SAFETY: the instance is alive.
    let physical_devices = unsafe { context.instance.enumerate_physical_devices()? };
    if physical_devices.is_empty() {
        return Err(anyhow!(RendererError::NoVulkanDevice));
    }

    for physical_device in physical_devices {
        // SAFETY: `physical_device` was just enumerated from this instance.
        let properties = unsafe {
            context
                .instance
                .get_physical_device_properties(physical_device)
        };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned());

        let verdict = inspect_physical_device(context, physical_device)
            .and_then(|report| report.check().map_err(|e| anyhow!(e)));
        match verdict {
            Ok(families) => {
                info!("Selected physical device (`{}`).", device_name);
                return Ok((physical_device, families));
            }
            Err(error) => warn!("Skipping physical device (`{}`): {}", device_name, error),
        }
    }
    Err(anyhow!(RendererError::NoSuitableDevice))
}

fn inspect_physical_device(
    context: &InstanceContext,
    physical_device: vk::PhysicalDevice,
) -> Result<DeviceReport> {
    let instance = &context.instance;
    let surface = context.surface();

    // SAFETY: `physical_device` was enumerated from `instance`.
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let indices = QueueFamilyIndices::find(&families, |index| {
        // SAFETY: `index` is below the family count just queried.
        let supported = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_support(physical_device, index, surface)?
        };
        Ok(supported)
    })?;

    // SAFETY: `physical_device` was enumerated from `instance`.
    let extension_properties =
        unsafe { instance.enumerate_device_extension_properties(physical_device)? };
    let available = extension_properties
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok())
        .collect::<HashSet<_>>();

    // SAFETY: `physical_device` was enumerated from `instance`.
    let features = unsafe { instance.get_physical_device_features(physical_device) };

    Ok(DeviceReport {
        indices,
        missing_extensions: missing_extensions(DEVICE_EXTENSIONS, &available),
        support: SwapchainSupport::query(&context.surface_loader, physical_device, surface)?,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    })
}

/// Opens one queue per distinct family plus the swapchain extension.
fn create_logical_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<Device> {
    let indices = QueueFamilyIndices {
        graphics: Some(families.graphics),
        present: Some(families.present),
    };
    let queue_priorities = [1.0];
    let queue_infos = indices
        .unique()
        .into_iter()
        .map(|index| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(index)
                .queue_priorities(&queue_priorities)
        })
        .collect::<Vec<_>>();

    let extension_ptrs: Vec<*const c_char> =
        DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_ptrs)
        .enabled_features(&features);

    // SAFETY: `create_info` and everything it points at outlive this call.
    let device = unsafe { instance.create_device(physical_device, &create_info, None)? };
    debug!("Logical device created with queue families {:?}.", indices.unique());
    Ok(device)
}
