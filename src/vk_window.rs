//! Window-system integration: required instance extensions and surface creation.

use std::ffi::CStr;

use anyhow::{anyhow, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::error::RendererError;

/// Gets the instance extensions needed to present to `window`.
pub fn required_instance_extensions(
    window: &dyn HasWindowHandle,
) -> Result<&'static [&'static CStr]> {
    match window.window_handle().map(|handle| handle.as_raw()) {
        #[cfg(target_os = "linux")]
        Ok(RawWindowHandle::Wayland(_)) => {
            Ok(&[vk::KHR_SURFACE_NAME, vk::KHR_WAYLAND_SURFACE_NAME])
        }

        #[cfg(target_os = "linux")]
        Ok(RawWindowHandle::Xcb(_)) => Ok(&[vk::KHR_SURFACE_NAME, vk::KHR_XCB_SURFACE_NAME]),

        #[cfg(target_os = "linux")]
        Ok(RawWindowHandle::Xlib(_)) => Ok(&[vk::KHR_SURFACE_NAME, vk::KHR_XLIB_SURFACE_NAME]),

        Ok(_) => Err(anyhow!(RendererError::UnsupportedWindowSystem(
            "window handle type"
        ))),
        Err(e) => Err(anyhow!("Failed to obtain window handle: {}", e)),
    }
}

/// Creates a surface for a window.
///
/// # Safety
///
/// The returned `SurfaceKHR` is only valid while the window is, so the window
/// must outlive the surface.
pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display: &dyn HasDisplayHandle,
    window: &dyn HasWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let display = display
        .display_handle()
        .map_err(|e| anyhow!("Failed to obtain display handle: {}", e))?
        .as_raw();
    let window = window
        .window_handle()
        .map_err(|e| anyhow!("Failed to obtain window handle: {}", e))?
        .as_raw();

    match (display, window) {
        #[cfg(target_os = "linux")]
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let info = vk::WaylandSurfaceCreateInfoKHR::default()
                .display(display.display.as_ptr())
                .surface(window.surface.as_ptr());
            let loader = ash::khr::wayland_surface::Instance::new(entry, instance);
            // SAFETY: both pointers come from a live winit window.
            Ok(unsafe { loader.create_wayland_surface(&info, None)? })
        }

        #[cfg(target_os = "linux")]
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display
                .connection
                .map(|connection| connection.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let info = vk::XcbSurfaceCreateInfoKHR::default()
                .connection(connection)
                .window(window.window.get());
            let loader = ash::khr::xcb_surface::Instance::new(entry, instance);
            // SAFETY: the connection and window id come from a live winit window.
            Ok(unsafe { loader.create_xcb_surface(&info, None)? })
        }

        #[cfg(target_os = "linux")]
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display
                .display
                .map(|display| display.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let info = vk::XlibSurfaceCreateInfoKHR::default()
                .dpy(dpy.cast())
                .window(window.window);
            let loader = ash::khr::xlib_surface::Instance::new(entry, instance);
            // SAFETY: the display pointer and XID come from a live winit window.
            Ok(unsafe { loader.create_xlib_surface(&info, None)? })
        }

        _ => Err(anyhow!(RendererError::UnsupportedWindowSystem(
            "display/window handle pair"
        ))),
    }
}
