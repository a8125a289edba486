//! Window and event loop glue around [`Renderer`].

use anyhow::{anyhow, Result};
use log::*;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::config::RendererConfig;
use crate::frame::FrameOutcome;
use crate::renderer::Renderer;

/// Opens the window, renders until it is closed, then tears everything down.
pub fn run(config: RendererConfig) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|e| anyhow!("Failed to create event loop: {}", e))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop
        .run_app(&mut app)
        .map_err(|e| anyhow!("Event loop failed: {}", e))?;

    match app.error.take() {
        Some(e) => Err(e),
        None => {
            info!("Application finished normally.");
            Ok(())
        }
    }
}

/// Event handler. The renderer is declared before the window so it is always
/// dropped first; its surface must not outlive the window.
struct App {
    renderer: Option<Renderer>,
    window: Option<Window>,
    config: RendererConfig,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            renderer: None,
            window: None,
            config,
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("{:#}", error);
        self.error.get_or_insert(error);
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            drop(renderer);
            info!("Renderer released.");
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(
                self.config.width as f64,
                self.config.height as f64,
            ));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow!("Failed to create window: {}", e));
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => {
                info!("Renderer created.");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e.context("Failed to create renderer")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested.");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}.", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.draw_frame() {
                    Ok(FrameOutcome::Abandoned) => trace!("Frame abandoned."),
                    Ok(_) => {}
                    Err(e) => self.fail(event_loop, e.context("Failed to draw frame")),
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // A minimized window sleeps until the next event instead of spinning.
        let minimized = self.renderer.as_ref().is_some_and(Renderer::is_minimized);
        if minimized {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        info!("Exiting.");
        self.shutdown();
    }
}
