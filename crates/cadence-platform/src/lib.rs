// SPDX-License-Identifier: CEPL-1.0
//! Window collaborator: owns the winit window and the [`WindowState`] the
//! frame pipeline reads.
pub use winit;

use anyhow::{anyhow, Result};
use cadence_render::{RenderSize, WindowState};
use tracing::{error, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow},
    keyboard::{Key, NamedKey},
    window::{Window, WindowAttributes, WindowId},
};

/// Exit on a fresh Escape press; auto-repeat and releases are ignored.
pub fn is_exit_key(event: &KeyEvent) -> bool {
    event.state == ElementState::Pressed
        && !event.repeat
        && event.logical_key == Key::Named(NamedKey::Escape)
}

/// The window and its state live together, so events are routed to the
/// state by `WindowId` rather than by pointer tricks.
pub struct WindowHost {
    attributes: WindowAttributes,
    window: Option<Window>,
    state: WindowState,
    create_error: Option<String>,
}

impl WindowHost {
    pub fn new(title: &str, size: RenderSize) -> Self {
        let attributes = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(size.width, size.height));
        Self {
            attributes,
            window: None,
            state: WindowState::new(size),
            create_error: None,
        }
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_ref()
    }

    /// Fails if window creation was attempted and refused by the OS.
    pub fn require_window(&self) -> Result<&Window> {
        if let Some(msg) = &self.create_error {
            return Err(anyhow!("create_window: {msg}"));
        }
        self.window
            .as_ref()
            .ok_or_else(|| anyhow!("window not created yet"))
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut WindowState {
        &mut self.state
    }

    pub fn set_title(&self, title: &str) {
        if let Some(w) = &self.window {
            w.set_title(title);
        }
    }

    /// Applies one window event to the state. Split out from the winit
    /// callback so it can be driven without an event loop.
    pub fn apply(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                info!("close requested");
                self.state.exit_requested = true;
            }
            WindowEvent::Resized(size) => {
                info!("Resized → {}x{}", size.width, size.height);
                self.state.width = size.width;
                self.state.height = size.height;
                self.state.resize_requested = true;
            }
            WindowEvent::RedrawRequested => {
                self.state.repaint_requested = true;
            }
            WindowEvent::KeyboardInput { event, .. } if is_exit_key(event) => {
                info!("escape pressed");
                self.state.exit_requested = true;
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for WindowHost {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Poll);
        if self.window.is_some() || self.create_error.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                self.state.width = size.width;
                self.state.height = size.height;
                info!("window created ({}x{})", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => {
                error!("create_window failed: {e}");
                self.create_error = Some(e.to_string());
                self.state.exit_requested = true;
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }
        self.apply(&event);
    }
}
