// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use tracing::info;

use crate::error::{PipelineResult, PlatformContext};
use crate::{BackbufferCache, Device, FrameSlots, RenderSize, Swapchain, WindowState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    Unchanged,
    /// Window too small to present into; nothing was touched.
    Minimized,
    Resized(RenderSize),
}

/// Rebuilds swapchain images once the window settles on a new size.
#[derive(Debug)]
pub struct ResizeCoordinator {
    min_extent: u32,
    wait_timeout: Duration,
}

impl ResizeCoordinator {
    pub fn new(min_extent: u32, wait_timeout: Duration) -> Self {
        Self {
            min_extent,
            wait_timeout,
        }
    }

    /// Drain, drop cached views, resize, then clear the request. Nothing
    /// happens while the window is minimized; the request stays pending.
    pub fn poll<D, S>(
        &mut self,
        window: &mut WindowState,
        slots: &FrameSlots<D>,
        backbuffers: &mut BackbufferCache<D::Image, D::View>,
        swapchain: &mut S,
    ) -> PipelineResult<ResizeOutcome>
    where
        D: Device,
        S: Swapchain<Image = D::Image>,
    {
        if window.is_minimized(self.min_extent) {
            return Ok(ResizeOutcome::Minimized);
        }
        if !window.resize_requested {
            return Ok(ResizeOutcome::Unchanged);
        }

        let size = window.size();
        slots.drain(self.wait_timeout)?;
        let released = backbuffers.invalidate_all();
        swapchain.resize(size).platform("resize swapchain")?;
        backbuffers.rebuild(swapchain.image_count());
        window.resize_requested = false;

        info!(
            "swapchain resized → {}x{} ({} views released)",
            size.width, size.height, released
        );
        Ok(ResizeOutcome::Resized(size))
    }
}
