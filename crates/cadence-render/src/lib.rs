// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame pipeline.
//!
//! The CPU records one command context per frame slot while the GPU consumes
//! earlier slots; completion signals armed from a monotonic fence decide when
//! a slot may be recorded again. Backends plug in through [`Device`],
//! [`Swapchain`], [`CommandContext`] and [`CompletionSignal`].
use std::time::{Duration, Instant};

use anyhow::Result;

pub mod backbuffer;
mod error;
pub mod fence;
pub mod frame_slot;
pub mod pipeline;
pub mod resize;
pub mod scene;

pub use backbuffer::{Backbuffer, BackbufferCache, ViewHeap, ViewSlot};
pub use error::{PipelineError, PipelineResult, WaitScope};
pub use fence::Fence;
pub use frame_slot::{slot_index, FrameSlots, SlotGuard};
pub use pipeline::{FramePipeline, FrameReport, FrameState, PipelineSettings, Tick};
pub use resize::{ResizeCoordinator, ResizeOutcome};
pub use scene::BouncingRect;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// What the window collaborator reports to the pipeline each iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowState {
    pub width: u32,
    pub height: u32,
    pub resize_requested: bool,
    pub repaint_requested: bool,
    pub exit_requested: bool,
}

impl WindowState {
    pub fn new(size: RenderSize) -> Self {
        Self {
            width: size.width,
            height: size.height,
            ..Default::default()
        }
    }

    pub fn size(&self) -> RenderSize {
        RenderSize {
            width: self.width,
            height: self.height,
        }
    }

    pub fn is_minimized(&self, min_extent: u32) -> bool {
        self.width < min_extent || self.height < min_extent
    }
}

pub type Rgba = [f32; 4];

/// Pixel rectangle, right/bottom exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ClearRect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Intersection with `[0, width) x [0, height)`, `None` when empty.
    pub fn clip(&self, width: u32, height: u32) -> Option<ClearRect> {
        let clipped = ClearRect {
            left: self.left.max(0),
            top: self.top.max(0),
            right: self.right.min(width as i32),
            bottom: self.bottom.min(height as i32),
        };
        (clipped.width() > 0 && clipped.height() > 0).then_some(clipped)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    Present,
    RenderTarget,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayFormat {
    Bgra8Unorm,
    #[default]
    Bgra8UnormSrgb,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    Ready,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Presented, but the swapchain no longer matches the surface.
    Suboptimal,
}

/// Host-waitable "GPU has processed through value N".
///
/// A fresh signal is signaled. `reset` makes it unsignaled until it is armed
/// and the armed value completes.
pub trait CompletionSignal {
    fn arm(&mut self, target: u64) -> Result<()>;
    fn wait(&self, timeout: Duration) -> Result<WaitStatus>;
    fn reset(&mut self) -> Result<()>;

    /// Waits until every signal is ready, under one shared deadline.
    fn wait_all(signals: &[&Self], timeout: Duration) -> Result<WaitStatus>
    where
        Self: Sized,
    {
        let deadline = Instant::now() + timeout;
        for signal in signals {
            let left = deadline.saturating_duration_since(Instant::now());
            if signal.wait(left)? == WaitStatus::TimedOut {
                return Ok(WaitStatus::TimedOut);
            }
        }
        Ok(WaitStatus::Ready)
    }
}

pub trait CommandContext {
    type Image;
    type View;

    /// Discard previous contents and reopen for recording.
    fn reset(&mut self) -> Result<()>;
    fn transition(&mut self, image: &Self::Image, before: ResourceState, after: ResourceState);
    /// `rect = None` clears the whole view.
    fn clear(&mut self, view: &Self::View, color: Rgba, rect: Option<ClearRect>);
    fn close(&mut self) -> Result<()>;
}

pub trait FenceQueue {
    /// Signal `value` once all previously submitted work has executed.
    fn signal_fence(&mut self, value: u64) -> Result<()>;
}

pub trait Device: FenceQueue {
    type Image;
    type View: Copy + PartialEq + std::fmt::Debug;
    type Signal: CompletionSignal;
    type Context: CommandContext<Image = Self::Image, View = Self::View>;

    fn create_context(&mut self) -> Result<Self::Context>;
    /// Returned signal starts signaled.
    fn create_signal(&mut self) -> Result<Self::Signal>;
    fn create_view_heap(&mut self, capacity: u32) -> Result<ViewHeap>;
    /// Writes a render-target view over `image` into `slot`, replacing
    /// whatever view the slot held.
    fn create_render_target_view(
        &mut self,
        image: &Self::Image,
        format: DisplayFormat,
        slot: ViewSlot,
    ) -> Result<Self::View>;
    fn submit(&mut self, context: &Self::Context) -> Result<()>;
}

pub trait Swapchain {
    type Image;

    fn image_count(&self) -> u32;
    /// Index of the image the next frame renders into. Repeated calls before
    /// `present` return the same index.
    fn current_image_index(&mut self) -> Result<u32>;
    fn image(&mut self, index: u32) -> Result<Self::Image>;
    fn present(&mut self) -> Result<PresentStatus>;
    /// Resize backing images in place; keeps image count and format.
    fn resize(&mut self, size: RenderSize) -> Result<()>;
}
