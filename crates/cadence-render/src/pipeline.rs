// SPDX-License-Identifier: CEPL-1.0
//! The frame orchestrator.
//!
//! One call to [`FramePipeline::run_cycle`] walks
//! `Idle → SlotWait → Recording → Submitted → Presented → SignalArmed → Idle`
//! for a single displayed frame:
//!
//! ```text
//! 1. wait for slot (cycle mod N), reset its signal and context
//! 2. resolve the current backbuffer view, record transitions + clears
//! 3. close and submit the context
//! 4. present
//! 5. signal the next fence value, arm the slot's signal with it
//! ```
//!
//! Work submitted in cycle K has completed before the wait of cycle K+N
//! returns. Nothing here retries: every error leaves the synchronization
//! state unknown and is meant to end the process.
use std::time::Duration;

use cadence_core::{FrameClock, FrameStats};
use tracing::{debug, error, info, trace, warn};

use crate::error::{PipelineError, PipelineResult, PlatformContext};
use crate::resize::{ResizeCoordinator, ResizeOutcome};
use crate::{
    Backbuffer, BackbufferCache, BouncingRect, CommandContext, Device, DisplayFormat, Fence,
    FrameSlots, PresentStatus, ResourceState, Rgba, Swapchain, ViewHeap, WindowState,
};

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub frames_in_flight: usize,
    pub view_capacity: u32,
    pub view_format: DisplayFormat,
    pub wait_timeout: Duration,
    /// Constant animation step; `None` uses measured frame time.
    pub fixed_timestep: Option<f32>,
    pub background: Rgba,
    pub foreground: Rgba,
    pub rect_size: (u32, u32),
    pub rect_velocity: f32,
    pub min_extent: u32,
    pub stats_interval: u32,
    pub missed_frame_threshold: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            view_capacity: 64,
            view_format: DisplayFormat::Bgra8UnormSrgb,
            wait_timeout: Duration::from_millis(5000),
            fixed_timestep: None,
            background: [122.0 / 255.0, 149.0 / 255.0, 230.0 / 255.0, 1.0],
            foreground: [1.0, 0.0, 0.0, 1.0],
            rect_size: (128, 128),
            rect_velocity: 256.0,
            min_extent: 2,
            stats_interval: 30,
            missed_frame_threshold: Duration::from_millis(50),
        }
    }
}

impl PipelineSettings {
    fn validate(&self, image_count: u32) -> PipelineResult<()> {
        if self.frames_in_flight == 0 {
            return Err(PipelineError::InvalidSettings(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if image_count == 0 || image_count > self.view_capacity {
            return Err(PipelineError::InvalidSettings(format!(
                "{image_count} swapchain images do not fit a view heap of {}",
                self.view_capacity
            )));
        }
        if self.wait_timeout.is_zero() {
            return Err(PipelineError::InvalidSettings(
                "wait_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    SlotWait,
    Recording,
    Submitted,
    Presented,
    SignalArmed,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    pub cycle: u64,
    pub slot: usize,
    pub image_index: u32,
    pub fence_value: u64,
    pub bounced: bool,
    pub resized: bool,
    pub stats: Option<FrameStats>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Tick {
    /// Window too small; the caller should idle before the next iteration.
    Minimized,
    Frame(FrameReport),
}

fn enter(state: &mut FrameState, next: FrameState) {
    trace!(from = ?*state, to = ?next, "frame state");
    *state = next;
}

fn record_frame<C: CommandContext>(
    context: &mut C,
    backbuffer: &Backbuffer<C::Image, C::View>,
    settings: &PipelineSettings,
    scene: &BouncingRect,
    client_height: u32,
) {
    context.transition(
        &backbuffer.image,
        ResourceState::Present,
        ResourceState::RenderTarget,
    );
    context.clear(&backbuffer.view, settings.background, None);
    context.clear(
        &backbuffer.view,
        settings.foreground,
        Some(scene.rect(client_height)),
    );
    context.transition(
        &backbuffer.image,
        ResourceState::RenderTarget,
        ResourceState::Present,
    );
}

pub struct FramePipeline<D: Device, S: Swapchain<Image = D::Image>> {
    // Dropped first, and only once the GPU is done with them.
    slots: FrameSlots<D>,
    backbuffers: BackbufferCache<D::Image, D::View>,
    swapchain: S,
    device: D,

    fence: Fence,
    heap: ViewHeap,
    resize: ResizeCoordinator,
    scene: BouncingRect,
    clock: FrameClock,
    settings: PipelineSettings,

    cycle: u64,
    state: FrameState,
    drained: bool,
    /// Slots were leaked after a failed drain; teardown must not wait again.
    abandoned: bool,
}

impl<D: Device, S: Swapchain<Image = D::Image>> FramePipeline<D, S> {
    pub fn new(mut device: D, swapchain: S, settings: PipelineSettings) -> PipelineResult<Self> {
        let image_count = swapchain.image_count();
        settings.validate(image_count)?;

        let heap = device
            .create_view_heap(settings.view_capacity)
            .platform("create view heap")?;
        let slots = FrameSlots::new(&mut device, settings.frames_in_flight)?;
        let (rect_w, rect_h) = settings.rect_size;

        info!(
            "frame pipeline ready (slots={}, images={}, view stride={})",
            slots.len(),
            image_count,
            heap.stride()
        );

        Ok(Self {
            slots,
            backbuffers: BackbufferCache::new(image_count),
            swapchain,
            device,
            fence: Fence::new(),
            heap,
            resize: ResizeCoordinator::new(settings.min_extent, settings.wait_timeout),
            scene: BouncingRect::new(rect_w, rect_h, settings.rect_velocity),
            clock: FrameClock::new(settings.stats_interval),
            settings,
            cycle: 0,
            state: FrameState::Idle,
            drained: true,
            abandoned: false,
        })
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn backbuffers(&self) -> &BackbufferCache<D::Image, D::View> {
        &self.backbuffers
    }

    pub fn scene(&self) -> &BouncingRect {
        &self.scene
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// One outer-loop iteration: minimized check, pending resize, one frame.
    pub fn advance(&mut self, window: &mut WindowState) -> PipelineResult<Tick> {
        let outcome = self.resize.poll(
            window,
            &self.slots,
            &mut self.backbuffers,
            &mut self.swapchain,
        )?;
        if outcome == ResizeOutcome::Minimized {
            // Don't count the idle time as one giant frame.
            self.clock.reset();
            return Ok(Tick::Minimized);
        }

        let mut report = self.run_cycle(window)?;
        report.resized = matches!(outcome, ResizeOutcome::Resized(_));
        Ok(Tick::Frame(report))
    }

    pub fn run_cycle(&mut self, window: &mut WindowState) -> PipelineResult<FrameReport> {
        let (delta, stats) = self.clock.tick();
        if self.cycle > 0 && delta > self.settings.missed_frame_threshold {
            warn!(
                "frame {} took {:.2} ms (budget {:.2} ms)",
                self.cycle,
                delta.as_secs_f32() * 1000.0,
                self.settings.missed_frame_threshold.as_secs_f32() * 1000.0
            );
        }
        let dt = self.settings.fixed_timestep.unwrap_or(delta.as_secs_f32());
        self.drained = false;

        enter(&mut self.state, FrameState::SlotWait);
        let mut slot = self.slots.acquire(self.cycle, self.settings.wait_timeout)?;
        let slot_index = slot.index();

        enter(&mut self.state, FrameState::Recording);
        let image_index = self
            .swapchain
            .current_image_index()
            .platform("query current backbuffer")?;
        let backbuffer = self.backbuffers.get_or_create(
            image_index,
            &mut self.device,
            &mut self.swapchain,
            &self.heap,
            self.settings.view_format,
        )?;
        let bounced = self.scene.step(dt, window.width);
        record_frame(
            slot.context_mut(),
            backbuffer,
            &self.settings,
            &self.scene,
            window.height,
        );
        slot.context_mut()
            .close()
            .platform("close command context")?;

        self.device
            .submit(slot.context())
            .platform("submit command context")?;
        enter(&mut self.state, FrameState::Submitted);

        if self.swapchain.present().platform("present")? == PresentStatus::Suboptimal {
            debug!(image_index, "present reported a stale swapchain");
            window.resize_requested = true;
        }
        enter(&mut self.state, FrameState::Presented);

        let fence_value = self.fence.signal(&mut self.device)?;
        slot.arm(&self.fence, fence_value)?;
        enter(&mut self.state, FrameState::SignalArmed);

        self.cycle += 1;
        enter(&mut self.state, FrameState::Idle);

        if let Some(s) = stats {
            debug!("{:5.3} ms ({:5.2} fps)", s.frame_ms, s.fps);
        }

        Ok(FrameReport {
            cycle: self.cycle - 1,
            slot: slot_index,
            image_index,
            fence_value,
            bounced,
            resized: false,
            stats,
        })
    }

    /// Blocks until every submitted frame has completed.
    pub fn drain(&mut self) -> PipelineResult<()> {
        self.slots.drain(self.settings.wait_timeout)?;
        self.drained = true;
        Ok(())
    }

    /// Drains, then releases everything in order. A failed drain is
    /// reported without waiting a second time.
    pub fn shutdown(mut self) -> PipelineResult<()> {
        info!("shutting down after {} frames", self.cycle);
        let result = self.drain();
        if result.is_err() {
            self.abandon_slots();
        }
        result
    }

    fn abandon_slots(&mut self) {
        error!("leaking {} frame slots with work possibly in flight", self.slots.len());
        self.slots.leak();
        self.abandoned = true;
    }
}

impl<D: Device, S: Swapchain<Image = D::Image>> Drop for FramePipeline<D, S> {
    fn drop(&mut self) {
        if self.drained || self.abandoned {
            return;
        }
        if let Err(err) = self.drain() {
            error!("drain failed during teardown: {err}");
            self.abandon_slots();
        }
    }
}
