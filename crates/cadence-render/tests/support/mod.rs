// SPDX-License-Identifier: CEPL-1.0
//! Recording stand-ins for the GPU collaborators.
//!
//! The fake queue completes fence values lazily: a wait on value `v` succeeds
//! (and marks everything through `v` complete) as long as `v` was signaled and
//! the GPU is not hung.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use cadence_render::{
    ClearRect, CommandContext, CompletionSignal, Device, DisplayFormat, FenceQueue, PresentStatus,
    RenderSize, ResourceState, Rgba, Swapchain, ViewHeap, ViewSlot, WaitStatus,
};

pub const VIEW_STRIDE: u32 = 32;
pub const VIEW_BASE: u64 = 0x4000;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateContext(usize),
    CreateSignal(usize),
    CreateViewHeap(u32),
    ResetContext(usize),
    Transition(usize, u32, ResourceState, ResourceState),
    Clear(usize, FakeView, Option<ClearRect>),
    Close(usize),
    Submit(usize),
    SignalFence(u64),
    Arm(usize, u64),
    Wait(usize, WaitStatus),
    ResetSignal(usize),
    CurrentIndex(u32),
    GetImage(u32),
    CreateView(u32, ViewSlot),
    Present(u32),
    /// Requested size, fence value completed so far, images still referenced.
    Resize(RenderSize, u64, usize),
    ReleaseImage(u32),
    /// Object id, fence value completed when it was destroyed.
    DropContext(usize, u64),
    DropSignal(usize, u64),
}

pub struct Gpu {
    log: RefCell<Vec<Call>>,
    signaled: Cell<u64>,
    completed: Cell<u64>,
    hung: Cell<bool>,
    fail_on: Cell<Option<&'static str>>,
    next_context: Cell<usize>,
    next_signal: Cell<usize>,
    next_view: Cell<u32>,
    image_count: Cell<u32>,
    image_index: Cell<u32>,
    live_images: Cell<usize>,
    present_status: Cell<PresentStatus>,
}

impl Gpu {
    pub fn new(image_count: u32) -> Rc<Self> {
        Rc::new(Self {
            log: RefCell::new(Vec::new()),
            signaled: Cell::new(0),
            completed: Cell::new(0),
            hung: Cell::new(false),
            fail_on: Cell::new(None),
            next_context: Cell::new(0),
            next_signal: Cell::new(0),
            next_view: Cell::new(0),
            image_count: Cell::new(image_count),
            image_index: Cell::new(0),
            live_images: Cell::new(0),
            present_status: Cell::new(PresentStatus::Presented),
        })
    }

    pub fn device(self: &Rc<Self>) -> FakeDevice {
        FakeDevice { gpu: self.clone() }
    }

    pub fn swapchain(self: &Rc<Self>) -> FakeSwapchain {
        FakeSwapchain { gpu: self.clone() }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn completed(&self) -> u64 {
        self.completed.get()
    }

    pub fn hang(&self) {
        self.hung.set(true);
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.fail_on.set(Some(operation));
    }

    pub fn set_present_status(&self, status: PresentStatus) {
        self.present_status.set(status);
    }

    fn record(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.fail_on.get() == Some(operation) {
            return Err(anyhow!("injected {operation} failure"));
        }
        Ok(())
    }

    fn try_complete(&self, value: u64) -> WaitStatus {
        if self.hung.get() || value > self.signaled.get() {
            return WaitStatus::TimedOut;
        }
        self.completed.set(self.completed.get().max(value));
        WaitStatus::Ready
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SignalState {
    Signaled,
    Unsignaled,
    Armed(u64),
}

pub struct FakeSignal {
    id: usize,
    state: SignalState,
    gpu: Rc<Gpu>,
}

impl CompletionSignal for FakeSignal {
    fn arm(&mut self, target: u64) -> Result<()> {
        self.gpu.check("arm")?;
        self.gpu.record(Call::Arm(self.id, target));
        self.state = SignalState::Armed(target);
        Ok(())
    }

    fn wait(&self, _timeout: Duration) -> Result<WaitStatus> {
        self.gpu.check("wait")?;
        let status = match self.state {
            SignalState::Signaled => WaitStatus::Ready,
            SignalState::Unsignaled => WaitStatus::TimedOut,
            SignalState::Armed(v) => self.gpu.try_complete(v),
        };
        self.gpu.record(Call::Wait(self.id, status));
        Ok(status)
    }

    fn reset(&mut self) -> Result<()> {
        self.gpu.record(Call::ResetSignal(self.id));
        self.state = SignalState::Unsignaled;
        Ok(())
    }
}

impl Drop for FakeSignal {
    fn drop(&mut self) {
        self.gpu
            .record(Call::DropSignal(self.id, self.gpu.completed()));
    }
}

pub struct FakeImage {
    pub index: u32,
    gpu: Rc<Gpu>,
}

impl Drop for FakeImage {
    fn drop(&mut self) {
        self.gpu.live_images.set(self.gpu.live_images.get() - 1);
        self.gpu.record(Call::ReleaseImage(self.index));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FakeView {
    pub id: u32,
    pub image: u32,
    pub slot: ViewSlot,
}

pub struct FakeContext {
    pub id: usize,
    gpu: Rc<Gpu>,
}

impl CommandContext for FakeContext {
    type Image = FakeImage;
    type View = FakeView;

    fn reset(&mut self) -> Result<()> {
        self.gpu.record(Call::ResetContext(self.id));
        Ok(())
    }

    fn transition(&mut self, image: &FakeImage, before: ResourceState, after: ResourceState) {
        self.gpu
            .record(Call::Transition(self.id, image.index, before, after));
    }

    fn clear(&mut self, view: &FakeView, _color: Rgba, rect: Option<ClearRect>) {
        self.gpu.record(Call::Clear(self.id, *view, rect));
    }

    fn close(&mut self) -> Result<()> {
        self.gpu.check("close")?;
        self.gpu.record(Call::Close(self.id));
        Ok(())
    }
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        self.gpu
            .record(Call::DropContext(self.id, self.gpu.completed()));
    }
}

pub struct FakeDevice {
    gpu: Rc<Gpu>,
}

impl FenceQueue for FakeDevice {
    fn signal_fence(&mut self, value: u64) -> Result<()> {
        self.gpu.check("signal")?;
        assert!(value > self.gpu.signaled.get(), "fence value went backwards");
        self.gpu.signaled.set(value);
        self.gpu.record(Call::SignalFence(value));
        Ok(())
    }
}

impl Device for FakeDevice {
    type Image = FakeImage;
    type View = FakeView;
    type Signal = FakeSignal;
    type Context = FakeContext;

    fn create_context(&mut self) -> Result<FakeContext> {
        let id = self.gpu.next_context.get();
        self.gpu.next_context.set(id + 1);
        self.gpu.record(Call::CreateContext(id));
        Ok(FakeContext {
            id,
            gpu: self.gpu.clone(),
        })
    }

    fn create_signal(&mut self) -> Result<FakeSignal> {
        let id = self.gpu.next_signal.get();
        self.gpu.next_signal.set(id + 1);
        self.gpu.record(Call::CreateSignal(id));
        Ok(FakeSignal {
            id,
            state: SignalState::Signaled,
            gpu: self.gpu.clone(),
        })
    }

    fn create_view_heap(&mut self, capacity: u32) -> Result<ViewHeap> {
        self.gpu.record(Call::CreateViewHeap(capacity));
        Ok(ViewHeap::new(VIEW_BASE, VIEW_STRIDE, capacity))
    }

    fn create_render_target_view(
        &mut self,
        image: &FakeImage,
        _format: DisplayFormat,
        slot: ViewSlot,
    ) -> Result<FakeView> {
        self.gpu.check("view")?;
        let id = self.gpu.next_view.get();
        self.gpu.next_view.set(id + 1);
        self.gpu.record(Call::CreateView(image.index, slot));
        Ok(FakeView {
            id,
            image: image.index,
            slot,
        })
    }

    fn submit(&mut self, context: &FakeContext) -> Result<()> {
        self.gpu.check("submit")?;
        self.gpu.record(Call::Submit(context.id));
        Ok(())
    }
}

pub struct FakeSwapchain {
    gpu: Rc<Gpu>,
}

impl Swapchain for FakeSwapchain {
    type Image = FakeImage;

    fn image_count(&self) -> u32 {
        self.gpu.image_count.get()
    }

    fn current_image_index(&mut self) -> Result<u32> {
        let index = self.gpu.image_index.get();
        self.gpu.record(Call::CurrentIndex(index));
        Ok(index)
    }

    fn image(&mut self, index: u32) -> Result<FakeImage> {
        self.gpu.record(Call::GetImage(index));
        self.gpu.live_images.set(self.gpu.live_images.get() + 1);
        Ok(FakeImage {
            index,
            gpu: self.gpu.clone(),
        })
    }

    fn present(&mut self) -> Result<PresentStatus> {
        self.gpu.check("present")?;
        let index = self.gpu.image_index.get();
        self.gpu.record(Call::Present(index));
        self.gpu
            .image_index
            .set((index + 1) % self.gpu.image_count.get());
        Ok(self.gpu.present_status.get())
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.gpu.check("resize")?;
        self.gpu.record(Call::Resize(
            size,
            self.gpu.completed(),
            self.gpu.live_images.get(),
        ));
        self.gpu.image_index.set(0);
        Ok(())
    }
}
