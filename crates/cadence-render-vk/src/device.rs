// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use cadence_render::{Device, DisplayFormat, FenceQueue, ViewHeap, ViewSlot};
use tracing::{debug, warn};

use crate::{vk_format, Shared, VkCommandContext, VkCompletionSignal};

/// A swapchain image. Owned by the swapchain, so dropping this is free.
#[derive(Debug)]
pub struct VkImage {
    pub(crate) raw: vk::Image,
    pub index: u32,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VkView {
    pub(crate) raw: vk::ImageView,
    pub extent: vk::Extent2D,
    pub slot: u32,
}

pub struct VkDevice {
    shared: Rc<Shared>,
    format_warned: bool,
}

impl VkDevice {
    pub(crate) fn new(shared: Rc<Shared>) -> Self {
        Self {
            shared,
            format_warned: false,
        }
    }

    /// Swapchain images can only be viewed in their own format.
    fn view_format(&mut self, requested: DisplayFormat) -> vk::Format {
        let actual = self.shared.chain.borrow().format;
        let wanted = vk_format(requested);
        if wanted != actual && !self.format_warned {
            warn!("vk: view format {wanted:?} unavailable, using swapchain format {actual:?}");
            self.format_warned = true;
        }
        actual
    }
}

impl FenceQueue for VkDevice {
    fn signal_fence(&mut self, value: u64) -> Result<()> {
        let values = [value];
        let timeline_info = vk::TimelineSemaphoreSubmitInfo {
            s_type: vk::StructureType::TIMELINE_SEMAPHORE_SUBMIT_INFO,
            signal_semaphore_value_count: 1,
            p_signal_semaphore_values: values.as_ptr(),
            ..Default::default()
        };
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            p_next: (&timeline_info) as *const _ as *const _,
            signal_semaphore_count: 1,
            p_signal_semaphores: &self.shared.timeline,
            ..Default::default()
        };
        unsafe {
            self.shared
                .device
                .queue_submit(
                    self.shared.queue,
                    std::slice::from_ref(&submit),
                    vk::Fence::null(),
                )
                .context("queue_submit(timeline signal)")?;
        }
        self.shared.sync.borrow_mut().retire_pending(value);
        Ok(())
    }
}

impl Device for VkDevice {
    type Image = VkImage;
    type View = VkView;
    type Signal = VkCompletionSignal;
    type Context = VkCommandContext;

    fn create_context(&mut self) -> Result<VkCommandContext> {
        unsafe { VkCommandContext::new(self.shared.clone()) }
    }

    fn create_signal(&mut self) -> Result<VkCompletionSignal> {
        Ok(VkCompletionSignal::new(self.shared.clone()))
    }

    /// The heap is a fixed table of view handles; offsets are byte offsets
    /// from the table's first entry.
    fn create_view_heap(&mut self, capacity: u32) -> Result<ViewHeap> {
        self.shared.release_views();
        let mut views = self.shared.views.borrow_mut();
        *views = vec![vk::ImageView::null(); capacity as usize];
        let base = views.as_ptr() as u64;
        let stride = std::mem::size_of::<vk::ImageView>() as u32;
        debug!("vk: view table of {capacity} entries, stride {stride}");
        Ok(ViewHeap::new(base, stride, capacity))
    }

    fn create_render_target_view(
        &mut self,
        image: &VkImage,
        format: DisplayFormat,
        slot: ViewSlot,
    ) -> Result<VkView> {
        let format = self.view_format(format);
        let index = slot.index as usize;
        let mut views = self.shared.views.borrow_mut();
        let entry = views
            .get_mut(index)
            .ok_or_else(|| anyhow!("view slot {} outside the table", slot.index))?;

        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: image.raw,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let raw = unsafe {
            let raw = self
                .shared
                .device
                .create_image_view(&iv_info, None)
                .context("create_image_view")?;
            if *entry != vk::ImageView::null() {
                self.shared.device.destroy_image_view(*entry, None);
            }
            raw
        };
        *entry = raw;

        Ok(VkView {
            raw,
            extent: image.extent,
            slot: slot.index,
        })
    }

    fn submit(&mut self, context: &VkCommandContext) -> Result<()> {
        let mut sync = self.shared.sync.borrow_mut();
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let cmd = context.cmd;

        // Wait on the acquire, signal this image's render-finished.
        let semaphores = sync.submit_semaphores();
        let (wait, signal): (&[vk::Semaphore], &[vk::Semaphore]) = match &semaphores {
            Some((acquired, rendered)) => {
                (std::slice::from_ref(acquired), std::slice::from_ref(rendered))
            }
            None => (&[], &[]),
        };
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.shared
                .device
                .queue_submit(
                    self.shared.queue,
                    std::slice::from_ref(&submit),
                    vk::Fence::null(),
                )
                .context("queue_submit")?;
        }
        sync.mark_submitted();
        Ok(())
    }
}
