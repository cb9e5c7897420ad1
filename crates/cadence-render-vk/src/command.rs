// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;

use anyhow::{Context, Result};
use ash::vk;
use cadence_render::{ClearRect, CommandContext, ResourceState, Rgba};

use crate::{Shared, VkImage, VkView};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Stage, access and layout on one side of a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Scope {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

/// Barrier scopes for a state change, `None` when nothing changes.
///
/// Leaving `Present` discards contents: every frame clears the whole image
/// first, so the old layout can be `UNDEFINED`.
pub(crate) fn transition_scopes(
    before: ResourceState,
    after: ResourceState,
) -> Option<(Scope, Scope)> {
    let present_src = Scope {
        stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        access: vk::AccessFlags2::NONE,
        layout: vk::ImageLayout::UNDEFINED,
    };
    let present_dst = Scope {
        stage: vk::PipelineStageFlags2::NONE,
        access: vk::AccessFlags2::NONE,
        layout: vk::ImageLayout::PRESENT_SRC_KHR,
    };
    let target = Scope {
        stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE | vk::AccessFlags2::COLOR_ATTACHMENT_READ,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    match (before, after) {
        (ResourceState::Present, ResourceState::RenderTarget) => Some((present_src, target)),
        (ResourceState::RenderTarget, ResourceState::Present) => Some((target, present_dst)),
        _ => None,
    }
}

/// Clear area in framebuffer pixels; `None` when nothing is left to clear.
pub(crate) fn clear_area(extent: vk::Extent2D, rect: Option<ClearRect>) -> Option<vk::Rect2D> {
    let Some(rect) = rect else {
        return Some(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });
    };
    let c = rect.clip(extent.width, extent.height)?;
    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: c.left,
            y: c.top,
        },
        extent: vk::Extent2D {
            width: c.width() as u32,
            height: c.height() as u32,
        },
    })
}

/// One command pool and one primary buffer. Resetting the pool recycles
/// the buffer's memory; callers only reset once the GPU is done with it.
pub struct VkCommandContext {
    shared: Rc<Shared>,
    pool: vk::CommandPool,
    pub(crate) cmd: vk::CommandBuffer,
}

impl VkCommandContext {
    pub(crate) unsafe fn new(shared: Rc<Shared>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: shared.queue_family,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        let pool = shared
            .device
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = match shared.device.allocate_command_buffers(&alloc_info) {
            Ok(bufs) => bufs[0],
            Err(e) => {
                shared.device.destroy_command_pool(pool, None);
                return Err(e).context("allocate_command_buffers");
            }
        };
        Ok(Self { shared, pool, cmd })
    }

    unsafe fn barrier(&self, image: vk::Image, src: Scope, dst: Scope) {
        let barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: src.stage,
            src_access_mask: src.access,
            dst_stage_mask: dst.stage,
            dst_access_mask: dst.access,
            old_layout: src.layout,
            new_layout: dst.layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: COLOR_RANGE,
            ..Default::default()
        };
        let dep = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &barrier,
            ..Default::default()
        };
        self.shared.device.cmd_pipeline_barrier2(self.cmd, &dep);
    }

    unsafe fn begin_rendering(&self, view: &VkView, load_op: vk::AttachmentLoadOp, color: Rgba) {
        let color_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: view.raw,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
            ..Default::default()
        };
        let rendering_info = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: view.extent,
            },
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &color_att,
            ..Default::default()
        };
        self.shared
            .device
            .cmd_begin_rendering(self.cmd, &rendering_info);
    }
}

impl CommandContext for VkCommandContext {
    type Image = VkImage;
    type View = VkView;

    fn reset(&mut self) -> Result<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe {
            self.shared
                .device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .context("reset_command_pool")?;
            self.shared
                .device
                .begin_command_buffer(self.cmd, &begin)
                .context("begin_command_buffer")?;
        }
        Ok(())
    }

    fn transition(&mut self, image: &VkImage, before: ResourceState, after: ResourceState) {
        if let Some((src, dst)) = transition_scopes(before, after) {
            unsafe { self.barrier(image.raw, src, dst) };
        }
    }

    fn clear(&mut self, view: &VkView, color: Rgba, rect: Option<ClearRect>) {
        let Some(area) = clear_area(view.extent, rect) else {
            return;
        };
        unsafe {
            if rect.is_none() {
                // Full clears ride on the attachment load op.
                self.begin_rendering(view, vk::AttachmentLoadOp::CLEAR, color);
            } else {
                self.begin_rendering(view, vk::AttachmentLoadOp::LOAD, color);
                let attachment = vk::ClearAttachment {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    color_attachment: 0,
                    clear_value: vk::ClearValue {
                        color: vk::ClearColorValue { float32: color },
                    },
                };
                let clear_rect = vk::ClearRect {
                    rect: area,
                    base_array_layer: 0,
                    layer_count: 1,
                };
                self.shared.device.cmd_clear_attachments(
                    self.cmd,
                    std::slice::from_ref(&attachment),
                    std::slice::from_ref(&clear_rect),
                );
            }
            self.shared.device.cmd_end_rendering(self.cmd);
        }
    }

    fn close(&mut self) -> Result<()> {
        unsafe { self.shared.device.end_command_buffer(self.cmd) }.context("end_command_buffer")
    }
}

impl Drop for VkCommandContext {
    fn drop(&mut self) {
        // Destroying the pool frees its command buffer.
        unsafe { self.shared.device.destroy_command_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_side_discards_old_contents() {
        let (src, dst) =
            transition_scopes(ResourceState::Present, ResourceState::RenderTarget).unwrap();
        assert_eq!(src.layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(dst.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert!(dst.access.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn release_side_ends_in_present_layout() {
        let (src, dst) =
            transition_scopes(ResourceState::RenderTarget, ResourceState::Present).unwrap();
        assert_eq!(src.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(dst.layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn same_state_needs_no_barrier() {
        assert!(transition_scopes(ResourceState::Present, ResourceState::Present).is_none());
    }

    #[test]
    fn clear_area_clips_to_extent() {
        let extent = vk::Extent2D {
            width: 960,
            height: 540,
        };
        let full = clear_area(extent, None).unwrap();
        assert_eq!(full.extent, extent);

        let rect = ClearRect {
            left: 900,
            top: 270,
            right: 1028,
            bottom: 398,
        };
        let area = clear_area(extent, Some(rect)).unwrap();
        assert_eq!((area.offset.x, area.offset.y), (900, 270));
        assert_eq!((area.extent.width, area.extent.height), (60, 128));

        let gone = ClearRect {
            left: 1000,
            top: 0,
            right: 1100,
            bottom: 10,
        };
        assert!(clear_area(extent, Some(gone)).is_none());
    }
}
