// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use ash::vk;
use cadence_render::{PresentStatus, RenderSize, Swapchain, WaitStatus};
use tracing::{debug, info};

use crate::sync::wait_timeline;
use crate::{timeout_ns, vk_format, Shared, VkImage};

#[derive(Debug, Default)]
pub(crate) struct SwapchainState {
    pub raw: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Acquired {
    index: u32,
    slot: usize,
    submitted: bool,
}

/// Binary semaphores between acquire, submit and present.
///
/// Acquire semaphores rotate through a ring. Each one is free again once the
/// timeline reaches the fence value signaled right after the submit that
/// waited on it. Render-finished semaphores are per image.
#[derive(Debug, Default)]
pub(crate) struct FrameSync {
    acquire: Vec<vk::Semaphore>,
    /// 0 when the semaphore is free.
    acquire_retire: Vec<u64>,
    next_acquire: usize,
    rendered: Vec<vk::Semaphore>,
    acquired: Option<Acquired>,
    /// Ring slot consumed by a submit whose fence value is not known yet.
    unretired: Option<usize>,
    suboptimal: bool,
}

impl FrameSync {
    pub(crate) unsafe fn rebuild(&mut self, device: &ash::Device, image_count: usize) -> Result<()> {
        self.destroy(device);
        let sem_ci = vk::SemaphoreCreateInfo::default();
        for _ in 0..image_count + 1 {
            self.acquire.push(device.create_semaphore(&sem_ci, None)?);
        }
        for _ in 0..image_count {
            self.rendered.push(device.create_semaphore(&sem_ci, None)?);
        }
        self.acquire_retire = vec![0; self.acquire.len()];
        Ok(())
    }

    pub(crate) unsafe fn destroy(&mut self, device: &ash::Device) {
        for sem in self.acquire.drain(..).chain(self.rendered.drain(..)) {
            device.destroy_semaphore(sem, None);
        }
        *self = Self::default();
    }

    /// (wait, signal) for the submit that renders the acquired image.
    pub(crate) fn submit_semaphores(&self) -> Option<(vk::Semaphore, vk::Semaphore)> {
        let a = self.acquired.filter(|a| !a.submitted)?;
        Some((self.acquire[a.slot], *self.rendered.get(a.index as usize)?))
    }

    pub(crate) fn mark_submitted(&mut self) {
        if let Some(a) = self.acquired.as_mut().filter(|a| !a.submitted) {
            a.submitted = true;
            self.unretired = Some(a.slot);
        }
    }

    pub(crate) fn retire_pending(&mut self, value: u64) {
        if let Some(slot) = self.unretired.take() {
            self.acquire_retire[slot] = value;
        }
    }
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [
        vk::PresentModeKHR::IMMEDIATE,
        vk::PresentModeKHR::MAILBOX,
        vk::PresentModeKHR::FIFO,
    ]
    .into_iter()
    .find(|m| modes.contains(m))
    .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

// max_image_count == 0 means "no upper bound".
fn clamp_image_count(caps: &vk::SurfaceCapabilitiesKHR, want: u32) -> u32 {
    let count = want.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

fn pick_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    want: vk::Format,
) -> Result<vk::SurfaceFormatKHR> {
    let srgb_cs = |f: &vk::SurfaceFormatKHR| f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR;
    [want, vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM]
        .into_iter()
        .find_map(|fmt| {
            formats
                .iter()
                .copied()
                .find(|f| f.format == fmt && srgb_cs(f))
        })
        .or_else(|| formats.first().copied())
        .ok_or_else(|| anyhow!("surface reports no formats"))
}

pub(crate) unsafe fn build(
    shared: &Shared,
    hint: RenderSize,
    old_swapchain: vk::SwapchainKHR,
) -> Result<SwapchainState> {
    let surf_i = &shared.surface_loader;
    let caps = surf_i.get_physical_device_surface_capabilities(shared.phys, shared.surface)?;
    let formats = surf_i.get_physical_device_surface_formats(shared.phys, shared.surface)?;
    let modes = surf_i.get_physical_device_surface_present_modes(shared.phys, shared.surface)?;

    let surf_format = pick_surface_format(&formats, vk_format(shared.options.format))?;
    let present_mode = choose_present_mode(&modes, shared.options.vsync);
    let extent = extent_from_caps(&caps, hint);
    if extent.width == 0 || extent.height == 0 {
        bail!("surface extent is {}x{}", extent.width, extent.height);
    }
    let min_image_count = clamp_image_count(&caps, shared.options.image_count);

    let pre_transform = if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    };

    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface: shared.surface,
        min_image_count,
        image_format: surf_format.format,
        image_color_space: surf_format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: vk::SharingMode::EXCLUSIVE,
        pre_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain,
        ..Default::default()
    };

    let raw = shared
        .swapchain_loader
        .create_swapchain(&swap_info, None)
        .context("create_swapchain")?;
    let images = match shared.swapchain_loader.get_swapchain_images(raw) {
        Ok(images) => images,
        Err(e) => {
            shared.swapchain_loader.destroy_swapchain(raw, None);
            return Err(e).context("get_swapchain_images");
        }
    };

    info!(
        "vk: swapchain {}x{} format={:?}/{:?} present_mode={:?} images={} (min={})",
        extent.width,
        extent.height,
        surf_format.format,
        surf_format.color_space,
        present_mode,
        images.len(),
        caps.min_image_count
    );

    Ok(SwapchainState {
        raw,
        format: surf_format.format,
        extent,
        images,
    })
}

pub struct VkSwapchain {
    shared: Rc<Shared>,
}

impl VkSwapchain {
    pub(crate) fn new(shared: Rc<Shared>) -> Self {
        Self { shared }
    }
}

impl Swapchain for VkSwapchain {
    type Image = VkImage;

    fn image_count(&self) -> u32 {
        self.shared.chain.borrow().images.len() as u32
    }

    fn current_image_index(&mut self) -> Result<u32> {
        let shared = &self.shared;
        let mut sync = shared.sync.borrow_mut();
        if let Some(a) = sync.acquired {
            return Ok(a.index);
        }

        let timeout = shared.options.acquire_timeout;
        let slot = sync.next_acquire;
        let retire = sync
            .acquire_retire
            .get(slot)
            .copied()
            .ok_or_else(|| anyhow!("no acquire semaphores"))?;
        if retire > 0 && wait_timeline(shared, retire, timeout)? == WaitStatus::TimedOut {
            bail!("acquire semaphore {slot} still in use after {timeout:?}");
        }

        let raw = shared.chain.borrow().raw;
        // OUT_OF_DATE here is fatal; a stale chain is caught at present.
        let (index, suboptimal) = unsafe {
            shared.swapchain_loader.acquire_next_image(
                raw,
                timeout_ns(timeout),
                sync.acquire[slot],
                vk::Fence::null(),
            )
        }
        .map_err(|e| anyhow!("acquire_next_image: {e:?}"))?;

        sync.acquire_retire[slot] = 0;
        sync.acquired = Some(Acquired {
            index,
            slot,
            submitted: false,
        });
        sync.next_acquire = (slot + 1) % sync.acquire.len();
        sync.suboptimal |= suboptimal;
        Ok(index)
    }

    fn image(&mut self, index: u32) -> Result<VkImage> {
        let chain = self.shared.chain.borrow();
        let raw = chain
            .images
            .get(index as usize)
            .copied()
            .ok_or_else(|| anyhow!("image {index} of {}", chain.images.len()))?;
        Ok(VkImage {
            raw,
            index,
            extent: chain.extent,
        })
    }

    fn present(&mut self) -> Result<PresentStatus> {
        let shared = &self.shared;
        let mut sync = shared.sync.borrow_mut();
        let acquired = sync
            .acquired
            .take()
            .ok_or_else(|| anyhow!("present without an acquired image"))?;
        if !acquired.submitted {
            bail!("present before image {} was submitted", acquired.index);
        }
        let stale = std::mem::take(&mut sync.suboptimal);

        let raw = shared.chain.borrow().raw;
        let rendered = sync.rendered[acquired.index as usize];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &rendered,
            swapchain_count: 1,
            p_swapchains: &raw,
            p_image_indices: &acquired.index,
            ..Default::default()
        };

        match unsafe { shared.swapchain_loader.queue_present(shared.queue, &present) } {
            Ok(false) if !stale => Ok(PresentStatus::Presented),
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::Suboptimal),
            Err(e) => Err(anyhow!("queue_present: {e:?}")),
        }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        let shared = &self.shared;
        unsafe {
            // Presentation still holds semaphore waits the timeline can't see.
            shared
                .device
                .device_wait_idle()
                .context("device_wait_idle")?;
            let released = shared.release_views();

            let old = shared.chain.borrow().raw;
            let state = build(shared, size, old)?;
            shared.swapchain_loader.destroy_swapchain(old, None);
            let image_count = state.images.len();
            *shared.chain.borrow_mut() = state;
            shared
                .sync
                .borrow_mut()
                .rebuild(&shared.device, image_count)?;
            debug!("vk: swapchain rebuilt, {released} views destroyed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: u32, min_images: u32, max_images: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_images,
            max_image_count: max_images,
            current_extent: vk::Extent2D {
                width: current,
                height: current,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn want(width: u32, height: u32) -> RenderSize {
        RenderSize { width, height }
    }

    #[test]
    fn vsync_always_uses_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&modes, false),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let e = extent_from_caps(&caps(800, 2, 8), want(960, 540));
        assert_eq!((e.width, e.height), (800, 800));

        let e = extent_from_caps(&caps(u32::MAX, 2, 8), want(960, 9000));
        assert_eq!((e.width, e.height), (960, 4096));
    }

    #[test]
    fn image_count_respects_surface_limits() {
        assert_eq!(clamp_image_count(&caps(0, 2, 8), 3), 3);
        assert_eq!(clamp_image_count(&caps(0, 4, 8), 3), 4);
        assert_eq!(clamp_image_count(&caps(0, 2, 2), 3), 2);
        assert_eq!(clamp_image_count(&caps(0, 2, 0), 16), 16);
    }

    #[test]
    fn surface_format_prefers_requested() {
        let sf = |format| vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let formats = [sf(vk::Format::B8G8R8A8_UNORM), sf(vk::Format::B8G8R8A8_SRGB)];
        let picked = pick_surface_format(&formats, vk::Format::B8G8R8A8_UNORM).unwrap();
        assert_eq!(picked.format, vk::Format::B8G8R8A8_UNORM);
        let picked = pick_surface_format(&formats, vk::Format::B8G8R8A8_SRGB).unwrap();
        assert_eq!(picked.format, vk::Format::B8G8R8A8_SRGB);

        let odd = [sf(vk::Format::R16G16B16A16_SFLOAT)];
        let picked = pick_surface_format(&odd, vk::Format::B8G8R8A8_SRGB).unwrap();
        assert_eq!(picked.format, vk::Format::R16G16B16A16_SFLOAT);
        assert!(pick_surface_format(&[], vk::Format::B8G8R8A8_SRGB).is_err());
    }

    fn sync_with(images: usize) -> FrameSync {
        FrameSync {
            acquire: vec![vk::Semaphore::null(); images + 1],
            acquire_retire: vec![0; images + 1],
            rendered: vec![vk::Semaphore::null(); images],
            ..Default::default()
        }
    }

    #[test]
    fn acquire_semaphore_retires_on_the_next_fence_value() {
        let mut sync = sync_with(3);
        assert!(sync.submit_semaphores().is_none());

        sync.acquired = Some(Acquired {
            index: 2,
            slot: 1,
            submitted: false,
        });
        assert!(sync.submit_semaphores().is_some());
        sync.mark_submitted();
        assert!(sync.submit_semaphores().is_none());

        sync.retire_pending(7);
        assert_eq!(sync.acquire_retire, vec![0, 7, 0, 0]);
        // A second signal without a submit in between retires nothing.
        sync.retire_pending(8);
        assert_eq!(sync.acquire_retire, vec![0, 7, 0, 0]);
    }

    #[test]
    fn resubmitting_the_same_acquire_is_ignored() {
        let mut sync = sync_with(2);
        sync.acquired = Some(Acquired {
            index: 0,
            slot: 0,
            submitted: false,
        });
        sync.mark_submitted();
        sync.retire_pending(3);
        sync.mark_submitted();
        sync.retire_pending(4);
        assert_eq!(sync.acquire_retire[0], 3);
    }
}
