// SPDX-License-Identifier: CEPL-1.0
//! Vulkan 1.3 backend for the frame pipeline.
//!
//! The monotonic fence is a timeline semaphore; completion signals wait on it
//! from the host. Render-target views live in a fixed table of image-view
//! handles that plays the role of the view heap. Recording uses dynamic
//! rendering and `vkCmdClearAttachments`, so no pipelines or shaders exist.
use std::cell::RefCell;
use std::ffi::CStr;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use cadence_render::{DisplayFormat, RenderSize};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, warn};

mod command;
mod device;
mod swapchain_state;
mod sync;

pub use command::VkCommandContext;
pub use device::{VkDevice, VkImage, VkView};
pub use swapchain_state::VkSwapchain;
pub use sync::VkCompletionSignal;

use swapchain_state::{FrameSync, SwapchainState};

const APP_NAME: &CStr = c"cadence";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VkOptions {
    /// Requested swapchain length; clamped to what the surface allows.
    pub image_count: u32,
    /// FIFO when set, otherwise the lowest-latency mode available.
    pub vsync: bool,
    pub format: DisplayFormat,
    /// Upper bound for `vkAcquireNextImageKHR` and acquire-semaphore reuse.
    pub acquire_timeout: Duration,
}

impl Default for VkOptions {
    fn default() -> Self {
        Self {
            image_count: 3,
            vsync: true,
            format: DisplayFormat::default(),
            acquire_timeout: Duration::from_millis(5000),
        }
    }
}

pub(crate) fn vk_format(format: DisplayFormat) -> vk::Format {
    match format {
        DisplayFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        DisplayFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
    }
}

pub(crate) fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Everything the device, swapchain, contexts and signals share. Dropped
/// last, once every handle that borrows the `VkDevice` is gone.
pub(crate) struct Shared {
    _entry: Entry,
    pub(crate) instance: Instance,
    debug: Option<(ext_debug::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) phys: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) queue_family: u32,
    pub(crate) queue: vk::Queue,
    pub(crate) swapchain_loader: swapchain::Device,
    /// Timeline semaphore backing the frame fence.
    pub(crate) timeline: vk::Semaphore,
    pub(crate) options: VkOptions,
    pub(crate) chain: RefCell<SwapchainState>,
    pub(crate) sync: RefCell<FrameSync>,
    /// The view heap: slot `i` holds the view written for that slot.
    pub(crate) views: RefCell<Vec<vk::ImageView>>,
}

impl Shared {
    /// Destroys every view in the table and nulls the slots.
    pub(crate) fn release_views(&self) -> usize {
        let mut views = self.views.borrow_mut();
        let mut released = 0;
        for view in views.iter_mut() {
            if *view != vk::ImageView::null() {
                unsafe { self.device.destroy_image_view(*view, None) };
                *view = vk::ImageView::null();
                released += 1;
            }
        }
        released
    }
}

// Teardown order: idle, views, swapchain + its semaphores, timeline,
// device, messenger, surface, instance.
impl Drop for Shared {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("vk: device_wait_idle during teardown: {e:?}");
            }
            self.release_views();
            self.sync.borrow_mut().destroy(&self.device);
            let chain = self.chain.get_mut();
            if chain.raw != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(chain.raw, None);
            }
            self.device.destroy_semaphore(self.timeline, None);
            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        debug!("vk: device released");
    }
}

/// Creates the device and a swapchain over `window`. The window must
/// outlive both returned values.
pub fn create(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    options: VkOptions,
) -> Result<(VkDevice, VkSwapchain)> {
    let shared = unsafe { init_shared(window, display, options)? };
    let state = unsafe { swapchain_state::build(&shared, size, vk::SwapchainKHR::null())? };
    let image_count = state.images.len();
    *shared.chain.borrow_mut() = state;
    unsafe { shared.sync.borrow_mut().rebuild(&shared.device, image_count)? };

    let shared = Rc::new(shared);
    Ok((
        VkDevice::new(shared.clone()),
        VkSwapchain::new(shared),
    ))
}

unsafe fn init_shared(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    options: VkOptions,
) -> Result<Shared> {
    // Instance, then the surface from it, then a device that can present
    // to that surface.
    let dh = display
        .display_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();

    let entry = Entry::linked();
    let validation = cfg!(debug_assertions) && has_validation_layer(&entry);
    let instance = create_instance(&entry, dh, validation).context("create_instance")?;
    let debug = if validation {
        Some(create_debug_messenger(&entry, &instance)?)
    } else {
        None
    };

    let surface_loader = surface::Instance::new(&entry, &instance);
    let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
        .context("ash_window::create_surface")?;

    let (phys, queue_family) = pick_device_and_queue(&instance, &surface_loader, surface)?;
    let device = create_device(&instance, phys, queue_family)?;
    let queue = device.get_device_queue(queue_family, 0);
    let swapchain_loader = swapchain::Device::new(&instance, &device);
    let timeline = create_timeline(&device)?;

    Ok(Shared {
        _entry: entry,
        instance,
        debug,
        surface_loader,
        surface,
        phys,
        device,
        queue_family,
        queue,
        swapchain_loader,
        timeline,
        options,
        chain: RefCell::new(SwapchainState::default()),
        sync: RefCell::new(FrameSync::default()),
        views: RefCell::new(Vec::new()),
    })
}

unsafe fn has_validation_layer(entry: &Entry) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER)
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    validation: bool,
) -> Result<Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let layers = [VALIDATION_LAYER.as_ptr()];
    let layer_count = if validation {
        extensions.push(ext_debug::NAME.as_ptr());
        layers.len() as u32
    } else {
        0
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layer_count,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None)?)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else {
        debug!("[vulkan] {msg}");
    }
    vk::FALSE
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(ext_debug::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .context("create_debug_utils_messenger")?;
    info!("vk: validation layer enabled");
    Ok((loader, messenger))
}

fn supports_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

/// First 1.3 device with a graphics queue that can present, preferring a
/// discrete GPU.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let mut fallback = None;
    for phys in instance.enumerate_physical_devices()? {
        let props = instance.get_physical_device_properties(phys);
        if !supports_1_3(props.api_version) {
            continue;
        }
        let qprops = instance.get_physical_device_queue_family_properties(phys);
        let family = qprops.iter().enumerate().find_map(|(i, q)| {
            let present = surf_i
                .get_physical_device_surface_support(phys, i as u32, surface)
                .unwrap_or(false);
            (q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present).then_some(i as u32)
        });
        let Some(family) = family else { continue };

        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            info!("vk: using {name} (discrete, queue family {family})");
            return Ok((phys, family));
        }
        if fallback.is_none() {
            fallback = Some((phys, family, name));
        }
    }
    let (phys, family, name) =
        fallback.ok_or_else(|| anyhow!("no Vulkan 1.3 device can present to this surface"))?;
    info!("vk: using {name} (queue family {family})");
    Ok((phys, family))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    // Feature chain: feats2 -> feats12 -> feats13. Structs must outlive
    // create_device.
    let mut feats13 = vk::PhysicalDeviceVulkan13Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        synchronization2: vk::TRUE,
        dynamic_rendering: vk::TRUE,
        ..Default::default()
    };
    let mut feats12 = vk::PhysicalDeviceVulkan12Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
        timeline_semaphore: vk::TRUE,
        ..Default::default()
    };
    feats12.p_next = (&mut feats13) as *mut _ as *mut _;
    let mut feats2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        ..Default::default()
    };
    feats2.p_next = (&mut feats12) as *mut _ as *mut _;

    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&mut feats2) as *mut _ as *const _,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    instance
        .create_device(phys, &dinfo, None)
        .context("create_device")
}

unsafe fn create_timeline(device: &ash::Device) -> Result<vk::Semaphore> {
    let mut type_info = vk::SemaphoreTypeCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_TYPE_CREATE_INFO,
        semaphore_type: vk::SemaphoreType::TIMELINE,
        initial_value: 0,
        ..Default::default()
    };
    let ci = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        p_next: (&mut type_info) as *mut _ as *const _,
        ..Default::default()
    };
    device
        .create_semaphore(&ci, None)
        .context("create_semaphore(timeline)")
}
