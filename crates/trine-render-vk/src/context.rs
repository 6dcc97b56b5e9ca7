// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical/logical device and queues.

use std::ffi::{c_void, CStr, CString};

use anyhow::{anyhow, Context as _, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, trace, warn};
use trine_core::{Arena, ArenaError};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    #[inline]
    pub fn shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Everything that lives for the whole process and never changes after
/// bootstrap. Torn down explicitly by the owner, see [`Context::destroy`].
pub struct Context {
    pub entry: Entry,
    pub instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,

    pub phys: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

unsafe fn validation_layer_available(entry: &Entry) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .map(|layers| {
            layers
                .iter()
                .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER)
        })
        .unwrap_or(false)
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> Result<(Instance, bool)> {
    let app = CString::new(app_name).context("application name contains NUL")?;
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: c"trine".as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut exts = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    let layer_ok = validation && validation_layer_available(entry);
    if validation && !layer_ok {
        warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
    }

    let debug_ok = layer_ok
        && entry
            .enumerate_instance_extension_properties(None)
            .context("enumerate_instance_extension_properties")?
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == debug_utils::NAME);
    if debug_ok {
        exts.push(debug_utils::NAME.as_ptr());
    }

    let layers = [VALIDATION_LAYER.as_ptr()];
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: if layer_ok { layers.len() as u32 } else { 0 },
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    info!("instance: api 1.0, validation layer={layer_ok}, debug utils={debug_ok}");
    let instance = entry
        .create_instance(&create_info, None)
        .context("vkCreateInstance")?;
    Ok((instance, debug_ok))
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
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
        .context("vkCreateDebugUtilsMessengerEXT")?;
    Ok((loader, messenger))
}

/// Scans families in order. A present-capable family sets the present index,
/// a graphics family sets the graphics index; later matches overwrite earlier
/// ones until both are set.
pub fn find_queue_families(
    props: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, family) in props.iter().enumerate() {
        let i = i as u32;
        if supports_present(i) {
            present = Some(i);
        }
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(i);
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

/// Distinct family indices in first-seen order, deduplicated through a
/// per-family flag table in the arena.
pub fn unique_families(
    arena: &Arena,
    family_count: usize,
    wanted: &[u32],
) -> Result<Vec<u32>, ArenaError> {
    let seen = arena.alloc_slice::<u8>(family_count)?;
    let mut out = Vec::with_capacity(wanted.len());
    for &family in wanted {
        if let Some(flag) = seen.get_mut(family as usize) {
            if *flag == 0 {
                *flag = 1;
                out.push(family);
            }
        }
    }
    Ok(out)
}

#[derive(Clone, Debug)]
pub struct Candidate {
    pub phys: vk::PhysicalDevice,
    pub name: String,
    pub kind: vk::PhysicalDeviceType,
    pub families: QueueFamilies,
}

/// First discrete GPU, otherwise the first candidate.
pub fn prefer_discrete(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .find(|c| c.kind == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| candidates.first())
}

unsafe fn has_device_extension(instance: &Instance, phys: vk::PhysicalDevice, name: &CStr) -> bool {
    instance
        .enumerate_device_extension_properties(phys)
        .map(|exts| {
            exts.iter()
                .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
        })
        .unwrap_or(false)
}

/// Screens one device. `None` means unsuitable, with the reason logged.
unsafe fn screen_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Option<Candidate> {
    let props = instance.get_physical_device_properties(phys);
    let feats = instance.get_physical_device_features(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();

    if feats.geometry_shader != vk::TRUE {
        debug!("{name}: no geometryShader, skipped");
        return None;
    }
    if !has_device_extension(instance, phys, swapchain::NAME) {
        debug!("{name}: no {:?}, skipped", swapchain::NAME);
        return None;
    }
    let formats = surface_loader
        .get_physical_device_surface_formats(phys, surface)
        .unwrap_or_default();
    let modes = surface_loader
        .get_physical_device_surface_present_modes(phys, surface)
        .unwrap_or_default();
    if formats.is_empty() || modes.is_empty() {
        debug!("{name}: surface has no formats or present modes, skipped");
        return None;
    }

    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let Some(families) = find_queue_families(&qprops, |i| {
        surface_loader
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false)
    }) else {
        debug!("{name}: no graphics + present queue families, skipped");
        return None;
    };

    Some(Candidate {
        phys,
        name,
        kind: props.device_type,
        families,
    })
}

unsafe fn pick_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<Candidate> {
    let devices = instance
        .enumerate_physical_devices()
        .context("vkEnumeratePhysicalDevices")?;
    if devices.is_empty() {
        return Err(anyhow!("Fail to find GPU with vulkan support"));
    }

    let candidates: Vec<Candidate> = devices
        .iter()
        .filter_map(|&phys| screen_device(instance, surface_loader, surface, phys))
        .collect();

    prefer_discrete(&candidates).cloned().ok_or_else(|| {
        trine_render::RenderError::NoSuitableGpu(format!(
            "{} device(s) found, none with geometryShader, {:?} and graphics + present queues",
            devices.len(),
            swapchain::NAME
        ))
        .into()
    })
}

unsafe fn create_logical_device(
    entry: &Entry,
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    arena: &Arena,
    validation: bool,
) -> Result<ash::Device> {
    let family_count = instance
        .get_physical_device_queue_family_properties(phys)
        .len();
    let unique = unique_families(arena, family_count, &[families.present, families.graphics])?;

    let priority = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique
        .iter()
        .map(|&family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priority.as_ptr(),
            ..Default::default()
        })
        .collect();

    // asked again here rather than carried over from instance creation
    let layer_ok = validation && validation_layer_available(entry);
    let layers = [VALIDATION_LAYER.as_ptr()];
    let exts = [swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_layer_count: if layer_ok { layers.len() as u32 } else { 0 },
        pp_enabled_layer_names: layers.as_ptr(),
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    instance
        .create_device(phys, &dinfo, None)
        .context("Failed to create logical device!")
}

impl Context {
    /// # Safety
    /// `window` and `display` must outlive the returned context.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        app_name: &str,
        validation: bool,
        arena: &Arena,
    ) -> Result<Self> {
        // STRICT ORDER:
        // 1) instance, 2) surface from that instance,
        // 3) device picked against that surface, 4) logical device + queues.
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::load().context("loading the Vulkan loader")?;
        let (instance, debug_ok) = create_instance(&entry, dh, app_name, validation)?;
        let debug = if debug_ok {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
            .context("ash_window::create_surface")?;

        let gpu = pick_physical_device(&instance, &surface_loader, surface)?;
        info!(
            "gpu: {} ({:?}), graphics family {}, present family {}",
            gpu.name, gpu.kind, gpu.families.graphics, gpu.families.present
        );

        let device =
            create_logical_device(&entry, &instance, gpu.phys, gpu.families, arena, validation)?;
        let swapchain_loader = swapchain::Device::new(&instance, &device);
        let graphics_queue = device.get_device_queue(gpu.families.graphics, 0);
        let present_queue = device.get_device_queue(gpu.families.present, 0);

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys: gpu.phys,
            families: gpu.families,
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
        })
    }

    pub unsafe fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.instance.get_physical_device_memory_properties(self.phys)
    }

    /// Device, debug messenger, surface, instance. Every device child must
    /// already be gone.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_device(None);
        if let Some((loader, messenger)) = self.debug.take() {
            loader.destroy_debug_utils_messenger(messenger, None);
        }
        self.surface_loader.destroy_surface(self.surface, None);
        self.instance.destroy_instance(None);
    }
}
