//! Names and numbers shared across the loader.

/// Name used for search directories (`<dir>/vulkan/...`).
pub const APP_NAME: &str = "vulkan";

/// API version implemented by the loader itself (1.3.0).
pub const LOADER_API_VERSION: crate::version::ApiVersion = crate::version::ApiVersion::new(1, 3, 0);

/// Maximum length, including the terminating NUL, of a layer or extension name.
pub const MAX_NAME_SIZE: usize = 256;

/// Maximum number of physical devices in a single device group.
pub const MAX_DEVICE_GROUP_SIZE: usize = 32;

/// Expected prefix of every layer name.
pub const LAYER_NAME_PREFIX: &str = "VK_LAYER_";

/// Name reserved for the override meta-layer.
pub const OVERRIDE_LAYER_NAME: &str = "VK_LAYER_LUNARG_override";

/// Instance extension that opts into enumerating portability drivers.
pub const PORTABILITY_ENUMERATION_EXTENSION: &str = "VK_KHR_portability_enumeration";

/// Instance extension that provides device group enumeration on 1.0 drivers.
pub const DEVICE_GROUP_CREATION_EXTENSION: &str = "VK_KHR_device_group_creation";

// Layer/driver interface versions.

pub const CURRENT_LAYER_INTERFACE_VERSION: u32 = 2;
pub const MIN_SUPPORTED_LAYER_INTERFACE_VERSION: u32 = 1;
pub const CURRENT_ICD_INTERFACE_VERSION: u32 = 7;
pub const MIN_SUPPORTED_ICD_INTERFACE_VERSION: u32 = 0;

// Exported symbol names.

pub const LAYER_NEGOTIATE_SYMBOL: &str = "vkNegotiateLoaderLayerInterfaceVersion";
pub const GET_INSTANCE_PROC_ADDR_SYMBOL: &str = "vkGetInstanceProcAddr";
pub const GET_DEVICE_PROC_ADDR_SYMBOL: &str = "vkGetDeviceProcAddr";
pub const ICD_NEGOTIATE_SYMBOL: &str = "vk_icdNegotiateLoaderICDInterfaceVersion";
pub const ICD_GET_INSTANCE_PROC_ADDR_SYMBOL: &str = "vk_icdGetInstanceProcAddr";
pub const ICD_GET_PHYSICAL_DEVICE_PROC_ADDR_SYMBOL: &str = "vk_icdGetPhysicalDeviceProcAddr";

// Manifest file-format versions the loader knows about, oldest first.

pub const KNOWN_LAYER_FILE_VERSIONS: &[&str] = &["1.0.0", "1.0.1", "1.1.0", "1.1.1", "1.1.2", "1.2.0", "1.2.1"];
pub const KNOWN_DRIVER_FILE_VERSIONS: &[&str] = &["1.0.0", "1.0.1"];

/// First file-format version that allows the `layers` array.
pub const LAYERS_ARRAY_MIN_VERSION: &str = "1.0.1";

/// First file-format version that allows `component_layers`.
pub const META_LAYER_MIN_VERSION: &str = "1.1.1";

/// Format of `expiration_date` in override layer manifests.
pub const EXPIRATION_DATE_FORMAT: &str = "%Y-%m-%d-%H-%M";

// Environment variables.

pub const ENV_DRIVER_FILES: &str = "VK_DRIVER_FILES";
pub const ENV_ICD_FILENAMES: &str = "VK_ICD_FILENAMES";
pub const ENV_ADD_DRIVER_FILES: &str = "VK_ADD_DRIVER_FILES";
pub const ENV_LAYER_PATH: &str = "VK_LAYER_PATH";
pub const ENV_ADD_LAYER_PATH: &str = "VK_ADD_LAYER_PATH";
pub const ENV_IMPLICIT_LAYER_PATH: &str = "VK_IMPLICIT_LAYER_PATH";
pub const ENV_ADD_IMPLICIT_LAYER_PATH: &str = "VK_ADD_IMPLICIT_LAYER_PATH";
pub const ENV_INSTANCE_LAYERS: &str = "VK_INSTANCE_LAYERS";
pub const ENV_LAYERS_ENABLE: &str = "VK_LOADER_LAYERS_ENABLE";
pub const ENV_LAYERS_DISABLE: &str = "VK_LOADER_LAYERS_DISABLE";
pub const ENV_DRIVERS_SELECT: &str = "VK_LOADER_DRIVERS_SELECT";
pub const ENV_DRIVERS_DISABLE: &str = "VK_LOADER_DRIVERS_DISABLE";
pub const ENV_DISABLE_INST_EXT_FILTER: &str = "VK_LOADER_DISABLE_INST_EXT_FILTER";
pub const ENV_DISABLE_LIBRARY_UNLOADING: &str = "VK_LOADER_DISABLE_DYNAMIC_LIBRARY_UNLOADING";
pub const ENV_LOADER_DEBUG: &str = "VK_LOADER_DEBUG";

// Manifest search subdirectories under each data/config directory.

pub const DRIVER_SUBDIR: &str = "icd.d";
pub const IMPLICIT_LAYER_SUBDIR: &str = "implicit_layer.d";
pub const EXPLICIT_LAYER_SUBDIR: &str = "explicit_layer.d";

/// Instance extensions the loader knows how to dispatch, sorted for binary search.
///
/// Driver-reported instance extensions outside this table are hidden from the
/// application unless the filter is disabled through the environment.
pub const KNOWN_INSTANCE_EXTENSIONS: &[&str] = &[
  "VK_EXT_acquire_drm_display",
  "VK_EXT_acquire_xlib_display",
  "VK_EXT_debug_report",
  "VK_EXT_debug_utils",
  "VK_EXT_direct_mode_display",
  "VK_EXT_directfb_surface",
  "VK_EXT_display_surface_counter",
  "VK_EXT_headless_surface",
  "VK_EXT_layer_settings",
  "VK_EXT_metal_surface",
  "VK_EXT_surface_maintenance1",
  "VK_EXT_swapchain_colorspace",
  "VK_EXT_validation_features",
  "VK_EXT_validation_flags",
  "VK_FUCHSIA_imagepipe_surface",
  "VK_GGP_stream_descriptor_surface",
  "VK_GOOGLE_surfaceless_query",
  "VK_KHR_android_surface",
  "VK_KHR_device_group_creation",
  "VK_KHR_display",
  "VK_KHR_external_fence_capabilities",
  "VK_KHR_external_memory_capabilities",
  "VK_KHR_external_semaphore_capabilities",
  "VK_KHR_get_display_properties2",
  "VK_KHR_get_physical_device_properties2",
  "VK_KHR_get_surface_capabilities2",
  "VK_KHR_portability_enumeration",
  "VK_KHR_surface",
  "VK_KHR_surface_protected_capabilities",
  "VK_KHR_wayland_surface",
  "VK_KHR_win32_surface",
  "VK_KHR_xcb_surface",
  "VK_KHR_xlib_surface",
  "VK_LUNARG_direct_driver_loading",
  "VK_MVK_ios_surface",
  "VK_MVK_macos_surface",
  "VK_NN_vi_surface",
  "VK_NV_external_memory_capabilities",
  "VK_QNX_screen_surface",
];

/// Whether `name` is an instance extension the loader can dispatch.
pub fn is_known_instance_extension(name: &str) -> bool {
  KNOWN_INSTANCE_EXTENSIONS.binary_search(&name).is_ok()
}
