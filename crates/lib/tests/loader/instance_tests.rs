use serde_json::json;

use vkload_lib::LoaderError;
use vkload_lib::dispatch::{InstanceCreateInfo, ProcAddr};
use vkload_lib::error::VkResult;
use vkload_lib::filter::NameFilter;
use vkload_lib::version::ApiVersion;

use super::common::{TestEnv, calls};

fn extension_names(extensions: Vec<vkload_lib::manifest::ExtensionProperties>) -> Vec<String> {
  extensions.into_iter().map(|e| e.name).collect()
}

#[test]
fn extensions_are_filtered_per_driver() {
  let env = TestEnv::new();
  let d1 = env.add_driver("d1", &["VK_EXT_x", "VK_KHR_surface"]);
  let d2 = env.add_driver("d2", &["VK_KHR_surface"]);

  let info = InstanceCreateInfo::default().with_extensions(["VK_EXT_x", "VK_KHR_surface"]);
  let instance = env.loader().create_instance(&info).unwrap();

  assert_eq!(instance.driver_count(), 2);
  assert_eq!(d1.created_with(), vec![vec!["VK_EXT_x", "VK_KHR_surface"]]);
  assert_eq!(d2.created_with(), vec![vec!["VK_KHR_surface"]]);
}

#[test]
fn unsupported_extension_fails_before_any_driver_is_called() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &["VK_KHR_surface"]);

  let info = InstanceCreateInfo::default().with_extensions(["VK_KHR_surface", "VK_EXT_unheard_of"]);
  let err = env.loader().create_instance(&info).unwrap_err();

  assert!(matches!(err, LoaderError::ExtensionNotPresent { ref name } if name == "VK_EXT_unheard_of"));
  assert_eq!(err.result(), VkResult::ErrorExtensionNotPresent);
  assert!(driver.created_with().is_empty());
}

#[test]
fn layer_provided_extension_is_not_forwarded_to_drivers() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &["VK_EXT_debug_utils", "VK_KHR_surface"]);
  env.add_explicit_layer(
    "VK_LAYER_debug",
    "1.3.0",
    json!({ "instance_extensions": [{ "name": "VK_EXT_debug_utils", "spec_version": "2" }] }),
  );

  let info = InstanceCreateInfo::default()
    .with_layers(["VK_LAYER_debug"])
    .with_extensions(["VK_EXT_debug_utils", "VK_KHR_surface"]);
  env.loader().create_instance(&info).unwrap();

  assert_eq!(driver.created_with(), vec![vec!["VK_KHR_surface"]]);
}

#[test]
fn layer_extension_requires_its_layer() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer(
    "VK_LAYER_debug",
    "1.3.0",
    json!({ "instance_extensions": [{ "name": "VK_EXT_debug_utils", "spec_version": 2 }] }),
  );

  let info = InstanceCreateInfo::default().with_extensions(["VK_EXT_debug_utils"]);
  let err = env.loader().create_instance(&info).unwrap_err();

  assert!(matches!(err, LoaderError::ExtensionNotPresent { .. }));
}

#[test]
fn portability_drivers_need_opt_in() {
  let env = TestEnv::new();
  let native = env.add_driver("a_native", &["VK_KHR_surface"]);
  let portable = env.add_driver_with(
    "b_portable",
    &["VK_KHR_portability_enumeration"],
    json!({ "api_version": "1.3.0", "is_portability_driver": true }),
  );
  let loader = env.loader();

  let instance = loader.create_instance(&InstanceCreateInfo::default()).unwrap();
  assert_eq!(instance.driver_count(), 1);
  assert!(portable.created_with().is_empty());
  assert_eq!(native.created_with().len(), 1);

  let mut info = InstanceCreateInfo::default().with_extensions(["VK_KHR_portability_enumeration"]);
  info.enumerate_portability = true;
  let instance = loader.create_instance(&info).unwrap();
  assert_eq!(instance.driver_count(), 2);
  assert_eq!(portable.created_with(), vec![vec!["VK_KHR_portability_enumeration"]]);
  assert_eq!(native.created_with().last().unwrap(), &Vec::<String>::new());
}

#[test]
fn only_portability_drivers_without_opt_in_is_incompatible() {
  let env = TestEnv::new();
  env.add_driver_with("portable", &[], json!({ "api_version": "1.3.0", "is_portability_driver": true }));

  let err = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap_err();

  assert!(matches!(err, LoaderError::IncompatibleDriver { .. }));
}

#[test]
fn failing_driver_is_skipped() {
  let env = TestEnv::new();
  let broken = env.add_driver("a_broken", &[]);
  env.add_driver("b_working", &[]);
  broken.fail_create(VkResult::ErrorInitializationFailed);

  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  assert_eq!(instance.driver_count(), 1);
  assert_eq!(broken.live_instances(), 0);
}

#[test]
fn no_surviving_driver_is_incompatible() {
  let env = TestEnv::new();
  env.add_driver("a", &[]).fail_create(VkResult::ErrorIncompatibleDriver);
  env.add_driver("b", &[]).fail_create(VkResult::ErrorInitializationFailed);

  let err = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap_err();

  assert!(matches!(err, LoaderError::IncompatibleDriver { .. }));
  assert_eq!(err.result(), VkResult::ErrorIncompatibleDriver);
}

#[test]
fn out_of_memory_stops_at_the_failing_driver() {
  let env = TestEnv::new();
  env.add_driver("a", &[]).fail_create(VkResult::ErrorOutOfHostMemory);
  let second = env.add_driver("b", &[]);

  let err = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap_err();

  assert!(matches!(err, LoaderError::OutOfMemory));
  assert!(second.created_with().is_empty());
  assert_eq!(calls(&env.log), vec!["driver:a"]);
}

#[test]
fn requested_version_is_lowered_for_1_0_drivers() {
  let env = TestEnv::new();
  let old = env.add_driver_with("a_old", &[], json!({ "api_version": "1.0.61" }));
  let new = env.add_driver("b_new", &[]);

  let info = InstanceCreateInfo::default().with_api_version(ApiVersion::new(1, 3, 0));
  let instance = env.loader().create_instance(&info).unwrap();

  assert_eq!(instance.api_version(), ApiVersion::new(1, 3, 0));
  assert_eq!(old.last_instance_create().unwrap().api_version, ApiVersion::V1_0);
  assert_eq!(new.last_instance_create().unwrap().api_version, ApiVersion::new(1, 3, 0));
}

#[test]
fn drivers_never_see_layer_names() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_app", "1.3.0", json!({}));

  env
    .loader()
    .create_instance(&InstanceCreateInfo::default().with_layers(["VK_LAYER_app"]))
    .unwrap();

  assert!(driver.last_instance_create().unwrap().enabled_layers.is_empty());
}

#[test]
fn driver_select_filter_matches_manifest_names() {
  let mut env = TestEnv::new();
  let a = env.add_driver("a_gpu", &[]);
  let b = env.add_driver("b_gpu", &[]);
  env.settings.drivers_select = NameFilter::parse("b_*");

  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  assert_eq!(instance.driver_count(), 1);
  assert!(a.created_with().is_empty());
  assert_eq!(b.created_with().len(), 1);
}

#[test]
fn driver_disable_filter_yields_to_select() {
  let mut env = TestEnv::new();
  let a = env.add_driver("a_gpu", &[]);
  let b = env.add_driver("b_gpu", &[]);
  env.settings.drivers_disable = NameFilter::parse("~all~");
  env.settings.drivers_select = NameFilter::parse("a_gpu.json");

  env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  assert_eq!(a.created_with().len(), 1);
  assert!(b.created_with().is_empty());
}

#[test]
fn layer_properties_list_every_layer() {
  let env = TestEnv::new();
  env.add_implicit_layer("VK_LAYER_implicit", "1.2.0", json!({ "implementation_version": "7" }));
  env.add_explicit_layer("VK_LAYER_explicit", "1.3.0", json!({}));

  let properties = env.loader().enumerate_instance_layer_properties().unwrap();

  let names: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
  assert_eq!(names, vec!["VK_LAYER_implicit", "VK_LAYER_explicit"]);
  assert_eq!(properties[0].api_version, ApiVersion::new(1, 2, 0));
  assert_eq!(properties[0].implementation_version, 7);
}

#[test]
fn instance_extensions_hide_unknown_driver_extensions() {
  let mut env = TestEnv::new();
  env.add_driver("a", &["VK_KHR_surface", "VK_EXT_vendor_secret"]);
  env.add_driver("b", &["VK_KHR_surface", "VK_KHR_display"]);
  env.add_implicit_layer(
    "VK_LAYER_implicit",
    "1.3.0",
    json!({ "instance_extensions": [{ "name": "VK_EXT_layer_feature", "spec_version": "1" }] }),
  );

  let filtered = extension_names(env.loader().enumerate_instance_extension_properties(None).unwrap());
  assert_eq!(filtered, vec!["VK_KHR_surface", "VK_KHR_display", "VK_EXT_layer_feature"]);

  env.settings.disable_instance_extension_filter = true;
  let unfiltered = extension_names(env.loader().enumerate_instance_extension_properties(None).unwrap());
  assert_eq!(
    unfiltered,
    vec!["VK_KHR_surface", "VK_EXT_vendor_secret", "VK_KHR_display", "VK_EXT_layer_feature"]
  );
}

#[test]
fn layer_instance_extensions_by_name() {
  let env = TestEnv::new();
  env.add_explicit_layer(
    "VK_LAYER_a",
    "1.3.0",
    json!({ "instance_extensions": [{ "name": "VK_EXT_a", "spec_version": "1" }] }),
  );
  env.add_explicit_layer(
    "VK_LAYER_b",
    "1.3.0",
    json!({ "instance_extensions": [{ "name": "VK_EXT_b", "spec_version": "1" }] }),
  );
  env.add_meta_layer("explicit_layer.d", "meta", "VK_LAYER_meta", &["VK_LAYER_a", "VK_LAYER_b"], json!({}));
  let loader = env.loader();

  let direct = extension_names(loader.enumerate_instance_extension_properties(Some("VK_LAYER_a")).unwrap());
  assert_eq!(direct, vec!["VK_EXT_a"]);

  let meta = extension_names(loader.enumerate_instance_extension_properties(Some("VK_LAYER_meta")).unwrap());
  assert_eq!(meta, vec!["VK_EXT_a", "VK_EXT_b"]);

  let err = loader
    .enumerate_instance_extension_properties(Some("VK_LAYER_nope"))
    .unwrap_err();
  assert!(matches!(err, LoaderError::LayerNotPresent { .. }));
}

#[test]
fn driver_set_is_cached_until_reload() {
  let env = TestEnv::new();
  env.add_driver("a", &["VK_KHR_surface"]);
  let loader = env.loader();
  assert_eq!(
    extension_names(loader.enumerate_instance_extension_properties(None).unwrap()),
    vec!["VK_KHR_surface"]
  );

  env.add_driver("b", &["VK_KHR_display"]);
  assert_eq!(
    extension_names(loader.enumerate_instance_extension_properties(None).unwrap()),
    vec!["VK_KHR_surface"]
  );

  loader.reload_drivers();
  assert_eq!(
    extension_names(loader.enumerate_instance_extension_properties(None).unwrap()),
    vec!["VK_KHR_surface", "VK_KHR_display"]
  );
}

#[test]
fn loader_tracks_live_instances() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  let loader = env.loader();

  let first = loader.create_instance(&InstanceCreateInfo::default()).unwrap();
  let second = loader.create_instance(&InstanceCreateInfo::default()).unwrap();
  assert_eq!(loader.instance_count(), 2);
  assert_ne!(first.id(), second.id());
  assert_eq!(driver.live_instances(), 2);

  drop(first);
  assert_eq!(loader.instance_count(), 1);
  assert_eq!(driver.live_instances(), 1);

  loader.teardown();
  drop(second);
  assert_eq!(loader.instance_count(), 0);
  assert_eq!(driver.live_instances(), 0);
}

#[test]
fn loader_reports_its_api_version() {
  let env = TestEnv::new();
  assert_eq!(env.loader().enumerate_instance_version(), ApiVersion::new(1, 3, 0));
}

#[test]
fn instance_proc_addr_walks_layers_then_drivers() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_outer", "1.3.0", json!({}));
  env.add_explicit_layer("VK_LAYER_inner", "1.3.0", json!({}));
  env.add_layer_library(
    "VK_LAYER_outer",
    &[("vkCreateDebugThing", 0x100), ("vkGetPhysicalDeviceThing", 0x110)],
  );
  env.add_layer_library("VK_LAYER_inner", &[("vkCreateDebugThing", 0x200), ("vkInnerOnly", 0x210)]);

  let instance = env
    .loader()
    .create_instance(&InstanceCreateInfo::default().with_layers(["VK_LAYER_outer", "VK_LAYER_inner"]))
    .unwrap();

  assert_eq!(instance.get_instance_proc_addr("vkCreateDebugThing"), ProcAddr::new(0x100));
  assert_eq!(instance.get_instance_proc_addr("vkInnerOnly"), ProcAddr::new(0x210));
  assert_eq!(instance.get_instance_proc_addr("vkDriverThing"), ProcAddr::new(0xd000));
  assert_eq!(instance.get_instance_proc_addr("vkNobodyHasThis"), None);
  assert_eq!(
    instance.get_physical_device_proc_addr("vkGetPhysicalDeviceThing"),
    ProcAddr::new(0x110)
  );
}

#[test]
fn layers_are_loaded_from_their_libraries_once_per_instance() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_implicit_layer("VK_LAYER_a", "1.3.0", json!({}));
  env.add_implicit_layer("VK_LAYER_b", "1.3.0", json!({}));
  let loader = env.loader();

  let _instance = loader.create_instance(&InstanceCreateInfo::default()).unwrap();

  assert_eq!(env.libraries.layer_opens.load(std::sync::atomic::Ordering::SeqCst), 2);
}
