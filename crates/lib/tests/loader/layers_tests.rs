use serde_json::json;
use tracing_test::traced_test;

use vkload_lib::LoaderError;
use vkload_lib::dispatch::InstanceCreateInfo;
use vkload_lib::filter::NameFilter;
use vkload_lib::version::ApiVersion;

use super::common::{APP_EXE, TestEnv, calls, names};

fn app_layers(layers: &[&str]) -> InstanceCreateInfo {
  InstanceCreateInfo::default().with_layers(layers.iter().copied())
}

/// Two override layers: one keyed to `keyed_app`, one global. Each lists a
/// single component so the selected one can be told apart.
fn write_overrides(env: &TestEnv, keyed_app: &str, keyed_component: &str, global_component: &str) {
  env.add_explicit_layer(keyed_component, "1.3.0", json!({}));
  env.add_explicit_layer(global_component, "1.3.0", json!({}));
  env.add_meta_layer(
    "implicit_layer.d",
    "a_global_override",
    "VK_LAYER_LUNARG_override",
    &[global_component],
    json!({ "disable_environment": { "VKLOAD_TEST_DISABLE_OVERRIDE": "1" } }),
  );
  env.add_meta_layer(
    "implicit_layer.d",
    "b_keyed_override",
    "VK_LAYER_LUNARG_override",
    &[keyed_component],
    json!({ "app_keys": [keyed_app], "disable_environment": { "VKLOAD_TEST_DISABLE_OVERRIDE": "1" } }),
  );
}

#[test]
fn app_layers_are_wired_in_request_order() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_first", "1.3.0", json!({}));
  env.add_explicit_layer("VK_LAYER_second", "1.3.0", json!({}));

  let instance = env
    .loader()
    .create_instance(&app_layers(&["VK_LAYER_first", "VK_LAYER_second"]))
    .unwrap();

  assert_eq!(instance.chain().layer_names(), vec!["VK_LAYER_first", "VK_LAYER_second"]);
  assert_eq!(
    calls(&env.log),
    vec!["layer:VK_LAYER_first", "layer:VK_LAYER_second", "driver:gpu"]
  );
}

#[test]
fn implicit_layers_sit_outside_app_layers() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_implicit_layer("VK_LAYER_implicit", "1.3.0", json!({}));
  env.add_explicit_layer("VK_LAYER_app", "1.3.0", json!({}));

  let instance = env.loader().create_instance(&app_layers(&["VK_LAYER_app"])).unwrap();

  assert_eq!(names(instance.activation().expanded()), vec!["VK_LAYER_implicit", "VK_LAYER_app"]);
  assert_eq!(names(instance.activation().app_list()), vec!["VK_LAYER_app"]);
}

#[test]
fn meta_layer_expands_to_components_without_itself() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_a", "1.3.0", json!({}));
  env.add_explicit_layer("VK_LAYER_b", "1.3.0", json!({}));
  env.add_explicit_layer("VK_LAYER_c", "1.3.0", json!({}));
  env.add_meta_layer("explicit_layer.d", "meta", "VK_LAYER_meta", &["VK_LAYER_a", "VK_LAYER_b"], json!({}));
  env.add_meta_layer(
    "explicit_layer.d",
    "outer",
    "VK_LAYER_outer",
    &["VK_LAYER_meta", "VK_LAYER_c", "VK_LAYER_a"],
    json!({}),
  );

  let instance = env.loader().create_instance(&app_layers(&["VK_LAYER_outer"])).unwrap();

  let expanded = names(instance.activation().expanded());
  assert_eq!(expanded, vec!["VK_LAYER_a", "VK_LAYER_b", "VK_LAYER_c"]);
  assert!(!expanded.contains(&"VK_LAYER_outer"));
  assert!(!expanded.contains(&"VK_LAYER_meta"));
  assert_eq!(names(instance.activation().app_list()), vec!["VK_LAYER_outer"]);
}

#[test]
fn cyclic_meta_layers_are_removed() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_a", "1.3.0", json!({}));
  env.add_meta_layer("explicit_layer.d", "x", "VK_LAYER_x", &["VK_LAYER_y"], json!({}));
  env.add_meta_layer("explicit_layer.d", "y", "VK_LAYER_y", &["VK_LAYER_x", "VK_LAYER_a"], json!({}));
  env.add_meta_layer("explicit_layer.d", "z", "VK_LAYER_z", &["VK_LAYER_y"], json!({}));

  let loader = env.loader();
  let available: Vec<String> = loader
    .enumerate_instance_layer_properties()
    .unwrap()
    .into_iter()
    .map(|p| p.name)
    .collect();
  assert_eq!(available, vec!["VK_LAYER_a"]);

  let err = loader.create_instance(&app_layers(&["VK_LAYER_z"])).unwrap_err();
  assert!(matches!(err, LoaderError::LayerNotPresent { ref name } if name == "VK_LAYER_z"));
}

#[test]
fn missing_app_layer_fails_creation() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);

  let err = env
    .loader()
    .create_instance(&app_layers(&["VK_LAYER_missing"]))
    .unwrap_err();

  assert!(matches!(err, LoaderError::LayerNotPresent { ref name } if name == "VK_LAYER_missing"));
  assert!(driver.created_with().is_empty());
}

#[test]
fn missing_environment_layer_is_skipped() {
  let mut env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_present", "1.3.0", json!({}));
  env.settings.instance_layers = vec!["VK_LAYER_missing".to_string(), "VK_LAYER_present".to_string()];

  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  assert_eq!(names(instance.activation().expanded()), vec!["VK_LAYER_present"]);
  assert!(instance.activation().app_list().is_empty());
}

#[test]
#[traced_test]
fn app_layer_whose_library_fails_to_load_fails_creation() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.write_manifest(
    "explicit_layer.d/ghost.json",
    &json!({
      "file_format_version": "1.2.0",
      "layer": {
        "name": "VK_LAYER_ghost", "type": "GLOBAL", "library_path": "libVK_LAYER_ghost_gone.so",
        "api_version": "1.3.0", "implementation_version": "1", "description": "no library"
      }
    }),
  );

  let err = env.loader().create_instance(&app_layers(&["VK_LAYER_ghost"])).unwrap_err();

  assert!(matches!(err, LoaderError::LayerNotPresent { ref name } if name == "VK_LAYER_ghost"));
  assert!(logs_contain("requested layer failed to load"));
}

#[test]
#[traced_test]
fn implicit_layer_whose_library_fails_to_load_is_skipped() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.write_manifest(
    "implicit_layer.d/ghost.json",
    &json!({
      "file_format_version": "1.2.0",
      "layer": {
        "name": "VK_LAYER_ghost", "type": "GLOBAL", "library_path": "libVK_LAYER_ghost_gone.so",
        "api_version": "1.3.0", "implementation_version": "1", "description": "no library",
        "disable_environment": { "VKLOAD_TEST_DISABLE_GHOST": "1" }
      }
    }),
  );

  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  assert!(instance.activation().contains("VK_LAYER_ghost"));
  assert!(instance.chain().layer_names().is_empty());
  assert!(logs_contain("skipping layer that failed to load"));
}

#[test]
#[traced_test]
fn implicit_layer_api_version_gates_activation() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_implicit_layer("LAYER_A", "1.2.0", json!({}));
  let loader = env.loader();

  let older = InstanceCreateInfo::default().with_api_version(ApiVersion::new(1, 1, 0));
  let instance = loader.create_instance(&older).unwrap();
  assert!(instance.activation().contains("LAYER_A"));
  drop(instance);
  assert!(!logs_contain("older API version"));

  let newer = InstanceCreateInfo::default().with_api_version(ApiVersion::new(1, 3, 0));
  let instance = loader.create_instance(&newer).unwrap();
  assert!(!instance.activation().contains("LAYER_A"));
  assert!(logs_contain("older API version"));
}

#[test]
fn app_keyed_override_wins_over_global() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  write_overrides(&env, APP_EXE, "VK_LAYER_for_app", "VK_LAYER_for_all");

  let loader = env.loader();
  let instance = loader.create_instance(&InstanceCreateInfo::default()).unwrap();

  assert!(instance.activation().contains("VK_LAYER_for_app"));
  assert!(!instance.activation().contains("VK_LAYER_for_all"));

  let overrides = loader
    .enumerate_instance_layer_properties()
    .unwrap()
    .into_iter()
    .filter(|p| p.name == "VK_LAYER_LUNARG_override")
    .count();
  assert_eq!(overrides, 1);
}

#[test]
fn global_override_applies_when_app_key_names_another_program() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  write_overrides(&env, "/opt/other/bin/tool", "VK_LAYER_for_app", "VK_LAYER_for_all");

  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  assert!(instance.activation().contains("VK_LAYER_for_all"));
  assert!(!instance.activation().contains("VK_LAYER_for_app"));
}

#[test]
fn swapping_override_roles_swaps_the_selection() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  write_overrides(&env, APP_EXE, "VK_LAYER_second", "VK_LAYER_first");
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  assert_eq!(names(instance.activation().expanded()), vec!["VK_LAYER_second"]);

  let swapped = TestEnv::new();
  swapped.add_driver("gpu", &[]);
  write_overrides(&swapped, APP_EXE, "VK_LAYER_first", "VK_LAYER_second");
  let instance = swapped.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  assert_eq!(names(instance.activation().expanded()), vec!["VK_LAYER_first"]);
}

#[test]
fn blacklisted_layer_is_never_activated() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_keep", "1.3.0", json!({}));
  env.add_explicit_layer("VK_LAYER_banned", "1.3.0", json!({}));
  env.add_meta_layer(
    "implicit_layer.d",
    "override",
    "VK_LAYER_LUNARG_override",
    &["VK_LAYER_keep"],
    json!({
      "blacklisted_layers": ["VK_LAYER_banned"],
      "disable_environment": { "VKLOAD_TEST_DISABLE_OVERRIDE": "1" }
    }),
  );

  let instance = env.loader().create_instance(&app_layers(&["VK_LAYER_banned"])).unwrap();

  assert!(!instance.activation().contains("VK_LAYER_banned"));
  assert!(instance.activation().contains("VK_LAYER_keep"));
  assert!(!calls(&env.log).contains(&"layer:VK_LAYER_banned".to_string()));
}

#[test]
fn override_paths_restrict_explicit_layer_search() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_hidden", "1.3.0", json!({}));
  env.write_manifest(
    "override_dir/VK_LAYER_visible.json",
    &json!({
      "file_format_version": "1.2.0",
      "layer": {
        "name": "VK_LAYER_visible", "type": "GLOBAL", "library_path": "libVK_LAYER_visible.so",
        "api_version": "1.3.0", "implementation_version": "1", "description": "only in the override path"
      }
    }),
  );
  env.add_layer_library("VK_LAYER_visible", &[]);
  let override_dir = env.temp.path().join("vulkan").join("override_dir");
  env.add_meta_layer(
    "implicit_layer.d",
    "override",
    "VK_LAYER_LUNARG_override",
    &["VK_LAYER_visible"],
    json!({
      "override_paths": [override_dir],
      "disable_environment": { "VKLOAD_TEST_DISABLE_OVERRIDE": "1" }
    }),
  );

  let loader = env.loader();
  let available: Vec<String> = loader
    .enumerate_instance_layer_properties()
    .unwrap()
    .into_iter()
    .map(|p| p.name)
    .collect();
  assert!(available.contains(&"VK_LAYER_visible".to_string()));
  assert!(!available.contains(&"VK_LAYER_hidden".to_string()));

  let instance = loader.create_instance(&InstanceCreateInfo::default()).unwrap();
  assert_eq!(instance.chain().layer_names(), vec!["VK_LAYER_visible"]);
}

#[test]
fn disable_filter_drops_implicit_and_requested_layers() {
  let mut env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_implicit_layer("VK_LAYER_noisy_implicit", "1.3.0", json!({}));
  env.add_explicit_layer("VK_LAYER_noisy_explicit", "1.3.0", json!({}));
  env.add_explicit_layer("VK_LAYER_quiet", "1.3.0", json!({}));
  env.settings.layers_disable = NameFilter::parse("*noisy*");

  let instance = env
    .loader()
    .create_instance(&app_layers(&["VK_LAYER_noisy_explicit", "VK_LAYER_quiet"]))
    .unwrap();

  assert_eq!(names(instance.activation().expanded()), vec!["VK_LAYER_quiet"]);
}

#[test]
fn enable_filter_overrides_disable_filter() {
  let mut env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_implicit_layer("VK_LAYER_one", "1.3.0", json!({}));
  env.add_implicit_layer("VK_LAYER_two", "1.3.0", json!({}));
  env.add_explicit_layer("VK_LAYER_three", "1.3.0", json!({}));
  env.settings.layers_disable = NameFilter::parse("~all~");
  env.settings.layers_enable = NameFilter::parse("VK_LAYER_two,VK_LAYER_three");

  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  assert_eq!(names(instance.activation().expanded()), vec!["VK_LAYER_two", "VK_LAYER_three"]);
}

#[test]
fn expired_implicit_layer_is_not_activated() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_implicit_layer("VK_LAYER_stale", "1.3.0", json!({ "expiration_date": "2020-01-01-00-00" }));
  env.add_implicit_layer("VK_LAYER_fresh", "1.3.0", json!({ "expiration_date": "2099-01-01-00-00" }));

  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  assert_eq!(names(instance.activation().expanded()), vec!["VK_LAYER_fresh"]);
}

#[test]
fn first_definition_of_a_layer_name_wins() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_dup", "1.3.0", json!({ "description": "first" }));
  env.write_manifest(
    "explicit_layer.d/z_dup.json",
    &json!({
      "file_format_version": "1.2.0",
      "layer": {
        "name": "VK_LAYER_dup", "type": "GLOBAL", "library_path": "libVK_LAYER_dup.so",
        "api_version": "1.3.0", "implementation_version": "2", "description": "second"
      }
    }),
  );

  let properties = env.loader().enumerate_instance_layer_properties().unwrap();

  assert_eq!(properties.len(), 1);
  assert_eq!(properties[0].description, "first");
}
