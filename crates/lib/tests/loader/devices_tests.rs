use std::collections::HashSet;

use serde_json::json;
use tracing_test::traced_test;

use vkload_lib::LoaderError;
use vkload_lib::devices::PhysicalDeviceHandle;
use vkload_lib::dispatch::{DeviceCreateInfo, InstanceCreateInfo, NativeHandle, ProcAddr};

use super::common::TestEnv;

fn set(handles: &[PhysicalDeviceHandle]) -> HashSet<PhysicalDeviceHandle> {
  handles.iter().copied().collect()
}

#[test]
fn repeated_enumeration_returns_the_same_handles() {
  let env = TestEnv::new();
  env.add_driver("a", &[]).set_devices(&[1, 2]);
  env.add_driver("b", &[]).set_devices(&[1]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  let first = instance.enumerate_physical_devices().unwrap();
  let second = instance.enumerate_physical_devices().unwrap();

  assert_eq!(first.len(), 3);
  assert_eq!(set(&first), set(&second));
}

#[test]
fn vanished_device_is_released_and_new_one_is_fresh() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  driver.set_devices(&[1, 2]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  let before = instance.enumerate_physical_devices().unwrap();
  let gone = instance.wrapper_of(0, NativeHandle(1)).unwrap();
  let kept = instance.wrapper_of(0, NativeHandle(2)).unwrap();

  driver.set_devices(&[2, 3]);
  let after = instance.enumerate_physical_devices().unwrap();
  let fresh = instance.wrapper_of(0, NativeHandle(3)).unwrap();

  assert!(after.contains(&kept));
  assert!(!after.contains(&gone));
  assert_eq!(instance.native_of(gone), None);
  assert!(!before.contains(&fresh));

  driver.set_devices(&[1, 2, 3]);
  let again = instance.enumerate_physical_devices().unwrap();
  let returned = instance.wrapper_of(0, NativeHandle(1)).unwrap();
  assert!(again.contains(&returned));
  assert_ne!(returned, gone);
}

#[test]
fn native_and_wrapper_round_trip() {
  let env = TestEnv::new();
  env.add_driver("a", &[]).set_devices(&[7, 8]);
  env.add_driver("b", &[]).set_devices(&[7]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  for handle in instance.enumerate_physical_devices().unwrap() {
    let (driver, native) = instance.native_of(handle).unwrap();
    assert_eq!(instance.wrapper_of(driver, native), Some(handle));
  }
  assert_ne!(instance.wrapper_of(0, NativeHandle(7)), instance.wrapper_of(1, NativeHandle(7)));
}

#[test]
fn groups_are_synthesized_without_driver_support() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]).set_devices(&[1, 2]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  let devices = instance.enumerate_physical_devices().unwrap();
  let groups = instance.enumerate_physical_device_groups().unwrap();

  assert_eq!(groups.len(), 2);
  let grouped: Vec<PhysicalDeviceHandle> = groups.iter().flat_map(|g| g.devices.clone()).collect();
  assert_eq!(set(&grouped), set(&devices));
  assert!(groups.iter().all(|g| g.devices.len() == 1));
}

#[test]
fn reported_groups_use_device_handles_and_keep_identity() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  driver.set_devices(&[1, 2, 3]);
  driver.set_groups(&[&[1, 2], &[3]]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();

  let first = instance.enumerate_physical_device_groups().unwrap();
  let second = instance.enumerate_physical_device_groups().unwrap();

  assert_eq!(first.len(), 2);
  let pair = first.iter().find(|g| g.devices.len() == 2).unwrap();
  assert_eq!(
    pair.devices,
    vec![
      instance.wrapper_of(0, NativeHandle(1)).unwrap(),
      instance.wrapper_of(0, NativeHandle(2)).unwrap(),
    ]
  );
  let handles = |groups: &[vkload_lib::devices::PhysicalDeviceGroup]| {
    groups.iter().map(|g| g.handle).collect::<HashSet<_>>()
  };
  assert_eq!(handles(&first), handles(&second));
}

#[test]
fn device_is_created_through_layers_on_the_owning_driver() {
  let env = TestEnv::new();
  env.add_driver("a", &[]).set_devices(&[1]);
  let b = env.add_driver("b", &[]);
  b.set_devices(&[5]);
  let layer = env.add_explicit_layer("VK_LAYER_devices", "1.3.0", json!({}));
  let instance = env
    .loader()
    .create_instance(&InstanceCreateInfo::default().with_layers(["VK_LAYER_devices"]))
    .unwrap();
  instance.enumerate_physical_devices().unwrap();
  let target = instance.wrapper_of(1, NativeHandle(5)).unwrap();

  let device = instance
    .create_device(target, &DeviceCreateInfo::default().with_extensions(["VK_KHR_swapchain"]))
    .unwrap();

  assert_eq!(device.driver_index(), Some(1));
  assert_eq!(device.physical_device(), target);
  assert_eq!(layer.device_creates(), 1);
  assert_eq!(device.chain().links().len(), 1);
  assert_eq!(b.last_device_create().unwrap().enabled_extensions, vec!["VK_KHR_swapchain"]);
  assert_eq!(b.live_devices(), 1);

  drop(device);
  assert_eq!(b.live_devices(), 0);
}

#[test]
fn unsupported_device_extension_fails() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  let physical = instance.enumerate_physical_devices().unwrap()[0];

  let err = instance
    .create_device(physical, &DeviceCreateInfo::default().with_extensions(["VK_EXT_missing"]))
    .unwrap_err();

  assert!(matches!(err, LoaderError::ExtensionNotPresent { ref name } if name == "VK_EXT_missing"));
  assert!(driver.last_device_create().is_none());
}

#[test]
fn layer_device_extension_is_accepted_but_not_forwarded() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  env.add_explicit_layer(
    "VK_LAYER_markers",
    "1.3.0",
    json!({ "device_extensions": [{ "name": "VK_EXT_debug_marker", "spec_version": "4", "entrypoints": ["vkCmdDebugMarkerBeginEXT"] }] }),
  );
  let instance = env
    .loader()
    .create_instance(&InstanceCreateInfo::default().with_layers(["VK_LAYER_markers"]))
    .unwrap();
  let physical = instance.enumerate_physical_devices().unwrap()[0];

  let info = DeviceCreateInfo::default().with_extensions(["VK_EXT_debug_marker", "VK_KHR_swapchain"]);
  instance.create_device(physical, &info).unwrap();

  assert_eq!(driver.last_device_create().unwrap().enabled_extensions, vec!["VK_KHR_swapchain"]);
}

#[test]
fn device_extension_properties_per_driver_and_layer() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer(
    "VK_LAYER_markers",
    "1.3.0",
    json!({ "device_extensions": [{ "name": "VK_EXT_debug_marker", "spec_version": "4" }] }),
  );
  let instance = env
    .loader()
    .create_instance(&InstanceCreateInfo::default().with_layers(["VK_LAYER_markers"]))
    .unwrap();
  let physical = instance.enumerate_physical_devices().unwrap()[0];

  let driver: Vec<String> = instance
    .enumerate_device_extension_properties(physical, None)
    .unwrap()
    .into_iter()
    .map(|e| e.name)
    .collect();
  assert_eq!(driver, vec!["VK_KHR_swapchain"]);

  let layer = instance
    .enumerate_device_extension_properties(physical, Some("VK_LAYER_markers"))
    .unwrap();
  assert_eq!(layer[0].name, "VK_EXT_debug_marker");
  assert_eq!(layer[0].spec_version, 4);

  let err = instance
    .enumerate_device_extension_properties(physical, Some("VK_LAYER_absent"))
    .unwrap_err();
  assert!(matches!(err, LoaderError::LayerNotPresent { .. }));
}

#[test]
fn device_group_members_reach_the_driver_as_native_handles() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  driver.set_devices(&[10, 11]);
  driver.set_groups(&[&[10, 11]]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  let group = instance.enumerate_physical_device_groups().unwrap().remove(0);

  let info = DeviceCreateInfo {
    device_group: Some(group.devices.clone()),
    ..Default::default()
  };
  instance.create_device(group.devices[0], &info).unwrap();

  assert_eq!(
    driver.last_device_create().unwrap().device_group,
    Some(vec![NativeHandle(10), NativeHandle(11)])
  );
}

#[test]
fn device_group_across_drivers_is_rejected() {
  let env = TestEnv::new();
  env.add_driver("a", &[]).set_devices(&[1]);
  env.add_driver("b", &[]).set_devices(&[2]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  let devices = instance.enumerate_physical_devices().unwrap();

  let info = DeviceCreateInfo {
    device_group: Some(devices.clone()),
    ..Default::default()
  };
  let err = instance.create_device(devices[0], &info).unwrap_err();

  assert!(matches!(err, LoaderError::InitializationFailed { .. }));
}

#[test]
fn physical_device_in_use_outlives_its_disappearance() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  driver.set_devices(&[1, 2]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  instance.enumerate_physical_devices().unwrap();
  let busy = instance.wrapper_of(0, NativeHandle(1)).unwrap();
  let device = instance.create_device(busy, &DeviceCreateInfo::default()).unwrap();

  driver.set_devices(&[2]);
  let after = instance.enumerate_physical_devices().unwrap();
  assert!(!after.contains(&busy));
  assert_eq!(instance.native_of(busy), Some((0, NativeHandle(1))));

  drop(device);
  assert_eq!(instance.native_of(busy), None);
}

#[test]
fn failed_device_creation_does_not_hold_the_physical_device() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  driver.set_devices(&[1, 2]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  instance.enumerate_physical_devices().unwrap();
  let target = instance.wrapper_of(0, NativeHandle(1)).unwrap();

  let info = DeviceCreateInfo::default().with_extensions(["VK_EXT_missing"]);
  assert!(instance.create_device(target, &info).is_err());

  driver.set_devices(&[2]);
  instance.enumerate_physical_devices().unwrap();
  assert_eq!(instance.native_of(target), None);
}

#[test]
fn device_outlives_its_instance_handle() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  let physical = instance.enumerate_physical_devices().unwrap()[0];
  let device = instance.create_device(physical, &DeviceCreateInfo::default()).unwrap();

  drop(instance);
  assert_eq!(driver.live_instances(), 1);
  assert_eq!(device.get_device_proc_addr("vkQueueSubmit"), ProcAddr::new(0xd100));

  drop(device);
  assert_eq!(driver.live_devices(), 0);
  assert_eq!(driver.live_instances(), 0);
}

#[test]
fn device_proc_addr_prefers_layers() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_hook", "1.3.0", json!({}));
  env.add_layer_library("VK_LAYER_hook", &[("vkQueueSubmit", 0x300)]);
  let instance = env
    .loader()
    .create_instance(&InstanceCreateInfo::default().with_layers(["VK_LAYER_hook"]))
    .unwrap();
  let physical = instance.enumerate_physical_devices().unwrap()[0];
  let device = instance.create_device(physical, &DeviceCreateInfo::default()).unwrap();

  assert_eq!(device.get_device_proc_addr("vkQueueSubmit"), ProcAddr::new(0x300));
  assert_eq!(device.get_device_proc_addr("vkUnknownDeviceCall"), None);
}

#[test]
#[traced_test]
fn device_layers_differing_from_instance_layers_are_ignored() {
  let env = TestEnv::new();
  let driver = env.add_driver("gpu", &[]);
  env.add_explicit_layer("VK_LAYER_hook", "1.3.0", json!({}));
  let instance = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  let physical = instance.enumerate_physical_devices().unwrap()[0];

  let info = DeviceCreateInfo {
    enabled_layers: vec!["VK_LAYER_hook".to_string()],
    ..Default::default()
  };
  let device = instance.create_device(physical, &info).unwrap();

  assert!(device.chain().links().is_empty());
  assert!(driver.last_device_create().is_some());
  assert!(logs_contain("device layers are deprecated"));
}

#[test]
fn unknown_physical_device_is_rejected() {
  let env = TestEnv::new();
  env.add_driver("gpu", &[]).set_devices(&[1]);
  let first = env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  let second_env = TestEnv::new();
  second_env.add_driver("gpu", &[]).set_devices(&[1, 2]);
  let second = second_env.loader().create_instance(&InstanceCreateInfo::default()).unwrap();
  second.enumerate_physical_devices().unwrap();
  let foreign = second.wrapper_of(0, NativeHandle(2)).unwrap();

  first.enumerate_physical_devices().unwrap();
  let err = first.create_device(foreign, &DeviceCreateInfo::default()).unwrap_err();

  assert!(matches!(err, LoaderError::InitializationFailed { .. }));
}
