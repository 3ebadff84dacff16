//! Shared fixtures: in-memory drivers and layers behind manifests written to
//! a temporary search root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde_json::{Value, json};
use tempfile::TempDir;

use vkload_lib::Loader;
use vkload_lib::LoaderConfig;
use vkload_lib::devices::PhysicalDeviceHandle;
use vkload_lib::discovery::SearchPathFinder;
use vkload_lib::dispatch::{
  CreatedDevice, CreatedInstance, DeviceCreateInfo, DeviceLayer, DeviceProcResolver, DriverDeviceCreateInfo,
  DriverLibrary, Icd, IcdDevice, IcdInstance, InstanceCreateInfo, InstanceLayer, InstanceProcResolver, LayerLibrary,
  LibraryError, LibraryLoader, NativeGroup, NativeHandle, NegotiatedLayer, NextDevice, NextInstance, ProcAddr,
};
use vkload_lib::error::{LoaderError, VkResult};
use vkload_lib::manifest::ExtensionProperties;
use vkload_lib::registry::AppContext;
use vkload_lib::settings::LoaderSettings;

/// Executable path the test loaders pretend to run as.
pub const APP_EXE: &str = "/opt/app/bin/game";

/// Order in which layers and drivers saw creation calls.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &CallLog) -> Vec<String> {
  log.lock().unwrap().clone()
}

#[derive(Default)]
pub struct DriverState {
  pub name: String,
  pub extensions: Vec<ExtensionProperties>,
  pub device_extensions: Vec<ExtensionProperties>,
  pub devices: Mutex<Vec<u64>>,
  pub groups: Mutex<Option<Vec<Vec<u64>>>>,
  pub create_error: Mutex<Option<VkResult>>,
  pub instance_creates: Mutex<Vec<InstanceCreateInfo>>,
  pub device_creates: Mutex<Vec<DriverDeviceCreateInfo>>,
  pub live_devices: AtomicUsize,
  pub live_instances: AtomicUsize,
  log: CallLog,
}

/// A driver library and its entry points.
#[derive(Clone)]
pub struct FakeDriver {
  pub state: Arc<DriverState>,
}

impl FakeDriver {
  pub fn set_devices(&self, natives: &[u64]) {
    *self.state.devices.lock().unwrap() = natives.to_vec();
  }

  pub fn set_groups(&self, groups: &[&[u64]]) {
    *self.state.groups.lock().unwrap() = Some(groups.iter().map(|g| g.to_vec()).collect());
  }

  pub fn fail_create(&self, code: VkResult) {
    *self.state.create_error.lock().unwrap() = Some(code);
  }

  /// Extensions passed to each `create_instance` call, in call order.
  pub fn created_with(&self) -> Vec<Vec<String>> {
    let creates = self.state.instance_creates.lock().unwrap();
    creates.iter().map(|info| info.enabled_extensions.clone()).collect()
  }

  pub fn last_instance_create(&self) -> Option<InstanceCreateInfo> {
    self.state.instance_creates.lock().unwrap().last().cloned()
  }

  pub fn last_device_create(&self) -> Option<DriverDeviceCreateInfo> {
    self.state.device_creates.lock().unwrap().last().cloned()
  }

  pub fn live_devices(&self) -> usize {
    self.state.live_devices.load(Ordering::SeqCst)
  }

  pub fn live_instances(&self) -> usize {
    self.state.live_instances.load(Ordering::SeqCst)
  }

  fn proc_addr(&self, name: &str) -> Option<ProcAddr> {
    (name.starts_with("vk") && name.contains("Driver")).then(|| ProcAddr::new(0xd000)).flatten()
  }
}

impl DriverLibrary for FakeDriver {
  fn negotiate_interface_version(&self, max_version: u32) -> Option<Result<u32, VkResult>> {
    Some(Ok(max_version.min(5)))
  }

  fn has_symbol(&self, _symbol: &str) -> bool {
    false
  }

  fn icd(&self, _interface_version: u32) -> Option<Arc<dyn Icd>> {
    Some(Arc::new(self.clone()))
  }
}

impl Icd for FakeDriver {
  fn enumerate_instance_extension_properties(&self) -> Result<Vec<ExtensionProperties>, VkResult> {
    Ok(self.state.extensions.clone())
  }

  fn create_instance(&self, info: &InstanceCreateInfo) -> Result<Box<dyn IcdInstance>, VkResult> {
    self.state.log.lock().unwrap().push(format!("driver:{}", self.state.name));
    self.state.instance_creates.lock().unwrap().push(info.clone());
    if let Some(code) = *self.state.create_error.lock().unwrap() {
      return Err(code);
    }
    self.state.live_instances.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(FakeDriverInstance {
      driver: self.clone(),
    }))
  }

  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self.proc_addr(name)
  }
}

struct FakeDriverInstance {
  driver: FakeDriver,
}

impl InstanceProcResolver for FakeDriverInstance {
  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self.driver.proc_addr(name)
  }
}

impl IcdInstance for FakeDriverInstance {
  fn enumerate_physical_devices(&self) -> Result<Vec<NativeHandle>, VkResult> {
    Ok(self.driver.state.devices.lock().unwrap().iter().copied().map(NativeHandle).collect())
  }

  fn enumerate_physical_device_groups(&self) -> Option<Result<Vec<NativeGroup>, VkResult>> {
    let groups = self.driver.state.groups.lock().unwrap();
    groups.as_ref().map(|groups| {
      Ok(
        groups
          .iter()
          .map(|members| NativeGroup {
            devices: members.iter().copied().map(NativeHandle).collect(),
            subset_allocation: false,
          })
          .collect(),
      )
    })
  }

  fn enumerate_device_extension_properties(&self, _device: NativeHandle) -> Result<Vec<ExtensionProperties>, VkResult> {
    Ok(self.driver.state.device_extensions.clone())
  }

  fn create_device(&self, _device: NativeHandle, info: &DriverDeviceCreateInfo) -> Result<Box<dyn IcdDevice>, VkResult> {
    self.driver.state.device_creates.lock().unwrap().push(info.clone());
    self.driver.state.live_devices.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(FakeDriverDevice {
      driver: self.driver.clone(),
    }))
  }
}

impl Drop for FakeDriverInstance {
  fn drop(&mut self) {
    self.driver.state.live_instances.fetch_sub(1, Ordering::SeqCst);
  }
}

struct FakeDriverDevice {
  driver: FakeDriver,
}

impl IcdDevice for FakeDriverDevice {
  fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    (name == "vkQueueSubmit").then(|| ProcAddr::new(0xd100)).flatten()
  }
}

impl Drop for FakeDriverDevice {
  fn drop(&mut self) {
    self.driver.state.live_devices.fetch_sub(1, Ordering::SeqCst);
  }
}

pub struct LayerState {
  pub name: String,
  /// Entry points the layer intercepts, with their addresses.
  pub entry_points: HashMap<String, usize>,
  pub negotiates: bool,
  pub device_creates: AtomicUsize,
  log: CallLog,
}

/// A layer library exposing both instance and device entry points.
#[derive(Clone)]
pub struct FakeLayer {
  pub state: Arc<LayerState>,
}

impl FakeLayer {
  pub fn device_creates(&self) -> usize {
    self.state.device_creates.load(Ordering::SeqCst)
  }

  fn lookup(&self, name: &str) -> Option<ProcAddr> {
    self.state.entry_points.get(name).and_then(|addr| ProcAddr::new(*addr))
  }
}

impl LayerLibrary for FakeLayer {
  fn negotiate_interface(&self, _symbol: &str, loader_version: u32) -> Option<Result<NegotiatedLayer, VkResult>> {
    if !self.state.negotiates {
      return None;
    }
    Some(Ok(NegotiatedLayer {
      interface_version: loader_version.min(2),
      instance: Some(Arc::new(self.clone())),
      device: Some(Arc::new(self.clone())),
    }))
  }

  fn instance_entry(&self, _symbol: &str) -> Option<Arc<dyn InstanceLayer>> {
    Some(Arc::new(self.clone()))
  }

  fn device_entry(&self, _symbol: &str) -> Option<Arc<dyn DeviceLayer>> {
    Some(Arc::new(self.clone()))
  }
}

impl InstanceProcResolver for FakeLayer {
  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self.lookup(name)
  }

  fn get_physical_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    name.starts_with("vkGetPhysicalDevice").then(|| self.lookup(name)).flatten()
  }
}

impl InstanceLayer for FakeLayer {
  fn create_instance(&self, info: &InstanceCreateInfo, next: &dyn NextInstance) -> Result<CreatedInstance, LoaderError> {
    self.state.log.lock().unwrap().push(format!("layer:{}", self.state.name));
    next.create_instance(info)
  }
}

impl DeviceProcResolver for FakeLayer {
  fn get_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self.lookup(name)
  }
}

impl DeviceLayer for FakeLayer {
  fn create_device(
    &self,
    physical_device: PhysicalDeviceHandle,
    info: &DeviceCreateInfo,
    next: &dyn NextDevice,
  ) -> Result<CreatedDevice, LoaderError> {
    self.state.device_creates.fetch_add(1, Ordering::SeqCst);
    next.create_device(physical_device, info)
  }
}

/// Hands out the fake libraries registered by library path.
#[derive(Default)]
pub struct FakeLibraries {
  layers: Mutex<HashMap<PathBuf, FakeLayer>>,
  drivers: Mutex<HashMap<PathBuf, FakeDriver>>,
  pub layer_opens: AtomicUsize,
}

impl LibraryLoader for FakeLibraries {
  fn open_layer(&self, path: &Path) -> Result<Arc<dyn LayerLibrary>, LibraryError> {
    self.layer_opens.fetch_add(1, Ordering::SeqCst);
    match self.layers.lock().unwrap().get(path) {
      Some(layer) => Ok(Arc::new(layer.clone())),
      None => Err(LibraryError::NotFound {
        path: path.to_path_buf(),
      }),
    }
  }

  fn open_driver(&self, path: &Path) -> Result<Arc<dyn DriverLibrary>, LibraryError> {
    match self.drivers.lock().unwrap().get(path) {
      Some(driver) => Ok(Arc::new(driver.clone())),
      None => Err(LibraryError::NotFound {
        path: path.to_path_buf(),
      }),
    }
  }
}

/// Isolated loader environment.
///
/// Manifests are written under `<temp>/vulkan/{icd.d,implicit_layer.d,explicit_layer.d}`.
pub struct TestEnv {
  pub temp: TempDir,
  pub libraries: Arc<FakeLibraries>,
  pub settings: LoaderSettings,
  pub context: AppContext,
  pub log: CallLog,
}

impl TestEnv {
  pub fn new() -> Self {
    let now = NaiveDate::from_ymd_opt(2025, 6, 1)
      .and_then(|d| d.and_hms_opt(12, 0, 0))
      .unwrap();
    Self {
      temp: TempDir::new().unwrap(),
      libraries: Arc::new(FakeLibraries::default()),
      settings: LoaderSettings::default(),
      context: AppContext::new(Some(PathBuf::from(APP_EXE)), now),
      log: CallLog::default(),
    }
  }

  pub fn loader(&self) -> Loader {
    Loader::new(LoaderConfig {
      settings: self.settings.clone(),
      finder: Arc::new(SearchPathFinder::with_roots(vec![self.temp.path().to_path_buf()])),
      libraries: self.libraries.clone(),
      ordering: None,
      context: self.context.clone(),
    })
  }

  /// Write a manifest relative to `<temp>/vulkan`.
  pub fn write_manifest(&self, relative: &str, manifest: &Value) -> PathBuf {
    let path = self.temp.path().join("vulkan").join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, serde_json::to_string_pretty(manifest).unwrap()).unwrap();
    path
  }

  /// A driver reporting API 1.3 and the given instance extensions.
  pub fn add_driver(&self, name: &str, extensions: &[&str]) -> FakeDriver {
    self.add_driver_with(name, extensions, json!({ "api_version": "1.3.0" }))
  }

  /// A driver whose manifest `ICD` object is extended with `extra`.
  pub fn add_driver_with(&self, name: &str, extensions: &[&str], extra: Value) -> FakeDriver {
    let library = format!("lib{name}.so");
    let mut icd = json!({ "library_path": library });
    merge(&mut icd, extra);
    self.write_manifest(
      &format!("icd.d/{name}.json"),
      &json!({ "file_format_version": "1.0.1", "ICD": icd }),
    );

    let driver = FakeDriver {
      state: Arc::new(DriverState {
        name: name.to_string(),
        extensions: extensions.iter().map(|e| ExtensionProperties::new(*e, 1)).collect(),
        device_extensions: vec![ExtensionProperties::new("VK_KHR_swapchain", 70)],
        devices: Mutex::new(vec![1]),
        log: Arc::clone(&self.log),
        ..Default::default()
      }),
    };
    self
      .libraries
      .drivers
      .lock()
      .unwrap()
      .insert(PathBuf::from(library), driver.clone());
    driver
  }

  /// An implicit layer manifest plus its library.
  pub fn add_implicit_layer(&self, name: &str, api_version: &str, extra: Value) -> FakeLayer {
    self.add_layer("implicit_layer.d", name, api_version, extra)
  }

  /// An explicit layer manifest plus its library.
  pub fn add_explicit_layer(&self, name: &str, api_version: &str, extra: Value) -> FakeLayer {
    self.add_layer("explicit_layer.d", name, api_version, extra)
  }

  /// Register a layer library without writing a manifest for it.
  pub fn add_layer_library(&self, name: &str, entry_points: &[(&str, usize)]) -> FakeLayer {
    let layer = FakeLayer {
      state: Arc::new(LayerState {
        name: name.to_string(),
        entry_points: entry_points.iter().map(|(n, a)| (n.to_string(), *a)).collect(),
        negotiates: true,
        device_creates: AtomicUsize::new(0),
        log: Arc::clone(&self.log),
      }),
    };
    self
      .libraries
      .layers
      .lock()
      .unwrap()
      .insert(PathBuf::from(format!("lib{name}.so")), layer.clone());
    layer
  }

  /// A meta-layer manifest in `subdir`.
  pub fn add_meta_layer(&self, subdir: &str, file: &str, name: &str, components: &[&str], extra: Value) -> PathBuf {
    let mut layer = json!({
      "name": name,
      "type": "GLOBAL",
      "api_version": "1.3.0",
      "implementation_version": "1",
      "description": "meta-layer",
      "component_layers": components,
    });
    merge(&mut layer, extra);
    self.write_manifest(
      &format!("{subdir}/{file}.json"),
      &json!({ "file_format_version": "1.2.0", "layer": layer }),
    )
  }

  fn add_layer(&self, subdir: &str, name: &str, api_version: &str, extra: Value) -> FakeLayer {
    let mut layer = json!({
      "name": name,
      "type": "GLOBAL",
      "library_path": format!("lib{name}.so"),
      "api_version": api_version,
      "implementation_version": "1",
      "description": format!("{name} test layer"),
    });
    merge(&mut layer, extra);
    self.write_manifest(
      &format!("{subdir}/{name}.json"),
      &json!({ "file_format_version": "1.2.0", "layer": layer }),
    );
    self.add_layer_library(name, &[])
  }
}

fn merge(target: &mut Value, extra: Value) {
  if let (Some(target), Value::Object(extra)) = (target.as_object_mut(), extra) {
    target.extend(extra);
  }
}

pub fn names(layers: &[vkload_lib::activation::ActivatedLayer]) -> Vec<&str> {
  layers.iter().map(|l| l.name()).collect()
}
