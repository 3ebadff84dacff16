use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::activation::{ActivationList, is_valid_layer_name};
use crate::consts::PORTABILITY_ENUMERATION_EXTENSION;
use crate::dispatch::{
  CreatedInstance, IcdInstance, InstanceCreateInfo, LibraryLoader, NextInstance, ProcAddr,
};
use crate::driver::{DriverRecord, DriverSet};
use crate::error::{LoaderError, try_reserve};
use crate::settings::LoaderSettings;
use crate::version::ApiVersion;

use super::negotiate::{LoadedLayer, load_layer};

/// Collaborators used while building chains.
#[derive(Clone, Copy)]
pub struct ChainContext<'a> {
  pub libraries: &'a dyn LibraryLoader,
  pub settings: &'a LoaderSettings,
}

/// A driver that created an instance.
pub struct DriverInstance {
  // Declared first so the driver instance is destroyed while the driver
  // record still holds its library open.
  pub(crate) instance: Box<dyn IcdInstance>,
  pub(crate) index: usize,
  pub(crate) driver: Arc<DriverRecord>,
}

impl fmt::Debug for DriverInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DriverInstance")
      .field("index", &self.index)
      .field("driver", &self.driver)
      .finish_non_exhaustive()
  }
}

impl DriverInstance {
  /// Position of the driver in the driver set the instance was created from.
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn driver(&self) -> &Arc<DriverRecord> {
    &self.driver
  }

  pub fn instance(&self) -> &dyn IcdInstance {
    self.instance.as_ref()
  }
}

/// The layers of an instance chain, outermost first.
pub struct InstanceChain {
  links: Vec<LoadedLayer>,
  keep_loaded: bool,
}

impl fmt::Debug for InstanceChain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(&self.links).finish()
  }
}

impl InstanceChain {
  pub fn links(&self) -> &[LoadedLayer] {
    &self.links
  }

  pub fn layer_names(&self) -> Vec<&str> {
    self.links.iter().map(LoadedLayer::name).collect()
  }

  pub(crate) fn keep_loaded(&self) -> bool {
    self.keep_loaded
  }

  /// The outermost layer that resolves `name`.
  pub fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self
      .links
      .iter()
      .filter_map(|link| link.instance.as_ref())
      .find_map(|layer| layer.get_instance_proc_addr(name))
  }

  /// The outermost layer that resolves the physical-device entry point `name`.
  pub fn get_physical_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self
      .links
      .iter()
      .filter_map(|link| link.instance.as_ref())
      .find_map(|layer| layer.get_physical_device_proc_addr(name))
  }
}

impl Drop for InstanceChain {
  fn drop(&mut self) {
    if self.keep_loaded {
      for link in &self.links {
        std::mem::forget(Arc::clone(&link.library));
      }
    }
  }
}

/// A successfully created instance chain.
#[derive(Debug)]
pub struct BuiltInstance {
  pub chain: InstanceChain,
  pub created: CreatedInstance,
}

/// Load the activated layers and create an instance through them.
pub fn build_instance_chain(
  activation: &ActivationList,
  drivers: &DriverSet,
  info: &InstanceCreateInfo,
  ctx: ChainContext<'_>,
) -> Result<BuiltInstance, LoaderError> {
  validate_extensions(activation, drivers, info)?;

  let links = load_links(activation, ctx.libraries)?;
  verify_inserted(activation, &links);

  let terminator = InstanceTerminator { activation, drivers };
  let next = InstanceNext {
    links: &links,
    terminator: &terminator,
  };
  let created = next.create_instance(info)?;

  Ok(BuiltInstance {
    chain: InstanceChain {
      links,
      keep_loaded: ctx.settings.disable_library_unloading,
    },
    created,
  })
}

fn validate_extensions(
  activation: &ActivationList,
  drivers: &DriverSet,
  info: &InstanceCreateInfo,
) -> Result<(), LoaderError> {
  if info.enabled_extensions.is_empty() {
    return Ok(());
  }
  let supported = drivers.instance_extensions()?;
  for name in &info.enabled_extensions {
    if !is_valid_layer_name(name) {
      return Err(LoaderError::extension_not_present(name.as_str()));
    }
    if supported.iter().any(|e| e.name == *name) || activation.provides_instance_extension(name) {
      continue;
    }
    error!(extension = %name, "requested instance extension is not supported by any driver or enabled layer");
    return Err(LoaderError::extension_not_present(name.as_str()));
  }
  Ok(())
}

/// Load layers from the driver side outward; the result is outermost first.
fn load_links(activation: &ActivationList, libraries: &dyn LibraryLoader) -> Result<Vec<LoadedLayer>, LoaderError> {
  let expanded = activation.expanded();
  let mut links = Vec::new();
  try_reserve(&mut links, expanded.len())?;

  for activated in expanded.iter().rev() {
    match load_layer(&activated.layer, libraries) {
      Ok(loaded) => {
        debug!(
          layer = %loaded.name(),
          interface_version = loaded.interface_version,
          source = ?activated.source,
          "inserted layer"
        );
        links.push(loaded);
      }
      Err(err) if activated.app_accountable => {
        error!(layer = %activated.name(), error = %err, "requested layer failed to load");
        return Err(LoaderError::layer_not_present(activated.name()));
      }
      Err(err) => {
        warn!(layer = %activated.name(), error = %err, "skipping layer that failed to load");
      }
    }
  }

  links.reverse();
  Ok(links)
}

fn verify_inserted(activation: &ActivationList, links: &[LoadedLayer]) {
  for activated in activation.expanded() {
    if !links.iter().any(|link| Arc::ptr_eq(&link.layer, &activated.layer)) {
      warn!(layer = %activated.name(), "activated layer is not part of the instance chain");
    }
  }
}

/// The part of an instance chain below one layer.
struct InstanceNext<'a> {
  links: &'a [LoadedLayer],
  terminator: &'a InstanceTerminator<'a>,
}

impl NextInstance for InstanceNext<'_> {
  fn create_instance(&self, info: &InstanceCreateInfo) -> Result<CreatedInstance, LoaderError> {
    let Some((link, rest)) = self.links.split_first() else {
      return self.terminator.create_instance(info);
    };
    let next = InstanceNext {
      links: rest,
      terminator: self.terminator,
    };
    match &link.instance {
      Some(layer) => {
        trace!(layer = %link.name(), "calling layer create_instance");
        layer.create_instance(info, &next)
      }
      None => next.create_instance(info),
    }
  }

  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self
      .links
      .iter()
      .filter_map(|link| link.instance.as_ref())
      .find_map(|layer| layer.get_instance_proc_addr(name))
      .or_else(|| self.terminator.get_instance_proc_addr(name))
  }

  fn get_physical_device_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self
      .links
      .iter()
      .filter_map(|link| link.instance.as_ref())
      .find_map(|layer| layer.get_physical_device_proc_addr(name))
  }
}

/// Bottom of the instance chain: creates an instance on every usable driver.
struct InstanceTerminator<'a> {
  activation: &'a ActivationList,
  drivers: &'a DriverSet,
}

impl InstanceTerminator<'_> {
  fn create_instance(&self, info: &InstanceCreateInfo) -> Result<CreatedInstance, LoaderError> {
    let portability_enabled = info.enumerate_portability
      && info
        .enabled_extensions
        .iter()
        .any(|e| e == PORTABILITY_ENUMERATION_EXTENSION);

    let mut created = Vec::new();
    try_reserve(&mut created, self.drivers.len())?;

    for (index, driver) in self.drivers.drivers().iter().enumerate() {
      if driver.is_portability_driver() && !portability_enabled {
        info!(
          driver = %driver.library_path().display(),
          "skipping portability driver; the application did not enable portability enumeration"
        );
        continue;
      }

      let supported = match driver.icd().enumerate_instance_extension_properties() {
        Ok(supported) => supported,
        Err(code) if code.is_out_of_memory() => return Err(LoaderError::OutOfMemory),
        Err(code) => {
          warn!(driver = %driver.library_path().display(), result = %code, "driver failed to report instance extensions; skipping it");
          continue;
        }
      };

      let mut driver_info = info.clone();
      driver_info.enabled_layers.clear();
      driver_info
        .enabled_extensions
        .retain(|name| supported.iter().any(|e| e.name == *name) && !self.activation.provides_instance_extension(name));
      if !driver.api_version().meets(ApiVersion::V1_1) {
        driver_info.api_version = ApiVersion::V1_0;
      }

      match driver.icd().create_instance(&driver_info) {
        Ok(instance) => {
          debug!(
            driver = %driver.library_path().display(),
            extensions = ?driver_info.enabled_extensions,
            "driver created an instance"
          );
          created.push(DriverInstance {
            instance,
            index,
            driver: Arc::clone(driver),
          });
        }
        Err(code) if code.is_out_of_memory() => return Err(LoaderError::OutOfMemory),
        Err(code) => {
          warn!(driver = %driver.library_path().display(), result = %code, "driver failed to create an instance; skipping it");
        }
      }
    }

    if created.is_empty() {
      error!("no driver could create an instance");
      return Err(LoaderError::incompatible_driver("no driver could create an instance"));
    }
    Ok(CreatedInstance { drivers: created })
  }

  fn get_instance_proc_addr(&self, name: &str) -> Option<ProcAddr> {
    self
      .drivers
      .drivers()
      .iter()
      .find_map(|driver| driver.icd().get_instance_proc_addr(name))
  }
}
