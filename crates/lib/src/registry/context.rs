use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};

use crate::platform::paths::current_executable;

/// Facts about the running application that layer selection depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppContext {
  /// Canonical path of the application executable, matched against override
  /// layer app keys.
  pub executable: Option<PathBuf>,
  /// Reference time for layer expiration.
  pub now: NaiveDateTime,
}

impl AppContext {
  pub fn new(executable: Option<PathBuf>, now: NaiveDateTime) -> Self {
    Self { executable, now }
  }

  /// The running process at the current local time.
  pub fn current() -> Self {
    Self::new(current_executable(), Local::now().naive_local())
  }

  /// Whether an override layer app key names this application.
  pub fn matches_app_key(&self, key: &Path) -> bool {
    let Some(executable) = &self.executable else {
      return false;
    };
    if key == executable {
      return true;
    }
    dunce::canonicalize(key).is_ok_and(|key| key == *executable)
  }
}
