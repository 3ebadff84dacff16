//! Logging setup.
//!
//! The loader logs through `tracing`. Applications embedding the loader can
//! install their own subscriber; [`init`] installs a stderr subscriber whose
//! filter follows the `VK_LOADER_DEBUG` categories. [`crate::Loader::from_env`]
//! calls it when that variable is set.

use tracing_subscriber::EnvFilter;

const CRATE_TARGET: &str = "vkload_lib";

/// Translate a `VK_LOADER_DEBUG` value into `EnvFilter` directives.
///
/// Categories: `error`, `warn`, `info`, `debug`, `layer`, `driver`, `all`.
/// Unknown categories are ignored. Without any known category the loader
/// reports warnings and errors only.
pub fn debug_filter_directives(value: Option<&str>) -> String {
  let mut level = "warn";
  let mut extra = Vec::new();

  for category in value.unwrap_or_default().split(',').map(|c| c.trim().to_ascii_lowercase()) {
    match category.as_str() {
      "error" if level == "warn" => level = "error",
      "warn" => level = max_level(level, "warn"),
      "info" => level = max_level(level, "info"),
      "debug" | "perf" => level = max_level(level, "debug"),
      "all" => level = "trace",
      "layer" => {
        extra.push(format!("{CRATE_TARGET}::activation=debug"));
        extra.push(format!("{CRATE_TARGET}::chain=debug"));
        extra.push(format!("{CRATE_TARGET}::registry=debug"));
      }
      "driver" => {
        extra.push(format!("{CRATE_TARGET}::driver=debug"));
        extra.push(format!("{CRATE_TARGET}::devices=debug"));
      }
      _ => {}
    }
  }

  let mut directives = vec![format!("{CRATE_TARGET}={level}")];
  if level != "trace" && level != "debug" {
    directives.extend(extra);
  }
  directives.join(",")
}

fn max_level(current: &'static str, candidate: &'static str) -> &'static str {
  const ORDER: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
  let rank = |l: &str| ORDER.iter().position(|o| *o == l).unwrap_or(1);
  if rank(candidate) > rank(current) { candidate } else { current }
}

/// Install the global subscriber for a `VK_LOADER_DEBUG` value. Does
/// nothing if a subscriber is already installed.
pub fn init(debug: Option<&str>) {
  let directives = debug_filter_directives(debug);
  let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(format!("{CRATE_TARGET}=warn")));

  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .try_init();
}
