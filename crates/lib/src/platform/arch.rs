/// Pointer width of the running process, as written in `library_arch`.
pub fn process_bits() -> &'static str {
  if cfg!(target_pointer_width = "64") { "64" } else { "32" }
}

/// Whether a manifest's `library_arch` can be loaded into this process.
///
/// A missing value always matches.
pub fn library_arch_matches(library_arch: Option<&str>) -> bool {
  library_arch.is_none_or(|arch| arch.trim() == process_bits())
}
