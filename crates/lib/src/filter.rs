//! Name filters for the layer and driver enable/disable environment variables.
//!
//! A filter is a comma-separated list of patterns. Each pattern is either a
//! plain name, a glob with a leading and/or trailing `*`, or one of the
//! keywords `~all~`, `~implicit~` and `~explicit~`. Matching ignores ASCII case.

use crate::manifest::LayerKind;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
  All,
  Implicit,
  Explicit,
  Exact(String),
  Prefix(String),
  Suffix(String),
  Contains(String),
}

impl Pattern {
  fn parse(raw: &str) -> Option<Self> {
    let raw = raw.trim();
    if raw.is_empty() {
      return None;
    }

    let pattern = match raw.to_ascii_lowercase().as_str() {
      "~all~" | "*" => Self::All,
      "~implicit~" => Self::Implicit,
      "~explicit~" => Self::Explicit,
      lower => {
        let leading = lower.starts_with('*');
        let trailing = lower.len() > 1 && lower.ends_with('*');
        let core = lower.trim_matches('*').to_string();
        if core.is_empty() {
          return Some(Self::All);
        }
        match (leading, trailing) {
          (true, true) => Self::Contains(core),
          (true, false) => Self::Suffix(core),
          (false, true) => Self::Prefix(core),
          (false, false) => Self::Exact(core),
        }
      }
    };
    Some(pattern)
  }

  fn matches(&self, name: &str, kind: Option<LayerKind>) -> bool {
    let lower = name.to_ascii_lowercase();
    match self {
      Self::All => true,
      Self::Implicit => kind == Some(LayerKind::Implicit),
      Self::Explicit => kind == Some(LayerKind::Explicit),
      Self::Exact(p) => lower == *p,
      Self::Prefix(p) => lower.starts_with(p.as_str()),
      Self::Suffix(p) => lower.ends_with(p.as_str()),
      Self::Contains(p) => lower.contains(p.as_str()),
    }
  }
}

/// A parsed filter environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFilter {
  patterns: Vec<Pattern>,
}

impl NameFilter {
  pub fn parse(value: &str) -> Self {
    Self {
      patterns: value.split(',').filter_map(Pattern::parse).collect(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.patterns.is_empty()
  }

  /// Whether a layer of the given kind matches any pattern.
  pub fn matches_layer(&self, name: &str, kind: LayerKind) -> bool {
    self.patterns.iter().any(|p| p.matches(name, Some(kind)))
  }

  /// Whether a name matches any pattern. Layer-kind keywords never match.
  pub fn matches_name(&self, name: &str) -> bool {
    self.patterns.iter().any(|p| p.matches(name, None))
  }
}
