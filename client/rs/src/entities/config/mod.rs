pub mod core;

/// Redacts secret config values for the startup printout,
/// preserving whether a value was set at all.
pub fn empty_or_redacted(src: &str) -> String {
  if src.is_empty() {
    String::new()
  } else {
    String::from("##############")
  }
}
