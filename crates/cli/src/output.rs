//! CLI output formatting.
//!
//! Colored status lines and human durations, degrading gracefully on
//! non-tty streams.

use std::time::Duration;

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const SKIPPED: &str = "-";
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.cyan()),
    message
  );
}

/// Millisecond-resolution human duration ("340ms", "2s 120ms").
pub fn format_duration(duration: Duration) -> String {
  humantime::format_duration(Duration::from_millis(duration.as_millis() as u64)).to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn durations_render_at_millisecond_resolution() {
    assert_eq!(format_duration(Duration::from_millis(340)), "340ms");
    assert_eq!(format_duration(Duration::from_millis(2120)), "2s 120ms");
    assert_eq!(format_duration(Duration::from_micros(1500)), "1ms");
  }
}
