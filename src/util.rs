//! Small utility helpers used across modules.

use std::time::Instant;

use regex::Regex;
use tracing::error;

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Models like to wrap JSON in ```json fences even when told not to.
pub fn strip_code_fences(s: &str) -> &str {
  let t = s.trim();
  let Some(rest) = t.strip_prefix("```") else { return t };
  let rest = rest.strip_prefix("json").or_else(|| rest.strip_prefix("JSON")).unwrap_or(rest);
  rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Log-safe truncation for large strings (char boundary safe).
pub fn trunc_for_log(s: &str, max_chars: usize) -> String {
  let total = s.chars().count();
  if total <= max_chars {
    s.to_string()
  } else {
    format!("{}… ({} chars total)", s.chars().take(max_chars).collect::<String>(), total)
  }
}

/// Compile a built-in pattern. A bad pattern is logged and disabled, never fatal.
pub fn compile_pattern(name: &str, pattern: &str) -> Option<Regex> {
  match Regex::new(pattern) {
    Ok(re) => Some(re),
    Err(e) => {
      error!(target: "generation", pattern = name, error = %e, "Built-in pattern failed to compile; disabled");
      None
    }
  }
}

pub fn elapsed_ms(start: Instant) -> u64 {
  start.elapsed().as_millis() as u64
}
