//! Text canonicalization shared by fingerprinting and similarity.
//!
//! Everything here is pure: lowercase, punctuation strip, whitespace
//! compression, tokenization, slugs and title extraction.

/// Tokens shorter than this are dropped by `tokenize`.
pub const MIN_TOKEN_LEN: usize = 3;

/// Default title length used by the title tier.
pub const TITLE_MAX_CHARS: usize = 100;

/// Lowercase, replace punctuation by spaces, compress whitespace.
pub fn normalize(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut pending_space = false;
  for ch in text.chars().flat_map(char::to_lowercase) {
    if ch.is_alphanumeric() {
      if pending_space && !out.is_empty() {
        out.push(' ');
      }
      pending_space = false;
      out.push(ch);
    } else {
      pending_space = true;
    }
  }
  out
}

/// Normalized word tokens with at least `MIN_TOKEN_LEN` chars.
pub fn tokenize(text: &str) -> Vec<String> {
  normalize(text)
    .split_whitespace()
    .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
    .map(str::to_string)
    .collect()
}

/// `"Graph Theory (Intro)"` -> `"graph-theory-intro"`.
pub fn slugify(text: &str) -> String {
  normalize(text).split_whitespace().collect::<Vec<_>>().join("-")
}

/// First markdown heading, else first non-empty line, truncated to `max_chars`.
pub fn extract_title(text: &str, max_chars: usize) -> String {
  let lines = || text.lines().map(str::trim).filter(|l| !l.is_empty());

  let heading = lines()
    .find(|l| l.starts_with('#'))
    .map(|l| l.trim_start_matches('#').trim())
    .filter(|l| !l.is_empty());

  let title = heading.or_else(|| lines().next()).unwrap_or("");
  title.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_strips_punctuation_and_compresses() {
    assert_eq!(normalize("  What   is 2+2?  "), "what is 2 2");
    assert_eq!(normalize("Hello,\tWorld!!"), "hello world");
    assert_eq!(normalize("?!"), "");
  }

  #[test]
  fn tokenize_drops_short_tokens() {
    assert_eq!(tokenize("What is a DFA?"), vec!["what", "dfa"]);
    assert!(tokenize("a b c").is_empty());
  }

  #[test]
  fn slugify_joins_with_dashes() {
    assert_eq!(slugify("Graph Theory (Intro)"), "graph-theory-intro");
    assert_eq!(slugify("  "), "");
  }

  #[test]
  fn title_prefers_heading() {
    let text = "Intro line\n## Dijkstra on small graphs\nBody";
    assert_eq!(extract_title(text, 100), "Dijkstra on small graphs");
  }

  #[test]
  fn title_falls_back_to_first_line_and_truncates() {
    let text = "\n\n  Compute the shortest path  \nmore";
    assert_eq!(extract_title(text, 7), "Compute");
    assert_eq!(extract_title("", 10), "");
  }
}
