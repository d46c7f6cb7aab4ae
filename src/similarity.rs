//! Lexical and vector similarity measures.
//!
//! All functions are pure and synchronous. Scores are in [0, 1] except
//! cosine, which keeps its natural [-1, 1] range.

use std::collections::HashSet;

use crate::text::{normalize, tokenize};

/// Character n-gram size used by `ngram_similarity`.
pub const NGRAM_SIZE: usize = 3;

const JACCARD_WEIGHT: f32 = 0.4;
const NGRAM_WEIGHT: f32 = 0.6;

/// |A ∩ B| / |A ∪ B| over word tokens.
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
  let ta: HashSet<String> = tokenize(a).into_iter().collect();
  let tb: HashSet<String> = tokenize(b).into_iter().collect();
  jaccard_sets(&ta, &tb, normalize(a) == normalize(b))
}

fn jaccard_sets<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>, same_text: bool) -> f32 {
  if a.is_empty() && b.is_empty() {
    // Nothing left after tokenization: only identical texts count as equal.
    return if same_text { 1.0 } else { 0.0 };
  }
  if a.is_empty() || b.is_empty() {
    return 0.0;
  }
  let intersection = a.intersection(b).count();
  let union = a.union(b).count();
  intersection as f32 / union as f32
}

fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
  let chars: Vec<char> = text.chars().collect();
  if chars.len() < n {
    return HashSet::new();
  }
  chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Jaccard over character n-grams of the normalized texts.
pub fn ngram_similarity(a: &str, b: &str, n: usize) -> f32 {
  let na = normalize(a);
  let nb = normalize(b);
  if na == nb {
    return 1.0;
  }
  let ga = char_ngrams(&na, n.max(1));
  let gb = char_ngrams(&nb, n.max(1));
  jaccard_sets(&ga, &gb, false)
}

/// Weighted blend of token Jaccard and trigram similarity.
pub fn soft_similarity(a: &str, b: &str) -> f32 {
  if normalize(a) == normalize(b) {
    return 1.0;
  }
  let score = JACCARD_WEIGHT * jaccard_similarity(a, b) + NGRAM_WEIGHT * ngram_similarity(a, b, NGRAM_SIZE);
  score.clamp(0.0, 1.0)
}

/// Standard cosine similarity. Zero magnitude or mismatched lengths give 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  if a.len() != b.len() || a.is_empty() {
    return 0.0;
  }
  let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
  let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

  if norm_a == 0.0 || norm_b == 0.0 {
    0.0
  } else {
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
  }
}
