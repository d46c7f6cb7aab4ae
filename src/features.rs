//! Structural feature extraction from question text.
//!
//! `extract` is a pure function of its inputs so fingerprints can be
//! re-derived from literal strings.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{AnswerFormat, Difficulty, TaskFeatures};
use crate::util::compile_pattern;

const BASE_COMPLEXITY: i32 = 3;
const CONTRIBUTION_CAP: i32 = 3;

static EXPLICIT_VARIABLES: LazyLock<Option<Regex>> = LazyLock::new(|| {
  compile_pattern("explicit-variables", r"(?i)\b(\d+)\s*(?:variables|variablen|vars|input variables|eingangsvariablen)\b")
});

// `a)`, `(b)`, `1.`, `2)` at the start of a line.
static SUBTASK_MARKER: LazyLock<Option<Regex>> =
  LazyLock::new(|| compile_pattern("subtask-marker", r"(?m)^\s*(?:\(?[a-hA-H]\)|\(?\d{1,2}[.)])\s+"));

static SUBTASK_WORD: LazyLock<Option<Regex>> =
  LazyLock::new(|| compile_pattern("subtask-word", r"(?i)\b(?:subtask|sub-task|teilaufgabe)\b"));

static DIFFICULTY_WORD: LazyLock<Option<Regex>> =
  LazyLock::new(|| compile_pattern("difficulty-word", r"(?i)\b(easy|leicht|medium|mittel|hard|difficult|schwer)\b"));

const TABLE_TRIGGERS: &[&str] = &["table", "tabelle", "truth table", "wahrheitstabelle", "kv-diagram", "karnaugh"];
const DIAGRAM_TRIGGERS: &[&str] = &["diagram", "diagramm", "draw", "sketch", "zeichne", "skizziere", "visuali"];
const DIAGRAM_NOUNS: &[&str] = &["automaton", "automat", "graph", "tree", "baum", "state machine", "circuit", "schaltung"];
const FORMULA_TRIGGERS: &[&str] = &["formula", "formel", "expression", "ausdruck", "equation", "gleichung", "simplify", "vereinfache", "term"];
const CODE_TRIGGERS: &[&str] = &["code", "implement", "program", "programm", "pseudocode", "write a function", "schreibe eine funktion"];
const NUMBER_TRIGGERS: &[&str] = &["calculate", "compute", "how many", "berechne", "wie viele", "value of", "result of", "convert", "umrechnen"];
const TEXT_TRIGGERS: &[&str] = &["explain", "describe", "why", "justify", "erkläre", "beschreibe", "begründe", "warum"];

fn any_of(lower: &str, triggers: &[&str]) -> bool {
  triggers.iter().any(|t| lower.contains(t))
}

fn count_matches(re: &Option<Regex>, text: &str) -> usize {
  re.as_ref().map_or(0, |re| re.find_iter(text).count())
}

fn first_capture<'t>(re: &Option<Regex>, text: &'t str) -> Option<&'t str> {
  re.as_ref().and_then(|re| re.captures(text)).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn count_variables(text: &str) -> Option<u32> {
  if let Some(n) = first_capture(&EXPLICIT_VARIABLES, text).and_then(|m| m.parse::<u32>().ok()) {
    return Some(n);
  }

  // Lettered subtask markers would otherwise count as variables.
  let stripped = match SUBTASK_MARKER.as_ref() {
    Some(re) => re.replace_all(text, " "),
    None => Cow::Borrowed(text),
  };
  let letters: HashSet<char> = stripped
    .split(|c: char| !c.is_alphanumeric())
    .filter_map(|tok| {
      let mut chars = tok.chars();
      match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c.to_ascii_lowercase()),
        _ => None,
      }
    })
    .filter(|c| matches!(c, 'a'..='e' | 'x'..='z'))
    .collect();

  match letters.len() {
    0 => None,
    n => Some(n as u32),
  }
}

fn count_subtasks(text: &str, subtasks: Option<&[String]>) -> u32 {
  if let Some(list) = subtasks.filter(|l| !l.is_empty()) {
    return list.len() as u32;
  }
  (count_matches(&SUBTASK_MARKER, text) + count_matches(&SUBTASK_WORD, text)) as u32
}

fn explicit_difficulty(text: &str) -> Option<Difficulty> {
  first_capture(&DIFFICULTY_WORD, text)
    .map(Difficulty::parse)
    .filter(|d| *d != Difficulty::Unknown)
}

fn inferred_difficulty(num_subtasks: u32, num_variables: u32) -> Difficulty {
  if num_subtasks >= 4 || num_variables >= 5 {
    Difficulty::Hard
  } else if num_subtasks >= 2 || num_variables >= 3 {
    Difficulty::Medium
  } else {
    Difficulty::Easy
  }
}

fn complexity_score(num_variables: u32, num_subtasks: u32, diagram: bool, code: bool) -> u8 {
  let vars = (num_variables as i32 / 2).min(CONTRIBUTION_CAP);
  let subs = (num_subtasks as i32).min(CONTRIBUTION_CAP);
  let mut score = BASE_COMPLEXITY + vars + subs;
  if diagram {
    score += 1;
  }
  if code {
    score += 2;
  }
  score.clamp(1, 10) as u8
}

/// Derive `TaskFeatures` from a question and an optional explicit subtask list.
pub fn extract(question: &str, subtasks: Option<&[String]>) -> TaskFeatures {
  let lower = question.to_lowercase();

  let num_variables = count_variables(question);
  let num_subtasks = count_subtasks(question, subtasks);

  let requires_table = any_of(&lower, TABLE_TRIGGERS);
  let requires_diagram = any_of(&lower, DIAGRAM_TRIGGERS) || any_of(&lower, DIAGRAM_NOUNS);
  let requires_code = any_of(&lower, CODE_TRIGGERS);

  let mut answer_formats = BTreeSet::new();
  if requires_table {
    answer_formats.insert(AnswerFormat::Table);
  }
  if requires_diagram {
    answer_formats.insert(AnswerFormat::Diagram);
  }
  if requires_code {
    answer_formats.insert(AnswerFormat::Code);
  }
  if any_of(&lower, FORMULA_TRIGGERS) {
    answer_formats.insert(AnswerFormat::Formula);
  }
  if any_of(&lower, NUMBER_TRIGGERS) {
    answer_formats.insert(AnswerFormat::Number);
  }
  if any_of(&lower, TEXT_TRIGGERS) || answer_formats.is_empty() {
    answer_formats.insert(AnswerFormat::Text);
  }

  let difficulty = if question.trim().is_empty() {
    Difficulty::Unknown
  } else {
    explicit_difficulty(question)
      .unwrap_or_else(|| inferred_difficulty(num_subtasks, num_variables.unwrap_or(0)))
  };

  TaskFeatures {
    num_variables,
    num_subtasks,
    answer_formats,
    requires_diagram,
    requires_table,
    requires_code,
    difficulty,
    complexity: complexity_score(num_variables.unwrap_or(0), num_subtasks, requires_diagram, requires_code),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn built_in_patterns_compile() {
    for re in [&EXPLICIT_VARIABLES, &SUBTASK_MARKER, &SUBTASK_WORD, &DIFFICULTY_WORD] {
      assert!(re.is_some());
    }
  }

  #[test]
  fn explicit_variable_phrase_wins() {
    let f = extract("Build the truth table of a function with 4 variables.", None);
    assert_eq!(f.num_variables, Some(4));
    assert!(f.requires_table);
    assert!(f.answer_formats.contains(&AnswerFormat::Table));
  }

  #[test]
  fn variables_estimated_from_single_letters() {
    let f = extract("Simplify x AND y OR z", None);
    assert_eq!(f.num_variables, Some(3));
    assert!(f.answer_formats.contains(&AnswerFormat::Formula));
    assert_eq!(f.difficulty, Difficulty::Medium);
  }

  #[test]
  fn subtask_markers_are_counted_not_taken_as_variables() {
    let q = "Consider the list.\na) Sort it\nb) Count inversions\nc) Give the runtime\n";
    let f = extract(q, None);
    assert_eq!(f.num_subtasks, 3);
    assert_eq!(f.num_variables, None);
    assert_eq!(f.difficulty, Difficulty::Medium);
  }

  #[test]
  fn explicit_subtask_list_overrides_markers() {
    let subs = vec!["one".to_string(), "two".into(), "three".into(), "four".into()];
    let f = extract("Answer the following.", Some(&subs));
    assert_eq!(f.num_subtasks, 4);
    assert_eq!(f.difficulty, Difficulty::Hard);
  }

  #[test]
  fn explicit_difficulty_keyword_overrides_inference() {
    let q = "An easy warm-up:\n1. first\n2. second\n3. third\n4. fourth\n";
    let f = extract(q, None);
    assert_eq!(f.num_subtasks, 4);
    assert_eq!(f.difficulty, Difficulty::Easy);
  }

  #[test]
  fn diagram_from_domain_noun_and_code_bonus() {
    let f = extract("Implement a search on the given tree.", None);
    assert!(f.requires_diagram);
    assert!(f.requires_code);
    // base 3 + diagram 1 + code 2
    assert_eq!(f.complexity, 6);
  }

  #[test]
  fn defaults_to_text_and_easy() {
    let f = extract("Name the inventor of the transistor.", None);
    assert_eq!(f.answer_formats.iter().copied().collect::<Vec<_>>(), vec![AnswerFormat::Text]);
    assert_eq!(f.num_subtasks, 0);
    assert_eq!(f.difficulty, Difficulty::Easy);
    assert_eq!(f.complexity, 3);
  }

  #[test]
  fn complexity_is_clamped() {
    let q = "Implement and draw: 12 variables\na) x\nb) y\nc) z\nd) w\ne) v\n";
    let f = extract(q, None);
    assert_eq!(f.complexity, 10);
  }

  #[test]
  fn empty_question_is_unknown() {
    assert_eq!(extract("   ", None).difficulty, Difficulty::Unknown);
  }
}
