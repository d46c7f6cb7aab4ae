//! Archetype classification: maps question text to a coarse task-type label.
//!
//! The classifier is a data-driven table of (matcher, label) rules evaluated
//! top to bottom; the first match wins. Domain-specific rules come before the
//! generic verb rules so "prove that the DFA ..." lands on automata, not on
//! `proof`. Keywords are matched as substrings of the lowercased text, regex
//! rules are compiled once.

use std::sync::LazyLock;

use regex::Regex;

use crate::util::compile_pattern;

pub const GENERAL: &str = "general";

#[derive(Clone, Copy)]
enum Matcher {
  Any(&'static [&'static str]),
  Pattern(&'static str),
}

#[derive(Clone, Copy)]
struct RuleDef {
  label: &'static str,
  domain: &'static str,
  matcher: Matcher,
}

macro_rules! any {
  ($domain:expr, $label:expr, [$($kw:expr),+ $(,)?]) => {
    RuleDef { label: $label, domain: $domain, matcher: Matcher::Any(&[$($kw),+]) }
  };
}

macro_rules! re {
  ($domain:expr, $label:expr, $pattern:expr) => {
    RuleDef { label: $label, domain: $domain, matcher: Matcher::Pattern($pattern) }
  };
}

const RULES: &[RuleDef] = &[
  // Boolean logic
  any!("boolean", "truth-table", ["truth table", "wahrheitstabelle", "wahrheitswertetabelle"]),
  any!("boolean", "kv-map", ["karnaugh", "kv-map", "kv map", "kv-diagram", "kv-diagramm"]),
  re!("boolean", "normal-form", r"\b(dnf|cnf|knf|normal ?form|normalform)\b"),
  re!("boolean", "boolean-simplification", r"(simplify|vereinfach\w*).*(boolean|expression|term|ausdruck|funktion)"),
  any!("boolean", "boolean-algebra", ["boolean algebra", "boolesche algebra", "de morgan", "boolean function", "boolesche funktion"]),

  // Number systems
  any!("numbers", "twos-complement", ["two's complement", "twos complement", "2's complement", "zweierkomplement"]),
  any!("numbers", "floating-point", ["ieee 754", "ieee-754", "floating point", "floating-point", "gleitkomma"]),
  re!("numbers", "binary-arithmetic", r"binary (addition|subtraction|multiplication)|(add|subtract|multiply)\w* .*in binary|binär\w* (addition|subtraktion)"),
  re!("numbers", "number-conversion", r"(convert|umrechn\w*|umwandl\w*|wandeln).*(binary|decimal|hex\w*|octal|base|dual|dezimal|oktal|basis)"),

  // Automata and formal languages
  any!("automata", "nfa-to-dfa", ["nfa to dfa", "nfa into a dfa", "subset construction", "potenzmengenkonstruktion", "nea in einen dea"]),
  re!("automata", "automaton-minimization", r"minimi[sz]\w*.*(automat|dfa|dea)"),
  any!("automata", "pumping-lemma", ["pumping lemma", "pumping-lemma"]),
  any!("automata", "turing-machine", ["turing machine", "turingmaschine"]),
  re!("automata", "grammar", r"(context-free|kontextfrei\w*|grammar|grammatik|chomsky)"),
  re!("automata", "regex-construction", r"regular expression|regulären? ausdruck"),
  re!("automata", "automaton-construction", r"(construct|design|draw|build|give|konstruier\w*|entwirf|zeichne|angeben).*(dfa|nfa|automaton|automat|dea|nea)"),
  any!("automata", "automaton-analysis", ["automaton", "automat", "dfa", "nfa", "state machine", "zustandsautomat"]),

  // Coding theory
  re!("coding", "code-distance", r"(hamming|minimum|code|mindest)[- ]?(distance|distanz|abstand)"),
  any!("coding", "hamming-code", ["hamming"]),
  any!("coding", "parity-check", ["parity", "parität", "paritäts"]),
  any!("coding", "huffman-coding", ["huffman"]),
  any!("coding", "crc", ["crc", "cyclic redundancy", "zyklische redundanz"]),

  // Circuits
  any!("circuits", "flip-flop", ["flip-flop", "flipflop", "latch"]),
  any!("circuits", "adder-design", ["half adder", "full adder", "halbaddierer", "volladdierer", "ripple carry"]),
  any!("circuits", "multiplexer", ["multiplexer", "demultiplexer", "mux"]),
  any!("circuits", "circuit-analysis", ["circuit", "schaltung", "schaltnetz", "logic gate", "gatter", "nand", "xor gate"]),

  // Algorithms
  any!("algorithms", "shortest-path", ["dijkstra", "bellman-ford", "bellman ford", "floyd", "shortest path", "kürzeste", "kürzesten weg"]),
  any!("algorithms", "spanning-tree", ["spanning tree", "spannbaum", "kruskal", "prim's", "prim algorithm"]),
  re!("algorithms", "graph-traversal", r"\b(bfs|dfs)\b|breadth-first|depth-first|breitensuche|tiefensuche|travers\w*"),
  any!("algorithms", "dynamic-programming", ["dynamic programming", "dynamische programmierung", "memoization"]),
  re!("algorithms", "complexity-analysis", r"big[- ]?o|o-notation|\bo\(|runtime|running time|time complexity|laufzeit|komplexität"),
  re!("algorithms", "sorting-trace", r"\bsort\w*|quicksort|mergesort|heapsort|bubble ?sort|insertion ?sort|sortier\w*"),
  any!("algorithms", "recursion", ["recursion", "recursive", "rekursion", "rekursiv", "recurrence"]),

  // Data structures
  re!("datastructures", "tree-operations", r"binary search tree|\bavl\b|\bbst\b|b-tree|red-black|heap|suchbaum"),
  any!("datastructures", "hashing", ["hash table", "hashtable", "hashing", "hash function", "collision", "hashtabelle", "kollision"]),
  any!("datastructures", "linked-list", ["linked list", "verkettete liste"]),
  re!("datastructures", "stack-queue", r"\bstack\b|\bqueue\b|keller|warteschlange"),

  // Generic verbs
  re!("generic", "proof", r"\bprove\b|show that|\bproof\b|beweise|zeige,? dass"),
  re!("generic", "implementation", r"implement|write a (function|program|method)|schreibe ein\w* (funktion|programm)|pseudocode"),
  re!("generic", "calculation", r"calculate|compute|how many|berechne|wie viele"),
  re!("generic", "comparison", r"compare|difference between|unterschied|vergleiche"),
  re!("generic", "drawing", r"\bdraw\b|sketch|zeichne|skizziere"),
  re!("generic", "definition", r"\bdefine\b|what is|what are|definiere|was ist"),
  re!("generic", "explanation", r"explain|describe|why|erkläre|erläutere|beschreibe|warum"),
];

enum CompiledMatcher {
  Any(&'static [&'static str]),
  Pattern(Regex),
}

struct CompiledRule {
  label: &'static str,
  matcher: CompiledMatcher,
}

static COMPILED: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
  RULES
    .iter()
    .filter_map(|r| {
      let matcher = match r.matcher {
        Matcher::Any(kws) => CompiledMatcher::Any(kws),
        Matcher::Pattern(p) => CompiledMatcher::Pattern(compile_pattern(&format!("{}/{}", r.domain, r.label), p)?),
      };
      Some(CompiledRule { label: r.label, matcher })
    })
    .collect()
});

/// Classify question text into one archetype label. Never fails.
pub fn classify(text: &str) -> &'static str {
  let lower = text.to_lowercase();
  if lower.trim().is_empty() {
    return GENERAL;
  }
  COMPILED
    .iter()
    .find(|rule| match &rule.matcher {
      CompiledMatcher::Any(kws) => kws.iter().any(|k| lower.contains(k)),
      CompiledMatcher::Pattern(re) => re.is_match(&lower),
    })
    .map(|rule| rule.label)
    .unwrap_or(GENERAL)
}
