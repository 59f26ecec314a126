//! Text segmentation — raw text → ordered playable tokens.
//!
//! The scanner walks the character stream left to right. At each
//! position it tries the longest recognisable span first (bounded by
//! [`MAX_UNIT_LEN`]) and falls back one character at a time, so a
//! 3-character unit always beats a 2-character unit starting at the
//! same position. Greedy, no backtracking, no overlap.
//!
//! Characters outside the inventory become structural pauses
//! (newline / sentence / clause / space) or literal passthrough
//! tokens. Runs of newlines and runs of spaces each coalesce into a
//! single pause; other whitespace produces no token at all.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::inventory::UnitInventory;

/// Upper bound on the span length tried at each scan position. Caps
/// the worst-case lookup cost per character; longer mapping keys are
/// simply never matched.
pub const MAX_UNIT_LEN: usize = 20;

/// The kind of structural pause a non-unit character produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseKind {
    Newline,
    Sentence,
    Clause,
    Space,
}

/// One segmentation result, in playback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayableToken {
    /// A recognised span; carries the unit *name* from the mapping.
    Unit(String),
    /// A timed pause.
    Pause(PauseKind),
    /// A single character with no unit. Carried through so token
    /// order mirrors the input, but plays nothing.
    Literal(char),
}

/// Sentence-ending marks: ASCII terminators plus the Myanmar-script
/// full stop (။). One pause per mark, no coalescing.
const SENTENCE_MARKS: &[char] = &['.', '!', '?', '။'];

/// Clause-separating marks, including the Myanmar little section (၊).
const CLAUSE_MARKS: &[char] = &[',', ';', ':', '၊'];

static PAUSE_CLASS: Lazy<HashMap<char, PauseKind>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for &c in SENTENCE_MARKS {
        m.insert(c, PauseKind::Sentence);
    }
    for &c in CLAUSE_MARKS {
        m.insert(c, PauseKind::Clause);
    }
    m
});

/// Segment `text` against `inventory` with the default span bound.
pub fn segment(text: &str, inventory: &UnitInventory) -> Vec<PlayableToken> {
    segment_with_limit(text, inventory, MAX_UNIT_LEN)
}

/// Segment with an explicit longest-span bound (the default is
/// [`MAX_UNIT_LEN`]; the value is a tuning constant, not derived).
pub fn segment_with_limit(
    text: &str,
    inventory: &UnitInventory,
    max_unit_len: usize,
) -> Vec<PlayableToken> {
    let chars: Vec<char> = text.chars().collect();
    let max_len = max_unit_len.max(1).min(inventory.max_span_len().max(1));
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if let Some((name, end)) = longest_match(&chars, i, max_len, inventory) {
            tokens.push(PlayableToken::Unit(name));
            i = end;
            continue;
        }

        let c = chars[i];
        i += 1;
        match c {
            '\n' => {
                tokens.push(PlayableToken::Pause(PauseKind::Newline));
                while i < chars.len() && chars[i] == '\n' {
                    i += 1;
                }
            }
            ' ' => {
                tokens.push(PlayableToken::Pause(PauseKind::Space));
                while i < chars.len() && chars[i] == ' ' {
                    i += 1;
                }
            }
            _ => {
                if let Some(&kind) = PAUSE_CLASS.get(&c) {
                    tokens.push(PlayableToken::Pause(kind));
                } else if !c.is_whitespace() {
                    tokens.push(PlayableToken::Literal(c));
                }
                // other whitespace: dropped, no token
            }
        }
    }
    tokens
}

/// Longest inventory span starting at `start`, searched from the
/// window bound downwards. Returns the unit name and the position
/// just past the span.
fn longest_match(
    chars: &[char],
    start: usize,
    max_len: usize,
    inventory: &UnitInventory,
) -> Option<(String, usize)> {
    let hi = (start + max_len).min(chars.len());
    for end in (start + 1..=hi).rev() {
        let span: String = chars[start..end].iter().collect();
        if let Some(name) = inventory.unit_name(&span) {
            return Some((name.to_string(), end));
        }
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
