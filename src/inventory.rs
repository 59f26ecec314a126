//! Unit inventory loaders — the two plain-text files a voice ships.
//!
//! **Index file** (`units.idx`): one record per line,
//! `name:offset:length` with decimal offset/length. The line is split
//! into at most three fields, so the offset and length values are
//! never themselves split on an embedded colon. Malformed records are
//! skipped with a warning; a duplicated name keeps the *last*
//! occurrence (deterministic).
//!
//! **Mapping file** (`mapping.txt`): one rule per line, `key=value`.
//! Blank lines and lines starting with `#` are ignored. The key is a
//! literal text span (possibly multi-character), the value a unit name
//! in the index. The reserved keys `rate`, `speed` and `pitch` are not
//! text spans — they seed the default time-scale parameters instead.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result};
use tracing::warn;

/// One unit's byte range inside the blob file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEntry {
    pub name: String,
    pub offset: u64,
    pub length: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// UnitIndex — name → (offset, length)
// ─────────────────────────────────────────────────────────────────────────────

/// The name → byte-range table for one unit blob.
#[derive(Debug, Default)]
pub struct UnitIndex {
    entries: HashMap<String, UnitEntry>,
}

impl UnitIndex {
    /// Parse index records from a reader. Unparseable lines are skipped.
    pub fn parse(reader: impl BufRead) -> Result<Self> {
        let mut entries = HashMap::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.context("failed to read index line")?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_index_record(line) {
                Some(entry) => {
                    // last-wins on duplicate names
                    entries.insert(entry.name.clone(), entry);
                }
                None => warn!(lineno = lineno + 1, line, "skipping malformed index record"),
            }
        }
        Ok(Self { entries })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open unit index: {}", path.display()))?;
        Self::parse(BufReader::new(file))
    }

    pub fn get(&self, name: &str) -> Option<&UnitEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries whose byte range does not fit inside a blob of
    /// `blob_len` bytes. Returns how many were removed.
    pub(crate) fn retain_in_bounds(&mut self, blob_len: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.offset.checked_add(e.length as u64).is_some_and(|end| end <= blob_len));
        before - self.entries.len()
    }
}

fn parse_index_record(line: &str) -> Option<UnitEntry> {
    let mut fields = line.splitn(3, ':');
    let name = fields.next()?.trim();
    let offset = fields.next()?.trim().parse::<u64>().ok()?;
    let length = fields.next()?.trim().parse::<u32>().ok()?;
    if name.is_empty() {
        return None;
    }
    Some(UnitEntry { name: name.to_string(), offset, length })
}

// ─────────────────────────────────────────────────────────────────────────────
// EngineDefaults — reserved-key configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default time-scale parameters shipped with a voice's mapping file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineDefaults {
    pub rate: f32,
    pub speed: f32,
    pub pitch: f32,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self { rate: 1.0, speed: 1.0, pitch: 1.0 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UnitInventory — text span → unit name
// ─────────────────────────────────────────────────────────────────────────────

/// The recognised text spans of a voice and the unit names they play.
#[derive(Debug, Default)]
pub struct UnitInventory {
    map: HashMap<String, String>,
    defaults: EngineDefaults,
    max_span: usize,
}

impl UnitInventory {
    /// Parse mapping rules from a reader.
    pub fn parse(reader: impl BufRead) -> Result<Self> {
        let mut map = HashMap::new();
        let mut defaults = EngineDefaults::default();
        for line in reader.lines() {
            let line = line.context("failed to read mapping line")?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line, "skipping malformed mapping rule");
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                warn!(line, "skipping mapping rule with empty field");
                continue;
            }
            if let Some(slot) = reserved_slot(&mut defaults, key) {
                match value.parse::<f32>() {
                    Ok(v) if v.is_finite() && v > 0.0 => *slot = v,
                    _ => warn!(key, value, "ignoring unparseable engine default"),
                }
                continue;
            }
            map.insert(key.to_string(), value.to_string());
        }
        Ok(Self::assemble(map, defaults))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open unit mapping: {}", path.display()))?;
        Self::parse(BufReader::new(file))
    }

    /// Build an inventory directly from span → name pairs.
    pub fn from_map(map: HashMap<String, String>) -> Self {
        Self::assemble(map, EngineDefaults::default())
    }

    fn assemble(map: HashMap<String, String>, defaults: EngineDefaults) -> Self {
        let max_span = map.keys().map(|k| k.chars().count()).max().unwrap_or(0);
        Self { map, defaults, max_span }
    }

    /// Unit name for an exact text span, if recognised.
    pub fn unit_name(&self, span: &str) -> Option<&str> {
        self.map.get(span).map(String::as_str)
    }

    /// Length in characters of the longest recognised span.
    pub fn max_span_len(&self) -> usize {
        self.max_span
    }

    pub fn defaults(&self) -> EngineDefaults {
        self.defaults
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn reserved_slot<'a>(defaults: &'a mut EngineDefaults, key: &str) -> Option<&'a mut f32> {
    match key {
        "rate" => Some(&mut defaults.rate),
        "speed" => Some(&mut defaults.speed),
        "pitch" => Some(&mut defaults.pitch),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
