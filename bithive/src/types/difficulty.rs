//! Human-readable difficulty values.
//!
//! Devices report their best share difficulty either as a number or as a
//! pre-formatted string such as `"1.2M"`. Both shapes are normalized once,
//! when the status payload is deserialized, so that comparisons across a
//! fleet never have to care which shape a particular firmware sent.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static DIFFICULTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s*([KMGTPE]?)$").expect("difficulty pattern is valid")
});

/// Display suffixes, one per power of 1000.
const SUFFIXES: [&str; 7] = ["", "k", "M", "G", "T", "P", "E"];

/// Parse a suffixed difficulty string into its numeric value.
///
/// Accepts `<number><suffix>` where the suffix is one of K, M, G, T, P, E
/// (case-insensitive, optionally separated by whitespace). Anything else
/// parses as 0.
pub fn parse_difficulty(text: &str) -> f64 {
    let Some(caps) = DIFFICULTY_RE.captures(text.trim()) else {
        return 0.0;
    };

    let value: f64 = caps[1].parse().unwrap_or(0.0);
    let multiplier = match caps[2].to_ascii_uppercase().as_str() {
        "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        _ => 1.0,
    };

    value * multiplier
}

/// Format a difficulty with an SI-like suffix, e.g. `"1.5 M"`.
///
/// Rounds to one decimal and drops a trailing `.0`. Display only: the
/// result parses back to within rounding of the input, not exactly.
pub fn format_difficulty(value: f64) -> String {
    let mut scaled = value;
    let mut index = 0;
    while scaled >= 1000.0 && index < SUFFIXES.len() - 1 {
        scaled /= 1000.0;
        index += 1;
    }

    let rounded = (scaled * 10.0).round() / 10.0;
    let suffix = SUFFIXES[index];
    if suffix.is_empty() {
        format!("{rounded}")
    } else {
        format!("{rounded} {suffix}")
    }
}

/// A best-share difficulty as reported by a device.
///
/// The numeric value is computed at ingestion; the original text is kept
/// for display when the device sent one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(from = "WireDifficulty", into = "WireDifficulty")]
pub enum BestDifficulty {
    Numeric(f64),
    Preformatted { raw: String, value: f64 },
}

impl BestDifficulty {
    pub fn value(&self) -> f64 {
        match self {
            BestDifficulty::Numeric(value) => *value,
            BestDifficulty::Preformatted { value, .. } => *value,
        }
    }
}

impl Default for BestDifficulty {
    fn default() -> Self {
        BestDifficulty::Numeric(0.0)
    }
}

impl From<&str> for BestDifficulty {
    fn from(raw: &str) -> Self {
        BestDifficulty::Preformatted {
            raw: raw.to_string(),
            value: parse_difficulty(raw),
        }
    }
}

impl fmt::Display for BestDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BestDifficulty::Numeric(value) => f.write_str(&format_difficulty(*value)),
            BestDifficulty::Preformatted { raw, .. } => f.write_str(raw),
        }
    }
}

/// Shape of the field on the wire.
#[derive(Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum WireDifficulty {
    Number(f64),
    Text(String),
}

impl From<WireDifficulty> for BestDifficulty {
    fn from(wire: WireDifficulty) -> Self {
        match wire {
            WireDifficulty::Number(value) => BestDifficulty::Numeric(value),
            WireDifficulty::Text(raw) => BestDifficulty::from(raw.as_str()),
        }
    }
}

impl From<BestDifficulty> for WireDifficulty {
    fn from(diff: BestDifficulty) -> Self {
        match diff {
            BestDifficulty::Numeric(value) => WireDifficulty::Number(value),
            BestDifficulty::Preformatted { raw, .. } => WireDifficulty::Text(raw),
        }
    }
}
