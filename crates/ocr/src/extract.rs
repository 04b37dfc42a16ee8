use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{OcrCandidate, SelectionStrategy};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// `\d` is any Unicode decimal digit. The fractional part is optional but
// greedy, so "102.5" never stops at "102".
re!(re_reading, r"\d+(?:\.\d+)?");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("No numerical reading found")]
    NoNumericReading,
    #[error("Reading '{0}' does not fit in a decimal")]
    Unrepresentable(String),
}

/// A parsed reading and which tier produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedReading {
    pub value: Decimal,
    pub used_fallback: bool,
}

// ── Candidate selection ──────────────────────────────────────────────────────

/// Pick the most trustworthy candidate. `None` only for an empty slice.
pub fn select_candidate(
    candidates: &[OcrCandidate],
    strategy: SelectionStrategy,
) -> Option<&OcrCandidate> {
    match strategy {
        SelectionStrategy::LongestText => longest(candidates),
        SelectionStrategy::HighestConfidence => {
            if candidates.iter().all(|c| c.confidence.is_some()) {
                most_confident(candidates)
            } else {
                longest(candidates)
            }
        }
    }
}

/// Earliest candidate with the greatest trimmed length.
fn longest(candidates: &[OcrCandidate]) -> Option<&OcrCandidate> {
    candidates.iter().fold(None, |best: Option<&OcrCandidate>, c| match best {
        Some(b) if b.trimmed_len() >= c.trimmed_len() => Some(b),
        _ => Some(c),
    })
}

/// Earliest candidate with the highest confidence; equal confidence prefers the longer text.
fn most_confident(candidates: &[OcrCandidate]) -> Option<&OcrCandidate> {
    let key = |c: &OcrCandidate| (c.confidence.unwrap_or(0.0), c.trimmed_len());
    candidates.iter().fold(None, |best: Option<&OcrCandidate>, c| match best {
        Some(b) if key(b) >= key(c) => Some(b),
        _ => Some(c),
    })
}

// ── Normalization ────────────────────────────────────────────────────────────

/// Undo the character confusions OCR engines make most often on seven-segment
/// digits. Comma is treated as a decimal separator.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'O' | 'o' => '0',
            'S' => '5',
            ',' => '.',
            other => other,
        })
        .collect()
}

// ── Numeric parsing ──────────────────────────────────────────────────────────

/// Parse normalized text: the first decimal or integer run wins, in any
/// script's decimal digits; without one, fall back to reassembling whatever
/// digit-like characters are present.
pub fn parse_reading(normalized: &str) -> Result<ParsedReading, ParseError> {
    if let Some(m) = re_reading().find(normalized) {
        let unrepresentable = || ParseError::Unrepresentable(m.as_str().to_string());
        let ascii = to_ascii_digits(m.as_str()).ok_or_else(unrepresentable)?;
        let value = Decimal::from_str(&ascii).map_err(|_| unrepresentable())?;
        return Ok(ParsedReading { value, used_fallback: false });
    }
    parse_digits_fallback(normalized).map(|value| ParsedReading { value, used_fallback: true })
}

/// Keep only digit characters. More than two digits means the decimal point
/// was lost, so the last two become the fraction; one or two digits are a
/// whole number.
///
/// Besides decimal digits this accepts superscript and subscript forms, which
/// the primary parse does not match.
pub fn parse_digits_fallback(text: &str) -> Result<Decimal, ParseError> {
    let digits: String = text
        .chars()
        .filter_map(|c| decimal_digit_value(c).or_else(|| script_digit_value(c)))
        .filter_map(|d| char::from_digit(d, 10))
        .collect();

    if digits.is_empty() {
        return Err(ParseError::NoNumericReading);
    }

    let whole =
        Decimal::from_str(&digits).map_err(|_| ParseError::Unrepresentable(digits.clone()))?;
    if digits.len() > 2 {
        Ok(whole / Decimal::ONE_HUNDRED)
    } else {
        Ok(whole)
    }
}

/// Rewrite a matched run as ASCII, keeping the decimal point. `None` when a
/// digit belongs to a script without a known zero.
fn to_ascii_digits(run: &str) -> Option<String> {
    run.chars()
        .map(|c| match c {
            '.' => Some('.'),
            c => decimal_digit_value(c).and_then(|d| char::from_digit(d, 10)),
        })
        .collect()
}

// Zero of each decimal-digit block; every block runs contiguously to nine.
const DIGIT_ZEROS: &[u32] = &[
    0x0030, // ASCII
    0x0660, // Arabic-Indic
    0x06F0, // Extended Arabic-Indic
    0x07C0, // NKo
    0x0966, // Devanagari
    0x09E6, // Bengali
    0x0A66, // Gurmukhi
    0x0AE6, // Gujarati
    0x0B66, // Oriya
    0x0BE6, // Tamil
    0x0C66, // Telugu
    0x0CE6, // Kannada
    0x0D66, // Malayalam
    0x0E50, // Thai
    0x0ED0, // Lao
    0x0F20, // Tibetan
    0x1040, // Myanmar
    0x17E0, // Khmer
    0x1810, // Mongolian
    0xFF10, // Full-width
];

fn decimal_digit_value(c: char) -> Option<u32> {
    let cp = c as u32;
    DIGIT_ZEROS
        .iter()
        .find(|&&zero| (zero..=zero + 9).contains(&cp))
        .map(|zero| cp - zero)
}

fn script_digit_value(c: char) -> Option<u32> {
    match c {
        '\u{2070}' => Some(0),
        '\u{00B9}' => Some(1),
        '\u{00B2}' => Some(2),
        '\u{00B3}' => Some(3),
        '\u{2074}'..='\u{2079}' => Some(c as u32 - 0x2070),
        '\u{2080}'..='\u{2089}' => Some(c as u32 - 0x2080),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
