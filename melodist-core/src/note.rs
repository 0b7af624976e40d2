//! Resolving tokens into note events.
//!
//! Pitches are spelled as a letter, optional accidentals and an octave,
//! e.g. `"C4"`, `"F#3"`, `"E-5"`, `"Bbb2"`. Middle C (`"C4"`) is note 60.
//! Durations are quarter lengths, written as decimals or simple fractions
//! (`"0.5"`, `"1/3"`).
//!
//! ```rust
//! # use melodist_core::prelude::*;
//! let token: Token = "F#4-0.5".parse().unwrap();
//! let event = NoteEvent::from_token(&token).unwrap();
//! assert_eq!(event.number, 66);
//! assert_eq!(NoteTiming::default().ticks(event.quarter_length), 120);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::NoteParseError;
use crate::token::Token;

/// One resolved note: a note number and a length in quarter notes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    pub number: u8,
    pub quarter_length: f64,
}

impl NoteEvent {
    pub fn from_token(token: &Token) -> Result<Self, NoteParseError> {
        Ok(Self {
            number: parse_pitch(token.pitch())?,
            quarter_length: parse_quarter_length(token.duration())?,
        })
    }
}

/// Tick arithmetic and fixed velocity for note-event files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteTiming {
    /// Written to the file header.
    pub ticks_per_quarter: u16,
    /// Ticks per unit of token duration.
    pub ticks_per_unit: u32,
    pub velocity: u8,
}

impl Default for NoteTiming {
    fn default() -> Self {
        Self {
            ticks_per_quarter: 480,
            ticks_per_unit: 240,
            velocity: 64,
        }
    }
}

impl NoteTiming {
    pub fn ticks(&self, quarter_length: f64) -> u32 {
        (quarter_length * self.ticks_per_unit as f64)
            .round()
            .min(u32::MAX as f64) as u32
    }
}

/// Note number of a pitch spelling. A missing octave means octave 4.
pub fn parse_pitch(pitch: &str) -> Result<u8, NoteParseError> {
    let unknown = || NoteParseError::UnknownPitch {
        pitch: pitch.to_string(),
    };
    let mut chars = pitch.chars();
    let pitch_class = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(unknown()),
    };
    let rest = chars.as_str();
    let accidentals = rest
        .find(|c: char| c != '#' && c != 'b' && c != '-')
        .unwrap_or(rest.len());
    let alter = match &rest[..accidentals] {
        "" => 0,
        "#" => 1,
        "##" => 2,
        "b" | "-" => -1,
        "bb" | "--" => -2,
        _ => return Err(unknown()),
    };
    let octave = match &rest[accidentals..] {
        "" => 4,
        digits => digits.parse::<i32>().map_err(|_| unknown())?,
    };
    let number = 12 * (octave + 1) + pitch_class + alter;
    u8::try_from(number)
        .ok()
        .filter(|n| *n <= 127)
        .ok_or(NoteParseError::OutOfRange {
            pitch: pitch.to_string(),
            number,
        })
}

/// Parses `"1.5"` or `"3/2"`.
pub fn parse_quarter_length(duration: &str) -> Result<f64, NoteParseError> {
    let value = match duration.split_once('/') {
        Some((n, d)) => n
            .trim()
            .parse::<f64>()
            .ok()
            .zip(d.trim().parse::<f64>().ok())
            .map(|(n, d)| n / d),
        None => duration.trim().parse::<f64>().ok(),
    };
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| NoteParseError::InvalidDuration {
            duration: duration.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_numbers() {
        assert_eq!(parse_pitch("C4"), Ok(60));
        assert_eq!(parse_pitch("A4"), Ok(69));
        assert_eq!(parse_pitch("C#4"), Ok(61));
        assert_eq!(parse_pitch("E-4"), Ok(63));
        assert_eq!(parse_pitch("Eb4"), Ok(63));
        assert_eq!(parse_pitch("Bbb3"), Ok(57));
        assert_eq!(parse_pitch("F##2"), Ok(43));
        assert_eq!(parse_pitch("C0"), Ok(12));
        assert_eq!(parse_pitch("G"), Ok(67));
        assert_eq!(parse_pitch("b3"), Ok(59));
    }

    #[test]
    fn test_bad_pitches() {
        assert!(matches!(
            parse_pitch("H4"),
            Err(NoteParseError::UnknownPitch { .. })
        ));
        assert!(matches!(
            parse_pitch("C#b4"),
            Err(NoteParseError::UnknownPitch { .. })
        ));
        assert!(matches!(
            parse_pitch("C4x"),
            Err(NoteParseError::UnknownPitch { .. })
        ));
        assert_eq!(
            parse_pitch("G10"),
            Err(NoteParseError::OutOfRange {
                pitch: "G10".into(),
                number: 139
            })
        );
    }

    #[test]
    fn test_quarter_lengths() {
        assert_eq!(parse_quarter_length("1.0"), Ok(1.0));
        assert_eq!(parse_quarter_length("0.25"), Ok(0.25));
        assert_eq!(parse_quarter_length("3/2"), Ok(1.5));
        assert!(parse_quarter_length("abc").is_err());
        assert!(parse_quarter_length("1/0").is_err());
        assert!(parse_quarter_length("-1").is_err());
    }

    #[test]
    fn test_ticks() {
        let timing = NoteTiming::default();
        assert_eq!(timing.ticks(1.0), 240);
        assert_eq!(timing.ticks(2.0), 480);
        assert_eq!(timing.ticks(1.0 / 3.0), 80);
        assert_eq!(timing.ticks(0.0), 0);
    }

    #[test]
    fn test_from_token() {
        let token: Token = "E-4-1/3".parse().unwrap();
        let event = NoteEvent::from_token(&token).unwrap();
        assert_eq!(event.number, 63);
        assert!((event.quarter_length - 1.0 / 3.0).abs() < 1e-12);
    }
}
