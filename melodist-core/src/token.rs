//! Tokens, melodies, and the textual formats they travel in.
//!
//! A token is written `"<pitch>-<duration>"`. The separator is the **last**
//! `-` in the text, so flats spelled with a dash (`"E-4-1.0"`) keep their
//! accidental.
//!
//! Melodies have two textual forms:
//! 1. A record: tokens joined by `", "`, which is what corpus files contain.
//! 2. An exchange document: either a JSON array of token strings, or a single
//!    JSON string holding a record.
//!
//! ```rust
//! # use melodist_core::prelude::*;
//! let a = Melody::from_exchange_json(r#"["C4-1.0", "E4-1.0"]"#).unwrap();
//! let b = Melody::from_exchange_json(r#""C4-1.0, E4-1.0""#).unwrap();
//! assert_eq!(a, b);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CorpusFormatError;

/// One musical event, e.g. `"C4-1.0"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token {
    text: String,
    separator: usize,
}

impl Token {
    /// Parses a token, trimming surrounding whitespace and stray double quotes.
    pub fn parse(raw: &str) -> Result<Self, CorpusFormatError> {
        let text = raw.trim().trim_matches('"').trim();
        let Some(separator) = text.rfind('-') else {
            return Err(CorpusFormatError::MissingSeparator {
                token: text.to_string(),
            });
        };
        if separator == 0 || separator + 1 == text.len() {
            return Err(CorpusFormatError::EmptyField {
                token: text.to_string(),
            });
        }
        Ok(Self {
            text: text.to_string(),
            separator,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The note-name-plus-octave part, e.g. `"C4"`.
    pub fn pitch(&self) -> &str {
        &self.text[..self.separator]
    }

    /// The quarter-length part, e.g. `"1.0"`.
    pub fn duration(&self) -> &str {
        &self.text[self.separator + 1..]
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Token {
    type Err = CorpusFormatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Token {
    type Error = CorpusFormatError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.text
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// An ordered sequence of tokens. Order is temporal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Melody {
    tokens: Vec<Token>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Exchange {
    Tokens(Vec<String>),
    Record(String),
}

impl Melody {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    /// Parses a comma delimited record. Empty records and empty or malformed
    /// tokens are rejected.
    pub fn parse_record(record: &str) -> Result<Self, CorpusFormatError> {
        let record = record.trim().trim_matches('"');
        if record.trim().is_empty() {
            return Err(CorpusFormatError::EmptyRecord);
        }
        record
            .split(',')
            .map(Token::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// Parses an exchange document: a JSON array of tokens or a JSON string
    /// holding a record.
    pub fn from_exchange_json(json: &str) -> Result<Self, CorpusFormatError> {
        let exchange: Exchange = serde_json::from_str(json)
            .map_err(|e| CorpusFormatError::InvalidExchange(e.to_string()))?;
        match exchange {
            Exchange::Tokens(tokens) => tokens
                .iter()
                .map(|t| Token::parse(t))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::new),
            Exchange::Record(record) => Self::parse_record(&record),
        }
    }

    /// Tokens joined with `", "`.
    pub fn to_record(&self) -> String {
        self.tokens
            .iter()
            .map(Token::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The melody as a JSON array of token strings.
    pub fn to_json_array(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The melody as a single JSON string holding its record.
    pub fn to_json_record(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_record())
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Keeps at most `max_len` tokens from the start of the melody.
    pub fn truncate(&mut self, max_len: usize) {
        self.tokens.truncate(max_len);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }
}

impl From<Vec<Token>> for Melody {
    fn from(tokens: Vec<Token>) -> Self {
        Self::new(tokens)
    }
}

impl FromIterator<Token> for Melody {
    fn from_iter<I: IntoIterator<Item = Token>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Melody {
    type Item = &'a Token;
    type IntoIter = std::slice::Iter<'a, Token>;
    fn into_iter(self) -> Self::IntoIter {
        self.tokens.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_splits_on_last_dash() {
        let t = Token::parse("E-4-1.5").unwrap();
        assert_eq!(t.pitch(), "E-4");
        assert_eq!(t.duration(), "1.5");

        let t = Token::parse("  \"C4-1.0\" ").unwrap();
        assert_eq!(t.as_str(), "C4-1.0");
    }

    #[test]
    fn test_token_rejects_missing_separator() {
        assert_eq!(
            Token::parse("C4"),
            Err(CorpusFormatError::MissingSeparator {
                token: "C4".into()
            })
        );
        assert!(matches!(
            Token::parse("C4-"),
            Err(CorpusFormatError::EmptyField { .. })
        ));
        assert!(matches!(
            Token::parse("-1.0"),
            Err(CorpusFormatError::EmptyField { .. })
        ));
    }

    #[test]
    fn test_record_round_trip() {
        let record = "C4-1.0, D4-0.5, E-4-1.0, C4-2.0";
        let melody = Melody::parse_record(record).unwrap();
        assert_eq!(melody.len(), 4);
        assert_eq!(melody.to_record(), record);
    }

    #[test]
    fn test_record_without_spaces() {
        let melody = Melody::parse_record("C4-1.0,D4-1.0").unwrap();
        assert_eq!(melody.to_record(), "C4-1.0, D4-1.0");
    }

    #[test]
    fn test_empty_record() {
        assert_eq!(Melody::parse_record("  "), Err(CorpusFormatError::EmptyRecord));
        assert!(Melody::parse_record("C4-1.0, ").is_err());
    }

    #[test]
    fn test_exchange_forms_agree() {
        let melody = Melody::parse_record("C4-1.0, E4-1.0, G4-0.25").unwrap();

        let array = melody.to_json_array().unwrap();
        assert_eq!(array, r#"["C4-1.0","E4-1.0","G4-0.25"]"#);
        assert_eq!(Melody::from_exchange_json(&array).unwrap(), melody);

        let record = melody.to_json_record().unwrap();
        assert_eq!(record, r#""C4-1.0, E4-1.0, G4-0.25""#);
        assert_eq!(Melody::from_exchange_json(&record).unwrap(), melody);
    }

    #[test]
    fn test_exchange_rejects_other_json() {
        assert!(matches!(
            Melody::from_exchange_json("{\"a\": 1}"),
            Err(CorpusFormatError::InvalidExchange(_))
        ));
        assert!(Melody::from_exchange_json(r#"["C4"]"#).is_err());
    }
}
