//! Token <-> index vocabularies.
//!
//! Building a vocabulary has two phases:
//! 1. [VocabularyBuilder] is mutable. It scans melodies and appends every
//!    token it has not seen yet to an append-only table.
//! 2. [VocabularyBuilder::freeze()] turns it into a [Vocabulary], which is
//!    immutable. Encoding an unseen token is an error, never a new index.
//!
//! Indices are assigned in order of first occurrence starting at `1`. Index
//! [crate::PAD_INDEX] (`0`) is padding and never names a token, so the
//! number of classes a model predicts is [Vocabulary::size_with_padding()].
//!
//! A [Vocabulary] serializes as its token table, in index order:
//! ```rust
//! # use melodist_core::prelude::*;
//! let corpus = vec![Melody::parse_record("G4-1.0, C4-1.0, G4-1.0").unwrap()];
//! let vocab = Vocabulary::fit(&corpus);
//! let json = serde_json::to_string(&vocab).unwrap();
//! assert_eq!(json, r#"{"tokens":["G4-1.0","C4-1.0"]}"#);
//! let restored: Vocabulary = serde_json::from_str(&json).unwrap();
//! assert_eq!(restored, vocab);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::VocabularyError;
use crate::token::{Melody, Token};
use crate::PAD_INDEX;

/// The accumulating phase of a vocabulary.
#[derive(Clone, Debug, Default)]
pub struct VocabularyBuilder {
    tokens: Vec<Token>,
    index: HashMap<Token, usize>,
}

impl VocabularyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token if unseen and returns its index.
    pub fn observe(&mut self, token: &Token) -> usize {
        if let Some(&i) = self.index.get(token) {
            return i;
        }
        self.tokens.push(token.clone());
        let i = self.tokens.len();
        self.index.insert(token.clone(), i);
        i
    }

    /// Adds every unseen token of `melody`, scanning left to right.
    pub fn observe_melody(&mut self, melody: &Melody) {
        for token in melody {
            self.observe(token);
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn freeze(self) -> Vocabulary {
        Vocabulary {
            tokens: self.tokens,
            index: self.index,
        }
    }
}

/// A frozen token <-> index mapping. Index `0` is padding.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "TokenTable", into = "TokenTable")]
pub struct Vocabulary {
    tokens: Vec<Token>,
    index: HashMap<Token, usize>,
}

#[derive(Serialize, Deserialize)]
struct TokenTable {
    tokens: Vec<Token>,
}

impl TryFrom<TokenTable> for Vocabulary {
    type Error = VocabularyError;
    fn try_from(table: TokenTable) -> Result<Self, Self::Error> {
        Self::from_tokens(table.tokens)
    }
}

impl From<Vocabulary> for TokenTable {
    fn from(vocab: Vocabulary) -> Self {
        TokenTable {
            tokens: vocab.tokens,
        }
    }
}

impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.tokens == other.tokens
    }
}

impl Eq for Vocabulary {}

impl Vocabulary {
    /// Scans `corpus` in order and freezes the result.
    pub fn fit<'a, I>(corpus: I) -> Self
    where
        I: IntoIterator<Item = &'a Melody>,
    {
        let mut builder = VocabularyBuilder::new();
        for melody in corpus {
            builder.observe_melody(melody);
        }
        builder.freeze()
    }

    /// Rebuilds a vocabulary from its token table, where `tokens[i]` gets
    /// index `i + 1`.
    pub fn from_tokens(tokens: Vec<Token>) -> Result<Self, VocabularyError> {
        let mut index = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            if index.insert(token.clone(), i + 1).is_some() {
                return Err(VocabularyError::DuplicateToken {
                    token: token.to_string(),
                });
            }
        }
        Ok(Self { tokens, index })
    }

    /// Number of distinct tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// `len() + 1`, the number of classes including padding.
    pub fn size_with_padding(&self) -> usize {
        self.tokens.len() + 1
    }

    pub fn index_of(&self, token: &Token) -> Option<usize> {
        self.index.get(token).copied()
    }

    /// The token at `index`, `None` for padding or out of range indices.
    pub fn token(&self, index: usize) -> Option<&Token> {
        match index {
            PAD_INDEX => None,
            i => self.tokens.get(i - 1),
        }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn encode(&self, melody: &Melody) -> Result<Vec<usize>, VocabularyError> {
        melody
            .iter()
            .enumerate()
            .map(|(position, token)| {
                self.index_of(token)
                    .ok_or_else(|| VocabularyError::UnknownToken {
                        token: token.to_string(),
                        position,
                    })
            })
            .collect()
    }

    /// Maps indices back to tokens. Padding is dropped.
    pub fn decode(&self, indices: &[usize]) -> Result<Melody, VocabularyError> {
        indices
            .iter()
            .filter(|&&i| i != PAD_INDEX)
            .map(|&i| {
                self.token(i)
                    .cloned()
                    .ok_or(VocabularyError::IndexOutOfRange {
                        index: i,
                        size_with_padding: self.size_with_padding(),
                    })
            })
            .collect()
    }

    /// Fails unless `size_with_padding` matches this vocabulary.
    pub fn check_size(&self, size_with_padding: usize) -> Result<(), VocabularyError> {
        if size_with_padding == self.size_with_padding() {
            Ok(())
        } else {
            Err(VocabularyError::SizeMismatch {
                expected: size_with_padding,
                actual: self.size_with_padding(),
            })
        }
    }

    /// Fails unless `other` maps every index to the same token as this
    /// vocabulary. Sizes are compared first.
    pub fn check_table(&self, other: &Vocabulary) -> Result<(), VocabularyError> {
        other.check_size(self.size_with_padding())?;
        match self.tokens.iter().zip(&other.tokens).position(|(a, b)| a != b) {
            Some(i) => Err(VocabularyError::TableMismatch {
                first_difference: i + 1,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn melodies(records: &[&str]) -> Vec<Melody> {
        records
            .iter()
            .map(|r| Melody::parse_record(r).unwrap())
            .collect()
    }

    #[test]
    fn test_first_occurrence_order() {
        let corpus = melodies(&["E4-1.0, C4-1.0, E4-1.0", "G4-0.5, C4-1.0, A4-2.0"]);
        let vocab = Vocabulary::fit(&corpus);
        let tokens: Vec<&str> = vocab.tokens().iter().map(Token::as_str).collect();
        assert_eq!(tokens, ["E4-1.0", "C4-1.0", "G4-0.5", "A4-2.0"]);
        assert_eq!(vocab.encode(&corpus[1]).unwrap(), vec![3, 2, 4]);
    }

    #[test]
    fn test_refit_is_identical() {
        let corpus = melodies(&["D4-1.0, F4-1.0", "F4-1.0, A4-1.0, D4-1.0"]);
        assert_eq!(Vocabulary::fit(&corpus), Vocabulary::fit(&corpus));
    }

    #[test]
    fn test_round_trip_and_size() {
        let corpus = melodies(&[
            "C4-1.0, D4-1.0, E4-1.0, C4-1.0",
            "E4-1.0, F4-1.0, G4-2.0",
            "G4-0.5, A4-0.5, G4-0.5, F4-0.5, E4-1.0, C4-1.0",
        ]);
        let vocab = Vocabulary::fit(&corpus);
        let distinct: std::collections::HashSet<_> =
            corpus.iter().flat_map(|m| m.iter()).collect();
        assert_eq!(vocab.size_with_padding(), distinct.len() + 1);
        for melody in &corpus {
            let encoded = vocab.encode(melody).unwrap();
            assert!(encoded.iter().all(|&i| i != PAD_INDEX));
            assert_eq!(&vocab.decode(&encoded).unwrap(), melody);
        }
    }

    #[test]
    fn test_unknown_token() {
        let vocab = Vocabulary::fit(&melodies(&["C4-1.0, D4-1.0"]));
        let unseen = Melody::parse_record("C4-1.0, B9-4.0").unwrap();
        assert_eq!(
            vocab.encode(&unseen),
            Err(VocabularyError::UnknownToken {
                token: "B9-4.0".into(),
                position: 1
            })
        );
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn test_decode_drops_padding_and_rejects_unknown_indices() {
        let vocab = Vocabulary::fit(&melodies(&["C4-1.0, D4-1.0"]));
        assert_eq!(vocab.decode(&[2, 1, 0, 0]).unwrap().to_record(), "D4-1.0, C4-1.0");
        assert_eq!(
            vocab.decode(&[1, 3]),
            Err(VocabularyError::IndexOutOfRange {
                index: 3,
                size_with_padding: 3
            })
        );
    }

    #[test]
    fn test_duplicate_table_is_rejected() {
        let json = r#"{"tokens":["C4-1.0","C4-1.0"]}"#;
        assert!(serde_json::from_str::<Vocabulary>(json).is_err());
    }

    #[test]
    fn test_check_size() {
        let vocab = Vocabulary::fit(&melodies(&["C4-1.0, D4-1.0"]));
        assert!(vocab.check_size(3).is_ok());
        assert_eq!(
            vocab.check_size(5),
            Err(VocabularyError::SizeMismatch {
                expected: 5,
                actual: 3
            })
        );
    }

    #[test]
    fn test_check_table() {
        let trained = Vocabulary::fit(&melodies(&["C4-1.0, E4-1.0, G4-1.0"]));
        let same = Vocabulary::fit(&melodies(&["C4-1.0, E4-1.0", "G4-1.0"]));
        assert!(trained.check_table(&same).is_ok());

        let reordered = Vocabulary::fit(&melodies(&["G4-1.0, E4-1.0, C4-1.0"]));
        assert_eq!(
            trained.check_table(&reordered),
            Err(VocabularyError::TableMismatch {
                first_difference: 1
            })
        );

        let smaller = Vocabulary::fit(&melodies(&["C4-1.0, E4-1.0"]));
        assert_eq!(
            trained.check_table(&smaller),
            Err(VocabularyError::SizeMismatch {
                expected: 4,
                actual: 3
            })
        );
    }
}
