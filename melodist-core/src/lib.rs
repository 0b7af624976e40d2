//! # melodist-core
//!
//! The data side of melodist: everything between a raw melody corpus and the
//! integer batches a transformer trains on, with no dependency on a tensor
//! library.
//!
//! # Tokens and melodies
//!
//! *See [token] for more information.*
//!
//! A [token::Token] is one musical event written as `"<pitch>-<duration>"`,
//! for example `"C4-1.0"`. A [token::Melody] is an ordered list of tokens.
//!
//! ```rust
//! # use melodist_core::prelude::*;
//! let melody = Melody::parse_record("C4-1.0, E4-0.5, G4-1.0").unwrap();
//! assert_eq!(melody.len(), 3);
//! assert_eq!(melody.to_record(), "C4-1.0, E4-0.5, G4-1.0");
//! ```
//!
//! # Vocabularies
//!
//! *See [vocab] for more information.*
//!
//! Vocabularies are built in two phases. A [vocab::VocabularyBuilder] accumulates
//! tokens in order of first occurrence, and is then frozen into an immutable
//! [vocab::Vocabulary]. Index `0` is reserved for padding.
//!
//! ```rust
//! # use melodist_core::prelude::*;
//! let corpus = vec![Melody::parse_record("C4-1.0, E4-1.0, C4-1.0").unwrap()];
//! let vocab = Vocabulary::fit(&corpus);
//! assert_eq!(vocab.size_with_padding(), 3);
//! assert_eq!(vocab.encode(&corpus[0]).unwrap(), vec![1, 2, 1]);
//! ```
//!
//! # Datasets
//!
//! *See [dataset] for more information.*
//!
//! A [dataset::Dataset] turns encoded melodies into shuffled, padded batches of
//! `(prefix, target)` training pairs.
//!
//! # Notes
//!
//! *See [note] for more information.*
//!
//! [note::NoteEvent] resolves a token into a note number and a tick count for
//! note-event file export.

pub mod corpus;
pub mod dataset;
pub mod error;
pub mod note;
pub mod token;
pub mod vocab;

/// The index reserved for padding. Never assigned to a real token.
pub const PAD_INDEX: usize = 0;

pub mod prelude {
    pub use crate::corpus::Corpus;
    pub use crate::dataset::{training_pairs, Dataset, PaddedBatch, ShuffleBuffer, TrainingPair};
    pub use crate::error::{CorpusFormatError, NoteParseError, VocabularyError};
    pub use crate::note::{NoteEvent, NoteTiming};
    pub use crate::token::{Melody, Token};
    pub use crate::vocab::{Vocabulary, VocabularyBuilder};
    pub use crate::PAD_INDEX;
}
