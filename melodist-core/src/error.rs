use thiserror::Error;

/// A malformed melody record or token.
///
/// Localized to the offending record: corpus scans skip the record and keep
/// going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorpusFormatError {
    #[error("token {token:?} has no '-' between pitch and duration")]
    MissingSeparator { token: String },

    #[error("token {token:?} has an empty pitch or duration")]
    EmptyField { token: String },

    #[error("melody record is empty")]
    EmptyRecord,

    #[error("record {record}: {source}")]
    InRecord {
        record: usize,
        #[source]
        source: Box<CorpusFormatError>,
    },

    #[error("corpus is not a JSON array of melody strings: {0}")]
    NotARecordList(String),

    #[error("melody is neither a JSON token array nor a comma-joined string: {0}")]
    InvalidExchange(String),
}

impl CorpusFormatError {
    /// Tags this error with the index of the record it came from.
    pub fn in_record(self, record: usize) -> Self {
        match self {
            Self::InRecord { .. } => self,
            other => Self::InRecord {
                record,
                source: Box::new(other),
            },
        }
    }
}

/// Encoding or decoding against something the frozen vocabulary does not
/// contain, or two vocabularies that disagree in size or order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VocabularyError {
    #[error("token {token:?} at position {position} is not in the vocabulary")]
    UnknownToken { token: String, position: usize },

    #[error("index {index} is outside the vocabulary (size with padding {size_with_padding})")]
    IndexOutOfRange {
        index: usize,
        size_with_padding: usize,
    },

    #[error("vocabulary size mismatch: expected {expected} (with padding), found {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("vocabulary tables first differ at index {first_difference}")]
    TableMismatch { first_difference: usize },

    #[error("token {token:?} appears more than once in the vocabulary table")]
    DuplicateToken { token: String },

    #[error("cannot encode an empty melody")]
    EmptyMelody,
}

/// A token whose pitch or duration cannot be resolved to a note event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NoteParseError {
    #[error("{pitch:?} is not a pitch name")]
    UnknownPitch { pitch: String },

    #[error("pitch {pitch:?} resolves to note number {number}, outside 0..=127")]
    OutOfRange { pitch: String, number: i32 },

    #[error("{duration:?} is not a finite, non-negative quarter length")]
    InvalidDuration { duration: String },
}
