//! Melody corpora: a JSON array of comma delimited melody records.
//!
//! Malformed records never abort a scan. Each one is logged, remembered in
//! [Corpus::rejected()], and skipped.

use tracing::{info, warn};

use crate::error::CorpusFormatError;
use crate::token::Melody;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Corpus {
    melodies: Vec<Melody>,
    rejected: Vec<CorpusFormatError>,
}

impl Corpus {
    /// Parses every record, skipping malformed ones.
    pub fn from_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut corpus = Self::default();
        for (i, record) in records.into_iter().enumerate() {
            match Melody::parse_record(record.as_ref()) {
                Ok(melody) => corpus.melodies.push(melody),
                Err(e) => {
                    let e = e.in_record(i);
                    warn!(record = i, error = %e, "skipping malformed melody record");
                    corpus.rejected.push(e);
                }
            }
        }
        info!(
            melodies = corpus.melodies.len(),
            rejected = corpus.rejected.len(),
            "parsed corpus"
        );
        corpus
    }

    /// Parses a JSON array of melody record strings.
    pub fn from_json_str(json: &str) -> Result<Self, CorpusFormatError> {
        let records: Vec<String> = serde_json::from_str(json)
            .map_err(|e| CorpusFormatError::NotARecordList(e.to_string()))?;
        Ok(Self::from_records(records))
    }

    /// Clips every melody to at most `max_len` tokens.
    pub fn truncate(&mut self, max_len: usize) {
        for melody in self.melodies.iter_mut() {
            melody.truncate(max_len);
        }
    }

    pub fn melodies(&self) -> &[Melody] {
        &self.melodies
    }

    pub fn rejected(&self) -> &[CorpusFormatError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.melodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.melodies.is_empty()
    }

    /// Length of the longest melody, 0 for an empty corpus.
    pub fn max_melody_len(&self) -> usize {
        self.melodies.iter().map(Melody::len).max().unwrap_or(0)
    }
}

impl From<Vec<Melody>> for Corpus {
    fn from(melodies: Vec<Melody>) -> Self {
        Self {
            melodies,
            rejected: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_records_are_skipped() {
        let corpus = Corpus::from_records([
            "C4-1.0, D4-1.0",
            "C4-1.0, D4",
            "",
            "E4-0.5, F4-0.5, G4-2.0",
        ]);
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.rejected().len(), 2);
        assert_eq!(
            corpus.rejected()[0],
            CorpusFormatError::MissingSeparator { token: "D4".into() }.in_record(1)
        );
        assert_eq!(
            corpus.rejected()[1],
            CorpusFormatError::EmptyRecord.in_record(2)
        );
        assert_eq!(corpus.max_melody_len(), 3);
    }

    #[test]
    fn test_from_json() {
        let corpus = Corpus::from_json_str(r#"["C4-1.0, D4-1.0", "E4-1.0"]"#).unwrap();
        assert_eq!(corpus.len(), 2);
        assert!(matches!(
            Corpus::from_json_str(r#"{"melodies": []}"#),
            Err(CorpusFormatError::NotARecordList(_))
        ));
    }

    #[test]
    fn test_truncate() {
        let mut corpus = Corpus::from_records(["C4-1.0, D4-1.0, E4-1.0", "F4-1.0"]);
        corpus.truncate(2);
        assert_eq!(corpus.melodies()[0].to_record(), "C4-1.0, D4-1.0");
        assert_eq!(corpus.melodies()[1].len(), 1);
    }
}
