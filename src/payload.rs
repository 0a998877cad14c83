//! Payload values, the binding of a payload tuple to markers in a single
//! request, and the cartesian-product dictionary iterator the seed stage
//! drains.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Tag on a [`FuzzWord`]: either a plain string from a wordlist/generator,
/// or a pre-built request consumed via the `payload` transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzWordType {
    Word,
    FuzzRes,
}

/// One atomic payload value.
#[derive(Debug, Clone)]
pub struct FuzzWord {
    pub content: String,
    pub word_type: FuzzWordType,
}

impl FuzzWord {
    pub fn word(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            word_type: FuzzWordType::Word,
        }
    }
}

/// Maps a 1-based payload index to the value bound to it for one emitted
/// request. Built once by the seed stage per request; immutable afterward.
#[derive(Debug, Clone)]
pub struct PayloadManager {
    words: Arc<Vec<FuzzWord>>,
}

impl PayloadManager {
    pub fn new(words: Vec<FuzzWord>) -> Self {
        Self {
            words: Arc::new(words),
        }
    }

    pub fn empty() -> Self {
        Self::new(vec![FuzzWord::word("")])
    }

    /// 1-based lookup, matching the marker index convention (`FUZZ` == 1,
    /// `FUZ2Z` == 2, ...).
    pub fn get_payload_content(&self, index: usize) -> Result<&str> {
        self.words
            .get(index.saturating_sub(1))
            .map(|w| w.content.as_str())
            .ok_or_else(|| {
                Error::IncorrectFilter(format!("non-existent FUZZ payload index {index}"))
            })
    }

    pub fn get_payload_type(&self, index: usize) -> Result<&FuzzWordType> {
        self.words
            .get(index.saturating_sub(1))
            .map(|w| &w.word_type)
            .ok_or_else(|| {
                Error::IncorrectFilter(format!("non-existent FUZZ payload index {index}"))
            })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// One payload source: an in-memory word list, normally loaded from a `-w`
/// file or produced by a `-z` generator. Wordlist file I/O itself is a named
/// collaborator (§1) — this type only holds the already-read values.
#[derive(Debug, Clone)]
pub struct PayloadSource {
    pub words: Vec<String>,
}

impl PayloadSource {
    pub fn from_words(words: Vec<String>) -> Self {
        Self { words }
    }
}

/// The compiled cartesian-product iterator over one or more payload sources,
/// bound to the markers of a seed. Each call to `next()` yields one
/// [`FuzzWord`] tuple, one element per marker.
#[derive(Debug)]
pub struct Dictionary {
    sources: Vec<Vec<String>>,
    /// Current index into each source; advances like an odometer.
    cursor: Vec<usize>,
    exhausted: bool,
}

impl Dictionary {
    pub fn new(sources: Vec<PayloadSource>) -> Result<Self> {
        if sources.is_empty() || sources.iter().any(|s| s.words.is_empty()) {
            return Err(Error::BadOptions(
                "empty dictionary! please check payload or filter".into(),
            ));
        }
        let n = sources.len();
        Ok(Self {
            sources: sources.into_iter().map(|s| s.words).collect(),
            cursor: vec![0; n],
            exhausted: false,
        })
    }
}

impl Iterator for Dictionary {
    type Item = Vec<FuzzWord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let tuple: Vec<FuzzWord> = self
            .cursor
            .iter()
            .zip(self.sources.iter())
            .map(|(&i, src)| FuzzWord::word(src[i].clone()))
            .collect();

        // Odometer-style advance: rightmost source rolls fastest.
        let mut carry = true;
        for i in (0..self.sources.len()).rev() {
            if !carry {
                break;
            }
            self.cursor[i] += 1;
            if self.cursor[i] >= self.sources[i].len() {
                self.cursor[i] = 0;
            } else {
                carry = false;
            }
        }
        if carry {
            self.exhausted = true;
        }

        Some(tuple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_source_yields_every_word_once() {
        let dict = Dictionary::new(vec![PayloadSource::from_words(vec![
            "".into(),
            "admin".into(),
            "api".into(),
        ])])
        .unwrap();
        let words: Vec<String> = dict.map(|t| t[0].content.clone()).collect();
        assert_eq!(words, vec!["", "admin", "api"]);
    }

    #[test]
    fn two_sources_cartesian_product() {
        let dict = Dictionary::new(vec![
            PayloadSource::from_words(vec!["a".into(), "b".into()]),
            PayloadSource::from_words(vec!["1".into(), "2".into()]),
        ])
        .unwrap();
        let pairs: Vec<(String, String)> = dict
            .map(|t| (t[0].content.clone(), t[1].content.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a".into(), "1".into()),
                ("a".into(), "2".into()),
                ("b".into(), "1".into()),
                ("b".into(), "2".into()),
            ]
        );
    }

    #[test]
    fn empty_source_is_rejected() {
        let err = Dictionary::new(vec![PayloadSource::from_words(vec![])]).unwrap_err();
        assert!(matches!(err, Error::BadOptions(_)));
    }

    #[test]
    fn payload_manager_index_is_one_based() {
        let man = PayloadManager::new(vec![FuzzWord::word("admin")]);
        assert_eq!(man.get_payload_content(1).unwrap(), "admin");
        assert!(man.get_payload_content(2).is_err());
    }
}
