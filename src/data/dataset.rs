use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::DataError;
use crate::utils::io;

/// One tokenized caption of one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub image_id: String,
    pub caption: Vec<usize>,
}

/// A dataset partition with its token vocabulary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Split {
    pub word_ids: HashMap<String, usize>,
    pub captions: Vec<CaptionRecord>,
}

impl Split {
    pub fn vocab_size(&self) -> usize {
        self.word_ids.len()
    }

    pub fn caption_count(&self) -> usize {
        self.captions.len()
    }

    /// Number of distinct images referenced by the captions
    pub fn image_count(&self) -> usize {
        self.image_ids().len()
    }

    /// Distinct image identifiers in first-seen order
    pub fn image_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.captions
            .iter()
            .map(|r| r.image_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    fn validate(&self, name: &str, check_tokens: bool) -> Result<(), DataError> {
        let vocab_size = self.vocab_size();
        let mut ids: Vec<usize> = self.word_ids.values().copied().collect();
        ids.sort_unstable();
        if ids.iter().enumerate().any(|(i, &id)| i != id) {
            return Err(DataError::Config(format!(
                "{name} vocabulary ids are not a contiguous range 0..{vocab_size}"
            )));
        }
        if !check_tokens {
            return Ok(());
        }

        for (n, record) in self.captions.iter().enumerate() {
            if record.caption.len() < 2 {
                return Err(DataError::Config(format!(
                    "{name} caption {n} of image '{}' has fewer than two tokens",
                    record.image_id
                )));
            }
            if let Some(&bad) = record.caption.iter().find(|&&t| t >= vocab_size) {
                return Err(DataError::Config(format!(
                    "{name} caption {n} has token id {bad} outside the vocabulary of {vocab_size}"
                )));
            }
        }
        Ok(())
    }
}

/// Preprocessed captions partitioned into train/val/test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptionDataset {
    pub train: Split,
    pub val: Split,
    pub test: Split,
}

impl CaptionDataset {
    /// Loads a dataset blob: JSON when the file ends in `.json`, bincode otherwise
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        let dataset: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => io::deserialize_json_from_file(path)?,
            _ => io::deserialize_from_file(path)?,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DataError> {
        io::serialize_to_file(path, self)?;
        Ok(())
    }

    /// Only the train split drives training, so only its captions are checked token by token
    pub fn validate(&self) -> Result<(), DataError> {
        if self.train.captions.is_empty() {
            return Err(DataError::Config("train split has no captions".into()));
        }
        self.train.validate("train", true)?;
        self.val.validate("val", false)?;
        self.test.validate("test", false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vocab(words: &[&str]) -> HashMap<String, usize> {
        words.iter().enumerate().map(|(i, w)| (w.to_string(), i)).collect()
    }

    fn record(image_id: &str, caption: &[usize]) -> CaptionRecord {
        CaptionRecord { image_id: image_id.into(), caption: caption.to_vec() }
    }

    fn sample() -> CaptionDataset {
        CaptionDataset {
            train: Split {
                word_ids: vocab(&["<S>", "</S>", "a", "dog"]),
                captions: vec![
                    record("img/1.jpg", &[0, 2, 3, 1]),
                    record("img/1.jpg", &[0, 3, 1]),
                    record("img/2.jpg", &[0, 2, 1]),
                ],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_counts() {
        let dataset = sample();
        assert_eq!(dataset.train.vocab_size(), 4);
        assert_eq!(dataset.train.caption_count(), 3);
        assert_eq!(dataset.train.image_count(), 2);
        assert_eq!(dataset.train.image_ids(), vec!["img/1.jpg", "img/2.jpg"]);
    }

    #[test]
    fn test_bincode_and_json_load() {
        let dir = tempdir().unwrap();
        let dataset = sample();

        let bin = dir.path().join("dataset.bin");
        dataset.save(&bin).unwrap();
        let loaded = CaptionDataset::load(&bin).unwrap();
        assert_eq!(loaded.train.captions, dataset.train.captions);

        let json = dir.path().join("dataset.json");
        std::fs::write(&json, serde_json::to_string(&dataset).unwrap()).unwrap();
        let loaded = CaptionDataset::load(&json).unwrap();
        assert_eq!(loaded.train.word_ids, dataset.train.word_ids);
    }

    #[test]
    fn test_out_of_vocabulary_token_is_rejected() {
        let mut dataset = sample();
        dataset.train.captions.push(record("img/3.jpg", &[0, 7, 1]));
        assert!(matches!(dataset.validate(), Err(DataError::Config(msg)) if msg.contains("token id 7")));
    }

    #[test]
    fn test_single_token_caption_is_rejected() {
        let mut dataset = sample();
        dataset.train.captions.push(record("img/3.jpg", &[0]));
        assert!(matches!(dataset.validate(), Err(DataError::Config(_))));
    }

    #[test]
    fn test_gapped_vocabulary_is_rejected() {
        let mut dataset = sample();
        dataset.train.word_ids.insert("cat".into(), 9);
        assert!(matches!(dataset.validate(), Err(DataError::Config(_))));
    }

    #[test]
    fn test_empty_train_split_is_rejected() {
        let dataset = CaptionDataset::default();
        assert!(matches!(dataset.validate(), Err(DataError::Config(_))));
    }
}
