use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};

use crate::error::{Error, Result};

/// Class names indexed by the position the data loader assigned them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    names: Vec<String>,
}

impl LabelMap {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(String::as_str).enumerate()
    }

    /// Writes one `index,name` line per class, in index order.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_path(path.as_ref())?;
        for (index, name) in self.iter() {
            writer.write_record([index.to_string().as_str(), name])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .from_path(path.as_ref())?;

        let mut entries: Vec<(usize, String)> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let index = record
                .get(0)
                .ok_or_else(|| Error::Labels("missing index column".to_string()))?
                .trim()
                .parse::<usize>()
                .map_err(|err| Error::Labels(format!("invalid index: {err}")))?;
            let name = record
                .get(1)
                .ok_or_else(|| Error::Labels(format!("missing name for index {index}")))?;
            entries.push((index, name.to_string()));
        }

        entries.sort_by_key(|(index, _)| *index);
        for (expected, (index, _)) in entries.iter().enumerate() {
            if *index != expected {
                return Err(Error::Labels(format!(
                    "indices must be contiguous from 0, found {index} at position {expected}"
                )));
            }
        }

        Ok(Self::new(entries.into_iter().map(|(_, name)| name).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats() -> LabelMap {
        LabelMap::new(vec!["cats".to_string(), "non_cats".to_string()])
    }

    #[test]
    fn lookup_both_ways() {
        let labels = cats();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.name(1), Some("non_cats"));
        assert_eq!(labels.index_of("cats"), Some(0));
        assert_eq!(labels.index_of("dogs"), None);
        assert_eq!(labels.name(2), None);
    }

    #[test]
    fn save_writes_index_name_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");

        cats().save(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "0,cats\n1,non_cats\n");
    }

    #[test]
    fn save_then_load_recovers_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        let labels = LabelMap::new(vec![
            "cats".to_string(),
            "lions, tigers".to_string(),
            "non_cats".to_string(),
        ]);

        labels.save(&path).unwrap();
        let loaded = LabelMap::load(&path).unwrap();

        assert_eq!(loaded, labels);
        for (index, name) in labels.iter() {
            assert_eq!(loaded.name(index), Some(name));
        }
    }

    #[test]
    fn load_accepts_unordered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(&path, "1,non_cats\n0,cats\n").unwrap();

        assert_eq!(LabelMap::load(&path).unwrap(), cats());
    }

    #[test]
    fn load_rejects_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(&path, "0,cats\n2,non_cats\n").unwrap();

        assert!(matches!(LabelMap::load(&path), Err(Error::Labels(_))));
    }

    #[test]
    fn load_rejects_bad_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(&path, "zero,cats\n").unwrap();

        assert!(matches!(LabelMap::load(&path), Err(Error::Labels(_))));
    }
}
