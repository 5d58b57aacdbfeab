//! Class id to label mapping carried by the detection model.

use regex::Regex;
use std::collections::BTreeMap;

/// Matches `0: 'person'` / `1: "bicycle"` entries of an exported `names` literal.
const NAMES_ENTRY_PATTERN: &str = r#"(\d+)\s*:\s*(?:'([^']*)'|"([^"]*)")"#;

/// Read-only mapping from integer class id to human-readable class name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassNameTable {
    names: BTreeMap<usize, String>,
}

impl ClassNameTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = (usize, S)>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(|(id, name)| (id, name.into())).collect(),
        }
    }

    /// Placeholder labels `class0..classN` for models exported without names.
    pub fn numbered(count: usize) -> Self {
        Self::new((0..count).map(|id| (id, format!("class{id}"))))
    }

    /// Parses the `names` custom metadata written by YOLO ONNX exports,
    /// e.g. `{0: 'person', 1: 'bicycle'}`.
    pub fn parse_metadata(raw: &str) -> anyhow::Result<Self> {
        let pattern = Regex::new(NAMES_ENTRY_PATTERN)?;

        let mut names = BTreeMap::new();
        for captures in pattern.captures_iter(raw) {
            let id: usize = captures[1].parse()?;
            let name = captures
                .get(2)
                .or_else(|| captures.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            names.insert(id, name);
        }

        if names.is_empty() {
            anyhow::bail!("No class names found in model metadata: {raw:?}");
        }

        Ok(Self { names })
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(&class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(|(id, name)| (*id, name.as_str()))
    }
}
