//! Case-insensitive SSDP header storage.

use std::collections::HashMap;

/// Header map keyed case-insensitively, keeping the sender's spelling.
///
/// Entries are stored in receipt order as `(original_name, value)`. A second
/// map indexes the lower-cased name to the first entry with that name, so
/// lookups by lower-case key are a single hash probe. Repeated headers are kept
/// and reachable through [`SsdpHeaders::get_all_lower`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsdpHeaders {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl SsdpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a header by an already lower-cased name.
    pub fn get_lower(&self, lower_name: &str) -> Option<&str> {
        self.index
            .get(lower_name)
            .map(|&idx| self.entries[idx].1.as_str())
    }

    /// Look up a header by name in any case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_lower(&name.to_ascii_lowercase())
    }

    /// All values for a lower-cased name, in receipt order.
    pub fn get_all_lower<'a>(&'a self, lower_name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(name, _)| name.eq_ignore_ascii_case(lower_name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    /// Set a header, replacing the first existing value with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let lower = name.to_ascii_lowercase();
        match self.index.get(&lower) {
            Some(&idx) => self.entries[idx] = (name, value.into()),
            None => {
                self.index.insert(lower, self.entries.len());
                self.entries.push((name, value.into()));
            }
        }
    }

    /// Append a header, keeping any existing value with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let lower = name.to_ascii_lowercase();
        self.index.entry(lower).or_insert(self.entries.len());
        self.entries.push((name, value.into()));
    }

    /// Original-cased `(name, value)` pairs in receipt order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SsdpHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = SsdpHeaders::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
