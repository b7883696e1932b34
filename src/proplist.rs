//! A minimal stand-in for the property-list data type. The real type
//! (arbitrary binary-or-string values, wire (de)serialization rules) is an
//! external collaborator out of scope for this core; `Context` only needs
//! an owned copy it can read, replace wholesale, and locally mutate via
//! `update`/`remove` before a request is sent.

use std::collections::BTreeMap;

pub const PROP_APPLICATION_NAME: &str = "application.name";
pub const PROP_APPLICATION_PROCESS_ID: &str = "application.process.id";
pub const PROP_APPLICATION_PROCESS_BINARY: &str = "application.process.binary";
pub const PROP_APPLICATION_LANGUAGE: &str = "application.language";
pub const PROP_APPLICATION_PROCESS_HOST: &str = "application.process.host";

/// The mode a client-initiated proplist update is performed under; matches
/// the three update modes the wire protocol supports (§6.1).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UpdateMode {
    Set,
    Merge,
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proplist {
    entries: BTreeMap<String, Vec<u8>>,
}

impl Proplist {
    pub fn new() -> Self {
        Proplist::default()
    }

    pub fn sets(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_owned(), value.as_bytes().to_vec());
    }

    pub fn gets(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Apply `other` to `self` under `mode`, as the local mirror of what a
    /// successful `UPDATE_CLIENT_PROPLIST` request does server-side. The
    /// wire request itself is built independently (§6.1 notes the context
    /// does not export the field it mutates here, but retrieval tests
    /// exercise this against a mock readback instead).
    pub fn update(&mut self, mode: UpdateMode, other: &Proplist) {
        match mode {
            UpdateMode::Set => {
                self.entries = other.entries.clone();
            }
            UpdateMode::Merge => {
                for (k, v) in &other.entries {
                    self.entries.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            UpdateMode::Replace => {
                for (k, v) in &other.entries {
                    self.entries.insert(k.clone(), v.clone());
                }
            }
        }
    }

    pub fn remove(&mut self, keys: &[&str]) {
        for key in keys {
            self.entries.remove(*key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_entirely() {
        let mut base = Proplist::new();
        base.sets("a", "1");
        let mut incoming = Proplist::new();
        incoming.sets("b", "2");
        base.update(UpdateMode::Set, &incoming);
        assert!(!base.contains("a"));
        assert_eq!(base.gets("b"), Some("2"));
    }

    #[test]
    fn merge_keeps_existing() {
        let mut base = Proplist::new();
        base.sets("a", "1");
        let mut incoming = Proplist::new();
        incoming.sets("a", "overwritten?");
        incoming.sets("b", "2");
        base.update(UpdateMode::Merge, &incoming);
        assert_eq!(base.gets("a"), Some("1"));
        assert_eq!(base.gets("b"), Some("2"));
    }

    #[test]
    fn replace_overwrites_existing() {
        let mut base = Proplist::new();
        base.sets("a", "1");
        let mut incoming = Proplist::new();
        incoming.sets("a", "2");
        base.update(UpdateMode::Replace, &incoming);
        assert_eq!(base.gets("a"), Some("2"));
    }

    #[test]
    fn remove_drops_listed_keys_only() {
        let mut p = Proplist::new();
        p.sets("a", "1");
        p.sets("b", "2");
        p.remove(&["a"]);
        assert!(!p.contains("a"));
        assert!(p.contains("b"));
    }
}
