//! Perflib title index to name mapping.
//!
//! Windows publishes counter and object names as a `REG_MULTI_SZ` value
//! (`Counter 009` under `HKEY_PERFORMANCE_DATA`): UTF-16 strings alternating
//! between a decimal title index and its English name.

use std::collections::HashMap;

use super::binary::ParseError;

/// Title index -> name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameTable {
    names: HashMap<u32, String>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw `REG_MULTI_SZ` buffer (UTF-16LE).
    pub fn from_multi_sz(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() % 2 != 0 {
            return Err(ParseError::new(format!(
                "name table has odd byte length {}",
                bytes.len()
            )));
        }
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Self::from_utf16(&units)
    }

    /// Parses an already-decoded UTF-16 `REG_MULTI_SZ` value.
    ///
    /// Pairs whose index is not a number are skipped; the list ends at the
    /// first empty string.
    pub fn from_utf16(units: &[u16]) -> Result<Self, ParseError> {
        let mut table = Self::new();
        let mut strings = units.split(|&u| u == 0).map(String::from_utf16_lossy);

        while let Some(index) = strings.next() {
            if index.is_empty() {
                break;
            }
            let Some(name) = strings.next() else {
                return Err(ParseError::new(format!(
                    "name table entry {} has no name",
                    index
                )));
            };
            if let Ok(index) = index.trim().parse::<u32>() {
                table.names.insert(index, name);
            }
        }

        Ok(table)
    }

    pub fn insert(&mut self, index: u32, name: impl Into<String>) {
        self.names.insert(index, name.into());
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.names.get(&index).map(String::as_str)
    }

    /// Name for `index`, or the index itself when unknown.
    pub fn name_or_index(&self, index: u32) -> String {
        self.get(index)
            .map(str::to_string)
            .unwrap_or_else(|| index.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
