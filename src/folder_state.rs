//! Per-folder state file: persistent properties (auto-sync, mark-seen
//! timeout, ...) stored next to a folder's data, independent of the
//! `folders`/`messages_*` tables in [`crate::store::db::StoreDb`]
//! (spec.md §6.1).
//!
//! Two on-disk shapes exist. The modern one is a flat `key=value` text
//! file. The legacy one (`camel-stateful-object.c`'s binary format, magic
//! `CLMD`) is read once and immediately rewritten in the modern shape. A
//! file that fails to parse in either shape is never an error: `load`
//! logs a warning and falls back to defaults, the same way a corrupt row
//! never wedges the rest of the store (spec.md §5).

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use log::warn;

const LEGACY_MAGIC: &[u8; 4] = b"CLMD";

/// One persisted property value. The legacy format's top 4 bits of its
/// tag distinguish these four shapes; the modern format just writes
/// `name=kind:value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    /// Tri-state checkbox (unset / off / on), `camel-enums.h`'s
    /// `CamelThreeState`.
    ThreeState(i8),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderState {
    properties: BTreeMap<String, PropertyValue>,
}

impl FolderState {
    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        self.properties.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.insert(name.into(), value);
    }

    /// Reads the state file at `path`, tolerating both shapes and any
    /// corruption; never returns an error.
    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(_) => return Self::default(),
        };

        if bytes.starts_with(LEGACY_MAGIC) {
            return match Self::parse_legacy(&bytes[4..]) {
                Some(state) => {
                    if let Err(e) = state.save(path) {
                        warn!("failed rewriting legacy folder state at {path:?} in modern format: {e}");
                    }
                    state
                }
                None => {
                    warn!("corrupt legacy folder state at {path:?}, using defaults");
                    Self::default()
                }
            };
        }

        Self::parse_modern(&bytes).unwrap_or_else(|| {
            warn!("unreadable folder state at {path:?}, using defaults");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut out = String::new();
        for (name, value) in &self.properties {
            let encoded = match value {
                PropertyValue::Bool(b) => format!("bool:{}", *b as i32),
                PropertyValue::Int32(v) => format!("int32:{v}"),
                PropertyValue::Int64(v) => format!("int64:{v}"),
                PropertyValue::ThreeState(v) => format!("three_state:{v}"),
            };
            out.push_str(name);
            out.push('=');
            out.push_str(&encoded);
            out.push('\n');
        }
        let tmp_path = path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(out.as_bytes())?;
        }
        fs::rename(&tmp_path, path)
    }

    fn parse_modern(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        let mut state = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, encoded) = line.split_once('=')?;
            let (kind, value) = encoded.split_once(':')?;
            let parsed = match kind {
                "bool" => PropertyValue::Bool(value.parse::<i32>().ok()? != 0),
                "int32" => PropertyValue::Int32(value.parse().ok()?),
                "int64" => PropertyValue::Int64(value.parse().ok()?),
                "three_state" => PropertyValue::ThreeState(value.parse().ok()?),
                _ => return None,
            };
            state.set(name, parsed);
        }
        Some(state)
    }

    /// Parses the payload following the 4-byte `CLMD` magic: a `uint32`
    /// version (0..=2), a metadata-item count (always 0 from modern
    /// writers, but version 0 readers must still skip `count` legacy
    /// name/value string pairs), and — for version >= 1 — a count-prefixed
    /// list of `(tag:uint32, value)` persistent properties, where the top
    /// 4 bits of `tag` select the value's width the way
    /// `camel-stateful-object.c`'s `enum camel_arg_t` does (`CAMEL_ARG_BOO`,
    /// `_INT`, `_3ST`, `_I64`). All integers are big-endian fixed-width;
    /// the low 28 bits of `tag` become the property name `prop_<n>` since
    /// this format has no string table to recover the original name from.
    fn parse_legacy(payload: &[u8]) -> Option<Self> {
        let mut cursor = Cursor { data: payload, pos: 0 };
        let version = cursor.read_u32()?;
        if version > 2 {
            return None;
        }

        let meta_count = cursor.read_u32()?;
        for _ in 0..meta_count {
            cursor.read_legacy_string()?;
            cursor.read_legacy_string()?;
        }

        let mut state = Self::default();
        if version == 0 {
            return Some(state);
        }

        let Some(prop_count) = cursor.read_u32() else {
            return Some(state);
        };
        if prop_count == 0 || prop_count > 1024 {
            return Some(state);
        }

        for _ in 0..prop_count {
            let tag = cursor.read_u32()?;
            let kind = tag >> 28;
            let name = format!("prop_{}", tag & 0x0fff_ffff);
            let value = match kind {
                0x5 => PropertyValue::Bool(cursor.read_u32()? != 0),
                0x1 => PropertyValue::Int32(cursor.read_i32()?),
                0x6 => PropertyValue::ThreeState(cursor.read_u32()? as i8),
                0x7 => PropertyValue::Int64(cursor.read_i64()?),
                _ => return None,
            };
            state.set(name, value);
        }
        Some(state)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_be_bytes(bytes.try_into().ok()?))
    }

    fn read_i32(&mut self) -> Option<i32> {
        self.read_u32().map(|v| v as i32)
    }

    fn read_i64(&mut self) -> Option<i64> {
        let bytes = self.data.get(self.pos..self.pos + 8)?;
        self.pos += 8;
        Some(i64::from_be_bytes(bytes.try_into().ok()?))
    }

    fn read_legacy_string(&mut self) -> Option<()> {
        let len = self.read_u32()? as usize;
        self.pos = self.pos.checked_add(len)?;
        if self.pos > self.data.len() {
            return None;
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn modern_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cmeta");
        let mut state = FolderState::default();
        state.set("auto_sync", PropertyValue::Bool(true));
        state.set("mark_seen_timeout", PropertyValue::Int32(1500));
        state.save(&path).unwrap();

        let loaded = FolderState::load(&path);
        assert_eq!(loaded.get("auto_sync"), Some(PropertyValue::Bool(true)));
        assert_eq!(loaded.get("mark_seen_timeout"), Some(PropertyValue::Int32(1500)));
    }

    #[test]
    fn legacy_version_zero_has_no_properties() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cmeta");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(LEGACY_MAGIC);
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        fs::write(&path, &bytes).unwrap();

        let state = FolderState::load(&path);
        assert!(state.properties.is_empty());
    }

    #[test]
    fn legacy_bool_property_is_recovered_and_rewritten_modern() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cmeta");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(LEGACY_MAGIC);
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes()); // no legacy meta-data
        bytes.extend_from_slice(&1u32.to_be_bytes()); // one property
        let tag: u32 = (0x5 << 28) | 7;
        bytes.extend_from_slice(&tag.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes()); // true
        fs::write(&path, &bytes).unwrap();

        let state = FolderState::load(&path);
        assert_eq!(state.get("prop_7"), Some(PropertyValue::Bool(true)));

        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("prop_7=bool:1"));
    }

    #[test]
    fn corrupt_legacy_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cmeta");
        fs::write(&path, b"CLMDxx").unwrap();

        let state = FolderState::load(&path);
        assert_eq!(state, FolderState::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        assert_eq!(FolderState::load(&path), FolderState::default());
    }
}
