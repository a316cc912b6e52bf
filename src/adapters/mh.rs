//! MH: one file per message, named by a decimal integer (spec.md §4.3).
//!
//! Scanning tracks visited `(device, inode)` pairs the way
//! `camel-mh-store.c`'s directory walk does, so a symlink cycle under the
//! folder root can't spin the scan forever.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::adapters::{apply_headers_to_record, FolderAdapter};
use crate::error::{Result, StoreError};
use crate::models::message::MessageRecord;

pub struct MhAdapter {
    root: PathBuf,
    next_uid: u64,
}

impl MhAdapter {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let mut adapter = Self { root, next_uid: 1 };
        adapter.refresh_info()?;
        Ok(adapter)
    }

    fn scan_message_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        Self::walk(&self.root, &mut visited, &mut out)?;
        Ok(out)
    }

    fn walk(dir: &Path, visited: &mut HashSet<(u64, u64)>, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
        let meta = fs::metadata(dir)?;
        let key = (meta.dev(), meta.ino());
        if !visited.insert(key) {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                Self::walk(&path, visited, out)?;
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".folders" || name.starts_with('.') {
                continue;
            }
            if name.parse::<u64>().is_ok() {
                out.push((name, path));
            }
        }
        Ok(())
    }
}

impl FolderAdapter for MhAdapter {
    fn append(&mut self, body: &[u8], info: &mut MessageRecord) -> Result<String> {
        let existing: HashSet<u64> = self
            .scan_message_files()?
            .into_iter()
            .filter_map(|(name, _)| name.parse().ok())
            .collect();
        let mut candidate = self.next_uid.max(existing.iter().max().copied().unwrap_or(0) + 1);
        while existing.contains(&candidate) {
            candidate += 1;
        }
        let uid = candidate.to_string();
        self.next_uid = candidate + 1;

        let tmp_path = self.root.join(format!(".{uid}.tmp"));
        fs::write(&tmp_path, body)?;
        let final_path = self.root.join(&uid);
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        info.uid = uid.clone();
        info.bdata = uid.clone();
        Ok(uid)
    }

    fn get_message(&self, uid: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.root.join(uid))?)
    }

    fn get_filename(&self, uid: &str) -> Result<PathBuf> {
        Ok(self.root.join(uid))
    }

    fn cmp_uids(&self, a: &str, b: &str) -> Ordering {
        let na: u64 = a.parse().unwrap_or(0);
        let nb: u64 = b.parse().unwrap_or(0);
        na.cmp(&nb)
    }

    fn refresh_info(&mut self) -> Result<Vec<MessageRecord>> {
        use rayon::prelude::*;

        let files = self.scan_message_files()?;
        let max_uid = files
            .iter()
            .filter_map(|(name, _)| name.parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        // Each file's header parse is independent, so a folder with
        // thousands of messages scans in parallel the same way
        // `query::threads` fanned per-thread work out across `rayon`.
        let records: Result<Vec<MessageRecord>> = files
            .par_iter()
            .map(|(name, path)| {
                let body = fs::read(path)?;
                let mut record = MessageRecord::new(name.clone());
                record.size = body.len() as u64;
                record.bdata = name.clone();
                apply_headers_to_record(&mut record, &body);
                Ok(record)
            })
            .collect();

        self.next_uid = self.next_uid.max(max_uid + 1);
        records
    }

    fn expunge(&mut self, deleted_uids: &[String]) -> Result<()> {
        for uid in deleted_uids {
            let path = self.root.join(uid);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::from(e)),
            }
        }
        Ok(())
    }
}

/// Rewrites every `.folders` line starting with `old_prefix` to start with
/// `new_prefix` instead (spec.md §4.3's rename contract). `.folders` itself
/// is an optional name-cache some MH trees keep; its absence is not an
/// error.
pub fn rewrite_folders_index(store_root: &Path, old_prefix: &str, new_prefix: &str) -> Result<()> {
    let index_path = store_root.join(".folders");
    let Ok(contents) = fs::read_to_string(&index_path) else {
        return Ok(());
    };
    let rewritten: String = contents
        .lines()
        .map(|line| {
            if let Some(rest) = line.strip_prefix(old_prefix) {
                format!("{new_prefix}{rest}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    let tmp_path = index_path.with_extension("tmp");
    fs::write(&tmp_path, rewritten)?;
    fs::rename(&tmp_path, &index_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_assigns_sequential_decimal_filenames() {
        let dir = tempdir().unwrap();
        let mut mh = MhAdapter::open(dir.path()).unwrap();
        let mut i1 = MessageRecord::new("");
        let mut i2 = MessageRecord::new("");
        let u1 = mh.append(b"Subject: one\r\n\r\nbody", &mut i1).unwrap();
        let u2 = mh.append(b"Subject: two\r\n\r\nbody", &mut i2).unwrap();
        assert_eq!(u1, "1");
        assert_eq!(u2, "2");
    }

    #[test]
    fn append_skips_over_existing_filenames() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("1"), b"existing").unwrap();
        let mut mh = MhAdapter::open(dir.path()).unwrap();
        let mut info = MessageRecord::new("");
        let uid = mh.append(b"Subject: new\r\n\r\nbody", &mut info).unwrap();
        assert_eq!(uid, "2");
    }

    #[test]
    fn symlink_loop_does_not_hang_the_scan() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        #[cfg(unix)]
        {
            let _ = std::os::unix::fs::symlink(dir.path(), sub.join("loop"));
        }
        let mut mh = MhAdapter::open(dir.path()).unwrap();
        let records = mh.refresh_info().unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn expunge_removes_the_message_file() {
        let dir = tempdir().unwrap();
        let mut mh = MhAdapter::open(dir.path()).unwrap();
        let mut info = MessageRecord::new("");
        let uid = mh.append(b"Subject: x\r\n\r\nbody", &mut info).unwrap();
        mh.expunge(&[uid.clone()]).unwrap();
        assert!(mh.get_message(&uid).is_err());
    }
}
