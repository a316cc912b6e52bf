//! maildir: `tmp`/`cur`/`new` siblings per folder (spec.md §4.3).
//!
//! Flag state rides in the filename suffix (`:2,FRS`) the way
//! `camel-maildir-summary.c` encodes it; a message with no suffix (still
//! sitting in `new/`) is treated as unseen. `transfer_to` tries a same-
//! filesystem `rename` first and falls back to copy+remove — this crate
//! has no `libc` dependency to inspect `EXDEV` directly, so any rename
//! failure is treated as a cross-device case worth retrying that way.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::adapters::{apply_headers_to_record, FolderAdapter};
use crate::error::{Result, StoreError};
use crate::models::message::{flags, MessageRecord};

/// Flattens a `/`-containing folder name into maildir++'s single-directory
/// scheme: `.` prefix, `/` replaced by `.`.
pub fn flatten_folder_name(name: &str) -> String {
    format!(".{}", name.replace('/', "."))
}

fn flags_to_info(bits: u32) -> String {
    let mut out = String::new();
    if bits & flags::DRAFT != 0 {
        out.push('D');
    }
    if bits & flags::FLAGGED != 0 {
        out.push('F');
    }
    if bits & flags::ANSWERED != 0 {
        out.push('R');
    }
    if bits & flags::SEEN != 0 {
        out.push('S');
    }
    if bits & flags::DELETED != 0 {
        out.push('T');
    }
    out
}

fn info_to_flags(info: &str) -> u32 {
    let mut bits = 0;
    for c in info.chars() {
        bits |= match c {
            'D' => flags::DRAFT,
            'F' => flags::FLAGGED,
            'R' => flags::ANSWERED,
            'S' => flags::SEEN,
            'T' => flags::DELETED,
            _ => 0,
        };
    }
    bits
}

/// Splits a cur/new filename into `(uid, flags)`. Files with no `:2,`
/// suffix (fresh deliveries still in `new/`) carry no flags.
fn parse_filename(name: &str) -> (String, u32) {
    match name.split_once(":2,") {
        Some((uid, info)) => (uid.to_string(), info_to_flags(info)),
        None => (name.to_string(), 0),
    }
}

/// Files living in `cur/` always carry a `:2,` suffix, even with no flags
/// set; only `new/` deliveries (an MDA dropping a message straight in)
/// have no suffix at all.
fn format_filename(uid: &str, bits: u32) -> String {
    format!("{uid}:2,{}", flags_to_info(bits))
}

pub struct MaildirAdapter {
    root: PathBuf,
}

impl MaildirAdapter {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in ["tmp", "cur", "new"] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self { root })
    }

    fn new_unique_name(&self) -> String {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        format!("{secs}.{}_{nanos}.local", process::id())
    }

    fn find_in(&self, dir: &str, uid: &str) -> Option<PathBuf> {
        let folder = self.root.join(dir);
        let entries = fs::read_dir(&folder).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let (entry_uid, _) = parse_filename(&name);
            if entry_uid == uid {
                return Some(entry.path());
            }
        }
        None
    }

    fn locate(&self, uid: &str) -> Option<PathBuf> {
        self.find_in("cur", uid).or_else(|| self.find_in("new", uid))
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<(String, u32, PathBuf)>> {
        let folder = self.root.join(dir);
        let mut out = Vec::new();
        for entry in fs::read_dir(&folder)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let (uid, bits) = parse_filename(&name);
            out.push((uid, bits, entry.path()));
        }
        Ok(out)
    }

    /// Moves a message into `dest`, preferring an in-place `rename` and
    /// falling back to copy+remove when that fails (spec.md §4.3).
    pub fn transfer_to(&mut self, uids: &[String], dest: &mut MaildirAdapter, delete_originals: bool) -> Result<()> {
        for uid in uids {
            let Some(src_path) = self.locate(uid) else {
                continue;
            };
            let bits = parse_filename(&src_path.file_name().unwrap().to_string_lossy()).1;
            let dest_name = format_filename(uid, bits);
            let dest_path = dest.root.join("cur").join(&dest_name);

            if delete_originals && fs::rename(&src_path, &dest_path).is_ok() {
                continue;
            }

            fs::copy(&src_path, &dest_path)?;
            if delete_originals {
                fs::remove_file(&src_path)?;
            }
        }
        Ok(())
    }
}

impl FolderAdapter for MaildirAdapter {
    fn append(&mut self, body: &[u8], info: &mut MessageRecord) -> Result<String> {
        let uid = self.new_unique_name();
        let tmp_path = self.root.join("tmp").join(&uid);
        fs::write(&tmp_path, body)?;

        let final_name = format_filename(&uid, info.flags);
        let final_path = self.root.join("cur").join(&final_name);
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        info.uid = uid.clone();
        info.bdata = flags_to_info(info.flags);
        Ok(uid)
    }

    fn get_message(&self, uid: &str) -> Result<Vec<u8>> {
        let path = self
            .locate(uid)
            .ok_or_else(|| StoreError::NotFound(format!("maildir uid {uid}")))?;
        Ok(fs::read(path)?)
    }

    fn get_filename(&self, uid: &str) -> Result<PathBuf> {
        self.locate(uid)
            .ok_or_else(|| StoreError::NotFound(format!("maildir uid {uid}")))
    }

    fn cmp_uids(&self, a: &str, b: &str) -> Ordering {
        let na: u64 = a.split('.').next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let nb: u64 = b.split('.').next().and_then(|s| s.parse().ok()).unwrap_or(0);
        na.cmp(&nb).then_with(|| a.cmp(b))
    }

    fn refresh_info(&mut self) -> Result<Vec<MessageRecord>> {
        let mut records = Vec::new();
        for dir in ["cur", "new"] {
            for (uid, bits, path) in self.list_dir(dir)? {
                let body = fs::read(&path)?;
                let mut record = MessageRecord::new(uid.clone());
                record.flags = bits;
                record.size = body.len() as u64;
                record.bdata = flags_to_info(bits);
                apply_headers_to_record(&mut record, &body);
                records.push(record);
            }
        }
        Ok(records)
    }

    fn expunge(&mut self, deleted_uids: &[String]) -> Result<()> {
        for uid in deleted_uids {
            if let Some(path) = self.locate(uid) {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_lands_in_cur_with_info_suffix() {
        let dir = tempdir().unwrap();
        let mut maildir = MaildirAdapter::open(dir.path()).unwrap();
        let mut info = MessageRecord::new("");
        info.flags = flags::SEEN | flags::FLAGGED;
        let uid = maildir.append(b"Subject: hi\r\n\r\nbody", &mut info).unwrap();

        let cur_entries: Vec<_> = fs::read_dir(dir.path().join("cur"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(cur_entries.len(), 1);
        assert!(cur_entries[0].starts_with(&uid));
        assert!(cur_entries[0].ends_with(":2,FS"));
    }

    #[test]
    fn refresh_info_reads_flags_back_from_filename() {
        let dir = tempdir().unwrap();
        let mut maildir = MaildirAdapter::open(dir.path()).unwrap();
        let mut info = MessageRecord::new("");
        info.flags = flags::ANSWERED;
        maildir.append(b"Subject: hi\r\n\r\nbody", &mut info).unwrap();

        let records = maildir.refresh_info().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].flags, flags::ANSWERED);
    }

    #[test]
    fn transfer_to_moves_message_between_maildirs() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let mut src = MaildirAdapter::open(src_dir.path()).unwrap();
        let mut dst = MaildirAdapter::open(dst_dir.path()).unwrap();
        let mut info = MessageRecord::new("");
        let uid = src.append(b"Subject: hi\r\n\r\nbody", &mut info).unwrap();

        src.transfer_to(&[uid.clone()], &mut dst, true).unwrap();

        assert!(src.get_message(&uid).is_err());
        assert!(String::from_utf8_lossy(&dst.get_message(&uid).unwrap()).contains("body"));
    }

    #[test]
    fn unnamed_message_in_new_has_no_flags() {
        let dir = tempdir().unwrap();
        let maildir = MaildirAdapter::open(dir.path()).unwrap();
        fs::write(dir.path().join("new").join("123.x.local"), b"Subject: a\r\n\r\nbody").unwrap();
        let mut maildir = maildir;
        let records = maildir.refresh_info().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].flags, 0);
    }
}
