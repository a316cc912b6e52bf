//! mbox: one flat file, messages delimited by `From ` lines (spec.md §4.3).
//!
//! Cross-process coordination is a dotlock (`<path>.lock`, created with
//! `OpenOptions::create_new` so the attempt itself is the compare-and-swap)
//! rather than `fcntl` byte-range locks — this crate has no `libc`/`fs2`
//! dependency to call `fcntl` through, and the dotlock is the original's
//! own fallback for filesystems where `fcntl` locking is unavailable
//! (`camel-lock.h`). The retry/staleness numbers mirror spec.md §4.3.

use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;

use crate::adapters::{apply_headers_to_record, FolderAdapter};
use crate::error::{Result, StoreError};
use crate::models::message::MessageRecord;

const LOCK_RETRIES: u32 = 5;
const LOCK_RETRY_DELAY: Duration = Duration::from_secs(2);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(60);

/// A dotlock held for the lifetime of one append/expunge. Dropping it
/// removes `<path>.lock`.
struct DotLock {
    path: PathBuf,
}

impl DotLock {
    fn acquire(mbox_path: &Path) -> Result<Self> {
        let lock_path = mbox_path.with_extension("lock");
        for attempt in 0..=LOCK_RETRIES {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(_) => return Ok(Self { path: lock_path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&lock_path) {
                        warn!("removing stale mbox lock {:?}", lock_path);
                        let _ = fs::remove_file(&lock_path);
                        continue;
                    }
                    if attempt == LOCK_RETRIES {
                        return Err(StoreError::Io(format!(
                            "could not acquire mbox lock {:?} after {} retries",
                            lock_path, LOCK_RETRIES
                        )));
                    }
                    thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!()
    }

    fn is_stale(lock_path: &Path) -> bool {
        let Ok(meta) = fs::metadata(lock_path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > LOCK_STALE_AFTER)
            .unwrap_or(false)
    }
}

impl Drop for DotLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Quotes every line in `body` that would otherwise read as a new `From `
/// delimiter, prefixing any run of `>` already present plus one more
/// (SPEC_FULL.md's mbox quoting rule, matching the classic mbox `>From `
/// convention).
pub fn quote_from_lines(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for line in split_lines_keep_ending(body) {
        if line.starts_with(b"From ") {
            out.push(b'>');
        }
        out.extend_from_slice(line);
    }
    out
}

/// Reverses [`quote_from_lines`]: strips exactly one leading `>` from any
/// line that reads `>From ` (or `>`-prefixed variants of it).
pub fn unquote_from_lines(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for line in split_lines_keep_ending(body) {
        let mut rest = line;
        if rest.starts_with(b">") {
            let stripped = &rest[1..];
            if stripped.starts_with(b"From ") || (stripped.starts_with(b">") && is_quoted_from(stripped)) {
                rest = stripped;
            }
        }
        out.extend_from_slice(rest);
    }
    out
}

fn is_quoted_from(line: &[u8]) -> bool {
    let mut rest = line;
    while rest.starts_with(b">") {
        rest = &rest[1..];
    }
    rest.starts_with(b"From ")
}

fn split_lines_keep_ending(data: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' {
            out.push(&data[start..=i]);
            start = i + 1;
        }
    }
    if start < data.len() {
        out.push(&data[start..]);
    }
    out
}

/// One mbox file plus the byte offset of each message's `From ` line,
/// recovered by scanning (there is no separate index file).
pub struct MboxAdapter {
    path: PathBuf,
    offsets: std::collections::HashMap<String, u64>,
    next_uid: u64,
}

impl MboxAdapter {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            File::create(&path)?;
        }
        let mut adapter = Self {
            path,
            offsets: std::collections::HashMap::new(),
            next_uid: 1,
        };
        adapter.refresh_info()?;
        Ok(adapter)
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Splits the file into `(from_line, body_including_from_line)` chunks,
    /// one per message, in file order.
    fn scan_messages(raw: &[u8]) -> Vec<&[u8]> {
        let mut starts = Vec::new();
        let mut at_line_start = true;
        for (i, &b) in raw.iter().enumerate() {
            if at_line_start && raw[i..].starts_with(b"From ") {
                starts.push(i);
            }
            at_line_start = b == b'\n';
        }
        let mut out = Vec::with_capacity(starts.len());
        for (idx, &start) in starts.iter().enumerate() {
            let end = starts.get(idx + 1).copied().unwrap_or(raw.len());
            out.push(&raw[start..end]);
        }
        out
    }
}

impl FolderAdapter for MboxAdapter {
    fn append(&mut self, body: &[u8], info: &mut MessageRecord) -> Result<String> {
        let _lock = DotLock::acquire(&self.path)?;

        let uid = self.next_uid.to_string();
        self.next_uid += 1;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let date = chrono::DateTime::from_timestamp(timestamp as i64, 0)
            .unwrap_or_default()
            .format("%a %b %e %H:%M:%S %Y");

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let offset = file.metadata()?.len();

        let quoted = quote_from_lines(body);
        write!(file, "From camel@localhost {date}\r\n")?;
        file.write_all(&crlf(&quoted))?;
        if !quoted.ends_with(b"\n") {
            file.write_all(b"\r\n")?;
        }
        file.write_all(b"\r\n")?;

        self.offsets.insert(uid.clone(), offset);
        info.uid = uid.clone();
        info.bdata = offset.to_string();
        Ok(uid)
    }

    fn get_message(&self, uid: &str) -> Result<Vec<u8>> {
        let offset = *self
            .offsets
            .get(uid)
            .ok_or_else(|| StoreError::NotFound(format!("mbox uid {uid}")))? as usize;
        let raw = self.read_all()?;
        let chunk = Self::scan_messages(&raw)
            .into_iter()
            .find(|c| (c.as_ptr() as usize) - (raw.as_ptr() as usize) == offset)
            .ok_or_else(|| StoreError::NotFound(format!("mbox uid {uid}")))?;
        let after_from_line = chunk
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| &chunk[i + 1..])
            .unwrap_or(&[]);
        Ok(unquote_from_lines(after_from_line))
    }

    fn get_filename(&self, _uid: &str) -> Result<PathBuf> {
        Ok(self.path.clone())
    }

    fn cmp_uids(&self, a: &str, b: &str) -> Ordering {
        let na: u64 = a.parse().unwrap_or(0);
        let nb: u64 = b.parse().unwrap_or(0);
        na.cmp(&nb)
    }

    fn refresh_info(&mut self) -> Result<Vec<MessageRecord>> {
        let raw = self.read_all()?;
        let chunks = Self::scan_messages(&raw);
        let mut records = Vec::with_capacity(chunks.len());
        let previous_offsets = std::mem::take(&mut self.offsets);

        for chunk in chunks {
            let offset = (chunk.as_ptr() as usize) - (raw.as_ptr() as usize);
            let existing_uid = previous_offsets
                .iter()
                .find(|(_, &o)| o == offset as u64)
                .map(|(u, _)| u.clone());
            let uid = existing_uid.unwrap_or_else(|| {
                let uid = self.next_uid.to_string();
                self.next_uid += 1;
                uid
            });

            let after_from_line = chunk
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| &chunk[i + 1..])
                .unwrap_or(&[]);
            let body = unquote_from_lines(after_from_line);

            let mut record = MessageRecord::new(uid.clone());
            record.size = body.len() as u64;
            record.bdata = offset.to_string();
            apply_headers_to_record(&mut record, &body);
            self.offsets.insert(uid, offset as u64);
            records.push(record);
        }
        Ok(records)
    }

    fn expunge(&mut self, deleted_uids: &[String]) -> Result<()> {
        let _lock = DotLock::acquire(&self.path)?;
        let raw = self.read_all()?;
        let chunks = Self::scan_messages(&raw);

        let mut kept = Vec::new();
        for chunk in &chunks {
            let offset = (chunk.as_ptr() as usize) - (raw.as_ptr() as usize);
            let uid = self
                .offsets
                .iter()
                .find(|(_, &o)| o as usize == offset)
                .map(|(u, _)| u.clone());
            if let Some(uid) = &uid {
                if deleted_uids.contains(uid) {
                    continue;
                }
            }
            kept.push((uid, *chunk));
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for (_, chunk) in &kept {
                tmp.write_all(chunk)?;
            }
        }
        fs::rename(&tmp_path, &self.path)?;

        let mut new_offsets = std::collections::HashMap::new();
        let mut running = 0u64;
        for (uid, chunk) in kept {
            if let Some(uid) = uid {
                new_offsets.insert(uid, running);
            }
            running += chunk.len() as u64;
        }
        self.offsets = new_offsets;
        Ok(())
    }
}

fn crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\r' {
            out.push(b'\r');
            if data.get(i + 1) == Some(&b'\n') {
                out.push(b'\n');
                i += 2;
                continue;
            }
            out.push(b'\n');
            i += 1;
            continue;
        }
        if data[i] == b'\n' {
            out.push(b'\r');
            out.push(b'\n');
            i += 1;
            continue;
        }
        out.push(data[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_get_message_roundtrips_body() {
        let dir = tempdir().unwrap();
        let mut mbox = MboxAdapter::open(dir.path().join("Inbox")).unwrap();
        let mut info = MessageRecord::new("");
        let uid = mbox
            .append(b"Subject: hi\r\n\r\nhello world\r\n", &mut info)
            .unwrap();
        assert_eq!(uid, "1");
        let body = mbox.get_message(&uid).unwrap();
        assert!(String::from_utf8_lossy(&body).contains("hello world"));
    }

    #[test]
    fn from_line_in_body_is_quoted_on_write_and_unquoted_on_read() {
        let dir = tempdir().unwrap();
        let mut mbox = MboxAdapter::open(dir.path().join("Inbox")).unwrap();
        let mut info = MessageRecord::new("");
        mbox.append(b"Subject: hi\r\n\r\nFrom the desk of someone\r\n", &mut info)
            .unwrap();

        let raw = fs::read(dir.path().join("Inbox")).unwrap();
        let text = String::from_utf8_lossy(&raw);
        assert!(text.contains(">From the desk of someone"));

        let body = mbox.get_message("1").unwrap();
        assert!(String::from_utf8_lossy(&body).contains("From the desk of someone"));
        assert!(!String::from_utf8_lossy(&body).contains(">From the desk"));
    }

    #[test]
    fn two_appended_messages_are_both_recoverable() {
        let dir = tempdir().unwrap();
        let mut mbox = MboxAdapter::open(dir.path().join("Inbox")).unwrap();
        let mut i1 = MessageRecord::new("");
        let mut i2 = MessageRecord::new("");
        let u1 = mbox.append(b"Subject: one\r\n\r\nbody one\r\n", &mut i1).unwrap();
        let u2 = mbox.append(b"Subject: two\r\n\r\nbody two\r\n", &mut i2).unwrap();
        assert_ne!(u1, u2);
        assert!(String::from_utf8_lossy(&mbox.get_message(&u1).unwrap()).contains("body one"));
        assert!(String::from_utf8_lossy(&mbox.get_message(&u2).unwrap()).contains("body two"));
    }

    #[test]
    fn expunge_atomically_rewrites_without_deleted_uids() {
        let dir = tempdir().unwrap();
        let mut mbox = MboxAdapter::open(dir.path().join("Inbox")).unwrap();
        let mut i1 = MessageRecord::new("");
        let mut i2 = MessageRecord::new("");
        let u1 = mbox.append(b"Subject: one\r\n\r\nbody one\r\n", &mut i1).unwrap();
        let u2 = mbox.append(b"Subject: two\r\n\r\nbody two\r\n", &mut i2).unwrap();

        mbox.expunge(&[u1.clone()]).unwrap();

        assert!(mbox.get_message(&u1).is_err());
        assert!(String::from_utf8_lossy(&mbox.get_message(&u2).unwrap()).contains("body two"));
    }

    #[test]
    fn refresh_info_recovers_subject_from_headers() {
        let dir = tempdir().unwrap();
        let mut mbox = MboxAdapter::open(dir.path().join("Inbox")).unwrap();
        let mut info = MessageRecord::new("");
        mbox.append(b"Subject: recovered\r\n\r\nbody\r\n", &mut info)
            .unwrap();

        let mut reopened = MboxAdapter::open(dir.path().join("Inbox")).unwrap();
        let records = reopened.refresh_info().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, "recovered");
    }
}
