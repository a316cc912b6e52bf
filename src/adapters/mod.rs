//! Local folder adapters: on-disk formats a [`crate::store::db::StoreDb`]
//! folder can be backed by (spec.md §4.3). Each format owns its own file
//! layout and its own notion of a uid; the summary/search layers never see
//! the difference.
//!
//! `transfer` is intentionally not part of the shared trait: the original
//! only ever moves messages between two folders of the *same* provider
//! (`camel-local-store.c`'s `transfer_messages_to` is implemented once per
//! provider, not generically), so each adapter exposes its own
//! `transfer_to` taking `&Self` as the destination instead of a trait
//! object.

pub mod maildir;
pub mod mbox;
pub mod mh;

use std::cmp::Ordering;
use std::path::PathBuf;

use crate::error::Result;
use crate::models::message::MessageRecord;

/// Operations the summary layer drives against any local folder format.
pub trait FolderAdapter {
    /// Writes `body` as a new message and returns the uid it was assigned.
    /// `info` carries the metadata needed to pick that uid and to record
    /// adapter-specific state back into `info.bdata`.
    fn append(&mut self, body: &[u8], info: &mut MessageRecord) -> Result<String>;

    /// Raw bytes of the message named by `uid`, as would be re-read from
    /// disk — `>From`-quoting (mbox) and info-suffix framing (maildir) are
    /// undone before returning.
    fn get_message(&self, uid: &str) -> Result<Vec<u8>>;

    /// Path backing `uid`. For mbox, every uid shares the folder's single
    /// file; for MH and maildir each uid has its own path.
    fn get_filename(&self, uid: &str) -> Result<PathBuf>;

    fn cmp_uids(&self, a: &str, b: &str) -> Ordering;

    fn sort_uids(&self, uids: &mut [String]) {
        uids.sort_by(|a, b| self.cmp_uids(a, b));
    }

    /// Rescans the on-disk format and returns every message currently
    /// present, so the caller can diff against the summary and produce a
    /// [`crate::models::ChangeInfo`].
    fn refresh_info(&mut self) -> Result<Vec<MessageRecord>>;

    /// Permanently removes the uids in `deleted_uids` from disk.
    fn expunge(&mut self, deleted_uids: &[String]) -> Result<()>;
}

/// Extracts `(header-name-lowercased, value)` pairs from an RFC 5322
/// header block, stopping at the first blank line. Shared by mbox/MH's
/// `refresh_info`, which both need just enough parsing to populate a
/// [`MessageRecord`]'s subject/from/to/cc/message-id without a full MIME
/// parser (out of scope per spec.md §4.3's Non-goals).
pub(crate) fn parse_headers(raw: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(raw);
    let mut headers = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
        if line.is_empty() {
            break;
        }
        if (line.starts_with(' ') || line.starts_with('\t')) && current.is_some() {
            let (_, value) = current.as_mut().unwrap();
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        if let Some(done) = current.take() {
            headers.push(done);
        }
        if let Some((name, value)) = line.split_once(':') {
            current = Some((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    if let Some(done) = current.take() {
        headers.push(done);
    }
    headers
}

pub(crate) fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Fills in the subject/from/to/cc/message-id/references fields of `record`
/// from a raw header block, matching what `camel-folder-summary.c`'s
/// `info_new_from_header` extracts for local providers.
pub(crate) fn apply_headers_to_record(record: &mut MessageRecord, raw: &[u8]) {
    use crate::models::message::{MessageIdHash, MessagePart};

    let headers = parse_headers(raw);
    if let Some(v) = header_value(&headers, "subject") {
        record.subject = v.to_string();
    }
    if let Some(v) = header_value(&headers, "from") {
        record.mail_from = v.to_string();
    }
    if let Some(v) = header_value(&headers, "to") {
        record.mail_to = v.to_string();
    }
    if let Some(v) = header_value(&headers, "cc") {
        record.mail_cc = v.to_string();
    }
    if let Some(v) = header_value(&headers, "list-id").or_else(|| header_value(&headers, "list-post")) {
        record.mlist = v.to_string();
    }

    let message_id = header_value(&headers, "message-id").map(MessageIdHash::from_raw);
    let references = header_value(&headers, "references")
        .or_else(|| header_value(&headers, "in-reply-to"))
        .map(|v| {
            v.split_whitespace()
                .filter(|tok| tok.starts_with('<'))
                .map(MessageIdHash::from_raw)
                .collect()
        })
        .unwrap_or_default();
    record.set_part(&MessagePart {
        message_id,
        references,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_headers_folds_continuation_lines() {
        let raw = b"Subject: hello\r\n world\r\nFrom: a@b.com\r\n\r\nbody";
        let headers = parse_headers(raw);
        assert_eq!(header_value(&headers, "subject"), Some("hello world"));
        assert_eq!(header_value(&headers, "from"), Some("a@b.com"));
    }

    #[test]
    fn parse_headers_stops_at_blank_line() {
        let raw = b"Subject: a\n\nSubject: b\n";
        let headers = parse_headers(raw);
        assert_eq!(headers.len(), 1);
    }
}
