//! Message records: the persistent row and its in-memory counterpart.

/// Message flags (spec.md §6.3). `FOLDER_FLAGGED` is the "dirty, needs
/// upload" bit; it is distinct from the persistent `dirty` column on
/// [`MessageRecord`], which tracks the same idea but is kept as its own
/// field because the source schema stores it that way (spec.md §4.1).
pub mod flags {
    pub const ANSWERED: u32 = 1 << 0;
    pub const DELETED: u32 = 1 << 1;
    pub const DRAFT: u32 = 1 << 2;
    pub const FLAGGED: u32 = 1 << 3;
    pub const SEEN: u32 = 1 << 4;
    pub const ATTACHMENTS: u32 = 1 << 5;
    pub const JUNK: u32 = 1 << 6;
    pub const SECURE: u32 = 1 << 7;
    pub const FOLDER_FLAGGED: u32 = 1 << 8;
    pub const JUNK_LEARN: u32 = 1 << 9;
}

/// Name -> flag bit for the `system-flag` search operator (spec.md §6.2).
pub fn system_flag_bit(name: &str) -> Option<u32> {
    Some(match name {
        "answered" => flags::ANSWERED,
        "deleted" => flags::DELETED,
        "draft" => flags::DRAFT,
        "flagged" => flags::FLAGGED,
        "seen" => flags::SEEN,
        "attachments" => flags::ATTACHMENTS,
        "junk" => flags::JUNK,
        "secure" => flags::SECURE,
        _ => return None,
    })
}

/// A 64-bit hash of a normalized `Message-ID` header (spec.md §3).
///
/// Two messages whose `Message-ID` normalizes to the same bytes are treated
/// as equal references regardless of surface formatting. The hash itself is
/// FNV-1a 64-bit: the source does not specify an algorithm, only that it
/// must be stable and 64-bit, and FNV-1a needs no external crate and is
/// trivially reproducible for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageIdHash(pub u64);

impl MessageIdHash {
    /// Normalize (lowercase, strip angle brackets) and hash a raw
    /// `Message-ID` header value.
    pub fn from_raw(message_id: &str) -> Self {
        let normalized = normalize_message_id(message_id);
        Self(fnv1a64(normalized.as_bytes()))
    }

    pub fn hi(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn lo(self) -> u32 {
        self.0 as u32
    }

    pub fn from_hi_lo(hi: u32, lo: u32) -> Self {
        Self(((hi as u64) << 32) | lo as u64)
    }
}

fn normalize_message_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix('<')
        .unwrap_or(trimmed)
        .strip_suffix('>')
        .unwrap_or(trimmed.strip_prefix('<').unwrap_or(trimmed));
    stripped.to_lowercase()
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// The decoded form of the `part` column: a message's own Message-ID hash
/// plus its References chain, in order (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePart {
    pub message_id: Option<MessageIdHash>,
    pub references: Vec<MessageIdHash>,
}

impl MessagePart {
    /// Encode as "count\n<hi> <lo> ..." — own id first (if present), then
    /// references, one pair per hash, decimal count prefix as spec.md §3
    /// describes.
    pub fn encode(&self) -> String {
        let mut hashes = Vec::with_capacity(1 + self.references.len());
        if let Some(id) = self.message_id {
            hashes.push(id);
        }
        hashes.extend(self.references.iter().copied());

        let mut out = format!("{}", hashes.len());
        for h in hashes {
            out.push_str(&format!(" {} {}", h.hi(), h.lo()));
        }
        out
    }

    pub fn decode(encoded: &str) -> Self {
        let mut tokens = encoded.split_whitespace();
        let count: usize = match tokens.next().and_then(|t| t.parse().ok()) {
            Some(c) => c,
            None => return Self::default(),
        };

        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            let (Some(hi), Some(lo)) = (tokens.next(), tokens.next()) else {
                break;
            };
            let (Ok(hi), Ok(lo)) = (hi.parse(), lo.parse()) else {
                break;
            };
            hashes.push(MessageIdHash::from_hi_lo(hi, lo));
        }

        let mut iter = hashes.into_iter();
        let message_id = iter.next();
        let references = iter.collect();
        Self {
            message_id,
            references,
        }
    }
}

/// A row of a `messages_<folder_id>` table (spec.md §3, §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub uid: String,
    pub flags: u32,
    pub msg_type: u32,
    /// Pending-upload bit, independent of `flags::FOLDER_FLAGGED`.
    pub dirty: bool,
    pub size: u64,
    pub dsent: i64,
    pub dreceived: i64,
    pub subject: String,
    pub mail_from: String,
    pub mail_to: String,
    pub mail_cc: String,
    pub mlist: String,
    /// Encoded [`MessagePart`].
    pub part: String,
    /// Space-separated user labels.
    pub labels: String,
    /// Encoded key/value user tags.
    pub usertags: String,
    pub cinfo: String,
    /// Adapter-opaque per-message state (mbox byte offset, maildir info
    /// suffix, ...).
    pub bdata: String,
    pub userheaders: String,
    pub preview: String,
}

impl MessageRecord {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            flags: 0,
            msg_type: 0,
            dirty: true,
            size: 0,
            dsent: 0,
            dreceived: 0,
            subject: String::new(),
            mail_from: String::new(),
            mail_to: String::new(),
            mail_cc: String::new(),
            mlist: String::new(),
            part: String::new(),
            labels: String::new(),
            usertags: String::new(),
            cinfo: String::new(),
            bdata: String::new(),
            userheaders: String::new(),
            preview: String::new(),
        }
    }

    pub fn part(&self) -> MessagePart {
        MessagePart::decode(&self.part)
    }

    pub fn set_part(&mut self, part: &MessagePart) {
        self.part = part.encode();
    }

    pub fn label_set(&self) -> Vec<&str> {
        self.labels.split_whitespace().collect()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label_set()
            .iter()
            .any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// Key/value pairs encoded as `key\tvalue` lines, used for `usertags` and
/// `userheaders` (spec.md §3 describes both as "encoded").
pub fn decode_kv(encoded: &str) -> Vec<(String, String)> {
    encoded
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn encode_kv(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}\t{}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The in-memory extension of a [`MessageRecord`]: full headers, decoded
/// tag/header arrays, and a pending-write marker. A `MessageInfo` is
/// "loaded" when present in the [`crate::summary::FolderSummary`]'s map;
/// otherwise only the DB row exists. Per-info locking from the original
/// (each `CamelMessageInfo` carries its own lock) is replaced by the
/// summary's single `RwLock` over its whole map, per the "back-pointer
/// graphs -> arena + dense index" redesign guidance in spec.md §9 — there
/// is no separate lock object here.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageInfo {
    pub record: MessageRecord,
    /// Raised by `FolderSummary::set_message_flags` and friends; cleared by
    /// `save()`. Distinct from `record.dirty` ("pending upload").
    pub changed: bool,
    pub headers: Option<Vec<(String, String)>>,
    pub user_headers: Vec<(String, String)>,
    pub user_tags: Vec<(String, String)>,
}

impl MessageInfo {
    pub fn from_record(record: MessageRecord) -> Self {
        let user_headers = decode_kv(&record.userheaders);
        let user_tags = decode_kv(&record.usertags);
        Self {
            record,
            changed: false,
            headers: None,
            user_headers,
            user_tags,
        }
    }

    /// Flush the decoded header/tag arrays back into the record's encoded
    /// string columns before a write.
    pub fn sync_record(&mut self) {
        self.record.userheaders = encode_kv(&self.user_headers);
        self.record.usertags = encode_kv(&self.user_tags);
    }

    pub fn get_user_tag(&self, tag: &str) -> Option<&str> {
        self.user_tags
            .iter()
            .find(|(k, _)| k == tag)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_hash_normalizes_case_and_brackets() {
        let a = MessageIdHash::from_raw("<Foo@Bar.com>");
        let b = MessageIdHash::from_raw("foo@bar.com");
        assert_eq!(a, b);
    }

    #[test]
    fn message_id_hash_hi_lo_roundtrip() {
        let h = MessageIdHash::from_raw("<abc@def>");
        let rebuilt = MessageIdHash::from_hi_lo(h.hi(), h.lo());
        assert_eq!(h, rebuilt);
    }

    #[test]
    fn part_encode_decode_roundtrip() {
        let part = MessagePart {
            message_id: Some(MessageIdHash::from_raw("<a@x>")),
            references: vec![
                MessageIdHash::from_raw("<b@x>"),
                MessageIdHash::from_raw("<c@x>"),
            ],
        };
        let encoded = part.encode();
        let decoded = MessagePart::decode(&encoded);
        assert_eq!(part, decoded);
    }

    #[test]
    fn part_decode_empty_is_default() {
        let decoded = MessagePart::decode("0");
        assert_eq!(decoded, MessagePart::default());
    }

    #[test]
    fn kv_encode_decode_roundtrip() {
        let pairs = vec![
            ("todo".to_string(), "1".to_string()),
            ("color".to_string(), "red".to_string()),
        ];
        let encoded = encode_kv(&pairs);
        let decoded = decode_kv(&encoded);
        assert_eq!(pairs, decoded);
    }

    #[test]
    fn has_label_is_whole_word_case_insensitive() {
        let mut rec = MessageRecord::new("u1");
        rec.labels = "todo Important".to_string();
        assert!(rec.has_label("TODO"));
        assert!(rec.has_label("important"));
        assert!(!rec.has_label("tod"));
    }

    #[test]
    fn system_flag_bit_known_and_unknown() {
        assert_eq!(system_flag_bit("seen"), Some(flags::SEEN));
        assert_eq!(system_flag_bit("bogus"), None);
    }
}
