//! The s-expression AST the compiler walks (spec.md §6.2 grammar).

use crate::models::MessageIdHash;

/// How a header/body comparison should be evaluated. Shared between the
/// compiler (to decide LIKE vs UDF) and the UDFs themselves (to decide how
/// to compare `hay`/`needle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpKind {
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Exists,
    Regex,
    FullRegex,
    Soundex,
    HasWords,
}

impl CmpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CmpKind::Contains => "contains",
            CmpKind::StartsWith => "starts-with",
            CmpKind::EndsWith => "ends-with",
            CmpKind::Matches => "matches",
            CmpKind::Exists => "exists",
            CmpKind::Regex => "regex",
            CmpKind::FullRegex => "full-regex",
            CmpKind::Soundex => "soundex",
            CmpKind::HasWords => "has-words",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "contains" => CmpKind::Contains,
            "starts-with" => CmpKind::StartsWith,
            "ends-with" => CmpKind::EndsWith,
            "matches" => CmpKind::Matches,
            "exists" => CmpKind::Exists,
            "regex" => CmpKind::Regex,
            "full-regex" => CmpKind::FullRegex,
            "soundex" => CmpKind::Soundex,
            "has-words" => CmpKind::HasWords,
            _ => return None,
        })
    }

    /// LIKE-compatible kinds are the ones the compiler can turn into a
    /// direct `LIKE` expression against a dedicated column (spec.md §4.4).
    pub fn is_like_compatible(self) -> bool {
        matches!(
            self,
            CmpKind::Contains | CmpKind::StartsWith | CmpKind::EndsWith | CmpKind::Matches
        )
    }
}

/// `match-threads`'s expansion policy (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    None,
    Single,
    All,
    Replies,
    RepliesParents,
}

impl ThreadKind {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "none" => ThreadKind::None,
            "single" => ThreadKind::Single,
            "all" => ThreadKind::All,
            "replies" => ThreadKind::Replies,
            "replies_parents" => ThreadKind::RepliesParents,
            _ => return None,
        })
    }
}

/// One node of the compiled s-expression (spec.md §6.2).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Int(i64),
    Str(String),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    MatchAll(Box<Expr>),
    MatchThreads {
        kind: ThreadKind,
        include_subject: bool,
        expr: Box<Expr>,
    },
    CompareDate(Box<Expr>, Box<Expr>),
    BodyContains(String),
    BodyRegex(String),
    HeaderOp {
        header: String,
        kind: CmpKind,
        needle: String,
    },
    HeaderExists(String),
    HeaderHasWords {
        header: String,
        words: Vec<String>,
    },
    UserTag(String),
    UserFlag(String),
    SystemFlag(String),
    GetSentDate,
    GetReceivedDate,
    GetCurrentDate,
    GetRelativeMonths(i64),
    GetSize,
    Uid(Vec<String>),
    MessageLocation(String),
    MakeTime(String),
    AddressbookContains {
        book_uid: String,
        header: String,
    },
    InMatchIndex(String),
    /// A raw Message-ID string, so `header-matches "Message-ID" "<x@y>"`
    /// can be short-circuited onto the hashed `part` column prefix
    /// (spec.md §4.4) without going through `HeaderOp`.
    MessageIdLiteral(MessageIdHash),
}
