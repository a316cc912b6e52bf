//! Compiles an [`Expr`] into a SQL `WHERE` clause (spec.md §4.4).

use crate::models::message::system_flag_bit;
use crate::search::ast::{CmpKind, Expr, ThreadKind};

// Node flags (spec.md §4.4): IS_SQL, NEEDS_UDF, NEEDS_HEADERS,
// NEEDS_MSG_BODY, NEEDS_CONTACTS, as plain consts matching this crate's
// bitflags-free style (see `crate::models::folder::provider_flags`).
const IS_SQL: u8 = 1;
const NEEDS_UDF: u8 = 2;
const NEEDS_HEADERS: u8 = 4;
const NEEDS_MSG_BODY: u8 = 8;
const NEEDS_CONTACTS: u8 = 16;

/// One compiled node: its SQL fragment, its flags (for and/or child
/// ordering), and — if it folded to a literal — the constant value, so a
/// parent `and`/`or` can short-circuit at compile time.
#[derive(Debug, Clone)]
struct Compiled {
    sql: String,
    flags: u8,
    literal_bool: Option<bool>,
}

impl Compiled {
    fn sql(sql: impl Into<String>, flags: u8) -> Self {
        Self {
            sql: sql.into(),
            flags,
            literal_bool: None,
        }
    }

    fn literal(value: bool) -> Self {
        Self {
            sql: if value { "1".to_string() } else { "0".to_string() },
            flags: IS_SQL,
            literal_bool: Some(value),
        }
    }
}

/// Which `match-threads` expansion the rebuild step must run before the
/// final `WHERE in_result_index(ctx, uid)` clause replaces this query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadBuildSpec {
    pub kind: ThreadKind,
    pub include_subject: bool,
}

pub struct CompileOutput {
    pub where_sql: String,
    pub thread_spec: Option<ThreadBuildSpec>,
}

/// `%Q`-equivalent: single-quote a literal, doubling embedded quotes.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

const LIKE_COLUMNS: &[&str] = &["subject", "labels", "usertags"];

fn like_pattern(kind: CmpKind, needle: &str) -> Option<String> {
    Some(match kind {
        CmpKind::Contains => format!("%{}%", needle),
        CmpKind::StartsWith => format!("{}%", needle),
        CmpKind::EndsWith => format!("%{}", needle),
        CmpKind::Matches => needle.to_string(),
        _ => return None,
    })
}

pub fn compile(expr: &Expr, search_id: i64) -> CompileOutput {
    let (compiled, thread_spec) = compile_node(expr, search_id);
    CompileOutput {
        where_sql: compiled.sql,
        thread_spec,
    }
}

fn compile_node(expr: &Expr, sid: i64) -> (Compiled, Option<ThreadBuildSpec>) {
    match expr {
        Expr::Bool(b) => (Compiled::literal(*b), None),
        Expr::Int(i) => (Compiled::sql(i.to_string(), IS_SQL), None),
        Expr::Str(s) => (Compiled::sql(quote(s), IS_SQL), None),

        Expr::And(children) => compile_bool_chain(children, sid, true),
        Expr::Or(children) => compile_bool_chain(children, sid, false),

        Expr::Not(inner) => {
            let (c, spec) = compile_node(inner, sid);
            if let Some(v) = c.literal_bool {
                return (Compiled::literal(!v), spec);
            }
            (
                Compiled::sql(format!("(NOT ({}))", c.sql), c.flags),
                spec,
            )
        }

        Expr::Eq(a, b) => {
            let (ca, spec_a) = compile_node(a, sid);
            let (cb, spec_b) = compile_node(b, sid);
            let spec = spec_a.or(spec_b);
            let is_string = matches!(**a, Expr::Str(_)) || matches!(**b, Expr::Str(_));
            let sql = if is_string {
                format!(
                    "cmp_text({}, '', '', 'matches', ({}), ({}))",
                    sid, ca.sql, cb.sql
                )
            } else {
                format!("(({}) = ({}))", ca.sql, cb.sql)
            };
            (Compiled::sql(sql, ca.flags | cb.flags | NEEDS_UDF), spec)
        }

        Expr::Lt(a, b) => compile_cmp(a, b, sid, "<"),
        Expr::Gt(a, b) => compile_cmp(a, b, sid, ">"),

        Expr::MatchAll(inner) => compile_node(inner, sid),

        Expr::MatchThreads {
            kind,
            include_subject,
            expr: inner,
        } => {
            let (c, _) = compile_node(inner, sid);
            (
                c,
                Some(ThreadBuildSpec {
                    kind: *kind,
                    include_subject: *include_subject,
                }),
            )
        }

        Expr::CompareDate(a, b) => {
            let (ca, _) = compile_node(a, sid);
            let (cb, _) = compile_node(b, sid);
            (
                Compiled::sql(
                    format!("compare_date(({}), ({}))", ca.sql, cb.sql),
                    ca.flags | cb.flags | NEEDS_UDF,
                ),
                None,
            )
        }

        Expr::BodyContains(needle) => (
            Compiled::sql(
                format!(
                    "search_body({}, uid, 'contains', {})",
                    sid,
                    quote(needle)
                ),
                NEEDS_UDF | NEEDS_MSG_BODY,
            ),
            None,
        ),
        Expr::BodyRegex(needle) => (
            Compiled::sql(
                format!("search_body({}, uid, 'regex', {})", sid, quote(needle)),
                NEEDS_UDF | NEEDS_MSG_BODY,
            ),
            None,
        ),

        Expr::HeaderOp {
            header,
            kind,
            needle,
        } => (compile_header_op(header, *kind, needle, sid), None),

        Expr::HeaderExists(header) => {
            if let Some(col) = column_for_header(header) {
                (Compiled::sql(format!("({} <> '')", col), IS_SQL), None)
            } else {
                (
                    Compiled::sql(
                        format!(
                            "search_header({}, uid, {}, 'exists', '', '')",
                            sid,
                            quote(header)
                        ),
                        NEEDS_UDF | NEEDS_HEADERS,
                    ),
                    None,
                )
            }
        }

        Expr::HeaderHasWords { header, words } => {
            if let Some(col) = column_for_header(header) {
                let clauses: Vec<String> = words
                    .iter()
                    .map(|w| format!("({} LIKE {})", col, quote(&format!("%{}%", w))))
                    .collect();
                (
                    Compiled::sql(format!("({})", clauses.join(" AND ")), IS_SQL),
                    None,
                )
            } else {
                (
                    Compiled::sql(
                        format!(
                            "search_header({}, uid, {}, 'has-words', {}, '')",
                            sid,
                            quote(header),
                            quote(&words.join(" "))
                        ),
                        NEEDS_UDF | NEEDS_HEADERS,
                    ),
                    None,
                )
            }
        }

        Expr::UserTag(tag) => (
            Compiled::sql(
                format!("get_user_tag({}, uid, {}, usertags)", sid, quote(tag)),
                NEEDS_UDF,
            ),
            None,
        ),

        Expr::UserFlag(flag) => (
            Compiled::sql(
                format!("check_labels({}, uid, {}, labels)", sid, quote(flag)),
                NEEDS_UDF,
            ),
            None,
        ),

        Expr::SystemFlag(name) => match system_flag_bit(name) {
            Some(mask) => (
                Compiled::sql(
                    format!("check_flags({}, uid, {})", sid, mask),
                    NEEDS_UDF,
                ),
                None,
            ),
            None => (Compiled::literal(false), None),
        },

        Expr::GetSentDate => (Compiled::sql("dsent", IS_SQL), None),
        Expr::GetReceivedDate => (Compiled::sql("dreceived", IS_SQL), None),
        Expr::GetCurrentDate => (
            Compiled::sql("CAST(strftime('%s','now') AS INTEGER)", IS_SQL),
            None,
        ),
        Expr::GetRelativeMonths(n) => (
            Compiled::sql(
                format!(
                    "CAST(strftime('%s','now','{} months') AS INTEGER)",
                    n
                ),
                IS_SQL,
            ),
            None,
        ),
        Expr::GetSize => (Compiled::sql("size", IS_SQL), None),

        Expr::Uid(uids) => {
            let quoted: Vec<String> = uids.iter().map(|u| quote(u)).collect();
            (
                Compiled::sql(format!("(uid IN ({}))", quoted.join(", ")), IS_SQL),
                None,
            )
        }

        Expr::MessageLocation(url) => {
            // No URL-parsing collaborator in scope; the folder id is taken
            // as the trailing integer component of the location string.
            let folder_id: i64 = url
                .rsplit(['/', ':'])
                .find_map(|part| part.parse().ok())
                .unwrap_or(-1);
            (
                Compiled::sql(
                    format!("is_folder_id({}, {})", sid, folder_id),
                    NEEDS_UDF,
                ),
                None,
            )
        }

        Expr::MakeTime(s) => {
            if let Some(epoch) = try_parse_literal_time(s) {
                (Compiled::sql(epoch.to_string(), IS_SQL), None)
            } else {
                (
                    Compiled::sql(format!("make_time({})", quote(s)), NEEDS_UDF),
                    None,
                )
            }
        }

        Expr::AddressbookContains { book_uid, header } => {
            let col = column_for_header(header).unwrap_or("mail_from");
            (
                Compiled::sql(
                    format!(
                        "addressbook_contains({}, {}, {})",
                        sid,
                        quote(book_uid),
                        col
                    ),
                    NEEDS_UDF | NEEDS_CONTACTS,
                ),
                None,
            )
        }

        Expr::InMatchIndex(id) => (
            Compiled::sql(
                format!("in_match_index({}, {}, uid)", sid, quote(id)),
                NEEDS_UDF,
            ),
            None,
        ),

        Expr::MessageIdLiteral(hash) => (
            Compiled::sql(
                format!("(part LIKE {})", quote(&format!("{} {} %", hash.hi(), hash.lo()))),
                IS_SQL,
            ),
            None,
        ),
    }
}

fn compile_cmp(a: &Expr, b: &Expr, sid: i64, op: &str) -> (Compiled, Option<ThreadBuildSpec>) {
    let (ca, spec_a) = compile_node(a, sid);
    let (cb, spec_b) = compile_node(b, sid);
    (
        Compiled::sql(
            format!("(({}) {} ({}))", ca.sql, op, cb.sql),
            ca.flags | cb.flags,
        ),
        spec_a.or(spec_b),
    )
}

fn column_for_header(header: &str) -> Option<&'static str> {
    Some(match header.to_ascii_lowercase().as_str() {
        "subject" => "subject",
        "from" => "mail_from",
        "to" => "mail_to",
        "cc" => "mail_cc",
        "list" | "mlist" => "mlist",
        _ => return None,
    })
}

/// Short-circuit `(header-matches "Message-ID" "<x@y>")` onto the hashed
/// `part` column prefix, bypassing `search_header` and a message fetch
/// (spec.md §4.4).
fn compile_header_op(header: &str, kind: CmpKind, needle: &str, sid: i64) -> Compiled {
    if header.eq_ignore_ascii_case("message-id") && kind == CmpKind::Matches {
        let hash = crate::models::message::MessageIdHash::from_raw(needle);
        return Compiled::sql(
            format!(
                "(part LIKE {})",
                quote(&format!("{} {} %", hash.hi(), hash.lo()))
            ),
            IS_SQL,
        );
    }

    let is_email_column = matches!(
        header.to_ascii_lowercase().as_str(),
        "from" | "to" | "cc" | "list" | "mlist"
    );

    if !is_email_column {
        if let (Some(col), Some(pattern)) = (column_for_header(header), like_pattern(kind, needle))
        {
            return Compiled::sql(format!("({} LIKE {})", col, quote(&pattern)), IS_SQL);
        }
    }

    let col_for_dbvalue = column_for_header(header).unwrap_or("subject");
    Compiled::sql(
        format!(
            "search_header({}, uid, {}, {}, {}, {})",
            sid,
            quote(header),
            quote(kind.as_str()),
            quote(needle),
            col_for_dbvalue
        ),
        NEEDS_UDF | NEEDS_HEADERS,
    )
}

fn try_parse_literal_time(s: &str) -> Option<i64> {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
}

/// `(and a b c)` / `(or a b c)` with short-circuit `CASE`, children sorted
/// by ascending flags (cheap checks first), and constant folding.
fn compile_bool_chain(
    children: &[Expr],
    sid: i64,
    is_and: bool,
) -> (Compiled, Option<ThreadBuildSpec>) {
    let mut thread_spec = None;
    let mut compiled: Vec<Compiled> = Vec::with_capacity(children.len());
    for child in children {
        let (c, spec) = compile_node(child, sid);
        thread_spec = thread_spec.or(spec);
        if c.literal_bool == Some(is_and) {
            // `true` inside `and`, `false` inside `or`: a no-op, drop it.
            continue;
        }
        if c.literal_bool == Some(!is_and) {
            // `false` inside `and`, `true` inside `or`: collapses everything.
            return (Compiled::literal(!is_and), thread_spec);
        }
        compiled.push(c);
    }

    if compiled.is_empty() {
        return (Compiled::literal(is_and), thread_spec);
    }
    if compiled.len() == 1 {
        return (compiled.into_iter().next().unwrap(), thread_spec);
    }

    compiled.sort_by_key(|c| c.flags);
    let combined_flags = compiled.iter().fold(0u8, |acc, c| acc | c.flags);

    let arms: Vec<String> = compiled
        .iter()
        .map(|c| {
            if is_and {
                format!("WHEN NOT ({}) THEN 0", c.sql)
            } else {
                format!("WHEN ({}) THEN 1", c.sql)
            }
        })
        .collect();
    let else_branch = if is_and { 1 } else { 0 };
    let sql = format!("(CASE {} ELSE {} END)", arms.join(" "), else_branch);

    (Compiled::sql(sql, combined_flags), thread_spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ast::Expr;

    #[test]
    fn system_flag_compiles_to_check_flags_call() {
        let out = compile(&Expr::SystemFlag("seen".to_string()), 7);
        assert!(out.where_sql.contains("check_flags(7, uid,"));
    }

    #[test]
    fn and_with_literal_true_drops_it() {
        let expr = Expr::And(vec![
            Expr::Bool(true),
            Expr::SystemFlag("seen".to_string()),
        ]);
        let out = compile(&expr, 1);
        assert!(out.where_sql.contains("check_flags"));
        assert!(!out.where_sql.contains("CASE"));
    }

    #[test]
    fn or_with_literal_true_short_circuits() {
        let expr = Expr::Or(vec![
            Expr::Bool(true),
            Expr::BodyContains("anything".to_string()),
        ]);
        let out = compile(&expr, 1);
        assert_eq!(out.where_sql, "1");
    }

    #[test]
    fn match_all_is_transparent() {
        let inner = Expr::SystemFlag("seen".to_string());
        let wrapped = Expr::MatchAll(Box::new(inner.clone()));
        assert_eq!(compile(&inner, 1).where_sql, compile(&wrapped, 1).where_sql);
    }

    #[test]
    fn match_threads_is_detected() {
        let expr = Expr::MatchThreads {
            kind: ThreadKind::All,
            include_subject: true,
            expr: Box::new(Expr::SystemFlag("seen".to_string())),
        };
        let out = compile(&expr, 1);
        assert_eq!(
            out.thread_spec,
            Some(ThreadBuildSpec {
                kind: ThreadKind::All,
                include_subject: true
            })
        );
    }

    #[test]
    fn header_contains_on_subject_is_direct_like() {
        let expr = Expr::HeaderOp {
            header: "subject".to_string(),
            kind: CmpKind::Contains,
            needle: "[PATCH]".to_string(),
        };
        let out = compile(&expr, 1);
        assert!(out.where_sql.contains("subject LIKE"));
    }

    #[test]
    fn header_contains_on_email_column_uses_udf() {
        let expr = Expr::HeaderOp {
            header: "from".to_string(),
            kind: CmpKind::Contains,
            needle: "a@b.com".to_string(),
        };
        let out = compile(&expr, 1);
        assert!(out.where_sql.contains("search_header"));
    }

    #[test]
    fn message_id_matches_shortcuts_to_part_like() {
        let expr = Expr::HeaderOp {
            header: "Message-ID".to_string(),
            kind: CmpKind::Matches,
            needle: "<a@b>".to_string(),
        };
        let out = compile(&expr, 1);
        assert!(out.where_sql.starts_with("(part LIKE"));
    }

    #[test]
    fn uid_list_compiles_to_in_clause() {
        let expr = Expr::Uid(vec!["u1".to_string(), "u2".to_string()]);
        let out = compile(&expr, 1);
        assert_eq!(out.where_sql, "(uid IN ('u1', 'u2'))");
    }
}
