//! The thirteen scalar SQL functions StoreDB registers on every connection
//! (spec.md §4.1, contracts in §4.4).
//!
//! Each function's first SQL argument is the issuing search's opaque id;
//! the closure looks the live [`SearchContext`] up in the shared
//! [`SearchRegistry`] to do its work. A function whose search id is not
//! currently registered (the query ran after the search was disposed)
//! simply returns its safest default rather than erroring — spec.md §7
//! says expensive search ops must never fail the whole query over a
//! per-message problem.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;

use crate::search::ast::CmpKind;
use crate::search::context::{PendingOpKey, SearchRegistry};

fn ctx_arg(ar: &rusqlite::functions::Context<'_>, idx: usize) -> rusqlite::Result<i64> {
    ar.get::<i64>(idx)
}

fn compare_by_kind(kind: CmpKind, hay: &str, needle: &str) -> bool {
    let hay_lc = hay.to_lowercase();
    let needle_lc = needle.to_lowercase();
    match kind {
        CmpKind::Contains => hay_lc.contains(&needle_lc),
        CmpKind::StartsWith => hay_lc.starts_with(&needle_lc),
        CmpKind::EndsWith => hay_lc.ends_with(&needle_lc),
        CmpKind::Matches => hay_lc == needle_lc,
        CmpKind::Exists => !hay.is_empty(),
        CmpKind::HasWords => needle_lc
            .split_whitespace()
            .all(|word| hay_lc.contains(word)),
        // Regex/soundex need a real text-matching collaborator this crate
        // doesn't have (no MIME/body store, spec.md §1 non-goal); fall
        // back to a literal substring test rather than panicking.
        CmpKind::Regex | CmpKind::FullRegex | CmpKind::Soundex => hay_lc.contains(&needle_lc),
    }
}

pub fn register_all(conn: &Connection, registry: SearchRegistry) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8;

    {
        let registry = registry.clone();
        conn.create_scalar_function("cmp_text", 6, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let kind_str: String = ar.get(3)?;
            let hay: String = ar.get(4)?;
            let needle: String = ar.get(5)?;
            let Some(_ctx) = registry.get(search_id) else {
                return Ok(false);
            };
            let kind = CmpKind::from_str(&kind_str).unwrap_or(CmpKind::Contains);
            Ok(compare_by_kind(kind, &hay, &needle))
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("search_body", 4, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let uid: String = ar.get(1)?;
            let kind_str: String = ar.get(2)?;
            let words: String = ar.get(3)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(false);
            };
            let kind = CmpKind::from_str(&kind_str).unwrap_or(CmpKind::Contains);

            if let Some(info) = ctx.loaded_infos.read().unwrap().get(&uid) {
                return Ok(compare_by_kind(kind, &info.record.preview, &words));
            }

            let key = PendingOpKey {
                op_kind: "body".to_string(),
                needle: words,
                header_name: String::new(),
                uid,
            };
            if let Some(resolved) = ctx.resolution(&key) {
                return Ok(resolved);
            }
            ctx.record_pending_op(key);
            Ok(false)
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("search_header", 6, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let uid: String = ar.get(1)?;
            let name: String = ar.get(2)?;
            let kind_str: String = ar.get(3)?;
            let needle: String = ar.get(4)?;
            let dbvalue: String = ar.get(5)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(false);
            };
            let kind = CmpKind::from_str(&kind_str).unwrap_or(CmpKind::Contains);
            let hay = loaded_column(&ctx, &uid, &name).unwrap_or(dbvalue);
            Ok(compare_by_kind(kind, &hay, &needle))
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("get_user_tag", 4, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let uid: String = ar.get(1)?;
            let tag: String = ar.get(2)?;
            let dbvalue: String = ar.get(3)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(dbvalue);
            };
            let loaded = ctx.loaded_infos.read().unwrap();
            if let Some(info) = loaded.get(&uid) {
                if let Some(v) = info.get_user_tag(&tag) {
                    return Ok(v.to_string());
                }
            }
            drop(loaded);
            let pairs = crate::models::message::decode_kv(&dbvalue);
            Ok(pairs
                .into_iter()
                .find(|(k, _)| k == &tag)
                .map(|(_, v)| v)
                .unwrap_or_default())
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("from_loaded_info_or_db", 4, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let uid: String = ar.get(1)?;
            let column: String = ar.get(2)?;
            let dbvalue: String = ar.get(3)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(dbvalue);
            };
            Ok(loaded_column(&ctx, &uid, &column).unwrap_or(dbvalue))
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("addressbook_contains", 3, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let book_uid: String = ar.get(1)?;
            let email: String = ar.get(2)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(true);
            };
            let key = PendingOpKey {
                op_kind: "addressbook".to_string(),
                needle: email,
                header_name: book_uid,
                uid: String::new(),
            };
            if let Some(resolved) = ctx.resolution(&key) {
                return Ok(resolved);
            }
            // Defaults to true on the first pass: spec.md §9 documents this
            // trade-off (a false "matches" costs one extra row, dropping a
            // row prematurely cannot be undone).
            ctx.record_pending_op(key);
            Ok(true)
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("check_labels", 4, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let uid: String = ar.get(1)?;
            let label: String = ar.get(2)?;
            let dbvalue: String = ar.get(3)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(false);
            };
            let labels = loaded_column(&ctx, &uid, "labels").unwrap_or(dbvalue);
            Ok(labels
                .split_whitespace()
                .any(|l| l.eq_ignore_ascii_case(&label)))
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("check_flags", 3, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let uid: String = ar.get(1)?;
            let mask: i64 = ar.get(2)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(false);
            };
            let loaded = ctx.loaded_infos.read().unwrap();
            let flags = loaded
                .get(&uid)
                .map(|info| info.record.flags as i64)
                .unwrap_or(0);
            Ok((flags & mask) != 0)
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("in_result_index", 2, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let uid: String = ar.get(1)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(false);
            };
            let key = ctx.index_key(&uid);
            Ok(ctx.result_index.read().unwrap().contains(&key))
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("in_match_index", 3, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let index_id: String = ar.get(1)?;
            let uid: String = ar.get(2)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(false);
            };
            let key = ctx.index_key(&uid);
            let indexes = ctx.match_indexes.read().unwrap();
            Ok(indexes
                .get(&index_id)
                .is_some_and(|set| set.read().unwrap().contains(&key)))
        })?;
    }

    {
        let registry = registry.clone();
        conn.create_scalar_function("is_folder_id", 2, flags, move |ar| {
            let search_id = ctx_arg(ar, 0)?;
            let id: i64 = ar.get(1)?;
            let Some(ctx) = registry.get(search_id) else {
                return Ok(false);
            };
            Ok(*ctx.current_folder_id.lock().unwrap() as i64 == id)
        })?;
    }

    conn.create_scalar_function("make_time", 1, flags, move |ar| {
        let s: String = ar.get(0)?;
        Ok(parse_time(&s).unwrap_or(0))
    })?;

    conn.create_scalar_function("compare_date", 2, flags, move |ar| {
        let a: i64 = ar.get(0)?;
        let b: i64 = ar.get(1)?;
        Ok(compare_date_days(a, b))
    })?;

    Ok(())
}

fn loaded_column(
    ctx: &crate::search::context::SearchContext,
    uid: &str,
    column: &str,
) -> Option<String> {
    let loaded = ctx.loaded_infos.read().unwrap();
    let info = loaded.get(uid)?;
    let r = &info.record;
    Some(
        match column {
            "subject" => &r.subject,
            "mail_from" => &r.mail_from,
            "mail_to" => &r.mail_to,
            "mail_cc" => &r.mail_cc,
            "mlist" => &r.mlist,
            "labels" => &r.labels,
            "usertags" => &r.usertags,
            "preview" => &r.preview,
            "cinfo" => &r.cinfo,
            "bdata" => &r.bdata,
            "userheaders" => &r.userheaders,
            _ => return None,
        }
        .clone(),
    )
}

/// Parses either RFC3339 or a bare `YYYY-MM-DD` into epoch seconds.
fn parse_time(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let dt = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&dt).timestamp());
    }
    None
}

/// Day-boundary comparison per `camel-store-search.c`'s `camelcomparedate`
/// (spec.md SUPPLEMENTED FEATURES): truncate both operands to a UTC day
/// start before comparing, rather than comparing raw timestamps.
fn compare_date_days(a: i64, b: i64) -> i64 {
    let day = |t: i64| -> i64 {
        DateTime::<Utc>::from_timestamp(t, 0)
            .map(|dt| dt.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp())
            .unwrap_or(t)
    };
    let (da, db) = (day(a), day(b));
    match da.cmp(&db) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_by_kind_contains_is_case_insensitive() {
        assert!(compare_by_kind(CmpKind::Contains, "Hello World", "world"));
    }

    #[test]
    fn compare_by_kind_has_words_requires_all() {
        assert!(compare_by_kind(CmpKind::HasWords, "quick brown fox", "brown fox"));
        assert!(!compare_by_kind(CmpKind::HasWords, "quick brown fox", "brown cat"));
    }

    #[test]
    fn compare_date_days_same_day_is_equal() {
        let morning = 1_700_000_000;
        let evening = morning + 3600 * 5;
        assert_eq!(compare_date_days(morning, evening), 0);
    }

    #[test]
    fn compare_date_days_different_day_orders() {
        let day1 = 1_700_000_000;
        let day2 = day1 + 86_400 * 2;
        assert_eq!(compare_date_days(day1, day2), -1);
        assert_eq!(compare_date_days(day2, day1), 1);
    }

    #[test]
    fn parse_time_accepts_rfc3339_and_bare_date() {
        assert!(parse_time("2024-01-01T00:00:00Z").is_some());
        assert!(parse_time("2024-01-01").is_some());
        assert!(parse_time("garbage").is_none());
    }
}
