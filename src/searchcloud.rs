//! Search cloud: tracking of user searches, the popular-term aggregate and the
//! administrator-approved term list shown on the home page.
//!
//! Three tables back it. `search_query` receives one row per search,
//! `search_popular_latest` holds the most recent aggregate awaiting moderation,
//! and `search_popular_approved` holds the list an administrator accepted.
//! The tables are installed separately from the catalog schema, so every read
//! and write must cope with them being absent.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use rusqlite::{params, Connection};
use serde::{Serialize, Serializer};
use serde_json::json;

use crate::{days_before, CatalogDb, Clock, PortalError, PortalResult, TtlCache};

pub(crate) const DEFAULT_SEARCH_LANG: &str = "default";
const MAX_LANG_LENGTH: usize = 10;
const MATCH_ALL_QUERY: &str = "*:*";
const SEARCHED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SEARCH_QUERY_TABLE: &str = "search_query";
const POPULAR_LATEST_TABLE: &str = "search_popular_latest";
const POPULAR_APPROVED_TABLE: &str = "search_popular_approved";
const SEARCHED_AT_INDEX: &str = "search_query_date";

const TABLE_DDL: [(&str, &str); 3] = [
    (
        SEARCH_QUERY_TABLE,
        "CREATE TABLE search_query (
            lang VARCHAR(10) NOT NULL,
            search_string VARCHAR NOT NULL,
            searched_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    ),
    (
        POPULAR_LATEST_TABLE,
        "CREATE TABLE search_popular_latest (
            lang VARCHAR(10),
            search_string VARCHAR NOT NULL,
            count INTEGER NOT NULL
        )",
    ),
    (
        POPULAR_APPROVED_TABLE,
        "CREATE TABLE search_popular_approved (
            lang VARCHAR(10),
            search_string VARCHAR NOT NULL,
            count INTEGER NOT NULL
        )",
    ),
];

/// A term of the cloud with its number of searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CloudTerm {
    pub(crate) search_string: String,
    pub(crate) count: i64,
}

impl CloudTerm {
    pub(crate) fn new(search_string: impl Into<String>, count: i64) -> Self {
        Self {
            search_string: search_string.into(),
            count,
        }
    }
}

// Serialized as a `[search_string, count]` pair, the download/upload format.
impl Serialize for CloudTerm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.search_string, self.count).serialize(serializer)
    }
}

/// Normalise a search string for tracking. Returns an empty string for
/// searches that should not be tracked.
pub(crate) fn unify_terms(search_string: &str, max_length: usize) -> String {
    if search_string.trim().is_empty() || search_string.trim() == MATCH_ALL_QUERY {
        return String::new();
    }

    let mut unified = search_string.to_string();
    while unified.contains("  ") {
        unified = unified.replace("  ", " ");
    }
    let unified = unified.trim();

    if unified.chars().count() <= max_length {
        return unified.to_string();
    }

    let terms: Vec<&str> = unified.split_whitespace().collect();
    if terms.len() == 1 {
        return unified.chars().take(max_length).collect();
    }

    let mut result = String::new();
    let mut length = 0;
    for term in terms {
        let term_length = term.chars().count();
        if length + term_length + 1 < max_length {
            result.push_str(term);
            result.push(' ');
            length += term_length + 1;
        }
    }
    result.pop();
    result
}

pub(crate) fn is_missing_table_error(err: &rusqlite::Error) -> bool {
    err.to_string().contains("no such table")
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> PortalResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![table],
        |row| row.get(0),
    )?)
}

pub(crate) fn index_exists(conn: &Connection, table: &str, index: &str) -> PortalResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master
                        WHERE type = 'index' AND tbl_name = ?1 AND name = ?2)",
        params![table, index],
        |row| row.get(0),
    )?)
}

/// Create the search-cloud tables and index that are missing, reporting each
/// step through `out`.
pub(crate) fn install_tables(conn: &Connection, out: &mut dyn FnMut(&str)) -> PortalResult<()> {
    let mut created = 0;
    for (table, ddl) in TABLE_DDL {
        if !table_exists(conn, table)? {
            out(&format!("Creating the {table} table ..."));
            conn.execute_batch(ddl)?;
            out("done.");
            created += 1;
        }
    }

    if index_exists(conn, SEARCH_QUERY_TABLE, SEARCHED_AT_INDEX)? {
        out("The index already exists");
    } else {
        out(&format!("Creating the {SEARCHED_AT_INDEX} index ..."));
        conn.execute_batch(&format!(
            "CREATE INDEX {SEARCHED_AT_INDEX} ON {SEARCH_QUERY_TABLE} (searched_at)"
        ))?;
        out("done.");
    }

    if created == 0 {
        out("The tables already exist");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrackOutcome {
    Recorded,
    Discarded,
    TablesMissing,
}

impl TrackOutcome {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Discarded => "discarded",
            Self::TablesMissing => "tables_missing",
        }
    }
}

fn search_lang(lang: Option<&str>) -> String {
    match lang.map(str::trim) {
        Some(lang) if !lang.is_empty() => lang.chars().take(MAX_LANG_LENGTH).collect(),
        _ => DEFAULT_SEARCH_LANG.to_string(),
    }
}

/// Record one search. Missing tables are reported as an outcome, any other
/// database failure is returned.
pub(crate) fn track_term(
    db: &mut CatalogDb,
    lang: Option<&str>,
    search_string: &str,
    max_length: usize,
    now: DateTime<Utc>,
) -> PortalResult<TrackOutcome> {
    let search_string = unify_terms(search_string, max_length);
    if search_string.is_empty() {
        return Ok(TrackOutcome::Discarded);
    }
    let lang = search_lang(lang);
    let searched_at = now.format(SEARCHED_AT_FORMAT).to_string();

    let tx = db.transaction()?;
    match tx.execute(
        "INSERT INTO search_query (lang, search_string, searched_at) VALUES (?1, ?2, ?3)",
        params![lang, search_string, searched_at],
    ) {
        Ok(_) => {
            tx.commit()?;
            Ok(TrackOutcome::Recorded)
        }
        Err(err) if is_missing_table_error(&err) => {
            tracing::warn!(error = %err, "Search cloud tables are not installed");
            tx.rollback()?;
            Ok(TrackOutcome::TablesMissing)
        }
        Err(err) => {
            tracing::error!(error = %err, "Couldn't track the search term");
            Err(err.into())
        }
    }
}

/// Search hook: track the query without ever failing the search itself.
pub(crate) fn observe_search(
    db: &mut CatalogDb,
    lang: Option<&str>,
    search_string: &str,
    max_length: usize,
    now: DateTime<Utc>,
) -> Option<TrackOutcome> {
    match track_term(db, lang, search_string, max_length, now) {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            tracing::error!(error = %err, "Search tracking failed");
            None
        }
    }
}

/// Rebuild `search_popular_latest` from the searches of the last `days` days.
/// Returns the number of terms in the new list.
pub(crate) fn generate_unapproved_list(
    db: &mut CatalogDb,
    days: i64,
    limit: usize,
    now: DateTime<Utc>,
) -> PortalResult<usize> {
    let since = days_before(now, days)?.format(SEARCHED_AT_FORMAT).to_string();
    let tx = db.transaction()?;
    tx.execute("DELETE FROM search_popular_latest", [])?;
    let inserted = tx.execute(
        "INSERT INTO search_popular_latest (lang, search_string, count)
         SELECT NULL, search_string, COUNT(*) AS searches
         FROM search_query
         WHERE searched_at > ?1
         GROUP BY search_string
         ORDER BY searches DESC, search_string ASC
         LIMIT ?2",
        params![since, limit as i64],
    )?;
    tx.commit()?;
    tracing::info!(terms = inserted, days, "Generated the unapproved search list");
    Ok(inserted)
}

fn read_terms(conn: &Connection, table: &str) -> PortalResult<Vec<CloudTerm>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT search_string, count FROM {table} ORDER BY count DESC, rowid ASC"
    ))?;
    let rows = stmt.query_map([], |row| Ok(CloudTerm::new(row.get::<_, String>(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn get_latest(conn: &Connection) -> PortalResult<Vec<CloudTerm>> {
    read_terms(conn, POPULAR_LATEST_TABLE)
}

pub(crate) fn get_approved(conn: &Connection) -> PortalResult<Vec<CloudTerm>> {
    read_terms(conn, POPULAR_APPROVED_TABLE)
}

/// Replace the approved list. Callers holding an [`ApprovedCloud`] should go
/// through [`ApprovedCloud::replace`] so the cached copy is dropped.
pub(crate) fn update_approved(db: &mut CatalogDb, rows: &[CloudTerm]) -> PortalResult<()> {
    let tx = db.transaction()?;
    tx.execute("DELETE FROM search_popular_approved", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO search_popular_approved (lang, search_string, count) VALUES (NULL, ?1, ?2)",
        )?;
        for row in rows {
            stmt.execute(params![row.search_string, row.count])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Approved terms in the format expected by the home-page cloud widget.
pub(crate) fn approved_to_json(rows: &[CloudTerm]) -> String {
    let words: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| json!({"text": row.search_string, "weight": row.count}))
        .collect();
    serde_json::Value::Array(words).to_string()
}

/// Delete tracked searches made before `before`, or all of them.
pub(crate) fn purge_search_queries(
    conn: &Connection,
    before: Option<DateTime<Utc>>,
) -> PortalResult<usize> {
    let purged = match before {
        Some(before) => conn.execute(
            "DELETE FROM search_query WHERE searched_at < ?1",
            params![before.format(SEARCHED_AT_FORMAT).to_string()],
        )?,
        None => conn.execute("DELETE FROM search_query", [])?,
    };
    tracing::info!(purged, "Purged tracked searches");
    Ok(purged)
}

pub(crate) fn download_filename(date: NaiveDate) -> String {
    format!("ecodp-searchcloud-latest-{}.json", date.format("%Y-%m-%d"))
}

/// Approved terms with a short-lived cached copy for the public pages.
pub(crate) struct ApprovedCloud {
    cache: TtlCache<(), Vec<CloudTerm>>,
}

impl ApprovedCloud {
    pub(crate) fn new(ttl: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlCache::new("searchcloud_approved", ttl, clock),
        }
    }

    /// Cached approved terms. Missing tables read as an empty cloud.
    pub(crate) fn get(&self, conn: &Connection) -> PortalResult<Vec<CloudTerm>> {
        match self.cache.get_or_try_insert_with(&(), || get_approved(conn)) {
            Err(PortalError::Database(err)) if is_missing_table_error(&err) => Ok(Vec::new()),
            other => other,
        }
    }

    pub(crate) fn replace(&self, db: &mut CatalogDb, rows: &[CloudTerm]) -> PortalResult<()> {
        update_approved(db, rows)?;
        self.cache.clear();
        Ok(())
    }
}
