//! SQLite catalog store.
//!
//! Holds the tables the portal reads and writes outside of the search cloud:
//! publishers and their members, datasets, the page-view tracking summary,
//! term translations and vocabularies. The search-cloud tables are not part of
//! this schema; they are created on demand by `searchcloud::install_tables`.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::{DatasetCapacity, Member, MemberCapacity, PortalError, PortalResult, UserCapacity};

// ── Catalog rows ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Publisher {
    pub(crate) name: String,
    pub(crate) title: String,
    pub(crate) users: Vec<Member<UserCapacity>>,
    pub(crate) datasets: Vec<Member<DatasetCapacity>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PublisherSummary {
    pub(crate) name: String,
    pub(crate) title: String,
    pub(crate) dataset_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TermTranslation {
    pub(crate) term: String,
    pub(crate) term_translation: String,
    pub(crate) lang_code: String,
}

pub(crate) struct CatalogDb {
    conn: Connection,
}

// ── Schema SQL ───────────────────────────────────────────────────────────

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS publisher (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS package (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    title TEXT,
    state TEXT NOT NULL DEFAULT 'active'
);

-- kind is 'user' or 'dataset'; member order is insertion order (rowid)
CREATE TABLE IF NOT EXISTS member (
    publisher TEXT NOT NULL,
    kind TEXT NOT NULL,
    member_name TEXT NOT NULL,
    capacity TEXT NOT NULL,
    UNIQUE (publisher, kind, member_name)
);

CREATE INDEX IF NOT EXISTS idx_member_name ON member(kind, member_name);

CREATE TABLE IF NOT EXISTS tracking_summary (
    url TEXT NOT NULL,
    running_total INTEGER NOT NULL DEFAULT 0,
    tracking_date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tracking_summary_date ON tracking_summary(tracking_date);

CREATE TABLE IF NOT EXISTS term_translation (
    term TEXT NOT NULL,
    term_translation TEXT NOT NULL,
    lang_code TEXT NOT NULL,
    UNIQUE (term, lang_code)
);

CREATE TABLE IF NOT EXISTS vocabulary (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS tag (
    name TEXT NOT NULL,
    vocabulary TEXT NOT NULL,
    UNIQUE (name, vocabulary)
);
";

// ── Core implementation ──────────────────────────────────────────────────

impl CatalogDb {
    /// Open or create a database file with the catalog schema.
    pub(crate) fn open_or_create(path: &Path) -> PortalResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.apply_pragmas()?;
        db.init_schema()?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> PortalResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn apply_pragmas(&self) -> PortalResult<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn init_schema(&self) -> PortalResult<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Borrow the underlying connection (for callers that need raw SQL).
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn transaction(&mut self) -> PortalResult<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    // ── Publishers ───────────────────────────────────────────────────

    pub(crate) fn publisher(&self, name: &str) -> PortalResult<Publisher> {
        let title: Option<String> = self
            .conn
            .query_row(
                "SELECT title FROM publisher WHERE name = ?1 AND state = 'active'",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(title) = title else {
            return Err(PortalError::PublisherNotFound(name.to_string()));
        };
        Ok(Publisher {
            name: name.to_string(),
            title,
            users: load_members(&self.conn, name)?,
            datasets: load_members(&self.conn, name)?,
        })
    }

    pub(crate) fn publishers(&self) -> PortalResult<Vec<PublisherSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.name, p.title,
                    (SELECT COUNT(*) FROM member m
                      WHERE m.publisher = p.name AND m.kind = 'dataset')
             FROM publisher p
             WHERE p.state = 'active'
             ORDER BY p.name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PublisherSummary {
                name: row.get(0)?,
                title: row.get(1)?,
                dataset_count: row.get::<_, i64>(2)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub(crate) fn create_publisher(&self, name: &str, title: &str) -> PortalResult<()> {
        self.conn.execute(
            "INSERT INTO publisher (name, title) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET title = excluded.title, state = 'active'",
            params![name, title],
        )?;
        Ok(())
    }

    pub(crate) fn update_publisher_title(&self, name: &str, title: &str) -> PortalResult<()> {
        let changed = self.conn.execute(
            "UPDATE publisher SET title = ?2 WHERE name = ?1",
            params![name, title],
        )?;
        if changed == 0 {
            return Err(PortalError::PublisherNotFound(name.to_string()));
        }
        Ok(())
    }

    pub(crate) fn delete_publisher(&self, name: &str) -> PortalResult<()> {
        self.conn.execute(
            "UPDATE publisher SET state = 'deleted' WHERE name = ?1",
            params![name],
        )?;
        self.conn
            .execute("DELETE FROM member WHERE publisher = ?1", params![name])?;
        Ok(())
    }

    // ── Datasets ─────────────────────────────────────────────────────

    #[cfg(test)]
    pub(crate) fn create_dataset(&self, name: &str, title: &str) -> PortalResult<()> {
        self.conn.execute(
            "INSERT INTO package (name, title) VALUES (?1, ?2)",
            params![name, title],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn dataset_exists(&self, name: &str) -> PortalResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM package WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ── Tracking ─────────────────────────────────────────────────────

    #[cfg(test)]
    pub(crate) fn record_tracking_summary(
        &self,
        url: &str,
        running_total: i64,
        tracking_date: &str,
    ) -> PortalResult<()> {
        self.conn.execute(
            "INSERT INTO tracking_summary (url, running_total, tracking_date)
             VALUES (?1, ?2, ?3)",
            params![url, running_total, tracking_date],
        )?;
        Ok(())
    }

    // ── Term translations ────────────────────────────────────────────

    pub(crate) fn update_term_translations(
        &mut self,
        translations: &[TermTranslation],
    ) -> PortalResult<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO term_translation (term, term_translation, lang_code)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(term, lang_code)
                 DO UPDATE SET term_translation = excluded.term_translation",
            )?;
            for t in translations {
                stmt.execute(params![t.term, t.term_translation, t.lang_code])?;
            }
        }
        tx.commit()?;
        Ok(translations.len())
    }

    pub(crate) fn term_translation(&self, term: &str, lang_code: &str) -> PortalResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT term_translation FROM term_translation
                 WHERE term = ?1 AND lang_code = ?2",
                params![term, lang_code],
                |row| row.get(0),
            )
            .optional()?)
    }
}

// ── Member rows ──────────────────────────────────────────────────────────

pub(crate) fn load_members<C: MemberCapacity>(
    conn: &Connection,
    publisher: &str,
) -> PortalResult<Vec<Member<C>>> {
    let mut stmt = conn.prepare(
        "SELECT member_name, capacity FROM member
         WHERE publisher = ?1 AND kind = ?2
         ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![publisher, C::KIND.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut members = Vec::new();
    for row in rows {
        let (name, capacity) = row?;
        let Some(parsed) = C::from_db_str(&capacity) else {
            return Err(PortalError::InvalidCapacity {
                kind: C::KIND.as_str(),
                member: name,
                value: capacity,
            });
        };
        members.push(Member::new(name, parsed));
    }
    Ok(members)
}

/// Replace every member of `kind` in `publisher` with `members`.
pub(crate) fn replace_members<C: MemberCapacity>(
    conn: &Connection,
    publisher: &str,
    members: &[Member<C>],
) -> PortalResult<()> {
    conn.execute(
        "DELETE FROM member WHERE publisher = ?1 AND kind = ?2",
        params![publisher, C::KIND.as_str()],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO member (publisher, kind, member_name, capacity) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for member in members {
        stmt.execute(params![
            publisher,
            C::KIND.as_str(),
            member.name,
            member.capacity.as_str()
        ])?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn add_member<C: MemberCapacity>(
    conn: &Connection,
    publisher: &str,
    name: &str,
    capacity: C,
) -> PortalResult<()> {
    conn.execute(
        "INSERT INTO member (publisher, kind, member_name, capacity) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(publisher, kind, member_name) DO UPDATE SET capacity = excluded.capacity",
        params![publisher, C::KIND.as_str(), name, capacity.as_str()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_round_trip_keeps_member_order() {
        let db = CatalogDb::open_in_memory().unwrap();
        db.create_publisher("estat", "Eurostat").unwrap();
        add_member(db.conn(), "estat", "zoe", UserCapacity::Editor).unwrap();
        add_member(db.conn(), "estat", "adam", UserCapacity::Admin).unwrap();
        add_member(db.conn(), "estat", "gdp", DatasetCapacity::Public).unwrap();

        let publisher = db.publisher("estat").unwrap();
        assert_eq!(publisher.title, "Eurostat");
        assert_eq!(
            publisher.users,
            vec![
                Member::new("zoe", UserCapacity::Editor),
                Member::new("adam", UserCapacity::Admin),
            ]
        );
        assert_eq!(publisher.datasets, vec![Member::new("gdp", DatasetCapacity::Public)]);
    }

    #[test]
    fn unknown_publisher() {
        let db = CatalogDb::open_in_memory().unwrap();
        assert!(matches!(
            db.publisher("nobody"),
            Err(PortalError::PublisherNotFound(name)) if name == "nobody"
        ));
    }

    #[test]
    fn invalid_capacity_is_rejected_at_load() {
        let db = CatalogDb::open_in_memory().unwrap();
        db.create_publisher("estat", "Eurostat").unwrap();
        db.conn()
            .execute(
                "INSERT INTO member (publisher, kind, member_name, capacity)
                 VALUES ('estat', 'user', 'bob', 'owner')",
                [],
            )
            .unwrap();

        let err = db.publisher("estat").unwrap_err();
        assert!(matches!(
            err,
            PortalError::InvalidCapacity { kind: "user", ref member, ref value }
                if member == "bob" && value == "owner"
        ));
    }

    #[test]
    fn translations_are_upserted() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        let first = TermTranslation {
            term: "Eurostat".to_string(),
            term_translation: "Eurostat (fr)".to_string(),
            lang_code: "fr".to_string(),
        };
        let second = TermTranslation {
            term_translation: "Office statistique".to_string(),
            ..first.clone()
        };
        db.update_term_translations(&[first]).unwrap();
        db.update_term_translations(&[second]).unwrap();

        assert_eq!(
            db.term_translation("Eurostat", "fr").unwrap().as_deref(),
            Some("Office statistique")
        );
        assert_eq!(db.term_translation("Eurostat", "de").unwrap(), None);
    }
}
