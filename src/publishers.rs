//! Publisher administration: import, refresh, migration and dataset purge.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::params;

use crate::{
    migrate_dataset_lists, migrate_user_lists, read_labelled_terms, replace_members, CatalogDb,
    DatasetCapacity, LabelledTerm, Member, PortalResult, TermTranslation, UserCapacity,
};

/// One row of the corporate-bodies file: a publisher title in one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PublisherRecord {
    pub(crate) name: String,
    pub(crate) title: String,
    pub(crate) lang_code: String,
}

impl From<LabelledTerm> for PublisherRecord {
    fn from(term: LabelledTerm) -> Self {
        let name = term.term.rsplit('/').next().unwrap_or_default().to_lowercase();
        Self {
            name,
            title: term.label,
            lang_code: term.language,
        }
    }
}

pub(crate) fn read_publishers(path: &Path) -> PortalResult<Vec<PublisherRecord>> {
    Ok(read_labelled_terms(path)?
        .into_iter()
        .map(PublisherRecord::from)
        .collect())
}

fn add_publishers(db: &mut CatalogDb, records: &[PublisherRecord]) -> PortalResult<usize> {
    let mut titles = HashMap::new();
    for record in records.iter().filter(|r| r.lang_code == "en") {
        db.create_publisher(&record.name, &record.title)?;
        tracing::info!("Added new publisher: {} [{}]", record.title, record.name);
        titles.insert(record.name.clone(), title_or_name(record));
    }
    update_translations(db, records, &titles)?;
    Ok(titles.len())
}

fn title_or_name(record: &PublisherRecord) -> String {
    if record.title.is_empty() {
        record.name.clone()
    } else {
        record.title.clone()
    }
}

/// Store non-English titles as translations of the English title.
fn update_translations(
    db: &mut CatalogDb,
    records: &[PublisherRecord],
    english_titles: &HashMap<String, String>,
) -> PortalResult<usize> {
    let mut translations = Vec::new();
    for record in records {
        if record.lang_code == "en" || record.title.is_empty() {
            continue;
        }
        let Some(english) = english_titles.get(&record.name) else {
            tracing::warn!(
                "No english version of {} [{}].  Skipping",
                record.title,
                record.name
            );
            continue;
        };
        translations.push(TermTranslation {
            term: english.clone(),
            term_translation: record.title.clone(),
            lang_code: record.lang_code.clone(),
        });
    }
    db.update_term_translations(&translations)
}

pub(crate) fn import_publishers(db: &mut CatalogDb, path: &Path) -> PortalResult<usize> {
    tracing::info!("Reading publisher names and translations from {}", path.display());
    let records = read_publishers(path)?;
    add_publishers(db, &records)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PublisherUpdateReport {
    pub(crate) added: usize,
    pub(crate) retitled: usize,
    pub(crate) deleted: Vec<String>,
    pub(crate) kept: Vec<String>,
}

pub(crate) fn update_publishers(
    db: &mut CatalogDb,
    records: &[PublisherRecord],
) -> PortalResult<PublisherUpdateReport> {
    let existing: HashMap<String, (String, usize)> = db
        .publishers()?
        .into_iter()
        .map(|p| (p.name, (p.title, p.dataset_count)))
        .collect();
    let listed: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();

    let (known, new): (Vec<PublisherRecord>, Vec<PublisherRecord>) = records
        .iter()
        .cloned()
        .partition(|r| existing.contains_key(&r.name));

    let mut report = PublisherUpdateReport {
        added: add_publishers(db, &new)?,
        ..PublisherUpdateReport::default()
    };

    let mut titles = HashMap::new();
    for record in known.iter().filter(|r| r.lang_code == "en") {
        if let Some((old_title, _)) = existing.get(&record.name) {
            if *old_title != record.title {
                tracing::info!(
                    "Publisher required update: {}, [{}].  (Was: {})",
                    record.title,
                    record.name,
                    old_title
                );
                db.update_publisher_title(&record.name, &record.title)?;
                report.retitled += 1;
            }
        }
        titles.insert(record.name.clone(), title_or_name(record));
    }
    update_translations(db, &known, &titles)?;

    let mut gone: Vec<(&String, &usize)> = existing
        .iter()
        .filter(|(name, _)| !listed.contains(name.as_str()))
        .map(|(name, (_, datasets))| (name, datasets))
        .collect();
    gone.sort();
    for (name, datasets) in gone {
        if *datasets == 0 {
            tracing::info!("Deleting old publisher {name} as it has no datasets.");
            db.delete_publisher(name)?;
            report.deleted.push(name.clone());
        } else {
            tracing::warn!(
                "Not deleting old publisher: {name} because it has datasets associated with it."
            );
            report.kept.push(name.clone());
        }
    }
    Ok(report)
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct MigrationReport {
    pub(crate) users: Vec<Member<UserCapacity>>,
    pub(crate) datasets: Vec<Member<DatasetCapacity>>,
}

/// Move every user and dataset of `source` into `target` and empty `source`.
/// Both publishers are rewritten in a single transaction.
pub(crate) fn migrate_publisher(
    db: &mut CatalogDb,
    source: &str,
    target: &str,
) -> PortalResult<MigrationReport> {
    let source_publisher = db.publisher(source)?;
    let target_publisher = db.publisher(target)?;

    let users = migrate_user_lists(&source_publisher.users, &target_publisher.users);
    let datasets = migrate_dataset_lists(&source_publisher.datasets, &target_publisher.datasets);

    let tx = db.transaction()?;
    replace_members::<UserCapacity>(&tx, source, &[])?;
    replace_members::<DatasetCapacity>(&tx, source, &[])?;
    replace_members(&tx, target, &users)?;
    replace_members(&tx, target, &datasets)?;
    tx.commit()?;

    tracing::info!(
        source,
        target,
        users = users.len(),
        datasets = datasets.len(),
        "Migrated publisher members"
    );
    Ok(MigrationReport { users, datasets })
}

/// Delete every dataset listed by `publisher`, with all of their memberships.
pub(crate) fn purge_publisher_datasets(db: &mut CatalogDb, publisher: &str) -> PortalResult<usize> {
    let publisher = db.publisher(publisher)?;
    let tx = db.transaction()?;
    let mut purged = 0;
    for dataset in &publisher.datasets {
        tx.execute(
            "DELETE FROM member WHERE kind = 'dataset' AND member_name = ?1",
            params![dataset.name],
        )?;
        let deleted = tx.execute("DELETE FROM package WHERE name = ?1", params![dataset.name])?;
        if deleted > 0 {
            tracing::info!("Purged dataset {}", dataset.name);
            purged += 1;
        } else {
            tracing::warn!("Dataset {} is listed by {} but does not exist", dataset.name, publisher.name);
        }
    }
    tx.commit()?;
    Ok(purged)
}
