//! Controlled vocabularies and their term translations.
//!
//! Vocabulary and publisher data files are SPARQL JSON result sets: one binding
//! per (term, language) with the term URI, its label and the label's language.
//! Extra translations come from a CSV file with one column per language code,
//! keyed by the English label.

use std::io::Read;
use std::path::Path;

use rusqlite::{params, OptionalExtension};
use serde::Deserialize;

use crate::{CatalogDb, PortalError, PortalResult, TermTranslation};

pub(crate) const GEO_VOCAB_NAME: &str = "geographical_coverage";
pub(crate) const DATASET_TYPE_VOCAB_NAME: &str = "dataset_type";
pub(crate) const LANGUAGE_VOCAB_NAME: &str = "language";
pub(crate) const STATUS_VOCAB_NAME: &str = "status";
pub(crate) const INTEROP_VOCAB_NAME: &str = "interoperability_level";
pub(crate) const TEMPORAL_VOCAB_NAME: &str = "temporal_granularity";

/// Portal vocabularies and the data file each one is loaded from.
pub(crate) const PORTAL_VOCABS: [(&str, &str); 6] = [
    (GEO_VOCAB_NAME, "po-countries.json"),
    (DATASET_TYPE_VOCAB_NAME, "odp-dataset-type.json"),
    (LANGUAGE_VOCAB_NAME, "po-languages.json"),
    (STATUS_VOCAB_NAME, "odp-dataset-status.json"),
    (INTEROP_VOCAB_NAME, "odp-interoperability-level.json"),
    (TEMPORAL_VOCAB_NAME, "odp-temporal-granularity.json"),
];

pub(crate) const VOCAB_TRANSLATIONS_FILE: &str = "odp-vocabulary-translate.csv";
const ENGLISH_COLUMN: &str = "en";

// The language list carries a pseudo-language that must not become a tag.
const MULTILINGUAL_CODE_LABEL: &str = "Multilingual Code";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LabelledTerm {
    pub(crate) term: String,
    pub(crate) label: String,
    pub(crate) language: String,
}

#[derive(Deserialize)]
struct SparqlDocument {
    results: SparqlResults,
}

#[derive(Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<SparqlBinding>,
}

#[derive(Deserialize)]
struct SparqlBinding {
    term: SparqlValue,
    #[serde(default)]
    label: SparqlValue,
    language: SparqlValue,
}

#[derive(Deserialize, Default)]
struct SparqlValue {
    #[serde(default)]
    value: String,
}

pub(crate) fn parse_labelled_terms(json: &str) -> PortalResult<Vec<LabelledTerm>> {
    let document: SparqlDocument = serde_json::from_str(json)?;
    Ok(document
        .results
        .bindings
        .into_iter()
        .map(|b| LabelledTerm {
            term: b.term.value,
            label: b.label.value,
            language: b.language.value,
        })
        .collect())
}

pub(crate) fn read_labelled_terms(path: &Path) -> PortalResult<Vec<LabelledTerm>> {
    let text = std::fs::read_to_string(path)?;
    parse_labelled_terms(&text)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct VocabReport {
    pub(crate) tags_created: usize,
    pub(crate) tags_existing: usize,
    pub(crate) translations: usize,
}

pub(crate) fn vocabulary_exists(db: &CatalogDb, name: &str) -> PortalResult<bool> {
    let id: Option<i64> = db
        .conn()
        .query_row(
            "SELECT id FROM vocabulary WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.is_some())
}

fn create_vocab(db: &CatalogDb, name: &str) -> PortalResult<()> {
    tracing::info!("Creating vocabulary \"{name}\"");
    let inserted = db.conn().execute(
        "INSERT OR IGNORE INTO vocabulary (name) VALUES (?1)",
        params![name],
    )?;
    if inserted == 0 {
        tracing::info!("Vocabulary \"{name}\" already exists");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn vocabulary_tags(db: &CatalogDb, name: &str) -> PortalResult<Vec<String>> {
    let mut stmt = db
        .conn()
        .prepare("SELECT name FROM tag WHERE vocabulary = ?1 ORDER BY rowid")?;
    let rows = stmt.query_map(params![name], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn create_vocab_from_terms(
    db: &mut CatalogDb,
    vocab_name: &str,
    terms: &[LabelledTerm],
) -> PortalResult<VocabReport> {
    create_vocab(db, vocab_name)?;
    let skip_label =
        |t: &LabelledTerm| vocab_name == LANGUAGE_VOCAB_NAME && t.label == MULTILINGUAL_CODE_LABEL;

    let mut report = VocabReport::default();
    for item in terms.iter().filter(|t| t.language == "en") {
        if skip_label(item) {
            continue;
        }
        let inserted = db.conn().execute(
            "INSERT OR IGNORE INTO tag (name, vocabulary) VALUES (?1, ?2)",
            params![item.term, vocab_name],
        )?;
        if inserted == 0 {
            tracing::info!("Tag \"{}\" already belongs to vocab \"{vocab_name}\"", item.term);
            report.tags_existing += 1;
        } else {
            report.tags_created += 1;
        }
    }

    let translations: Vec<TermTranslation> = terms
        .iter()
        .filter(|t| !skip_label(t) && !t.label.is_empty())
        .map(|t| TermTranslation {
            term: t.term.clone(),
            term_translation: t.label.clone(),
            lang_code: t.language.clone(),
        })
        .collect();
    report.translations = db.update_term_translations(&translations)?;
    Ok(report)
}

pub(crate) fn create_vocab_from_file(
    db: &mut CatalogDb,
    vocab_name: &str,
    file_name: &Path,
) -> PortalResult<VocabReport> {
    let terms = read_labelled_terms(file_name)?;
    create_vocab_from_terms(db, vocab_name, &terms)
}

pub(crate) fn delete_vocab(db: &mut CatalogDb, vocab_name: &str) -> PortalResult<usize> {
    tracing::info!("Deleting vocabulary \"{vocab_name}\"");
    if !vocabulary_exists(db, vocab_name)? {
        return Err(PortalError::VocabularyNotFound(vocab_name.to_string()));
    }
    let tx = db.transaction()?;
    let tags = tx.execute("DELETE FROM tag WHERE vocabulary = ?1", params![vocab_name])?;
    tx.execute("DELETE FROM vocabulary WHERE name = ?1", params![vocab_name])?;
    tx.commit()?;
    Ok(tags)
}

/// The term whose English translation is `label`, or the label itself when
/// no term has it.
pub(crate) fn lookup_term(db: &CatalogDb, label: &str) -> PortalResult<String> {
    let term: Option<String> = db
        .conn()
        .query_row(
            "SELECT term FROM term_translation
             WHERE term_translation = ?1 AND lang_code = 'en'",
            params![label],
            |row| row.get(0),
        )
        .optional()?;
    Ok(term.unwrap_or_else(|| label.to_string()))
}

/// Store the translations of a CSV file whose `en` column holds the English
/// label of each term and whose other columns are named by language code.
/// Empty cells are skipped. Returns the number of translations stored.
pub(crate) fn import_csv_translations_from_reader<R: Read>(
    db: &mut CatalogDb,
    source: &str,
    reader: R,
) -> PortalResult<usize> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let Some(english) = headers.iter().position(|h| h == ENGLISH_COLUMN) else {
        return Err(PortalError::MissingColumn {
            file: source.to_string(),
            column: ENGLISH_COLUMN,
        });
    };

    let mut translations = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let Some(label) = record.get(english).filter(|l| !l.is_empty()) else {
            continue;
        };
        let term = lookup_term(db, label)?;
        for (column, (lang_code, value)) in headers.iter().zip(record.iter()).enumerate() {
            if column == english || value.is_empty() {
                continue;
            }
            translations.push(TermTranslation {
                term: term.clone(),
                term_translation: value.to_string(),
                lang_code: lang_code.to_string(),
            });
        }
    }
    db.update_term_translations(&translations)
}

pub(crate) fn import_csv_translations(db: &mut CatalogDb, file_name: &Path) -> PortalResult<usize> {
    let file = std::fs::File::open(file_name)?;
    let stored = import_csv_translations_from_reader(db, &file_name.display().to_string(), file)?;
    tracing::info!(file = %file_name.display(), translations = stored, "Imported CSV translations");
    Ok(stored)
}

pub(crate) fn create_all_vocabs(db: &mut CatalogDb, vocab_dir: &Path) -> PortalResult<()> {
    for (name, file) in PORTAL_VOCABS {
        let report = create_vocab_from_file(db, name, &vocab_dir.join(file))?;
        tracing::info!(
            vocab = name,
            tags_created = report.tags_created,
            translations = report.translations,
            "Vocabulary loaded"
        );
    }
    import_csv_translations(db, &vocab_dir.join(VOCAB_TRANSLATIONS_FILE))?;
    Ok(())
}

/// Delete every portal vocabulary. Vocabularies that were never created are skipped.
pub(crate) fn delete_all_vocabs(db: &mut CatalogDb) -> PortalResult<()> {
    for (name, _) in PORTAL_VOCABS {
        match delete_vocab(db, name) {
            Ok(_) => {}
            Err(PortalError::VocabularyNotFound(_)) => {
                tracing::warn!("Vocabulary \"{name}\" does not exist");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LANGUAGES_JSON: &str = r#"{
        "head": {"vars": ["term", "label", "language"]},
        "results": {"bindings": [
            {"term": {"value": "http://publications.europa.eu/resource/authority/language/ENG"},
             "label": {"value": "English"}, "language": {"value": "en"}},
            {"term": {"value": "http://publications.europa.eu/resource/authority/language/ENG"},
             "label": {"value": "anglais"}, "language": {"value": "fr"}},
            {"term": {"value": "http://publications.europa.eu/resource/authority/language/MUL"},
             "label": {"value": "Multilingual Code"}, "language": {"value": "en"}},
            {"term": {"value": "http://publications.europa.eu/resource/authority/language/FRA"},
             "label": {"value": "French"}, "language": {"value": "en"}},
            {"term": {"value": "http://publications.europa.eu/resource/authority/language/FRA"},
             "label": {"value": ""}, "language": {"value": "de"}}
        ]}
    }"#;

    #[test]
    fn parses_sparql_bindings() {
        let terms = parse_labelled_terms(LANGUAGES_JSON).unwrap();
        assert_eq!(terms.len(), 5);
        assert_eq!(
            terms[1],
            LabelledTerm {
                term: "http://publications.europa.eu/resource/authority/language/ENG".to_string(),
                label: "anglais".to_string(),
                language: "fr".to_string(),
            }
        );
    }

    #[test]
    fn create_language_vocab_skips_multilingual_code() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        let terms = parse_labelled_terms(LANGUAGES_JSON).unwrap();

        let report = create_vocab_from_terms(&mut db, LANGUAGE_VOCAB_NAME, &terms).unwrap();
        assert_eq!(
            report,
            VocabReport {
                tags_created: 2,
                tags_existing: 0,
                // ENG/en, ENG/fr, FRA/en; the empty German label is dropped
                translations: 3,
            }
        );
        assert_eq!(
            vocabulary_tags(&db, LANGUAGE_VOCAB_NAME).unwrap(),
            vec![
                "http://publications.europa.eu/resource/authority/language/ENG".to_string(),
                "http://publications.europa.eu/resource/authority/language/FRA".to_string(),
            ]
        );
        assert_eq!(
            db.term_translation(
                "http://publications.europa.eu/resource/authority/language/ENG",
                "fr"
            )
            .unwrap()
            .as_deref(),
            Some("anglais")
        );
    }

    #[test]
    fn other_vocabs_keep_every_english_term() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        let terms = parse_labelled_terms(LANGUAGES_JSON).unwrap();

        let report = create_vocab_from_terms(&mut db, GEO_VOCAB_NAME, &terms).unwrap();
        assert_eq!(report.tags_created, 3);
    }

    #[test]
    fn recreating_a_vocab_is_not_an_error() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        let terms = parse_labelled_terms(LANGUAGES_JSON).unwrap();

        create_vocab_from_terms(&mut db, LANGUAGE_VOCAB_NAME, &terms).unwrap();
        let report = create_vocab_from_terms(&mut db, LANGUAGE_VOCAB_NAME, &terms).unwrap();
        assert_eq!(report.tags_created, 0);
        assert_eq!(report.tags_existing, 2);
    }

    const TRANSLATIONS_CSV: &str = "en,fr,de
English,anglais,Englisch
Unknown label,inconnu,
";

    #[test]
    fn lookup_term_by_english_label() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        let terms = parse_labelled_terms(LANGUAGES_JSON).unwrap();
        create_vocab_from_terms(&mut db, LANGUAGE_VOCAB_NAME, &terms).unwrap();

        assert_eq!(
            lookup_term(&db, "English").unwrap(),
            "http://publications.europa.eu/resource/authority/language/ENG"
        );
        // "anglais" is a French label, not an English one
        assert_eq!(lookup_term(&db, "anglais").unwrap(), "anglais");
        assert_eq!(lookup_term(&db, "Nowhere").unwrap(), "Nowhere");
    }

    #[test]
    fn csv_translations_attach_to_known_terms() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        let terms = parse_labelled_terms(LANGUAGES_JSON).unwrap();
        create_vocab_from_terms(&mut db, LANGUAGE_VOCAB_NAME, &terms).unwrap();

        let stored =
            import_csv_translations_from_reader(&mut db, "test.csv", TRANSLATIONS_CSV.as_bytes())
                .unwrap();
        // the empty German cell is skipped
        assert_eq!(stored, 3);

        let eng = "http://publications.europa.eu/resource/authority/language/ENG";
        assert_eq!(db.term_translation(eng, "de").unwrap().as_deref(), Some("Englisch"));
        assert_eq!(db.term_translation(eng, "fr").unwrap().as_deref(), Some("anglais"));
        assert_eq!(
            db.term_translation("Unknown label", "fr").unwrap().as_deref(),
            Some("inconnu")
        );
        assert_eq!(db.term_translation("Unknown label", "de").unwrap(), None);
    }

    #[test]
    fn csv_translations_need_an_english_column() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        let err = import_csv_translations_from_reader(&mut db, "test.csv", "fr,de\na,b\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, PortalError::MissingColumn { column: "en", .. }));
    }

    #[test]
    fn delete_vocab_removes_tags() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        let terms = parse_labelled_terms(LANGUAGES_JSON).unwrap();
        create_vocab_from_terms(&mut db, STATUS_VOCAB_NAME, &terms).unwrap();

        assert_eq!(delete_vocab(&mut db, STATUS_VOCAB_NAME).unwrap(), 3);
        assert!(!vocabulary_exists(&db, STATUS_VOCAB_NAME).unwrap());
        assert!(vocabulary_tags(&db, STATUS_VOCAB_NAME).unwrap().is_empty());
    }

    #[test]
    fn delete_all_skips_missing_vocabs() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        let terms = parse_labelled_terms(LANGUAGES_JSON).unwrap();
        create_vocab_from_terms(&mut db, GEO_VOCAB_NAME, &terms).unwrap();

        delete_all_vocabs(&mut db).unwrap();
        assert!(!vocabulary_exists(&db, GEO_VOCAB_NAME).unwrap());
    }

    #[test]
    fn delete_unknown_vocab() {
        let mut db = CatalogDb::open_in_memory().unwrap();
        assert!(matches!(
            delete_vocab(&mut db, TEMPORAL_VOCAB_NAME),
            Err(PortalError::VocabularyNotFound(_))
        ));
    }
}
