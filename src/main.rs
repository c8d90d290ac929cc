// Module declarations
mod cache;
mod catalog_db;
mod cli;
mod config;
mod error;
mod membership;
mod mostviewed;
mod publishers;
mod searchcloud;
mod server;
mod upload;
mod util;
mod vocab;

// Re-export module items at the crate root so modules refer to each other as `crate::Item`.
#[allow(unused_imports)]
pub(crate) use cache::*;
#[allow(unused_imports)]
pub(crate) use catalog_db::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use error::*;
#[allow(unused_imports)]
pub(crate) use membership::*;
#[allow(unused_imports)]
pub(crate) use mostviewed::*;
#[allow(unused_imports)]
pub(crate) use publishers::*;
#[allow(unused_imports)]
pub(crate) use searchcloud::*;
#[allow(unused_imports)]
pub(crate) use server::*;
#[allow(unused_imports)]
pub(crate) use upload::*;
#[allow(unused_imports)]
pub(crate) use util::*;
#[allow(unused_imports)]
pub(crate) use vocab::*;

use chrono::Utc;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

const DEFAULT_LOGGING_CONFIG: &str = "info";
const VERBOSE_LOGGING_CONFIG: &str = "debug";

fn configure_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match verbosity {
            0 => EnvFilter::new(DEFAULT_LOGGING_CONFIG),
            _ => EnvFilter::new(VERBOSE_LOGGING_CONFIG),
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    configure_logging(cli.verbose);

    let Some(config_path) = cli.config.as_deref() else {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "the config file is required: pass -c <CONFIG>",
            )
            .exit();
    };
    let config = load_portal_config(config_path)?;

    if let Err(err) = run_command(cli.command, config) {
        tracing::error!(error = %err, "Command failed");
        std::process::exit(1);
    }
    Ok(())
}

fn run_command(command: Command, config: PortalConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut db = CatalogDb::open_or_create(&config.database)?;

    match command {
        Command::InitDb => {
            println!("Catalog ready at {}", config.database.display());
        }

        Command::ImportPublishers => {
            let created = import_publishers(&mut db, &config.publishers_file)?;
            println!("Imported {created} publishers");
        }

        Command::UpdatePublishers => {
            let records = read_publishers(&config.publishers_file)?;
            let report = update_publishers(&mut db, &records)?;
            println!(
                "Added {}, retitled {}, deleted {}, kept {} stale publishers with datasets",
                report.added,
                report.retitled,
                report.deleted.len(),
                report.kept.len()
            );
        }

        Command::MigratePublisher { source, target } => {
            let report = migrate_publisher(&mut db, &source, &target)?;
            println!(
                "Migrated {source} into {target}: {} users, {} datasets",
                report.users.len(),
                report.datasets.len()
            );
        }

        Command::PurgePublisherDatasets { publisher } => {
            let purged = purge_publisher_datasets(&mut db, &publisher)?;
            println!("Purged {purged} datasets of {publisher}");
        }

        Command::CreateVocab { name, file } => {
            let report = create_vocab_from_file(&mut db, &name, &file)?;
            println!(
                "Vocabulary {name}: {} tags created, {} already present, {} translations",
                report.tags_created, report.tags_existing, report.translations
            );
        }

        Command::DeleteVocab { name } => {
            let tags = delete_vocab(&mut db, &name)?;
            println!("Deleted vocabulary {name} ({tags} tags)");
        }

        Command::ImportCsvTranslations { file } => {
            let file = file.unwrap_or_else(|| config.vocab_dir.join(VOCAB_TRANSLATIONS_FILE));
            let stored = import_csv_translations(&mut db, &file)?;
            println!("Stored {stored} translations from {}", file.display());
        }

        Command::CreateAllVocabs => {
            import_publishers(&mut db, &config.publishers_file)?;
            create_all_vocabs(&mut db, &config.vocab_dir)?;
        }

        Command::DeleteAllVocabs => {
            delete_all_vocabs(&mut db)?;
        }

        Command::SearchcloudInstallTables => {
            install_tables(db.conn(), &mut |line| println!("{line}"))?;
        }

        Command::SearchcloudGenerateUnapprovedSearchList { days } => {
            let days = days.unwrap_or(config.searchcloud.window_days);
            let terms = generate_unapproved_list(
                &mut db,
                days,
                config.searchcloud.popular_limit,
                Utc::now(),
            )?;
            println!("{terms} search terms await approval");
        }

        Command::SearchcloudPurgeQueries { older_than_days } => {
            let before = older_than_days
                .map(|days| days_before(Utc::now(), days))
                .transpose()?;
            let purged = purge_search_queries(db.conn(), before)?;
            println!("Purged {purged} tracked searches");
        }

        Command::TrackSearch { query, lang } => {
            let outcome = track_term(
                &mut db,
                lang.as_deref(),
                &query,
                config.searchcloud.max_term_length,
                Utc::now(),
            )?;
            println!("{}", outcome.as_str());
        }

        Command::MostViewed { limit, json } => {
            let limit = limit.unwrap_or(config.most_viewed.default_limit);
            let rows = get_most_viewed(db.conn(), Some(limit))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in rows {
                    println!(
                        "{:>8}  {}  {}",
                        row.running_total,
                        row.name,
                        row.title.unwrap_or_default()
                    );
                }
            }
        }

        Command::Serve { bind, port } => {
            let config = PortalConfig {
                bind: bind.unwrap_or(config.bind),
                port: port.unwrap_or(config.port),
                ..config
            };
            return run_server(config, db);
        }
    }
    Ok(())
}
