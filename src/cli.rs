use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ecportal")]
#[command(about = "Publisher, vocabulary and search cloud administration for the open data portal", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Portal config file (JSON)
    #[arg(short, long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Log more (repeatable); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create the catalog tables.
    InitDb,

    /// Create publishers from the corporate-bodies file.
    ImportPublishers,

    /// Add new publishers, retitle changed ones, delete empty stale ones.
    UpdatePublishers,

    /// Move all users and datasets of one publisher into another.
    MigratePublisher { source: String, target: String },

    /// Delete every dataset of a publisher.
    PurgePublisherDatasets { publisher: String },

    /// Create a vocabulary from a SPARQL JSON file.
    CreateVocab { name: String, file: PathBuf },

    /// Delete a vocabulary and its tags.
    DeleteVocab { name: String },

    /// Store the term translations of a CSV file keyed by English label.
    ImportCsvTranslations {
        /// CSV file (default: odp-vocabulary-translate.csv in the vocabulary directory)
        file: Option<PathBuf>,
    },

    /// Import publishers, create all portal vocabularies, then import CSV translations.
    CreateAllVocabs,

    /// Delete all portal vocabularies.
    DeleteAllVocabs,

    /// Create the search cloud tables and index.
    SearchcloudInstallTables,

    /// Rebuild the list of popular searches awaiting approval.
    SearchcloudGenerateUnapprovedSearchList {
        /// Only count searches from the last N days (default: config window_days)
        #[arg(long)]
        days: Option<i64>,
    },

    /// Delete tracked searches.
    SearchcloudPurgeQueries {
        /// Keep searches from the last N days; without it every search is deleted
        #[arg(long)]
        older_than_days: Option<i64>,
    },

    /// Record a search, as the portal search page would.
    TrackSearch {
        query: String,
        #[arg(long)]
        lang: Option<String>,
    },

    /// Print the most viewed datasets.
    MostViewed {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Serve the search cloud pages and JSON endpoints.
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}
