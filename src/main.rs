//! npidx CLI - Command line interface for nanopub_index
//!
//! Inspect and maintain a nanopub index database from the command line.

use clap::{Parser, Subcommand};
use nanopub_index::{ChampConfig, Collection, Database, Hash, IndexConfig, PeerState};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "npidx")]
#[command(about = "Content-addressed index for a nanopublication server")]
#[command(version)]
struct Cli {
    /// Path to the database file [default: <data dir>/npidx/index.npidx]
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init {
        /// Hash bits consumed per trie level
        #[arg(long)]
        bit_width: Option<u8>,
        /// Colliding keys kept inline before pushing down
        #[arg(long)]
        max_collisions: Option<usize>,
    },

    /// Add a nanopub document under its artifact code
    Add {
        /// Artifact code (e.g. RA...)
        artifact: String,
        /// File holding the document
        file: PathBuf,
    },

    /// Print a nanopub document
    Get {
        /// Artifact code
        artifact: String,
    },

    /// Number of indexed nanopubs and the next journal number
    Count,

    /// Show the root digest of one or all collections
    Root {
        /// Collection name (nanopubs, journal, peers, packaged-files)
        collection: Option<Collection>,
    },

    /// List the entries of a collection
    List {
        /// Collection name
        collection: Collection,
        /// Maximum number of entries to return
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show entries changed since an earlier root
    Diff {
        /// Collection name
        collection: Collection,
        /// Earlier root digest (hex), or "empty"
        old_root: String,
    },

    /// Record replication state for a peer
    PeerSet {
        /// Peer base URL
        url: String,
        /// Journal identifier reported by the peer
        journal_id: u64,
        /// First nanopub number not yet fetched
        next_no: u64,
    },

    /// List known peers
    Peers,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let db_path = match cli.database.clone() {
        Some(path) => path,
        None => default_database_path()?,
    };
    init_tracing(&db_path);

    match cli.command {
        Commands::Init {
            bit_width,
            max_collisions,
        } => {
            let mut config = IndexConfig::load(&db_path)?;
            let defaults = config.champ;
            config.champ = ChampConfig::new(
                bit_width.unwrap_or(defaults.bit_width),
                max_collisions.unwrap_or(defaults.max_collisions),
            )?;
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            config.save(&db_path)?;
            let db = Database::create(&db_path)?;
            db.sync()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Created database at {}", db_path.display()),
                    "journal_id": db.journal_id()?,
                }),
            )?;
        }

        Commands::Add { artifact, file } => {
            let mut db = open_db(&db_path)?;
            let document = std::fs::read(&file)?;
            let number = db.add_nanopub(&artifact, &document)?;
            db.sync()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "artifact": artifact,
                    "number": number
                }),
            )?;
        }

        Commands::Get { artifact } => {
            let db = open_db(&db_path)?;
            match (db.nanopub_record(&artifact)?, db.get_nanopub(&artifact)?) {
                (Some(record), Some(document)) => output(
                    cli.format,
                    &serde_json::json!({
                        "artifact": artifact,
                        "number": record.number,
                        "document": String::from_utf8_lossy(&document)
                    }),
                )?,
                _ => {
                    output(
                        cli.format,
                        &serde_json::json!({
                            "status": "error",
                            "message": format!("Nanopub not found: {}", artifact)
                        }),
                    )?;
                    std::process::exit(1);
                }
            }
        }

        Commands::Count => {
            let db = open_db(&db_path)?;
            output(
                cli.format,
                &serde_json::json!({
                    "count": db.nanopub_count()?,
                    "next_nanopub_no": db.next_nanopub_no()?
                }),
            )?;
        }

        Commands::Root { collection } => {
            let db = open_db(&db_path)?;
            let kinds = match collection {
                Some(kind) => vec![kind],
                None => Collection::ALL.to_vec(),
            };
            let roots: serde_json::Map<_, _> = kinds
                .into_iter()
                .map(|kind| {
                    let root = db.root(kind).map(|h| h.to_hex());
                    (kind.name().to_string(), serde_json::json!(root))
                })
                .collect();
            output(cli.format, &serde_json::Value::Object(roots))?;
        }

        Commands::List { collection, limit } => {
            let db = open_db(&db_path)?;
            let mut entries = db.collection(collection)?.entries()?;
            entries.sort();
            if let Some(limit) = limit {
                entries.truncate(limit);
            }
            let items: Vec<_> = entries
                .iter()
                .map(|(k, v)| {
                    serde_json::json!({
                        "key": String::from_utf8_lossy(k),
                        "value": String::from_utf8_lossy(v)
                    })
                })
                .collect();
            output(
                cli.format,
                &serde_json::json!({
                    "collection": collection.name(),
                    "count": items.len(),
                    "entries": items
                }),
            )?;
        }

        Commands::Diff {
            collection,
            old_root,
        } => {
            let db = open_db(&db_path)?;
            let old = if old_root == "empty" {
                None
            } else {
                Some(old_root.parse::<Hash>()?)
            };
            let diff = db.changes_since(collection, old)?;
            let lossy = |v: &Option<Vec<u8>>| {
                v.as_ref()
                    .map(|v| String::from_utf8_lossy(v).into_owned())
            };
            let changes: Vec<_> = diff
                .entries
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "key": String::from_utf8_lossy(&e.key),
                        "change": format!("{:?}", e.kind()).to_lowercase(),
                        "old": lossy(&e.old),
                        "new": lossy(&e.new)
                    })
                })
                .collect();
            output(
                cli.format,
                &serde_json::json!({
                    "added": diff.added_count(),
                    "removed": diff.removed_count(),
                    "modified": diff.modified_count(),
                    "changes": changes
                }),
            )?;
        }

        Commands::PeerSet {
            url,
            journal_id,
            next_no,
        } => {
            let mut db = open_db(&db_path)?;
            db.set_peer(&PeerState::new(&url, journal_id, next_no))?;
            db.sync()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "url": url
                }),
            )?;
        }

        Commands::Peers => {
            let db = open_db(&db_path)?;
            let peers = db.peers()?;
            output(
                cli.format,
                &serde_json::json!({
                    "count": peers.len(),
                    "peers": peers
                }),
            )?;
        }
    }

    Ok(())
}

fn default_database_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("No local data directory; pass --database"))?;
    Ok(base.join("npidx").join("index.npidx"))
}

/// `RUST_LOG` wins, then the database's configured filter, then `warn`
fn init_tracing(db_path: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let configured = IndexConfig::load(db_path).ok().and_then(|c| c.log_filter);
        EnvFilter::new(configured.as_deref().unwrap_or("warn"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_db(path: &Path) -> anyhow::Result<Database> {
    let db = Database::open_or_create(path)?;
    Ok(db)
}

fn output(format: OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
