//! crosswalk CLI: curate relationships between reference documents.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::Result;

use crosswalk::client::Gateway;
use crosswalk::config::Config;
use crosswalk::controller::{ControllerOptions, MappingController};
use crosswalk::demo::DemoService;
use crosswalk::export::save_download;
use crosswalk::loader::LoadMode;
use crosswalk::model::ExportFormat;
use crosswalk::paths::CrosswalkPaths;
use crosswalk::tui::MapperTui;

/// How long `map` waits for the catalog before applying `--target`/`--source`.
const STARTUP_WAIT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(
    name = "crosswalk",
    version,
    about = "Map relationships between elements of reference documents"
)]
struct Cli {
    /// Document service base URL (overrides the config file).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Config file to use instead of the XDG default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the built-in offline demo service instead of a server.
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive mapper.
    Map {
        /// Target document to annotate.
        #[arg(long)]
        target: Option<String>,
        /// Source document to draw candidates from.
        #[arg(long)]
        source: Option<String>,
        /// Relationship type to preselect.
        #[arg(long)]
        relationship: Option<String>,
    },

    /// List reference documents.
    Documents,

    /// List or search the elements of a document.
    Elements {
        /// Document identifier.
        doc: String,
        /// Free-text filter over identifier, title and text.
        #[arg(long)]
        search: Option<String>,
    },

    /// List relationship types.
    RelationshipTypes,

    /// Download persisted relationships.
    Export {
        /// File format: excel or csv.
        #[arg(long, default_value = "excel")]
        format: ExportFormat,
        /// Restrict to these provenance documents (comma-separated or repeated).
        #[arg(long, value_delimiter = ',')]
        provenance: Vec<String>,
        /// Output directory (defaults to the configured export directory).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Inspect or create the config file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Log to stderr.
fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Log to the state directory so log lines never land on the TUI.
fn init_file_logging(paths: &CrosswalkPaths) {
    let file = paths
        .ensure_dirs()
        .ok()
        .and_then(|()| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(paths.log_file())
                .ok()
        });
    match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::sink)
            .init(),
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();
    let paths = CrosswalkPaths::resolve()?;

    if matches!(cli.command, Commands::Map { .. }) {
        init_file_logging(&paths);
    } else {
        init_stderr_logging();
    }

    let config_file = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let mut config = Config::load_or_default(&config_file)?;
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }

    let gateway = || {
        if cli.demo {
            tracing::info!("using the offline demo service");
            Gateway::new(DemoService::seeded())
        } else {
            Gateway::http(&config.server_url, config.request_timeout())
        }
    };
    let export_dir = config.export_dir_or(paths.exports_dir());

    match cli.command {
        Commands::Map {
            ref target,
            ref source,
            ref relationship,
        } => {
            let mut controller = MappingController::new(
                gateway(),
                ControllerOptions {
                    mode: LoadMode::Threaded,
                    export_dir,
                    search_debounce: config.search_debounce(),
                    notice_ttl: config.notice_ttl(),
                },
            );
            controller.open();
            if target.is_some() || source.is_some() || relationship.is_some() {
                controller.wait_idle(STARTUP_WAIT);
            }
            if let Some(doc) = target {
                let _ = controller.select_target_document(doc);
            }
            if let Some(doc) = source {
                let _ = controller.select_source_document(doc);
            }
            if let Some(ty) = relationship {
                let _ = controller.select_relationship_type(ty);
            }
            tracing::info!(server = %config.server_url, demo = cli.demo, "mapper started");
            MapperTui::new(controller).run()?;
        }

        Commands::Documents => {
            let documents = gateway().list_documents()?;
            if documents.is_empty() {
                println!("No documents.");
            } else {
                println!("Documents ({}):", documents.len());
                for d in &documents {
                    println!("  {:<16} {} {}", d.doc_identifier, d.label(), d.version);
                }
            }
        }

        Commands::Elements { doc, search } => {
            let elements = gateway().list_elements(&doc, search.as_deref())?;
            if elements.is_empty() {
                println!("No elements.");
            } else {
                println!("Elements of {doc} ({}):", elements.len());
                for e in &elements {
                    println!("  {:<16} [{}] {}", e.element_identifier, e.element_type, e.title);
                }
            }
        }

        Commands::RelationshipTypes => {
            let gw = gateway();
            let documents = gw.list_documents()?;
            let types = gw.relationship_types(&documents)?;
            if types.is_empty() {
                println!("No relationship types (no documents to read them from).");
            } else {
                for t in &types {
                    println!("  {:<20} {}", t.relationship_identifier, t.description);
                }
            }
        }

        Commands::Export {
            format,
            provenance,
            out,
        } => {
            let scope = (!provenance.is_empty()).then(|| provenance.join(","));
            let download = gateway().export(format, scope.as_deref())?;
            let path = save_download(&out.unwrap_or(export_dir), &download)?;
            println!("Exported {} bytes to {}", download.bytes.len(), path.display());
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", config_file.display());
                print!("{}", config.to_toml());
            }
            ConfigAction::Init { force } => {
                Config::init(&config_file, force)?;
                println!("Wrote {}", config_file.display());
            }
        },
    }

    Ok(())
}
