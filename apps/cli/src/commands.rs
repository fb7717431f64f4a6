//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use eppn_core::{Coordinator, DispatchReport, LocalNode, RouteTable};
use eppn_shared::{
    AppConfig, EppnError, Message, ParticipantId, Role, init_config, load_config,
    load_config_from, shape_of, validate,
};
use eppn_storage::{Ledger, ParticipantStatus, Registry};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// EPPN: coordination core of the document processing pipeline.
#[derive(Parser)]
#[command(
    name = "eppn",
    version,
    about = "Route pipeline messages and keep the participant registry and coordination ledger.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.eppn/eppn.toml).
    #[arg(long, global = true, env = "EPPN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the coordinator and sink locally and dispatch JSON-lines messages.
    Run {
        /// Message file, one JSON document per line (defaults to stdin). A
        /// top-level `"to"` field sends the message to that address directly.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Validate one message document against the catalog.
    Validate {
        /// JSON file holding a single message.
        file: PathBuf,
    },

    /// Print where one message would be routed, without sending it.
    Route {
        /// JSON file holding a single message.
        file: PathBuf,
    },

    /// Print the route table.
    Routes,

    /// Participant registry operations.
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Coordination ledger operations.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Registry subcommands.
#[derive(Subcommand)]
pub(crate) enum RegistryAction {
    /// Print the registry document.
    Show,
    /// Print the number of registered entries.
    Count,
    /// Set the status of every entry for a participant. Needs the store's
    /// write lock, so it fails while `eppn run` is active.
    Status {
        /// Participant identifier.
        id: String,
        /// New status: active or inactive.
        status: ParticipantStatus,
    },
}

/// Ledger subcommands.
#[derive(Subcommand)]
pub(crate) enum LedgerAction {
    /// Print transactions in append order.
    Show {
        /// Only transactions for this document.
        #[arg(long)]
        doc_id: Option<String>,
    },
    /// Check sequence continuity, timestamp order and duplicate fingerprints.
    Verify,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "eppn=info",
        1 => "eppn=debug",
        _ => "eppn=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so stdout stays clean for command output.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    let config = || resolve_config(config_path.as_deref());

    match cli.command {
        Command::Run { input } => cmd_run(&config()?, input.as_deref()).await,
        Command::Validate { file } => cmd_validate(&file).await,
        Command::Route { file } => cmd_route(&config()?, &file).await,
        Command::Routes => cmd_routes(&config()?).await,
        Command::Registry { action } => match action {
            RegistryAction::Show => cmd_registry_show(&config()?).await,
            RegistryAction::Count => cmd_registry_count(&config()?).await,
            RegistryAction::Status { id, status } => {
                cmd_registry_status(&config()?, &id, status).await
            }
        },
        Command::Ledger { action } => match action {
            LedgerAction::Show { doc_id } => {
                cmd_ledger_show(&config()?, doc_id.as_deref()).await
            }
            LedgerAction::Verify => cmd_ledger_verify(&config()?).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config()?).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Parse one JSON document and validate it against the catalog.
fn parse_message(text: &str) -> eppn_shared::Result<Message> {
    let raw: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| EppnError::validation("$", "a JSON document", e.to_string()))?;
    validate(&raw)
}

/// Split one `run` input line into an optional direct address and the
/// message. A top-level `"to"` string bypasses the route table.
fn parse_line(text: &str) -> eppn_shared::Result<(Option<ParticipantId>, Message)> {
    let mut raw: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| EppnError::validation("$", "a JSON document", e.to_string()))?;
    let to = match raw.as_object_mut().and_then(|fields| fields.remove("to")) {
        None => None,
        Some(serde_json::Value::String(addr)) if !addr.trim().is_empty() => {
            Some(ParticipantId::new(addr.trim()))
        }
        Some(other) => {
            return Err(EppnError::validation(
                "to",
                "non-empty string",
                shape_of(Some(&other)),
            ));
        }
    };
    Ok((to, validate(&raw)?))
}

async fn read_message(file: &Path) -> Result<Message> {
    let text = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    Ok(parse_message(&text)?)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RunTotals {
    read: u64,
    rejected: u64,
    dropped: u64,
    delivered: u64,
    failed: u64,
}

impl RunTotals {
    fn record(&mut self, report: &DispatchReport) {
        if report.is_miss() {
            self.dropped += 1;
        }
        self.delivered += report.delivered.len() as u64;
        self.failed += report.failed.len() as u64;
    }
}

async fn cmd_run(config: &AppConfig, input: Option<&Path>) -> Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| eyre!("cannot open '{}': {e}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let node = LocalNode::start(config)?;
    let mut lines = reader.lines();
    let mut totals = RunTotals::default();
    let mut read_error = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let next = tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received, draining inboxes");
                break;
            }
            next = lines.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        totals.read += 1;

        match parse_line(line) {
            Ok((Some(destination), message)) => {
                match node.send(&destination, message).await {
                    Ok(()) => totals.delivered += 1,
                    Err(e) => {
                        warn!(destination = %destination, error = %e, "direct send failed");
                        totals.failed += 1;
                    }
                }
            }
            Ok((None, message)) => {
                let report = node.dispatch(message).await;
                totals.record(&report);
            }
            Err(e) => {
                warn!(line = totals.read, error = %e, "message rejected");
                totals.rejected += 1;
            }
        }
    }

    let inbox_stats = node.shutdown().await;

    println!();
    println!("  Messages:   {}", totals.read);
    println!("  Rejected:   {}", totals.rejected);
    println!("  Dropped:    {}", totals.dropped);
    println!("  Delivered:  {}", totals.delivered);
    println!("  Failed:     {}", totals.failed);
    for (id, stats) in &inbox_stats {
        println!(
            "  {id}: handled {} failed {} timed out {} rejected {}",
            stats.handled, stats.failed, stats.timed_out, stats.rejected
        );
    }
    println!();

    match read_error {
        Some(e) => Err(eyre!("failed reading input: {e}")),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Catalog and routing
// ---------------------------------------------------------------------------

async fn cmd_validate(file: &Path) -> Result<()> {
    let message = read_message(file).await?;
    match message.doc_id() {
        Some(doc_id) => println!("valid {} message (doc_id {doc_id})", message.kind()),
        None => println!("valid {} message", message.kind()),
    }
    Ok(())
}

async fn cmd_route(config: &AppConfig, file: &Path) -> Result<()> {
    let message = read_message(file).await?;
    let table = RouteTable::from_participants(&config.participants);
    let forwards = table.route(&message);

    if forwards.is_empty() {
        println!("{}: no destinations, message would be dropped", message.kind());
        return Ok(());
    }
    for forward in forwards {
        println!("{} -> {}", message.kind(), forward.destination);
    }
    Ok(())
}

async fn cmd_routes(config: &AppConfig) -> Result<()> {
    let table = RouteTable::from_participants(&config.participants);
    for (kind, destinations) in table.rows() {
        let targets = if destinations.is_empty() {
            "(unassigned)".to_string()
        } else {
            destinations
                .iter()
                .map(ParticipantId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!("{:<15} -> {targets}", kind.as_str());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Registry and ledger
// ---------------------------------------------------------------------------

async fn cmd_registry_show(config: &AppConfig) -> Result<()> {
    let registry = Registry::open_read_only(&config.storage.registry_dir())?;
    let snapshot = registry.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn cmd_registry_count(config: &AppConfig) -> Result<()> {
    let registry = Registry::open_read_only(&config.storage.registry_dir())?;
    println!("{}", registry.count().await);
    Ok(())
}

async fn cmd_registry_status(
    config: &AppConfig,
    id: &str,
    status: ParticipantStatus,
) -> Result<()> {
    let dir = config.storage.registry_dir();
    let coordinator = Coordinator::new(
        config
            .participants
            .address(Role::Registry)
            .unwrap_or_else(|| ParticipantId::new("registry")),
        Arc::new(Registry::open(&dir)?),
        Arc::new(Ledger::open(&dir)?),
    );

    let changed = coordinator.set_status(id, status).await?;
    if changed == 0 {
        println!("no entries for '{id}' changed");
    } else {
        println!("{changed} entries for '{id}' set to {status}");
    }
    Ok(())
}

async fn cmd_ledger_show(config: &AppConfig, doc_id: Option<&str>) -> Result<()> {
    let ledger = Ledger::open_read_only(&config.storage.registry_dir())?;
    let transactions = match doc_id {
        Some(doc_id) => ledger.for_doc(doc_id).await,
        None => ledger.read_all().await,
    };
    println!("{}", serde_json::to_string_pretty(&transactions)?);
    Ok(())
}

async fn cmd_ledger_verify(config: &AppConfig) -> Result<()> {
    let ledger = Ledger::open_read_only(&config.storage.registry_dir())?;
    let audit = ledger.verify().await;

    println!("  Transactions:   {}", audit.transactions);
    println!("  Sequence gaps:  {:?}", audit.sequence_gaps);
    println!("  Out of order:   {:?}", audit.out_of_order);
    for (fp, sequences) in &audit.duplicate_fingerprints {
        println!("  Duplicate {}: sequences {sequences:?}", &fp[..12.min(fp.len())]);
    }

    if audit.is_sound() {
        Ok(())
    } else {
        Err(eyre!("ledger at '{}' is not sound", ledger.path().display()))
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eppn_shared::MessageKind;

    #[test]
    fn parses_run_with_input() {
        let cli = Cli::try_parse_from(["eppn", "-vv", "run", "--input", "msgs.jsonl"])
            .expect("parse");
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Command::Run { input: Some(ref p) } if p == Path::new("msgs.jsonl")
        ));
    }

    #[test]
    fn parses_registry_status() {
        let cli = Cli::try_parse_from(["eppn", "registry", "status", "http://a", "inactive"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Registry {
                action: RegistryAction::Status {
                    status: ParticipantStatus::Inactive,
                    ..
                }
            }
        ));
        assert!(Cli::try_parse_from(["eppn", "registry", "status", "x", "paused"]).is_err());
    }

    #[test]
    fn parse_message_reports_invalid_json_as_validation() {
        let err = parse_message("{not json").unwrap_err();
        assert!(matches!(err, EppnError::Validation { .. }));

        let message = parse_message(r#"{"type":"pdf_ready","url":"u","source":"s"}"#)
            .expect("valid");
        assert_eq!(message.kind(), MessageKind::PdfReady);
    }

    #[test]
    fn parse_line_extracts_direct_address() {
        let (to, message) = parse_line(
            r#"{"to":"registry","type":"crawl_request","urls":["http://a","http://b"]}"#,
        )
        .expect("valid");
        assert_eq!(to, Some(ParticipantId::new("registry")));
        assert_eq!(message.kind(), MessageKind::CrawlRequest);

        let (to, _) = parse_line(r#"{"type":"pdf_ready","url":"u","source":"s"}"#).expect("valid");
        assert!(to.is_none());

        let err = parse_line(r#"{"to":7,"type":"pdf_ready","url":"u","source":"s"}"#).unwrap_err();
        assert!(matches!(err, EppnError::Validation { ref field, .. } if field == "to"));
    }

    #[test]
    fn run_totals_count_misses_and_failures() {
        let mut totals = RunTotals::default();
        totals.record(&DispatchReport {
            kind: MessageKind::ParsedText,
            delivered: vec![ParticipantId::new("ethics-worker")],
            failed: vec![(ParticipantId::new("summarization-worker"), "timeout".into())],
        });
        totals.record(&DispatchReport {
            kind: MessageKind::CrawlRequest,
            delivered: vec![],
            failed: vec![],
        });
        assert_eq!(totals.delivered, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.dropped, 1);
    }
}
