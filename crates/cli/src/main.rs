mod config;
mod serve;
mod webhook;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use helpdesk_storage::{
    HistoryRecord, SqliteStore, TicketFilter, TicketRecord, TicketStatus, TicketStore,
};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// IT support desk ticket service.
#[derive(Parser)]
#[command(name = "helpdesk", version, about = "IT support desk ticket service")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "helpdesk.toml")]
    config: PathBuf,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Log format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on (overrides [server] port)
        #[arg(long)]
        port: Option<u16>,
        /// Path to TLS certificate PEM file (requires --tls-key)
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key PEM file (requires --tls-cert)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Run one reminder / auto-close pass over resolved tickets
    Sweep {
        /// Evaluate the schedule as of this RFC 3339 instant instead of now
        #[arg(long)]
        now: Option<String>,
    },

    /// Print the history of a ticket (id or number)
    History {
        ticket: String,
    },

    /// List tickets, newest first
    Tickets {
        /// Only tickets in this status (pending, assigned, in_progress, ...)
        #[arg(long)]
        status: Option<String>,
    },

    /// Validate the configuration file and exit
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            report_error(&e.to_string(), cli.output);
            process::exit(1);
        }
    };
    init_tracing(config.log_level.as_deref(), cli.log_format);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), cli.output);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve {
            port,
            tls_cert,
            tls_key,
        } => {
            // Validate TLS flags: both must be provided or neither
            if tls_cert.is_some() != tls_key.is_some() {
                report_error("--tls-cert and --tls-key must both be provided", cli.output);
                process::exit(1);
            }
            let port = port.unwrap_or(config.server.port);
            rt.block_on(serve::start_server(config, port, tls_cert, tls_key))
        }
        Commands::Sweep { now } => rt.block_on(cmd_sweep(&config, now.as_deref(), cli.output)),
        Commands::History { ticket } => rt.block_on(cmd_history(&config, &ticket, cli.output)),
        Commands::Tickets { status } => {
            rt.block_on(cmd_tickets(&config, status.as_deref(), cli.output))
        }
        Commands::CheckConfig => cmd_check_config(&config, &cli.config, cli.output),
    };

    if let Err(e) = result {
        report_error(&e.to_string(), cli.output);
        process::exit(1);
    }
}

/// Filter precedence: `RUST_LOG`, then `log_level` from the config, then `info`.
fn init_tracing(config_level: Option<&str>, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Commands that work on persisted state need a data file.
fn require_data_file(config: &Config) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    if config.storage.data_file.is_none() {
        return Err("this command needs [storage] data_file in the configuration".into());
    }
    serve::open_store(config)
}

async fn cmd_sweep(config: &Config, now: Option<&str>, output: OutputFormat) -> CmdResult {
    let now = match now {
        Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
            .map_err(|e| format!("invalid --now '{}': {}", raw, e))?,
        None => OffsetDateTime::now_utc(),
    };
    let store = Arc::new(require_data_file(config)?);
    let workflow = serve::build_workflow(config, store)?;
    let report = workflow.sweep(&config.sweep.sweep_config(), now).await?;
    workflow.flush_notifications().await;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => println!(
            "examined {} resolved ticket(s): {} reminder(s) sent, {} auto-closed, {} skipped on conflict",
            report.examined, report.reminders_sent, report.auto_closed, report.conflicts
        ),
    }
    Ok(())
}

async fn find_ticket(
    store: &SqliteStore,
    reference: &str,
) -> Result<TicketRecord, Box<dyn std::error::Error>> {
    let numeric = reference.strip_prefix('#').unwrap_or(reference);
    let ticket = match numeric.parse::<i64>() {
        Ok(number) => store.get_ticket_by_number(number).await?,
        Err(_) => store.get_ticket(reference).await?,
    };
    Ok(ticket)
}

async fn cmd_history(config: &Config, reference: &str, output: OutputFormat) -> CmdResult {
    let store = require_data_file(config)?;
    let ticket = find_ticket(&store, reference).await?;
    let history = store.list_history(&ticket.id).await?;
    match output {
        OutputFormat::Json => {
            let doc = serde_json::json!({ "ticket": ticket, "history": history });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Text => {
            println!("#{} [{}] {}", ticket.number, ticket.status, ticket.title);
            if history.is_empty() {
                println!("  (no history)");
            }
            for entry in &history {
                println!("  {}", history_line(entry)?);
            }
        }
    }
    Ok(())
}

fn history_line(entry: &HistoryRecord) -> Result<String, time::error::Format> {
    let from = entry.old_status.map_or("-", TicketStatus::as_str);
    let mut line = format!(
        "{:>3}  {}  {} -> {}  by {}",
        entry.seq,
        entry.changed_at.format(&Rfc3339)?,
        from,
        entry.new_status,
        entry.user_id
    );
    if let Some(reason) = &entry.reason {
        line.push_str(&format!("  ({})", reason));
    }
    Ok(line)
}

async fn cmd_tickets(config: &Config, status: Option<&str>, output: OutputFormat) -> CmdResult {
    let status = status.map(str::parse::<TicketStatus>).transpose()?;
    let store = require_data_file(config)?;
    let tickets = store
        .list_tickets(&TicketFilter {
            status,
            ..TicketFilter::default()
        })
        .await?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tickets)?),
        OutputFormat::Text => {
            if tickets.is_empty() {
                println!("no tickets");
            }
            for t in &tickets {
                println!(
                    "#{:<5} {:<12} {:<9} {:<12} {:<12} {}",
                    t.number,
                    t.status.as_str(),
                    t.priority.as_str(),
                    t.ticket_type.as_str(),
                    t.technician_id.as_deref().unwrap_or("-"),
                    t.title
                );
            }
        }
    }
    Ok(())
}

fn cmd_check_config(config: &Config, path: &Path, output: OutputFormat) -> CmdResult {
    let directory = config.directory()?;
    let technicians = directory
        .users()
        .iter()
        .filter(|u| u.role == helpdesk_workflow::Role::Technician)
        .count();
    match output {
        OutputFormat::Json => {
            let doc = serde_json::json!({
                "valid": true,
                "config": path.display().to_string(),
                "users": directory.len(),
                "technicians": technicians,
                "data_file": config.storage.data_file,
                "webhook": config.notifications.webhook_url.is_some(),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Text => {
            println!("{}: OK", path.display());
            println!("  users: {} ({} technicians)", directory.len(), technicians);
            match &config.storage.data_file {
                Some(p) => println!("  storage: {}", p.display()),
                None => println!("  storage: in memory"),
            }
        }
    }
    Ok(())
}

pub(crate) fn report_error(msg: &str, output: OutputFormat) {
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
