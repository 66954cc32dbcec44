//! Opsdeck CLI
//!
//! Drives the control plane from the terminal: serve the HTTP surface,
//! inspect the host profile, resolve and execute install plans with
//! streamed progress, and query the cache and audit trail. Every
//! operation the web UI can perform is reachable from here.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::BufRead as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

use opsdeck_engine::{ExecutionEvent, RemediationResponse};
use opsdeck_state::{new_operation_id, AuditEntry, AuditQuery, Invalidate};

/// Exit codes shared with scripting clients.
mod exit {
    pub const OK: u8 = 0;
    pub const GENERIC: u8 = 1;
    pub const NO_VIABLE_METHOD: u8 = 3;
    pub const CANCELLED: u8 = 4;
    pub const REMEDIATION_AVAILABLE: u8 = 5;
    pub const UNHANDLED_FAILURE: u8 = 6;
}

/// Local DevOps control plane - profiles the host, installs tooling with
/// failure-aware remediation, and serves the web UI's HTTP surface
#[derive(Parser)]
#[command(name = "opsdeck")]
#[command(about = "Local DevOps control plane for a project repository")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root holding the .state directory
    #[arg(long, default_value = ".", global = true)]
    project_root: PathBuf,

    /// Directory of extra recipe JSON files
    #[arg(long, global = true)]
    catalog_dir: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    #[default]
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control-plane server
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8787")]
        addr: String,
    },
    /// Detect and print the host system profile
    Profile,
    /// Resolve an install plan without executing it
    Plan {
        /// Tool id from the recipe catalog
        tool: String,
    },
    /// Resolve and execute an install plan
    Install {
        /// Tool id from the recipe catalog
        tool: String,

        /// Read a sudo password from stdin (first line) for privileged steps
        #[arg(long)]
        sudo_stdin: bool,
    },
    /// Show per-tool availability
    Tools,
    /// Cache operations
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Scan the audit trail
    Activity {
        /// Entries to skip
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Page size
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Restrict to one card
        #[arg(long)]
        card: Option<String>,
        /// Text filter over action, target and card
        #[arg(long)]
        q: Option<String>,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Invalidate one card, or everything
    Bust {
        /// Card key; everything when omitted
        card: Option<String>,
    },
}

fn init_tracing() {
    let level = std::env::var("DEVOPS_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::from(exit::GENERIC)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let catalog_dir = cli.catalog_dir.clone().or_else(|| {
        let conventional = cli.project_root.join("catalog");
        conventional.is_dir().then_some(conventional)
    });
    let state = opsdeck_server::AppState::new(&cli.project_root, catalog_dir.as_deref())
        .context("failed to initialize services")?;

    match cli.command {
        Commands::Serve { addr } => {
            opsdeck_server::run_server(state, &addr).await?;
            Ok(ExitCode::from(exit::OK))
        }
        Commands::Profile => {
            let profile = state.profiles.get().await;
            println!("{}", serde_json::to_string_pretty(&*profile)?);
            Ok(ExitCode::from(exit::OK))
        }
        Commands::Plan { tool } => plan(&state, &tool, cli.format).await,
        Commands::Install { tool, sudo_stdin } => {
            install(&state, &tool, sudo_stdin, cli.format).await
        }
        Commands::Tools => tools(&state, cli.format).await,
        Commands::Cache {
            command: CacheCommands::Bust { card },
        } => cache_bust(&state, card).await,
        Commands::Activity {
            offset,
            limit,
            card,
            q,
        } => activity(&state, offset, limit, card, q).await,
    }
}

async fn plan(
    state: &Arc<opsdeck_server::AppState>,
    tool: &str,
    format: OutputFormat,
) -> Result<ExitCode> {
    let profile = state.profiles.get().await;
    let plan = match state.engine.resolver().resolve(tool, &profile).await {
        Ok(plan) => plan,
        Err(e) => return Ok(engine_error_exit(&e)),
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(ExitCode::from(exit::OK));
    }

    if plan.already_installed {
        println!("{} {tool} is already installed", "✓".green());
        return Ok(ExitCode::from(exit::OK));
    }

    println!(
        "{} plan for {} ({} steps{})",
        "→".cyan(),
        tool.bold(),
        plan.steps.len(),
        if plan.needs_sudo_overall { ", needs sudo" } else { "" }
    );
    if plan.advisory_ephemeral {
        println!(
            "{} running in an ephemeral container; installs will not survive a restart",
            "!".yellow()
        );
    }
    for (idx, step) in plan.steps.iter().enumerate() {
        let sudo = if step.needs_sudo { " (sudo)" } else { "" };
        println!("  {}. {}{sudo}", idx + 1, step.label);
        if !step.command.is_empty() {
            println!("     {}", step.command.join(" ").dimmed());
        }
    }
    Ok(ExitCode::from(exit::OK))
}

async fn install(
    state: &Arc<opsdeck_server::AppState>,
    tool: &str,
    sudo_stdin: bool,
    format: OutputFormat,
) -> Result<ExitCode> {
    let sudo_secret = if sudo_stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed to read sudo password from stdin")?;
        let secret = line.trim_end_matches(['\r', '\n']).to_string();
        (!secret.is_empty()).then_some(secret)
    } else {
        None
    };

    let profile = state.profiles.get().await;
    let plan = match state.engine.resolver().resolve(tool, &profile).await {
        Ok(plan) => plan,
        Err(e) => return Ok(engine_error_exit(&e)),
    };

    let operation_id = new_operation_id();
    state
        .audit
        .record(&AuditEntry::new(
            &format!("install:{tool}"),
            "execute",
            tool,
            &operation_id,
        ))
        .await;

    let mut handle = state.engine.execute(plan, profile, sudo_secret, None);

    // Ctrl-c cancels the running plan; the executor SIGTERMs the child,
    // waits the grace window, then SIGKILLs.
    let cancel = handle.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut code = exit::GENERIC;
    while let Some(event) = handle.events.recv().await {
        match format {
            OutputFormat::Json => println!("{}", event.to_wire_line()),
            OutputFormat::Text => render_event(&event),
        }

        if let ExecutionEvent::Done {
            ok,
            cancelled,
            remediation,
            ..
        } = &event
        {
            let action = if *cancelled {
                code = exit::CANCELLED;
                "cancelled"
            } else if *ok {
                code = exit::OK;
                "done"
            } else if remediation.is_some() {
                code = exit::REMEDIATION_AVAILABLE;
                "failed"
            } else {
                code = exit::UNHANDLED_FAILURE;
                "failed"
            };
            state
                .audit
                .record(&AuditEntry::new(
                    &format!("install:{tool}"),
                    action,
                    tool,
                    &operation_id,
                ))
                .await;
        }
    }
    Ok(ExitCode::from(code))
}

fn render_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::StepStart {
            step_idx,
            total,
            label,
        } => {
            println!("{} [{}/{}] {label}", "→".cyan(), step_idx + 1, total);
        }
        ExecutionEvent::Log { line, .. } => println!("  {}", line.dimmed()),
        ExecutionEvent::StepDone { duration_ms, .. } => {
            println!("{} done in {duration_ms}ms", "✓".green());
        }
        ExecutionEvent::StepFailed {
            exit_code,
            stderr_tail,
            ..
        } => {
            let code = exit_code.map_or_else(|| "signal/timeout".to_string(), |c| c.to_string());
            println!("{} step failed (exit {code})", "✗".red());
            for line in stderr_tail.lines().rev().take(8).collect::<Vec<_>>().into_iter().rev() {
                println!("  {}", line.red().dimmed());
            }
        }
        ExecutionEvent::Done {
            ok,
            cancelled,
            remediation,
            ..
        } => {
            if *cancelled {
                println!("{} cancelled", "✗".yellow());
            } else if *ok {
                println!("{} all steps completed", "✓".green().bold());
            } else if let Some(remediation) = remediation {
                render_remediation(remediation);
            } else {
                println!("{} failed with no matching handler", "✗".red().bold());
            }
        }
    }
}

fn render_remediation(remediation: &RemediationResponse) {
    println!(
        "{} {} — {}",
        "✗".red().bold(),
        remediation.failure.label.bold(),
        remediation.failure.description
    );
    if let Some(chain) = &remediation.chain {
        let path: Vec<String> = chain
            .breadcrumbs
            .iter()
            .map(|b| b.label.clone())
            .collect();
        println!("  chain: {}", path.join(" → ").dimmed());
        if chain.loop_detected {
            println!("  {} previous attempts looped back here", "!".yellow());
        }
    }
    println!("  options:");
    for option in &remediation.options {
        let marker = match option.availability {
            opsdeck_engine::Availability::Ready => "●".green(),
            opsdeck_engine::Availability::Locked => "◐".yellow(),
            opsdeck_engine::Availability::Impossible => "○".red(),
        };
        let recommended = if option.recommended { " (recommended)" } else { "" };
        println!(
            "    {marker} {}{recommended} — {} [{:?} risk, {} steps]",
            option.label.bold(),
            option.description,
            option.risk,
            option.step_count
        );
        if let Some(reason) = &option.lock_reason {
            println!("      {}", reason.dimmed());
        }
    }
    debug!("remediation rendered with {} options", remediation.options.len());
}

async fn tools(
    state: &Arc<opsdeck_server::AppState>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let registry = state.engine.resolver().registry();
    let mut rows = Vec::new();
    for id in registry.all_ids() {
        let Some(recipe) = registry.lookup(&id) else {
            continue;
        };
        let available = state.probe.verify(&recipe.spec.verify).await || state.probe.which(&id);
        rows.push((id, recipe.spec.label.clone(), available));
    }

    if format == OutputFormat::Json {
        let json: Vec<serde_json::Value> = rows
            .iter()
            .map(|(id, label, available)| {
                serde_json::json!({"id": id, "label": label, "available": available})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(ExitCode::from(exit::OK));
    }

    for (id, label, available) in &rows {
        let marker = if *available { "✓".green() } else { "✗".red() };
        println!("{marker} {id} — {label}");
    }
    let available = rows.iter().filter(|(_, _, a)| *a).count();
    println!("\n{available}/{} available", rows.len());
    Ok(ExitCode::from(exit::OK))
}

async fn cache_bust(
    state: &Arc<opsdeck_server::AppState>,
    card: Option<String>,
) -> Result<ExitCode> {
    let what = card.clone().map_or(Invalidate::All, Invalidate::Card);
    let generation = state.cache.invalidate(&what).await;
    state
        .audit
        .record(&AuditEntry::new(
            "cache",
            "cache_bust",
            card.as_deref().unwrap_or("all"),
            &new_operation_id(),
        ))
        .await;
    println!("{} generation {generation}", "✓".green());
    Ok(ExitCode::from(exit::OK))
}

async fn activity(
    state: &Arc<opsdeck_server::AppState>,
    offset: usize,
    limit: usize,
    card: Option<String>,
    q: Option<String>,
) -> Result<ExitCode> {
    let page = state
        .audit
        .query(&AuditQuery {
            offset,
            limit,
            card,
            q,
        })
        .await;

    for entry in &page.entries {
        println!(
            "{} {} {} {} {}",
            entry.ts.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            entry.card.cyan(),
            entry.action.bold(),
            entry.target,
            entry.operation_id.dimmed()
        );
    }
    println!(
        "\n{} of {} entries ({} total)",
        page.entries.len(),
        page.total_filtered,
        page.total_all
    );
    Ok(ExitCode::from(exit::OK))
}

fn engine_error_exit(err: &opsdeck_engine::EngineError) -> ExitCode {
    eprintln!("{} {err}", "error:".red().bold());
    match err {
        opsdeck_engine::EngineError::NoViableMethod { .. } => {
            ExitCode::from(exit::NO_VIABLE_METHOD)
        }
        _ => ExitCode::from(exit::GENERIC),
    }
}
