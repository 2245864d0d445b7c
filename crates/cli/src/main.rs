//! `brewva` — runtime orchestrator entry point.
//!
//! Hosts the runtime and the loopback gateway, and offers maintenance
//! surfaces (event replay, context dry-runs, rollback marking) on the
//! same workspace. Exit codes: 0 normal, 1 fatal init, 130 interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use bv_domain::config::{resolve_workspace_root, Config};
use bv_gateway::auth::TokenFile;
use bv_gateway::{GatewayClient, GatewayServer};
use bv_runtime::{Runtime, TaskEvent};
use bv_store::{EventAppend, WalRecovery};

mod replay;

const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Parser)]
#[command(name = "brewva", version, about = "AI coding-agent orchestrator runtime")]
struct Args {
    /// Working directory; the workspace root is resolved from here.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Explicit config file (defaults to `.brewva/brewva.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model hint recorded on the session (selection happens in the
    /// agent session, not here).
    #[arg(long)]
    model: Option<String>,

    /// Set the session's task spec.
    #[arg(long, conflicts_with = "task_file")]
    task: Option<String>,

    /// Read the task spec from a file.
    #[arg(long)]
    task_file: Option<PathBuf>,

    /// Plan and print the context injection for a prompt, then exit.
    #[arg(long)]
    print: Option<String>,

    /// Keep serving until interrupted (default when no one-shot flag
    /// is given).
    #[arg(long)]
    interactive: bool,

    /// Output mode for one-shot surfaces.
    #[arg(long, value_parser = ["text", "json"], default_value = "text")]
    mode: String,

    /// Call a method on the workspace's running gateway and print the
    /// response (e.g. `--call health`, `--call status.deep`).
    #[arg(long, value_name = "METHOD")]
    call: Option<String>,

    /// JSON params for `--call`.
    #[arg(long, value_name = "JSON", requires = "call")]
    params: Option<String>,

    /// Record a rollback marker for the session's last patch.
    #[arg(long)]
    undo: bool,

    /// Print the stored event log for a session.
    #[arg(long)]
    replay: bool,

    /// Session id for one-shot surfaces (defaults to `cli`).
    #[arg(long)]
    session: Option<String>,

    /// Skip supplemental extension injections this run.
    #[arg(long)]
    no_extensions: bool,

    /// Debug-level logging.
    #[arg(long, short)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    match runtime.block_on(run(args)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let cwd = match &args.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir().context("resolving cwd")?,
    };
    let workspace_root = resolve_workspace_root(&cwd);

    let config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<Config>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => Config::load(&workspace_root).context("loading .brewva/brewva.json")?,
    };

    let runtime = Arc::new(
        Runtime::new(&workspace_root, config).context("initializing runtime")?,
    );
    let session_id = args.session.clone().unwrap_or_else(|| "cli".to_owned());

    if let Some(model) = &args.model {
        let _ = runtime.append_event(
            EventAppend::new(&session_id, "session_opened")
                .with_payload(serde_json::json!({"model": model})),
        );
    }

    // One-shot surfaces first; they exit without serving.
    if let Some(method) = &args.call {
        return gateway_call(&runtime, method, args.params.as_deref(), &args.mode).await;
    }
    if args.replay {
        replay::print_events(&runtime, &session_id, &args.mode)?;
        return Ok(0);
    }
    if args.undo {
        runtime.append_event(
            EventAppend::new(&session_id, "rollback_last_patch")
                .with_payload(serde_json::json!({"requestedBy": "cli"})),
        )?;
        println!("rollback marker recorded for session {session_id}");
        return Ok(0);
    }

    if let Some(task) = resolve_task(&args)? {
        runtime.apply_task_event(&session_id, TaskEvent::SpecSet { spec: task })?;
    }

    if let Some(prompt) = &args.print {
        let plan = runtime.plan_injection(&session_id, prompt, None, None);
        match args.mode.as_str() {
            "json" => println!(
                "{}",
                serde_json::json!({
                    "accepted": plan.accepted,
                    "originalTokens": plan.original_tokens,
                    "finalTokens": plan.final_tokens,
                    "truncated": plan.truncated,
                    "droppedReason": plan.dropped_reason,
                    "text": plan.text,
                })
            ),
            _ => {
                if plan.text.is_empty() {
                    println!(
                        "(no injection: {})",
                        plan.dropped_reason.unwrap_or("nothing to inject")
                    );
                } else {
                    print!("{}", plan.text);
                }
            }
        }
        runtime.clear_pending_injection(&session_id);
        return Ok(0);
    }

    serve(runtime, args.no_extensions).await
}

/// Issue one request against the gateway already serving this
/// workspace, authenticating with its token file.
async fn gateway_call(
    runtime: &Runtime,
    method: &str,
    params_raw: Option<&str>,
    mode: &str,
) -> anyhow::Result<i32> {
    let gateway = &runtime.config().gateway;
    let token_path = bv_domain::config::orchestrator_dir(runtime.workspace_root())
        .join(&gateway.token_file);
    let token = TokenFile::new(&token_path)
        .load()
        .context("reading gateway token (is a gateway running in this workspace?)")?;

    let params: serde_json::Value = match params_raw {
        Some(raw) => serde_json::from_str(raw).context("parsing --params")?,
        None => serde_json::json!({}),
    };

    let url = format!("ws://{}:{}/ws", gateway.host, gateway.port);
    let (client, _hello) = GatewayClient::connect(&url, &token, "brewva-cli")
        .await
        .with_context(|| format!("connecting to {url}"))?;
    let payload = client.request(method, params).await?;

    match mode {
        "json" => println!("{payload}"),
        _ => println!("{}", serde_json::to_string_pretty(&payload)?),
    }
    Ok(0)
}

fn resolve_task(args: &Args) -> anyhow::Result<Option<String>> {
    if let Some(task) = &args.task {
        return Ok(Some(task.clone()));
    }
    if let Some(path) = &args.task_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        return Ok(Some(raw.trim().to_owned()));
    }
    Ok(None)
}

/// Long-running mode: WAL recovery, gateway, then wait for a signal.
async fn serve(runtime: Arc<Runtime>, no_extensions: bool) -> anyhow::Result<i32> {
    let orchestrator_dir =
        bv_domain::config::orchestrator_dir(runtime.workspace_root());
    let recovery = WalRecovery::new(&orchestrator_dir, runtime.config().wal.clone());
    // No channel adapters are registered at this entry point, so
    // unhandled sources age out as expired rather than replaying.
    let report = recovery.recover().await?;
    if report.expired + report.failed + report.recovered > 0 {
        tracing::info!(
            recovered = report.recovered,
            expired = report.expired,
            failed = report.failed,
            "turn wal recovery finished"
        );
    }

    if no_extensions {
        tracing::info!("extensions disabled for this run");
    }

    let server = Arc::new(GatewayServer::new(runtime.clone(), None)?);
    let (addr, handle) = server.serve().await?;
    println!("gateway listening on ws://{addr}/ws");

    let interrupted = wait_for_signal().await;
    if interrupted {
        runtime.interrupt_all("signal");
    }
    server.stop();

    let graceful = std::time::Duration::from_millis(
        runtime.config().channel.graceful_timeout_ms,
    );
    let _ = tokio::time::timeout(graceful, handle).await;

    Ok(if interrupted { EXIT_INTERRUPTED } else { 0 })
}

/// Wait for SIGINT or SIGTERM; true when a signal arrived.
async fn wait_for_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => return tokio::signal::ctrl_c().await.is_ok(),
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.is_ok(),
            _ = term.recv() => true,
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.is_ok()
    }
}
