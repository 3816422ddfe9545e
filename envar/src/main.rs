//! Environment variables utility.
//!
//! Lists and modifies persisted user/machine variables, lists the environment
//! block of running processes, and broadcasts change notifications so that
//! long-running shells can reload their environment.

use std::process;

use anyhow::{Context, Result};
use tracing::debug;

use envar::cli::{Cli, Intent};
use envar::core::types::{MutationRequest, Scope};
use envar::exit_codes;
use envar::io::broadcast::{FileBroadcaster, Listener};
use envar::io::config::{EnvarConfig, resolve_config};
use envar::io::process::{ProcFs, ProcessInspector};
use envar::io::store::FileStore;
use envar::list::{list_scope, render_listing};
use envar::logging;
use envar::mutate::{broadcast_only, set_variable};

fn main() {
    logging::init();
    let cli = Cli::parse_normalized();
    if let Err(err) = run(cli) {
        eprintln!("ERROR: {:#}", err);
        process::exit(exit_codes::FAILURE);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let intent = cli.into_intent()?;
    let cfg = resolve_config(config_path.as_deref()).context("load configuration")?;
    debug!(?intent, "command parsed");
    match intent {
        Intent::List { scope } => cmd_list(&cfg, scope),
        Intent::Set(request) => cmd_set(&cfg, &request),
        Intent::BroadcastOnly => cmd_broadcast(&cfg),
        Intent::Watch => cmd_watch(&cfg),
    }
}

fn file_store(cfg: &EnvarConfig) -> Result<FileStore> {
    Ok(FileStore::new(cfg.user_store_path()?, cfg.machine_store_path()))
}

fn broadcaster(cfg: &EnvarConfig) -> FileBroadcaster<ProcFs> {
    FileBroadcaster::new(cfg.broadcast_dir_path(), ProcFs::default())
        .with_timeout(cfg.broadcast_timeout())
        .with_poll_interval(cfg.broadcast_poll())
}

fn cmd_list(cfg: &EnvarConfig, scope: Scope) -> Result<()> {
    let store = file_store(cfg)?;
    let listing = list_scope(&store, &ProcFs::default(), scope)?;
    print!("{}", render_listing(&listing));
    Ok(())
}

fn cmd_set(cfg: &EnvarConfig, request: &MutationRequest) -> Result<()> {
    let store = file_store(cfg)?;
    let (outcome, report) = set_variable(&store, &broadcaster(cfg), request, cfg.default_mode)?;
    let action = capitalize(&outcome.action.to_string());
    match &outcome.stored {
        Some(stored) => println!("{action} {} variable {} = {stored}", outcome.scope, outcome.name),
        None => println!("{action} {} variable {}", outcome.scope, outcome.name),
    }
    debug!(
        generation = report.generation,
        acknowledged = report.acknowledged,
        "change broadcast"
    );
    Ok(())
}

fn cmd_broadcast(cfg: &EnvarConfig) -> Result<()> {
    let report = broadcast_only(&broadcaster(cfg))?;
    println!(
        "Change notification {} acknowledged by {} listener(s)",
        report.generation, report.acknowledged
    );
    Ok(())
}

fn cmd_watch(cfg: &EnvarConfig) -> Result<()> {
    let pid = process::id();
    let start_time = ProcFs::default()
        .process_info(pid)
        .context("inspect own process")?
        .start_time;
    let mut listener =
        Listener::register(&cfg.broadcast_dir_path(), pid.to_string(), pid, start_time)?;
    let waited = listener.wait(None, cfg.broadcast_poll());
    let notice = match waited {
        Ok(Some(notice)) => notice,
        Ok(None) => {
            listener.unregister()?;
            return Ok(());
        }
        Err(err) => {
            let _ = listener.unregister();
            return Err(err.into());
        }
    };
    listener.acknowledge(&notice)?;
    listener.unregister()?;
    println!("{}", notice.category);
    Ok(())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
