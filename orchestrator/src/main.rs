use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::debug;

use orchestrator::core::types::EngineKind;
use orchestrator::exit_codes;
use orchestrator::io::config::{OrchestratorConfig, load_config};
use orchestrator::io::init::{InitOptions, OrchestratorPaths, init_workspace};
use orchestrator::io::modes::load_modes;
use orchestrator::io::pool::EnginePool;
use orchestrator::io::run_store::RunStore;
use orchestrator::logging;
use orchestrator::orchestrate::{Orchestrator, Settings};
use orchestrator::patch_gate::PatchGate;
use orchestrator::tools::{TOOL_NAMES, Tools};

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Route tasks across warm Codex and Gemini engines and gate their patches"
)]
struct Cli {
    /// Working tree the engines run in and patches apply to.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Override the codex binary (also `CODEX_BIN`).
    #[arg(long, global = true)]
    codex_bin: Option<String>,
    /// Override the gemini binary (also `GEMINI_BIN`).
    #[arg(long, global = true)]
    gemini_bin: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.orchestrator/config.toml` and an editable mode registry.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// List the modes of the active registry.
    Modes,
    /// Show which modes a task routes to.
    Route {
        task: String,
        /// Routing hint such as "debug" or "research".
        #[arg(long)]
        task_type: Option<String>,
    },
    /// Call a tool with a JSON request and print the JSON response.
    Call {
        /// One of the tool names, e.g. `orchestrate_task`.
        tool: String,
        /// Request file, or `-` for stdin. Defaults to an empty object.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Report engine slot states and binary versions.
    WarmStatus,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = fs::canonicalize(&cli.root)
        .with_context(|| format!("resolve root {}", cli.root.display()))?;

    let (tool, input) = match cli.command {
        Command::Init { force } => return cmd_init(&root, force),
        Command::Modes => ("list_modes".to_string(), Value::Null),
        Command::Route { task, task_type } => (
            "route_task".to_string(),
            json!({"task": task, "task_type": task_type}),
        ),
        Command::Call { tool, input } => {
            let input = match input {
                Some(path) => read_input(&path)?,
                None => Value::Null,
            };
            (tool, input)
        }
        Command::WarmStatus => ("warm_status".to_string(), Value::Null),
    };

    let paths = OrchestratorPaths::new(&root);
    let mut cfg = load_config(&paths.config_path)?;
    cfg.apply_env_overrides();
    cfg.apply_binary_overrides(cli.codex_bin, cli.gemini_bin);
    let tools = build_tools(&paths, &cfg)?;

    debug!(%tool, "calling tool");
    let response = tools.call(&tool, input);
    print_json(&response)?;
    if response.get("error_kind").is_some() {
        return Ok(exit_codes::TOOL_ERROR);
    }
    Ok(exit_codes::OK)
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, &InitOptions { force })?;
    print_json(&json!({
        "summary": format!("initialized {}", paths.state_dir.display()),
        "config": paths.config_path,
        "modes": paths.modes_path,
    }))?;
    Ok(exit_codes::OK)
}

/// Wire config, registry, pool, gate and run store into the tool surface.
fn build_tools(paths: &OrchestratorPaths, cfg: &OrchestratorConfig) -> Result<Tools<EnginePool>> {
    let modes_path = cfg.modes_path.as_deref().map(|p| paths.resolve(p));
    let registry = load_modes(modes_path.as_deref())?;
    let pool = EnginePool::from_config(cfg, paths.root.clone());
    let gate = PatchGate::new(paths.root.clone(), cfg.patch);
    let store = RunStore::new(paths.resolve(&cfg.runs_dir));
    let settings = Settings::from_config(cfg, paths.root.clone());
    let orchestrator = Orchestrator::new(registry, pool, gate, store, settings);
    let binaries = EngineKind::ALL
        .iter()
        .map(|engine| (*engine, cfg.engine_command(*engine).0.to_string()))
        .collect();
    Ok(Tools::new(orchestrator, binaries))
}

fn read_input(path: &Path) -> Result<Value> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read request from stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("read request {}", path.display()))?
    };
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&raw).with_context(|| {
        format!(
            "parse request for one of: {} ({})",
            TOOL_NAMES.join(", "),
            path.display()
        )
    })
}

/// Print `value` as pretty JSON on stdout.
fn print_json(value: &Value) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize response")?;
    println!("{payload}");
    Ok(())
}
