use actix::Actor;
use anyhow::Context as _;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use nodeflow::domain::engine::context::EngineContext;
use nodeflow::domain::engine::engine::Engine;
use nodeflow::domain::engine::job::{JobStatus, exec_job};
use nodeflow::domain::engine::worker_actor::WorkerActor;
use nodeflow::domain::executor::builtin::builtin_registry;
use nodeflow::domain::model::builder;
use nodeflow::domain::model::nodetree::NodeTreeState;
use nodeflow::domain::queue::message::Message;
use nodeflow::domain::queue::message_queue::MessageQueue;
use nodeflow::domain::remote::computer::ComputerRegistry;
use nodeflow::domain::store::store::Store;
use nodeflow::domain::utils::id::{NodeTreeId, WorkerName};
use nodeflow::{load_engine_config, load_nodetree, logger};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "nodeflow")]
#[command(about = "Runs node graphs locally or on remote computers", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a nodetree and run it to completion on a local worker
    Run {
        /// Nodetree submission (JSON)
        nodetree: PathBuf,
        /// Engine configuration file
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: Option<PathBuf>,
        /// Computers file, overrides the one named in the configuration
        #[arg(long = "computers", value_name = "FILE")]
        computers: Option<PathBuf>,
        /// Number of nodes executed at the same time
        #[arg(long = "pool-size")]
        pool_size: Option<usize>,
    },
    /// Execute a packaged remote job in DIR and write its result file
    ExecJob {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Check a nodetree submission without running it
    Validate { nodetree: PathBuf },
}

#[actix_rt::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let result = match args.command {
        Command::Run { nodetree, config, computers, pool_size } => run(&nodetree, config.as_deref(), computers, pool_size).await,
        Command::ExecJob { dir } => exec(&dir),
        Command::Validate { nodetree } => validate(&nodetree),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(nodetree_file: &Path, config: Option<&Path>, computers: Option<PathBuf>, pool_size: Option<usize>) -> anyhow::Result<ExitCode> {
    let mut config = load_engine_config(config).context("loading engine configuration")?;
    if let Some(size) = pool_size {
        config.pool_size = size;
    }
    logger::init(Path::new(&config.log_dir));

    let registry = builtin_registry();
    let dto = load_nodetree(nodetree_file, &registry).with_context(|| format!("loading '{}'", nodetree_file.display()))?;

    let computers = match computers.or_else(|| config.computers_file.as_ref().map(PathBuf::from)) {
        Some(path) => ComputerRegistry::load(&path).with_context(|| format!("loading computers from '{}'", path.display()))?,
        None => ComputerRegistry::new(),
    };
    log::info!("{} remote computer(s) configured.", computers.len());

    let store = match &config.store_snapshot {
        Some(path) if Path::new(path).exists() => Store::load_snapshot(path).with_context(|| format!("loading snapshot '{}'", path))?,
        _ => Store::new(),
    };

    let worker = WorkerName::new(config.worker_name.clone());
    let queue = MessageQueue::new();
    let ctx = EngineContext {
        worker: worker.clone(),
        store: store.clone(),
        registry: Arc::new(registry),
        computers: Arc::new(computers),
        sender: queue.sender(&worker),
        staging_dir: PathBuf::from(&config.staging_dir),
    };

    let root = builder::submit(&store, &dto)?;
    ctx.emit(Message::nodetree_action(&root, "LAUNCH"));

    let (done_tx, done_rx) = oneshot::channel();
    WorkerActor::new(Engine::new(ctx.clone(), config.pool_size), queue.clone()).with_shutdown_signal(done_tx).start();

    let state = tokio::select! {
        state = wait_for_nodetree(&store, &root) => state,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Ctrl-C received, stopping worker '{}'.", worker);
            None
        }
    };

    ctx.emit(Message::worker_action(&worker, "STOP"));
    if done_rx.await.is_err() {
        log::warn!("Worker '{}' ended without a shutdown signal.", worker);
    }

    if let Some(path) = &config.store_snapshot {
        store.save_snapshot(path).with_context(|| format!("writing snapshot '{}'", path))?;
        log::info!("Store snapshot written to '{}'.", path);
    }

    print_summary(&store, &root);
    Ok(match state {
        Some(NodeTreeState::Finished) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

async fn wait_for_nodetree(store: &Store, nodetree: &NodeTreeId) -> Option<NodeTreeState> {
    loop {
        let state = store.nodetree(nodetree)?.state;
        if state.is_terminal() {
            return Some(state);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn exec(dir: &Path) -> anyhow::Result<ExitCode> {
    logger::init_console();

    let result = exec_job(dir, &builtin_registry()).with_context(|| format!("running job in '{}'", dir.display()))?;
    Ok(match result.status {
        JobStatus::Ok => ExitCode::SUCCESS,
        JobStatus::Error => ExitCode::FAILURE,
    })
}

fn validate(nodetree: &Path) -> anyhow::Result<ExitCode> {
    logger::init_console();

    let dto = load_nodetree(nodetree, &builtin_registry())?;
    println!("{} '{}' ({} nodes, {} links)", "valid".green().bold(), dto.name, dto.nodes.len(), dto.links.len());
    Ok(ExitCode::SUCCESS)
}

fn print_summary(store: &Store, root: &NodeTreeId) {
    let Some(tree) = store.nodetree(root) else {
        return;
    };

    let state = match tree.state {
        NodeTreeState::Finished => tree.state.as_str().green().bold(),
        NodeTreeState::Failed | NodeTreeState::Cancelled => tree.state.as_str().red().bold(),
        _ => tree.state.as_str().yellow().bold(),
    };
    println!("\nNodetree '{}' ({}): {}", tree.name, tree.uuid, state);

    for (name, summary) in &tree.nodes {
        let label = format!("{:<10}", summary.state.as_str());
        let label = match summary.state.as_str() {
            "FINISHED" => label.green(),
            "FAILED" | "CANCELLED" => label.red(),
            "SKIPPED" => label.dimmed(),
            _ => label.yellow(),
        };
        println!("  {} {}", label, name);
    }

    let counts: Vec<String> = tree.state_counts().iter().map(|(state, count)| format!("{} {}", count, state)).collect();
    println!("  {}", counts.join(", ").dimmed());
}
