use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strata_artifact::FsStore;
use strata_broker::{Broker, BrokerReporter, RedisBroker};
use strata_config::WorkerConfig;
use strata_events::{NoopReporter, Reporter};
use strata_executor::{ExecutorConfig, TaskExecutor};
use strata_task::Task;
use strata_tool::{CommandTool, PlasoTools};
use strata_worker::{Worker, WorkerOptions};

/// Strata - a worker node for distributed forensic timeline processing
#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.strata)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Consume tasks from the broker until shut down
  Worker,

  /// Execute a single task payload locally and print its result
  RunTask {
    /// Path to the task payload JSON file; reads stdin when omitted
    task_file: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();

  let data_dir = cli.data_dir.unwrap_or_else(|| {
    dirs::home_dir()
      .expect("could not determine home directory")
      .join(".strata")
  });

  let config = WorkerConfig::from_env().context("invalid worker configuration")?;

  match cli.command {
    Some(Commands::Worker) => {
      run_worker(config, data_dir)?;
    }
    Some(Commands::RunTask { task_file }) => {
      run_task(config, data_dir, task_file)?;
    }
    None => {
      println!("strata - use --help to see available commands");
    }
  }

  Ok(())
}

fn run_worker(config: WorkerConfig, data_dir: PathBuf) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_worker_async(config, data_dir).await })
}

async fn run_worker_async(config: WorkerConfig, data_dir: PathBuf) -> Result<()> {
  if config.debug {
    // Recognized for parity with the deployment environment; the worker has
    // no remote-introspection listener.
    warn!(port = config.debug_port, "debug introspection requested, diagnostic only");
  }

  let broker: Arc<dyn Broker> = Arc::new(
    RedisBroker::connect(&config.broker_url, &config.queue_prefix, config.visibility_timeout)
      .await
      .with_context(|| format!("failed to connect to broker at {}", config.broker_url))?,
  );
  let reporter: Arc<dyn Reporter> = Arc::new(BrokerReporter::new(broker.clone()));
  let executor = Arc::new(build_executor(&config, &data_dir, reporter.clone()));

  let worker = Worker::new(
    broker,
    executor,
    reporter,
    WorkerOptions {
      concurrency: config.concurrency,
      poll_interval: config.poll_interval,
      reclaim_interval: config.visibility_timeout / 4,
      revoke_poll_interval: config.progress_interval,
    },
  );

  let shutdown = CancellationToken::new();
  let signal = shutdown.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("shutdown signal received, draining in-flight tasks");
      signal.cancel();
    }
  });

  worker.run(shutdown).await?;
  Ok(())
}

fn run_task(config: WorkerConfig, data_dir: PathBuf, task_file: Option<PathBuf>) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_task_async(config, data_dir, task_file).await })
}

async fn run_task_async(
  config: WorkerConfig,
  data_dir: PathBuf,
  task_file: Option<PathBuf>,
) -> Result<()> {
  let payload = match task_file {
    Some(path) => tokio::fs::read_to_string(&path)
      .await
      .with_context(|| format!("failed to read task file: {}", path.display()))?,
    None => {
      let mut buffer = String::new();
      io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read task payload from stdin")?;
      buffer
    }
  };
  let task: Task = serde_json::from_str(&payload).context("failed to parse task payload")?;

  eprintln!("Executing task {} on {}", task.task_id, task.input_ref);

  let executor = build_executor(&config, &data_dir, Arc::new(NoopReporter));
  let result = executor.execute(&task, 1, CancellationToken::new()).await;

  println!("{}", serde_json::to_string_pretty(&result.to_message())?);
  Ok(())
}

fn build_executor(
  config: &WorkerConfig,
  data_dir: &std::path::Path,
  reporter: Arc<dyn Reporter>,
) -> TaskExecutor {
  TaskExecutor::new(
    Arc::new(FsStore::new(config.store_path(data_dir))),
    Arc::new(CommandTool::new()),
    reporter,
    ExecutorConfig {
      work_root: config.work_root(data_dir),
      tool_timeout: config.task_timeout,
      progress_interval: config.progress_interval,
      keep_workdir: config.keep_workdir,
      tools: PlasoTools {
        log2timeline: config.log2timeline_bin.clone(),
        psort: config.psort_bin.clone(),
        image_export: config.image_export_bin.clone(),
      },
    },
  )
}
