mod simulate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sluice_config::{EngineSettings, WorkflowDef};
use sluice_engine::{ChannelNotifier, FireOutcome, Scheduler, WorkflowRunner};
use sluice_registry::JobRegistry;
use sluice_store::{SqliteStore, Store};
use sluice_workflow::Workflow;

use crate::simulate::SimulatedExecutor;

/// Sluice - A trigger engine for job and crawl pipelines
#[derive(Parser)]
#[command(name = "sluice")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.sluice)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to an engine settings file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a workflow definition and print its trigger order
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Drive a workflow against the simulated executor until it goes quiet
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// On-demand trigger to activate (repeatable)
    #[arg(long = "activate", value_name = "TRIGGER")]
    activate: Vec<String>,

    /// Arm every trigger before activating
    #[arg(long)]
    arm_all: bool,

    /// Unit whose simulated run fails, as `name` or `kind:name` (repeatable)
    #[arg(long = "fail", value_name = "UNIT")]
    fail: Vec<String>,
  },

  /// Print the persisted state of a workflow
  Status {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Start a new generation of a workflow
  Reset {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .with_target(true)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".sluice"),
  };

  let settings = match &cli.config {
    Some(path) => EngineSettings::load(path)
      .with_context(|| format!("failed to load settings: {}", path.display()))?,
    None => EngineSettings::default(),
  };

  match cli.command {
    Some(Commands::Validate { workflow_file }) => validate(&workflow_file)?,
    Some(Commands::Run {
      workflow_file,
      activate,
      arm_all,
      fail,
    }) => {
      let options = RunOptions {
        activate,
        arm_all,
        fail,
      };
      block_on(run_workflow(&workflow_file, &data_dir, settings, options))?;
    }
    Some(Commands::Status { workflow_file }) => {
      block_on(print_status(&workflow_file, &data_dir, settings))?;
    }
    Some(Commands::Reset { workflow_file }) => {
      block_on(reset_workflow(&workflow_file, &data_dir, settings))?;
    }
    None => {
      println!("sluice - use --help to see available commands");
    }
  }

  Ok(())
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(future)
}

fn load_workflow(path: &Path) -> Result<Workflow> {
  let def = WorkflowDef::load(path)
    .with_context(|| format!("failed to load workflow file: {}", path.display()))?;
  Workflow::from_def(def).with_context(|| format!("invalid workflow: {}", path.display()))
}

async fn open_store(data_dir: &Path) -> Result<Arc<dyn Store>> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  let path = data_dir.join("sluice.db");
  let store = SqliteStore::open(&path)
    .await
    .with_context(|| format!("failed to open database: {}", path.display()))?;
  Ok(Arc::new(store))
}

struct Session {
  scheduler: Arc<Scheduler<ChannelNotifier>>,
  executor: Arc<SimulatedExecutor>,
  registry: Arc<JobRegistry>,
  cancel: CancellationToken,
  printer: tokio::task::JoinHandle<()>,
}

/// Build a scheduler over the persisted state. Scheduler events are printed
/// to stdout as JSON lines.
async fn open_session(
  workflow: Workflow,
  data_dir: &Path,
  settings: EngineSettings,
  fail: Vec<String>,
) -> Result<Session> {
  let store = open_store(data_dir).await?;
  let registry = Arc::new(JobRegistry::new());
  let cancel = CancellationToken::new();
  let executor = Arc::new(SimulatedExecutor::new(
    registry.clone(),
    &settings.simulation,
    fail,
    cancel.child_token(),
  ));

  let (notifier, mut events) = ChannelNotifier::channel();
  let printer = tokio::spawn(async move {
    while let Some(event) = events.recv().await {
      match serde_json::to_string(&event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to encode event"),
      }
    }
  });

  let scheduler = Scheduler::with_notifier(workflow, registry.clone(), executor.clone(), notifier)
    .with_settings(settings.dispatch)
    .with_store(store);
  scheduler
    .restore()
    .await
    .context("failed to restore workflow state")?;

  Ok(Session {
    scheduler: Arc::new(scheduler),
    executor,
    registry,
    cancel,
    printer,
  })
}

impl Session {
  /// Drop the scheduler and wait for the remaining events to print.
  async fn close(self) -> Result<()> {
    self.cancel.cancel();
    drop(self.scheduler);
    drop(self.executor);
    self.printer.await.context("event printer failed")?;
    Ok(())
  }
}

fn validate(workflow_file: &Path) -> Result<()> {
  let workflow = load_workflow(workflow_file)?;
  let graph = workflow.graph();

  let name_of = |idx: &usize| workflow.triggers()[*idx].name.clone();

  println!("workflow {} is valid", workflow.name());
  let entry: Vec<String> = graph.entry_points().iter().map(name_of).collect();
  println!("entry points: {}", entry.join(", "));
  for &idx in graph.dependency_order() {
    let trigger = &workflow.triggers()[idx];
    let targets: Vec<String> = trigger.action_targets().map(|t| t.to_string()).collect();
    let after: Vec<String> = graph.upstream(idx).iter().map(name_of).collect();
    let marker = if graph.terminal_triggers().contains(&idx) {
      " (final)"
    } else {
      ""
    };
    let after = if after.is_empty() {
      String::new()
    } else {
      format!(" after {}", after.join(", "))
    };
    println!(
      "  {} [{:?}] -> {}{}{}",
      trigger.name,
      trigger.kind,
      targets.join(", "),
      after,
      marker
    );
  }
  Ok(())
}

struct RunOptions {
  activate: Vec<String>,
  arm_all: bool,
  fail: Vec<String>,
}

async fn run_workflow(
  workflow_file: &Path,
  data_dir: &Path,
  settings: EngineSettings,
  options: RunOptions,
) -> Result<()> {
  let workflow = load_workflow(workflow_file)?;
  let name = workflow.name().to_string();
  let session = open_session(workflow, data_dir, settings, options.fail).await?;
  let scheduler = session.scheduler.clone();

  let runner = WorkflowRunner::new(scheduler.clone());
  let runner_cancel = session.cancel.child_token();
  let runner_handle = tokio::spawn(runner.start(runner_cancel.clone()));

  if options.arm_all {
    scheduler.arm_all().await.context("failed to arm triggers")?;
  }
  // Catch up on anything that became true while no process was running.
  scheduler
    .evaluate_all()
    .await
    .context("failed to evaluate triggers")?;

  for trigger in &options.activate {
    let outcome = scheduler
      .activate(trigger)
      .await
      .with_context(|| format!("failed to activate trigger: {trigger}"))?;
    match outcome {
      FireOutcome::NotArmed(arm) => {
        warn!(trigger = %trigger, arm = arm.as_str(), "trigger not armed; use --arm-all")
      }
      FireOutcome::Blocked(failure) => bail!(failure.to_error(trigger)),
      _ => info!(trigger = %trigger, "trigger activated"),
    }
  }

  let settle = (session.executor.step_delay() * 4).max(Duration::from_millis(200));
  tokio::select! {
    _ = wait_for_quiescence(&session.registry, &session.executor, settle) => {}
    result = tokio::signal::ctrl_c() => {
      result.context("failed to listen for ctrl-c")?;
      let stopped = scheduler.cancel_workflow().await.context("failed to cancel workflow")?;
      warn!(workflow = %name, stopped = stopped.len(), "run interrupted");
    }
  }

  runner_cancel.cancel();
  runner_handle
    .await
    .context("workflow runner panicked")?
    .context("workflow runner failed")?;

  let status = scheduler.status().await;
  drop(scheduler);
  session.close().await?;

  eprintln!(
    "{}",
    serde_json::to_string_pretty(&status).context("failed to encode status")?
  );
  if status.complete() {
    info!(workflow = %name, generation = status.generation, "pipeline complete");
  } else {
    warn!(workflow = %name, generation = status.generation, "pipeline incomplete");
  }
  Ok(())
}

/// Wait until no simulated run is in flight and the registry has stopped
/// changing for one `settle` interval.
async fn wait_for_quiescence(registry: &JobRegistry, executor: &SimulatedExecutor, settle: Duration) {
  let mut last_seq = registry.snapshot().seq();
  loop {
    tokio::time::sleep(settle).await;
    let seq = registry.snapshot().seq();
    if executor.in_flight() == 0 && seq == last_seq {
      return;
    }
    last_seq = seq;
  }
}

async fn print_status(workflow_file: &Path, data_dir: &Path, settings: EngineSettings) -> Result<()> {
  let workflow = load_workflow(workflow_file)?;
  let session = open_session(workflow, data_dir, settings, Vec::new()).await?;

  let status = session.scheduler.status().await;
  println!(
    "{}",
    serde_json::to_string_pretty(&status).context("failed to encode status")?
  );
  session.close().await
}

async fn reset_workflow(workflow_file: &Path, data_dir: &Path, settings: EngineSettings) -> Result<()> {
  let workflow = load_workflow(workflow_file)?;
  let name = workflow.name().to_string();
  let session = open_session(workflow, data_dir, settings, Vec::new()).await?;

  let generation = session
    .scheduler
    .reset_workflow(&name)
    .await
    .with_context(|| format!("failed to reset workflow: {name}"))?;
  info!(workflow = %name, generation, "workflow reset");
  session.close().await
}
