use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shade::config::Config;
use shade::core::Task;
use shade::merge::MergeResolver;
use shade::orchestration::{
    CorrectionLoop, Decomposer, RetrySamePlanner, Scheduler, SchedulerEvent, WorkerPool,
};
use shade::report::RunReport;
use shade::sandbox::{ProcessIsolation, SandboxRunner};
use shade::{shlog, shlog_error, Result};

/// Shade - shadow-run sandbox and swarm scheduler
#[derive(Parser, Debug)]
#[command(name = "shade")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    SHADE_DEBUG=1    Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.shade/shade.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Plan and run task swarms
    Swarm {
        #[command(subcommand)]
        command: SwarmCommand,
    },

    /// Run a single command through the shadow-run sandbox
    Sandbox {
        /// The shell command to shadow-run
        #[arg(long)]
        command: String,

        /// Actually execute the command (default is report-only)
        #[arg(long)]
        allow_exec: bool,

        /// Apply verified changes back to the host tree
        #[arg(long)]
        hydrate: bool,

        /// Host subtree to mirror (defaults to the current directory)
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum SwarmCommand {
    /// Decompose a plan into a task DAG and print it, without executing
    Plan {
        /// Plan text, or path to a plan file
        input: String,
    },

    /// Decompose, schedule, and execute a plan end to end
    Run {
        /// Plan text, or path to a plan file
        input: String,

        /// Number of concurrent workers
        #[arg(long)]
        workers: Option<usize>,

        /// Retry budget per task
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Re-run merge resolution over the last recorded run
    Merge,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    shade::log::init_with_debug(cli.debug);

    let result = match cli.command {
        Command::Swarm { command } => match command {
            SwarmCommand::Plan { input } => run_plan(&input),
            SwarmCommand::Run {
                input,
                workers,
                max_retries,
            } => run_swarm(&input, workers, max_retries).await,
            SwarmCommand::Merge => run_merge(),
        },
        Command::Sandbox {
            command,
            allow_exec,
            hydrate,
            root,
        } => run_sandbox(&command, allow_exec, hydrate, root).await,
    };

    if let Err(e) = result {
        shlog_error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Read the plan: a path to a plan file, or the plan text itself.
fn plan_text(input: &str) -> Result<String> {
    if Path::new(input).is_file() {
        Ok(fs::read_to_string(input)?)
    } else {
        Ok(input.to_string())
    }
}

fn run_plan(input: &str) -> Result<()> {
    let text = plan_text(input)?;
    let dag = Decomposer::new().decompose(&text)?;

    println!(
        "Plan: {} task(s), {} dependency edge(s)",
        dag.task_count(),
        dag.dependency_count()
    );
    for task in dag.topological_order()? {
        let deps: Vec<String> = dag
            .get_dependencies(&task.id)
            .iter()
            .map(|d| d.name.clone())
            .collect();
        if deps.is_empty() {
            println!("  {} - {:?}", task.name, task.command);
        } else {
            println!("  {} - {:?} (after {})", task.name, task.command, deps.join(", "));
        }
    }
    Ok(())
}

async fn run_swarm(input: &str, workers: Option<usize>, max_retries: Option<u32>) -> Result<()> {
    let config = Config::load()?;
    let workers = workers.unwrap_or_else(|| config.effective_workers()).max(1);
    let max_retries = max_retries.unwrap_or_else(|| config.effective_max_retries());

    let text = plan_text(input)?;
    let dag = Decomposer::new().decompose(&text)?;
    let started_at = Utc::now();

    shlog!(
        "Swarm run: {} task(s), {} worker(s), retry budget {}",
        dag.task_count(),
        workers,
        max_retries
    );

    let (pool_tx, mut pool_rx) = mpsc::channel(100);
    let (event_tx, mut event_rx) = mpsc::channel(100);
    tokio::spawn(async move { while pool_rx.recv().await.is_some() {} });
    let progress = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SchedulerEvent::TaskStarted { task_id, .. } => {
                    println!("started   {}", task_id.short());
                }
                SchedulerEvent::TaskSucceeded { task_id } => {
                    println!("succeeded {}", task_id.short());
                }
                SchedulerEvent::TaskRequeued { task_id, attempt } => {
                    println!("requeued  {} (attempt {})", task_id.short(), attempt);
                }
                SchedulerEvent::TaskAbandoned { task_id, reason } => {
                    println!("abandoned {} - {}", task_id.short(), reason);
                }
                SchedulerEvent::RunComplete => break,
            }
        }
    });

    let pool = WorkerPool::new(workers, pool_tx);
    let runner = SandboxRunner::new(
        std::env::current_dir()?,
        Arc::new(ProcessIsolation),
        config.effective_command_timeout(),
    );
    let correction = CorrectionLoop::new(Arc::new(RetrySamePlanner), max_retries);

    let kill_switch = CancellationToken::new();
    {
        let token = kill_switch.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted; abandoning remaining tasks");
                token.cancel();
            }
        });
    }

    let mut scheduler = Scheduler::new(dag, pool, runner, correction, event_tx)
        .with_kill_switch(kill_switch)
        .with_provision_retries(config.effective_provision_retries());
    scheduler.run().await?;
    let _ = progress.await;

    let (dag, hydrations, incidents) = scheduler.into_parts();
    let merge = MergeResolver::new().resolve(&hydrations);
    let report = RunReport::from_run(&dag, hydrations, incidents, merge, started_at);
    let path = report.save()?;

    print!("{}", report.render());
    println!("Report saved to {}", path.display());
    Ok(())
}

fn run_merge() -> Result<()> {
    let report = RunReport::load_latest()?;
    let merge = MergeResolver::new().resolve(&report.hydrations);

    println!("Run {}: {} hydration(s)", report.run_id, report.hydrations.len());
    if merge.conflicts.is_empty() && merge.superseded.is_empty() {
        println!("Merge: clean");
        return Ok(());
    }
    for superseded in &merge.superseded {
        println!(
            "superseded {}: {} replaced by {}",
            superseded.path.display(),
            superseded.earlier_task,
            superseded.later_task
        );
    }
    for conflict in &merge.conflicts {
        println!("conflict   {}", conflict);
    }
    Ok(())
}

async fn run_sandbox(
    command: &str,
    allow_exec: bool,
    hydrate: bool,
    root: Option<PathBuf>,
) -> Result<()> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    if !allow_exec {
        println!("Shadow run only: execution disabled by default.");
        println!("Would execute in an isolated mirror of {}:", root.display());
        println!("  {}", command);
        println!("Pass --allow-exec to execute.");
        return Ok(());
    }

    let config = Config::load()?;
    let runner = SandboxRunner::new(
        root,
        Arc::new(ProcessIsolation),
        config.effective_command_timeout(),
    );
    let task = Task::new("sandbox", command);
    let mut staged = runner.shadow_run(&task).await?;

    println!("{}", staged.result.verdict);
    println!("exit code: {:?}", staged.result.exit_code);
    if !staged.result.output.is_empty() {
        print!("{}", staged.result.output);
        if !staged.result.output.ends_with('\n') {
            println!();
        }
    }
    for change in &staged.result.changes {
        let kind = if change.is_created() {
            "created"
        } else if change.is_deleted() {
            "deleted"
        } else {
            "modified"
        };
        println!("  {} {}", kind, change.path.display());
    }

    if hydrate && staged.result.verdict.is_verified() {
        let record = staged.hydrate(0).await?;
        println!("Hydrated {} file(s)", record.applied.len());
    } else {
        staged.discard().await?;
        if hydrate {
            println!("Not hydrated: run was not verified");
        } else {
            println!("Workspace discarded (pass --hydrate to apply verified changes)");
        }
    }
    Ok(())
}
