use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, bail};
use batchforge::engine::{
    EngineEvent, ExecutionContext, ExecutionError, JobExecutor, JobParameters,
};
use batchforge::persistence::{HistoryStore, PresetStore};
use batchforge::{BatchEngine, EngineConfig, JobRequest, logging};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "batchforge", version, about = "Run prioritized batch jobs")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, env = "BATCHFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true, env = "BATCHFORGE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the jobs in a JSON file
    Run {
        /// File holding an array of jobs
        jobs: PathBuf,

        /// Number of workers (bounded by the configured range)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Ignore jobs left over from a previous run
        #[arg(long)]
        fresh: bool,
    },
    /// Show recent job history
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        /// Delete all history records
        #[arg(long)]
        clear: bool,
    },
    /// Manage parameter presets
    Presets {
        #[command(subcommand)]
        action: Option<PresetAction>,
    },
}

#[derive(Subcommand, Debug)]
enum PresetAction {
    /// List presets
    List,
    /// Print a preset as JSON
    Show { name: String },
    Delete { name: String },
    Rename { from: String, to: String },
    Duplicate { source: String, name: String },
    /// Write a preset to a standalone file
    Export { name: String, path: PathBuf },
    /// Read a preset from an exported file
    Import {
        path: PathBuf,
        /// Store under a different name
        #[arg(long)]
        name: Option<String>,
    },
}

/// One entry of a jobs file.
#[derive(Debug, Deserialize)]
struct JobEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    priority: u8,
    /// Preset whose parameters are used as defaults.
    #[serde(default)]
    preset: Option<String>,
    #[serde(default)]
    parameters: Value,
}

/// Runs the external program named by the `program` and `args` parameters.
///
/// Files listed under `inputs` are read through the shared cache first, so
/// jobs that share inputs only read them once.
struct CommandExecutor {
    poll_interval: Duration,
}

impl JobExecutor for CommandExecutor {
    fn execute(
        &self,
        parameters: &JobParameters,
        ctx: &ExecutionContext,
    ) -> Result<(), ExecutionError> {
        let program = parameters
            .get_str("program")
            .ok_or_else(|| ExecutionError::failed("missing `program` parameter"))?;
        let args = string_list(parameters, "args")?;

        for input in string_list(parameters, "inputs")? {
            ctx.checkpoint()?;
            let bytes = ctx.load_file(Path::new(&input))?;
            debug!(job_id = %ctx.job_id(), input = %input, size = bytes.len(), "Input ready");
        }
        ctx.checkpoint()?;

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ExecutionError::failed(format!("failed to spawn {program}: {e}")))?;
        debug!(job_id = %ctx.job_id(), pid = child.id(), "Spawned {}", program);

        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    ctx.report(100);
                    return Ok(());
                }
                return Err(ExecutionError::failed(format!("{program} exited with {status}")));
            }

            if ctx.is_cancelled() {
                if let Err(e) = child.kill() {
                    warn!(job_id = %ctx.job_id(), "Failed to kill {}: {}", program, e);
                }
                let _ = child.wait();
                return Err(ExecutionError::Cancelled);
            }

            std::thread::sleep(self.poll_interval);
        }
    }
}

fn string_list(parameters: &JobParameters, key: &str) -> Result<Vec<String>, ExecutionError> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()),
        Some(_) => Err(ExecutionError::failed(format!("`{key}` must be an array"))),
    }
}

/// Layer a job's own parameters over its preset's.
fn resolve_request(entry: JobEntry, presets: &PresetStore) -> anyhow::Result<JobRequest> {
    let mut parameters = match &entry.preset {
        Some(name) => presets
            .get(name)
            .with_context(|| format!("unknown preset `{name}`"))?
            .parameters,
        None => JobParameters::new(),
    };

    match entry.parameters {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                parameters.insert(key, value);
            }
        }
        other => bail!("job parameters must be an object, got {other}"),
    }

    let mut request = JobRequest::new(parameters.into_value()).with_priority(entry.priority);
    if let Some(name) = entry.name {
        request = request.with_name(name);
    }
    Ok(request)
}

async fn run_jobs(
    config: EngineConfig,
    jobs_path: &Path,
    workers: Option<usize>,
    fresh: bool,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(jobs_path)
        .with_context(|| format!("reading jobs file {}", jobs_path.display()))?;
    let entries: Vec<JobEntry> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing jobs file {}", jobs_path.display()))?;

    let presets = config.persistence.open_presets()?;
    let last_preset = entries.iter().rev().find_map(|entry| entry.preset.clone());
    let requests = entries
        .into_iter()
        .map(|entry| resolve_request(entry, &presets))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if let Some(name) = last_preset {
        presets.set_last_used(&name)?;
    }

    let workers = workers.unwrap_or(config.max_workers);
    let engine = BatchEngine::new(
        config,
        CommandExecutor {
            poll_interval: Duration::from_millis(100),
        },
    )?;

    let recovered = if fresh { 0 } else { engine.recover().await? };
    if recovered > 0 {
        info!(recovered, "Recovered jobs from the previous run");
    }

    let mut events = engine.subscribe();
    for request in requests {
        engine.submit(request)?;
    }
    let expected = engine.queue().len() as u64;

    engine.start(workers)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while engine.stats().finished() < expected {
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("Interrupted, cancelling running jobs");
                engine.stop(false).await?;
                break;
            }
            event = events.recv() => match event {
                Ok(EngineEvent::JobFinished { job_id, status, error }) => match error {
                    Some(error) => println!("{job_id} {status}: {error}"),
                    None => println!("{job_id} {status}"),
                },
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.stop(true).await?;

    let stats = engine.stats();
    println!(
        "completed {}, failed {}, cancelled {}, pending {}",
        stats.completed, stats.failed, stats.cancelled, stats.queued_jobs
    );
    Ok(())
}

fn show_history(history: &HistoryStore, limit: usize) -> anyhow::Result<()> {
    let stats = history.statistics();
    println!(
        "{} jobs: {} completed, {} failed, {} cancelled ({:.1}% success, avg {:.1}s)",
        stats.total,
        stats.completed,
        stats.failed,
        stats.cancelled,
        stats.success_rate,
        stats.average_duration_secs
    );

    for record in history.records().iter().rev().take(limit) {
        let duration = record
            .duration_secs
            .map(|secs| format!("{secs:.1}s"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<10} {:>7}  p{:<2} {} {}",
            record.finished_at.format("%Y-%m-%d %H:%M:%S"),
            record.status.as_str(),
            duration,
            record.priority,
            record.name,
            record.error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

fn manage_presets(presets: &PresetStore, action: PresetAction) -> anyhow::Result<()> {
    match action {
        PresetAction::List => {
            let last_used = presets.last_used();
            for preset in presets.all() {
                let current = if last_used.as_deref() == Some(preset.name.as_str()) {
                    "* "
                } else {
                    "  "
                };
                let marker = if preset.is_default { " (built-in)" } else { "" };
                println!("{}{}{}  {}", current, preset.name, marker, preset.description);
            }
        }
        PresetAction::Show { name } => {
            let preset = presets
                .get(&name)
                .with_context(|| format!("unknown preset `{name}`"))?;
            println!("{}", serde_json::to_string_pretty(&preset)?);
        }
        PresetAction::Delete { name } => presets.delete(&name)?,
        PresetAction::Rename { from, to } => presets.rename(&from, &to)?,
        PresetAction::Duplicate { source, name } => {
            presets.duplicate(&source, &name)?;
        }
        PresetAction::Export { name, path } => presets.export(&name, &path)?,
        PresetAction::Import { path, name } => {
            let preset = presets.import(&path, name.as_deref())?;
            println!("imported {}", preset.name);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_handle = logging::init_logging(cli.log_dir.as_deref())?;
    debug!(filter = %log_handle.get_filter(), log_dir = ?log_handle.log_dir(), "Logging initialized");

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }

    match cli.command {
        Commands::Run {
            jobs,
            workers,
            fresh,
        } => run_jobs(config, &jobs, workers, fresh).await,
        Commands::History { limit, clear } => {
            let history = config.persistence.open_history();
            if clear {
                history.clear()?;
                println!("history cleared");
                return Ok(());
            }
            show_history(&history, limit)
        }
        Commands::Presets { action } => {
            let presets = config.persistence.open_presets()?;
            manage_presets(&presets, action.unwrap_or(PresetAction::List))
        }
    }
}
