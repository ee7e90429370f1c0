//! TaskGraph - task scheduling and worker supervision
//!
//! CLI entry point. Each invocation opens the state directory, performs one
//! operation and persists the result.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result};
use serde::Serialize;
use statestore::StateStore;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use taskgraph::cli::{Cli, Command, OutputFormat, TaskCommand, WorkerCommand, generate_after_help, get_log_path};
use taskgraph::clock::SystemTimeProvider;
use taskgraph::config::Config;
use taskgraph::domain::{Task, TaskDefinition, TaskStatus, WorkerDefinition, WorkerRuntimeState, WorkerStatus};
use taskgraph::events::EventLogEntry;
use taskgraph::scheduler::{TaskScheduler, WorkerLoad};
use taskgraph::supervisor::{
    CommandRestartHook, HealthReport, MonitorCallback, MonitorTick, NoopRestartHook, RestartHook, RestartOutcome,
    WorkerSupervisor, stop_monitor,
};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Logging isn't initialized yet, so nothing here can be traced
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(state_dir) = cli.state_dir {
        debug!(?state_dir, "main: state dir overridden on command line");
        config.storage.state_dir = state_dir;
    }
    config.validate()?;

    info!(state_dir = %config.storage.state_dir.display(), "TaskGraph loaded config");
    let app = App::open(&config)?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Task { command } => {
            debug!("main: matched Task command");
            cmd_task(&app, command).await
        }
        Command::Summary { format } => {
            debug!(?format, "main: matched Summary command");
            cmd_summary(&app, format).await
        }
        Command::Worker { command } => {
            debug!("main: matched Worker command");
            cmd_worker(&app, command).await
        }
        Command::Check { format } => {
            debug!(?format, "main: matched Check command");
            cmd_check(&app, format).await
        }
        Command::Monitor { interval_secs } => {
            debug!(?interval_secs, "main: matched Monitor command");
            cmd_monitor(app, interval_secs).await
        }
        Command::Events { subject, limit, format } => {
            debug!(?subject, limit, ?format, "main: matched Events command");
            cmd_events(&app, subject.as_deref(), limit, format).await
        }
    }
}

/// Scheduler and supervisor opened over the same state directory
struct App {
    scheduler: TaskScheduler,
    supervisor: WorkerSupervisor,
}

impl App {
    fn open(config: &Config) -> Result<Self> {
        debug!(state_dir = %config.storage.state_dir.display(), "App::open: called");
        let store = StateStore::open(&config.storage.state_dir).context("Failed to open state directory")?;
        let clock = Arc::new(SystemTimeProvider);

        let hook: Arc<dyn RestartHook> = match &config.supervisor.restart_command {
            Some(command) => {
                debug!(%command, "App::open: using restart command");
                Arc::new(CommandRestartHook::new(command.clone()))
            }
            None => {
                debug!("App::open: no restart command configured");
                Arc::new(NoopRestartHook)
            }
        };

        let scheduler = TaskScheduler::open(config.scheduler.clone(), store.clone(), clock.clone(), Vec::new())
            .context("Failed to open scheduler state")?;
        let supervisor = WorkerSupervisor::open(config.supervisor.clone(), store, clock, hook)
            .context("Failed to open supervisor state")?;

        Ok(Self { scheduler, supervisor })
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn colored_task_status(status: TaskStatus) -> ColoredString {
    let padded = format!("{:<10}", status.to_string());
    match status {
        TaskStatus::Pending => padded.yellow(),
        TaskStatus::Assigned => padded.blue(),
        TaskStatus::Running => padded.cyan(),
        TaskStatus::Completed => padded.green(),
        TaskStatus::Failed => padded.red(),
        TaskStatus::Cancelled => padded.dimmed(),
    }
}

fn colored_worker_status(status: WorkerStatus) -> ColoredString {
    let padded = format!("{:<12}", status.to_string());
    match status {
        WorkerStatus::Initializing | WorkerStatus::Restarting => padded.yellow(),
        WorkerStatus::Idle => padded.green(),
        WorkerStatus::Busy => padded.cyan(),
        WorkerStatus::Error => padded.red(),
        WorkerStatus::Stopped => padded.dimmed(),
        WorkerStatus::Terminated => padded.red().bold(),
    }
}

// ============================================================================
// Task commands
// ============================================================================

async fn cmd_task(app: &App, command: TaskCommand) -> Result<()> {
    debug!(?command, "cmd_task: called");
    let scheduler = &app.scheduler;

    match command {
        TaskCommand::Add { file } => cmd_task_add(scheduler, &file).await,
        TaskCommand::List {
            status,
            task_type,
            tag,
            format,
        } => cmd_task_list(scheduler, status, task_type.as_deref(), tag.as_deref(), format).await,
        TaskCommand::Next { batch_size, format } => {
            let batch = scheduler.get_next_batch(batch_size).await;
            print_tasks(&batch, format, "No tasks are ready")
        }
        TaskCommand::Assign { worker, ids } => {
            scheduler.assign_tasks(&ids, &worker).await?;
            println!("{} Assigned {} task(s) to {}", "✓".green(), ids.len(), worker.cyan());
            Ok(())
        }
        TaskCommand::Progress { id, value } => {
            let stored = scheduler.update_task_progress(&id, value).await?;
            println!("{} {} progress {:.0}%", "✓".green(), id.cyan(), stored * 100.0);
            Ok(())
        }
        TaskCommand::Complete { id, failed, error } => cmd_task_complete(scheduler, &id, !failed, error).await,
        TaskCommand::Retry { id } => {
            scheduler.retry_task(&id).await?;
            println!("{} {} re-queued", "↻".yellow(), id.cyan());
            Ok(())
        }
        TaskCommand::Cancel { id } => {
            scheduler.cancel_task(&id).await?;
            println!("{} {} cancelled", "✓".green(), id.cyan());
            Ok(())
        }
        TaskCommand::CriticalPath { format } => {
            let path = scheduler.get_critical_path().await?;
            match format {
                OutputFormat::Json => print_json(&path),
                OutputFormat::Text => {
                    if path.task_ids.is_empty() {
                        println!("No tasks");
                    } else {
                        println!("{}", path.task_ids.join(" → "));
                        println!("{}", format!("Total estimated duration: {}s", path.total_duration_secs).dimmed());
                    }
                    Ok(())
                }
            }
        }
    }
}

async fn cmd_task_add(scheduler: &TaskScheduler, file: &Path) -> Result<()> {
    debug!(?file, "cmd_task_add: called");
    let content = fs::read_to_string(file).context(format!("Failed to read {}", file.display()))?;

    let is_json = file.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let definitions: Vec<TaskDefinition> = if is_json {
        serde_json::from_str(&content).context(format!("Failed to parse {}", file.display()))?
    } else {
        serde_yaml::from_str(&content).context(format!("Failed to parse {}", file.display()))?
    };

    let offered = definitions.len();
    let added = scheduler.add_tasks(definitions).await?;
    println!("{} Added {} task(s)", "✓".green(), added);
    if added < offered {
        println!("{}", format!("  {} already present, skipped", offered - added).dimmed());
    }

    for (task_id, dependency) in scheduler.missing_dependencies().await {
        println!(
            "{} {} depends on unknown task {} and will not become ready until it exists",
            "!".yellow(),
            task_id.cyan(),
            dependency.yellow()
        );
    }

    if let Err(e) = scheduler.validate_dependency_graph().await {
        warn!(error = %e, "cmd_task_add: dependency graph is cyclic");
        println!("{} {}", "!".yellow(), e);
    }

    Ok(())
}

async fn cmd_task_list(
    scheduler: &TaskScheduler,
    status: Option<TaskStatus>,
    task_type: Option<&str>,
    tag: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    debug!(?status, ?task_type, ?tag, "cmd_task_list: called");
    let mut tasks = match (task_type, tag) {
        (Some(task_type), _) => scheduler.get_tasks_by_type(task_type).await,
        (None, Some(tag)) => scheduler.get_tasks_by_tag(tag).await,
        (None, None) => scheduler.list_tasks().await,
    };

    tasks.retain(|task| {
        status.is_none_or(|s| task.status() == s) && tag.is_none_or(|tag| task.definition.tags.contains(tag))
    });

    print_tasks(&tasks, format, "No tasks found")
}

async fn cmd_task_complete(scheduler: &TaskScheduler, id: &str, success: bool, error: Option<String>) -> Result<()> {
    debug!(%id, success, ?error, "cmd_task_complete: called");
    let status = scheduler.complete_task(id, success, error).await?;

    match status {
        TaskStatus::Completed => println!("{} {} completed", "✓".green(), id.cyan()),
        TaskStatus::Pending => {
            let attempts = scheduler.get_task(id).await?.state.attempt_count;
            println!(
                "{} {} failed, re-queued (attempt {} of {})",
                "↻".yellow(),
                id.cyan(),
                attempts,
                scheduler.config().max_retries + 1
            );
        }
        other => println!("{} {} {}", "✗".red(), id.cyan(), other),
    }
    Ok(())
}

fn print_tasks(tasks: &[Task], format: OutputFormat, empty: &str) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(tasks),
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("{}", empty);
                return Ok(());
            }

            println!(
                "{}",
                format!("{:<24} {:<10} {:>8} {:>8}  {}", "ID", "STATUS", "PRIORITY", "PROGRESS", "WORKER").bold()
            );
            for task in tasks {
                println!(
                    "{:<24} {} {:>8} {:>7.0}%  {}",
                    task.id(),
                    colored_task_status(task.status()),
                    task.definition.priority,
                    task.state.progress * 100.0,
                    task.state.assigned_worker_id.as_deref().unwrap_or("-")
                );
                if let Some(error) = &task.state.last_error {
                    println!("  {}", error.red());
                }
            }
            Ok(())
        }
    }
}

async fn cmd_summary(app: &App, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_summary: called");
    let summary = app.scheduler.get_summary().await;

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Text => {
            println!("{}", format!("Tasks: {}", summary.total).bold());
            for status in TaskStatus::ALL {
                println!("  {} {}", colored_task_status(status), summary.count(status));
            }
            println!("{}", format!("{:.1}% complete", summary.percent_complete).dimmed());
            Ok(())
        }
    }
}

// ============================================================================
// Worker commands
// ============================================================================

async fn cmd_worker(app: &App, command: WorkerCommand) -> Result<()> {
    debug!(?command, "cmd_worker: called");
    let supervisor = &app.supervisor;

    match command {
        WorkerCommand::Register {
            id,
            name,
            worker_type,
            capacity,
            max_parallel,
        } => {
            let name = name.unwrap_or_else(|| id.clone());
            let definition = WorkerDefinition::new(&id, &name, &worker_type, max_parallel).with_capacity(capacity);
            app.scheduler.register_worker(definition).await?;
            supervisor.register_worker(&id, &name, &worker_type, None).await?;
            println!("{} Registered worker {} ({})", "✓".green(), id.cyan(), worker_type);
            Ok(())
        }
        WorkerCommand::Heartbeat { id, task } => {
            let status = supervisor.update_heartbeat(&id, task).await?;
            println!("{} {} {}", "♥".green(), id.cyan(), colored_worker_status(status));
            Ok(())
        }
        WorkerCommand::Status { id, format } => cmd_worker_status(app, id.as_deref(), format).await,
        WorkerCommand::SetStatus { id, status, error } => {
            supervisor.update_worker_status(&id, status, error).await?;
            println!("{} {} {}", "✓".green(), id.cyan(), colored_worker_status(status));
            Ok(())
        }
        WorkerCommand::Restart { id, delay_secs } => {
            let outcome = supervisor.restart_worker(&id, delay_secs.map(Duration::from_secs)).await?;
            match outcome {
                RestartOutcome::Scheduled { attempt, delay } => println!(
                    "{} {} restart scheduled (attempt {} of {}, delay {}s)",
                    "↻".yellow(),
                    id.cyan(),
                    attempt,
                    supervisor.config().max_restarts,
                    delay.as_secs()
                ),
                RestartOutcome::Terminated { restart_count } => println!(
                    "{} {} terminated after {} restarts",
                    "✗".red(),
                    id.cyan(),
                    restart_count
                ),
                RestartOutcome::Ignored { status } => {
                    println!("{} {} is {}, restart ignored", "-".dimmed(), id.cyan(), status)
                }
            }
            Ok(())
        }
        WorkerCommand::Stop { id } => {
            supervisor.stop_worker(&id).await?;
            println!("{} {} stopped", "✓".green(), id.cyan());
            Ok(())
        }
        WorkerCommand::Reset { id } => {
            supervisor.reset_worker(&id).await?;
            println!("{} {} reset", "✓".green(), id.cyan());
            Ok(())
        }
        WorkerCommand::Remove { id } => {
            supervisor.remove_worker(&id).await?;
            println!("{} {} removed", "✓".green(), id.cyan());
            Ok(())
        }
    }
}

/// Supervisor record joined with the scheduler's load, when registered there
#[derive(Serialize)]
struct WorkerView {
    #[serde(flatten)]
    state: WorkerRuntimeState,
    load: Option<WorkerLoad>,
}

async fn cmd_worker_status(app: &App, id: Option<&str>, format: OutputFormat) -> Result<()> {
    debug!(?id, ?format, "cmd_worker_status: called");
    let workers = match id {
        Some(id) => vec![app.supervisor.get_worker(id).await?],
        None => app.supervisor.list_workers().await,
    };

    let mut loads: HashMap<String, WorkerLoad> = app
        .scheduler
        .worker_loads()
        .await
        .into_iter()
        .map(|load| (load.worker_id.clone(), load))
        .collect();

    let views: Vec<WorkerView> = workers
        .into_iter()
        .map(|state| {
            let load = loads.remove(&state.id);
            WorkerView { state, load }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&views),
        OutputFormat::Text => {
            if views.is_empty() {
                println!("No workers registered");
                return Ok(());
            }

            println!(
                "{}",
                format!("{:<16} {:<12} {:>8} {:>8}  {}", "ID", "STATUS", "RESTARTS", "LOAD", "LAST HEARTBEAT").bold()
            );
            for view in &views {
                let load = view
                    .load
                    .as_ref()
                    .map(|l| format!("{}/{}", l.active_tasks, l.max_parallel_tasks))
                    .unwrap_or_else(|| "-".to_string());
                let heartbeat = view
                    .state
                    .last_heartbeat
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<16} {} {:>8} {:>8}  {}",
                    view.state.id,
                    colored_worker_status(view.state.status),
                    view.state.restart_count,
                    load,
                    heartbeat.dimmed()
                );
                if let Some(task_id) = &view.state.current_task_id {
                    println!("  task: {}", task_id.cyan());
                }
                if let Some(error) = &view.state.last_error {
                    println!("  {}", error.red());
                }
            }
            Ok(())
        }
    }
}

// ============================================================================
// Supervision commands
// ============================================================================

async fn cmd_check(app: &App, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_check: called");
    let report = app.supervisor.check_all_workers().await?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            print_health_report(&report);
            Ok(())
        }
    }
}

fn print_health_report(report: &HealthReport) {
    let line = |label: ColoredString, ids: &[String]| {
        if !ids.is_empty() {
            println!("  {} {}", label, ids.join(", "));
        }
    };

    if report.is_all_healthy() {
        println!("{} {} worker(s) healthy", "✓".green(), report.healthy.len());
        return;
    }

    line("healthy:   ".green(), &report.healthy);
    line("stale:     ".yellow(), &report.stale);
    line("restarted: ".yellow(), &report.restarted);
    line("terminated:".red(), &report.terminated);
}

async fn cmd_monitor(app: App, interval_secs: Option<u64>) -> Result<()> {
    debug!(?interval_secs, "cmd_monitor: called");
    let supervisor = Arc::new(app.supervisor);
    let interval = interval_secs.map(Duration::from_secs);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    let callback: MonitorCallback = Box::new(|tick: &MonitorTick| {
        let snapshot = &tick.snapshot;
        let counts: Vec<String> = snapshot
            .by_status
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(status, count)| format!("{}={}", status, count))
            .collect();
        println!(
            "{} #{} {} worker(s) [{}]",
            snapshot.timestamp.format("%H:%M:%S").to_string().dimmed(),
            tick.tick,
            snapshot.total,
            counts.join(" ")
        );
        if !tick.report.is_all_healthy() {
            print_health_report(&tick.report);
        }
    });

    let monitor_handle = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.monitor_loop(interval, Some(callback), shutdown_rx).await })
    };

    println!("Monitoring workers. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                debug!("cmd_monitor: SIGINT received");
                info!("SIGINT received, shutting down");
            }
            _ = sigterm.recv() => {
                debug!("cmd_monitor: SIGTERM received");
                info!("SIGTERM received, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        debug!("cmd_monitor: waiting for ctrl_c (non-Unix)");
        tokio::signal::ctrl_c().await?;
    }

    if !stop_monitor(&shutdown_tx).await {
        warn!("Monitor stopped before shutdown was requested");
    }
    let ticks = monitor_handle.await.context("Monitor task failed")?;
    println!("Monitor stopped after {} check(s)", ticks);
    Ok(())
}

async fn cmd_events(app: &App, subject: Option<&str>, limit: usize, format: OutputFormat) -> Result<()> {
    debug!(?subject, limit, ?format, "cmd_events: called");
    let events: Vec<EventLogEntry> = match subject {
        Some(subject) => {
            // Oldest first; keep the newest `limit`
            let mut events = app.supervisor.events_for(subject).await;
            let skip = events.len().saturating_sub(limit);
            events.drain(..skip);
            events
        }
        None => {
            // Newest first; show chronologically
            let mut events = app.supervisor.recent_events(limit).await;
            events.reverse();
            events
        }
    };

    match format {
        OutputFormat::Json => print_json(&events),
        OutputFormat::Text => {
            if events.is_empty() {
                println!("No events");
                return Ok(());
            }

            for event in &events {
                println!(
                    "{} {:<24} {:<16} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    event.event_type.to_string(),
                    event.subject_id.cyan(),
                    event.payload
                );
            }
            Ok(())
        }
    }
}

