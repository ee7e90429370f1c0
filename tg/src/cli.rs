//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{TaskStatus, WorkerStatus};

/// TaskGraph - dependency-aware task scheduling with supervised workers
#[derive(Parser)]
#[command(
    name = "tg",
    about = "Dependency-aware task scheduling with heartbeat-supervised workers",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Override the configured state directory
    #[arg(long = "state-dir", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage tasks
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Show task counts by status
    Summary {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Manage workers
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },

    /// Run one health check pass over all workers
    Check {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Poll worker health until interrupted
    Monitor {
        /// Seconds between health checks (default: from config)
        #[arg(short, long = "interval-secs")]
        interval_secs: Option<u64>,
    },

    /// Show supervisor events
    Events {
        /// Only events about this worker
        #[arg(short, long)]
        subject: Option<String>,

        /// Number of events to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Task subcommands
#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// Add tasks from a YAML or JSON file holding a list of definitions
    Add {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List tasks
    List {
        /// Filter by status (pending, assigned, running, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<TaskStatus>,

        /// Filter by task type
        #[arg(short = 't', long = "type")]
        task_type: Option<String>,

        /// Filter by tag
        #[arg(long)]
        tag: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the next batch of ready tasks by priority
    Next {
        /// Maximum number of tasks
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Assign ready tasks to a worker (all or nothing)
    Assign {
        /// Worker ID
        #[arg(short, long)]
        worker: String,

        /// Task IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Report task progress (0.0 - 1.0)
    Progress {
        id: String,

        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Mark a task completed, or failed with --failed
    Complete {
        id: String,

        /// The task failed
        #[arg(long)]
        failed: bool,

        /// Error message recorded with a failure
        #[arg(short, long)]
        error: Option<String>,
    },

    /// Re-queue a failed task
    Retry { id: String },

    /// Cancel a pending or failed task
    Cancel { id: String },

    /// Show the dependency chain with the longest estimated duration
    CriticalPath {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Worker subcommands
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Register a worker with the scheduler and the supervisor
    Register {
        id: String,

        /// Display name (default: the ID)
        #[arg(long)]
        name: Option<String>,

        /// Worker type
        #[arg(short = 't', long = "type", default_value = "default")]
        worker_type: String,

        /// Relative throughput weight
        #[arg(long, default_value = "1")]
        capacity: u32,

        /// Maximum concurrently assigned tasks
        #[arg(short = 'p', long = "max-parallel", default_value = "1")]
        max_parallel: u32,
    },

    /// Record a heartbeat
    Heartbeat {
        id: String,

        /// Task the worker is currently running
        #[arg(long)]
        task: Option<String>,
    },

    /// Show worker health and load
    Status {
        /// Worker ID (default: all workers)
        id: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Push a worker status (initializing, idle, busy, error, restarting)
    SetStatus {
        id: String,

        status: WorkerStatus,

        /// Error message
        #[arg(short, long)]
        error: Option<String>,
    },

    /// Record a restart and run the restart command
    Restart {
        id: String,

        /// Delay passed to the restart command (default: from config)
        #[arg(short, long = "delay-secs")]
        delay_secs: Option<u64>,
    },

    /// Stop a worker
    Stop { id: String },

    /// Clear the restart budget of a stopped or terminated worker
    Reset { id: String },

    /// Remove a worker from supervision
    Remove { id: String },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskgraph")
        .join("logs")
        .join("taskgraph.log")
}

/// Generate the after_help text
pub fn generate_after_help() -> String {
    format!("Logs are written to: {}\n", get_log_path().display())
}

/// Output format for listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_task_assign() {
        let cli = Cli::parse_from(["tg", "task", "assign", "--worker", "w1", "a", "b"]);
        if let Command::Task {
            command: TaskCommand::Assign { worker, ids },
        } = cli.command
        {
            assert_eq!(worker, "w1");
            assert_eq!(ids, vec!["a", "b"]);
        } else {
            panic!("Expected task assign command");
        }
    }

    #[test]
    fn test_cli_parse_task_list_filters() {
        let cli = Cli::parse_from(["tg", "task", "list", "--status", "failed", "--type", "build"]);
        assert!(matches!(
            cli.command,
            Command::Task {
                command: TaskCommand::List {
                    status: Some(TaskStatus::Failed),
                    task_type: Some(_),
                    tag: None,
                    format: OutputFormat::Text,
                }
            }
        ));

        assert!(Cli::try_parse_from(["tg", "task", "list", "--status", "done"]).is_err());
    }

    #[test]
    fn test_cli_parse_negative_progress() {
        let cli = Cli::parse_from(["tg", "task", "progress", "a", "-0.5"]);
        if let Command::Task {
            command: TaskCommand::Progress { id, value },
        } = cli.command
        {
            assert_eq!(id, "a");
            assert_eq!(value, -0.5);
        } else {
            panic!("Expected task progress command");
        }
    }

    #[test]
    fn test_cli_parse_worker_register() {
        let cli = Cli::parse_from(["tg", "worker", "register", "w1", "--type", "gpu", "--max-parallel", "4"]);
        assert!(matches!(
            cli.command,
            Command::Worker {
                command: WorkerCommand::Register {
                    name: None,
                    capacity: 1,
                    max_parallel: 4,
                    ..
                }
            }
        ));
    }

    #[test]
    fn test_cli_parse_set_status() {
        let cli = Cli::parse_from(["tg", "worker", "set-status", "w1", "error", "--error", "oom"]);
        assert!(matches!(
            cli.command,
            Command::Worker {
                command: WorkerCommand::SetStatus {
                    status: WorkerStatus::Error,
                    error: Some(_),
                    ..
                }
            }
        ));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::parse_from(["tg", "summary", "-c", "/path/to/tg.yml", "--state-dir", "/tmp/tg"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/tg.yml")));
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/tg")));
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("table".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }
}
