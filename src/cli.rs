// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! Every parameter is a flag. Global flags may appear before or after the
//! subcommand.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};

use crate::mailbox::MessageKind;
use crate::store::TaskStatus;

/// Command-line arguments for `taskgrid`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskgrid",
    version,
    about = "File-based task coordination for independent worker processes.",
    long_about = None
)]
pub struct CliArgs {
    /// Root directory holding every project.
    #[arg(long, global = true, env = "TASKGRID_ROOT", value_name = "DIR", default_value = ".taskgrid")]
    pub root: PathBuf,

    #[arg(long, global = true, env = "TASKGRID_PROJECT", default_value = "default")]
    pub project: String,

    #[arg(long, global = true, env = "TASKGRID_TEAM", default_value = "default")]
    pub team: String,

    /// Config file (TOML). Default: `<root>/taskgrid.toml`, if present.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Identity used for administrative writes (create, plan, waves).
    ///
    /// Defaults to a per-process identity.
    #[arg(long, global = true, env = "TASKGRID_ACTOR", value_name = "ID")]
    pub actor: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKGRID_LOG` or `warn` is used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliArgs {
    /// The explicit `--actor`, or `cli-<pid>`.
    pub fn actor(&self) -> String {
        self.actor
            .clone()
            .unwrap_or_else(|| format!("cli-{}", std::process::id()))
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the team directory and metadata (idempotent).
    Init,
    /// Team phase, task counts, waves and inboxes.
    Status,
    /// Task records and the claim protocol.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Bulk task creation.
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },
    /// Execution waves and verification.
    Wave {
        #[command(subcommand)]
        command: WaveCommand,
    },
    /// Stale-claim reclaiming.
    Reclaim {
        #[command(subcommand)]
        command: ReclaimCommand,
    },
    /// Per-actor inboxes.
    Mailbox {
        #[command(subcommand)]
        command: MailboxCommand,
    },
}

#[derive(Debug, Clone, Args)]
pub struct NewTaskArgs {
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub title: String,
    #[arg(long, default_value = "")]
    pub description: String,
    #[arg(long)]
    pub role: Option<String>,
    /// Comma-separated dependency ids.
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    pub blocked_by: Vec<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum TaskCommand {
    /// Create an open task. Waves are assigned by `wave plan` and
    /// `wave fixup`.
    Create {
        #[command(flatten)]
        task: NewTaskArgs,
    },
    Get {
        #[arg(long)]
        id: String,
    },
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        wave: Option<u32>,
        /// Only open tasks whose dependencies are resolved.
        #[arg(long)]
        ready: bool,
    },
    Edit {
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Claim `--id`, or the next ready task when omitted.
    Claim {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        role: Option<String>,
        /// Refuse tasks whose role differs instead of recording a warning.
        #[arg(long)]
        strict: bool,
    },
    Release {
        #[arg(long)]
        id: String,
        #[arg(long)]
        owner: String,
    },
    Resolve {
        #[arg(long)]
        id: String,
        #[arg(long)]
        owner: String,
        /// Final note, attached as evidence in the same update.
        #[arg(long)]
        note: Option<String>,
    },
    Evidence(EvidenceArgs),
}

#[derive(Debug, Clone, Args)]
#[command(group(
    ArgGroup::new("evidence_kind")
        .required(true)
        .args(["note", "command", "file", "test"])
))]
pub struct EvidenceArgs {
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub owner: String,
    #[arg(long)]
    pub note: Option<String>,
    #[arg(long)]
    pub command: Option<String>,
    #[arg(long, requires = "command", allow_negative_numbers = true)]
    pub exit_code: Option<i32>,
    #[arg(long)]
    pub file: Option<String>,
    #[arg(long, requires = "file")]
    pub action: Option<String>,
    /// Test name; pair with `--passed` or `--failed`.
    #[arg(long, requires = "test_outcome")]
    pub test: Option<String>,
    #[arg(long, group = "test_outcome")]
    pub passed: bool,
    #[arg(long, group = "test_outcome")]
    pub failed: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum PlanCommand {
    /// Create every task of a TOML plan file.
    Import {
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum WaveCommand {
    /// Compute and store waves from the current tasks.
    Plan,
    List,
    Start {
        #[arg(long)]
        id: u32,
    },
    /// Mark finished waves completed.
    Refresh,
    #[command(group(ArgGroup::new("outcome").required(true).args(["passed", "failed"])))]
    Verify {
        #[arg(long)]
        id: u32,
        #[arg(long)]
        passed: bool,
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        by: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Add a fix-up task to a failed wave.
    Fixup {
        #[arg(long)]
        wave: u32,
        #[command(flatten)]
        task: NewTaskArgs,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ReclaimCommand {
    Sweep {
        /// Override `[reclaim].stale_after_ms`; 0 disables.
        #[arg(long)]
        stale_after_ms: Option<u64>,
    },
    /// Sweep periodically until Ctrl-C.
    Monitor {
        #[arg(long)]
        interval_ms: Option<u64>,
        #[arg(long)]
        stale_after_ms: Option<u64>,
        /// Stop after this many sweeps.
        #[arg(long)]
        iterations: Option<u64>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum MailboxCommand {
    Create {
        #[arg(long)]
        actor: String,
    },
    Send(SendArgs),
    /// Send a text message to every other inbox.
    Broadcast {
        #[arg(long)]
        from: String,
        #[arg(long)]
        text: String,
    },
    Read {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        unread: bool,
        #[arg(long = "type", value_name = "TYPE")]
        kind: Option<MessageKind>,
    },
    MarkRead {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        id: String,
    },
    /// Remove read messages.
    Prune {
        #[arg(long)]
        actor: String,
    },
    /// Block until unread mail arrives or the timeout passes.
    Wait {
        #[arg(long)]
        actor: String,
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },
}

#[derive(Debug, Clone, Args)]
pub struct SendArgs {
    #[arg(long)]
    pub from: String,
    #[arg(long)]
    pub to: String,
    /// message, idle, shutdown-request or shutdown-response.
    #[arg(long = "type", value_name = "TYPE", default_value = "message")]
    pub kind: MessageKind,
    #[arg(long)]
    pub text: Option<String>,
    #[arg(long)]
    pub reason: Option<String>,
    /// Task just completed (idle notifications).
    #[arg(long)]
    pub task: Option<String>,
    #[arg(long)]
    pub request_id: Option<String>,
    #[arg(long, conflicts_with = "rejected")]
    pub approved: bool,
    #[arg(long)]
    pub rejected: bool,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_claim_with_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "taskgrid", "task", "claim", "--owner", "w1", "--role", "backend", "--root", "/tmp/g",
        ])
        .unwrap();
        assert_eq!(args.root, PathBuf::from("/tmp/g"));
        match args.command {
            Command::Task {
                command: TaskCommand::Claim { owner, id, role, strict },
            } => {
                assert_eq!(owner, "w1");
                assert!(id.is_none());
                assert_eq!(role.as_deref(), Some("backend"));
                assert!(!strict);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn blocked_by_is_comma_separated() {
        let args = CliArgs::try_parse_from([
            "taskgrid", "task", "create", "--id", "T3", "--title", "t", "--blocked-by", "T1,T2",
        ])
        .unwrap();
        match args.command {
            Command::Task {
                command: TaskCommand::Create { task, .. },
            } => assert_eq!(task.blocked_by, vec!["T1".to_string(), "T2".to_string()]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn create_does_not_take_a_wave() {
        assert!(
            CliArgs::try_parse_from([
                "taskgrid", "task", "create", "--id", "T1", "--title", "t", "--wave", "2",
            ])
            .is_err()
        );
    }

    #[test]
    fn evidence_requires_a_kind() {
        assert!(
            CliArgs::try_parse_from(["taskgrid", "task", "evidence", "--id", "T1", "--owner", "w"])
                .is_err()
        );
        assert!(
            CliArgs::try_parse_from([
                "taskgrid", "task", "evidence", "--id", "T1", "--owner", "w", "--note", "ok",
            ])
            .is_ok()
        );
    }

    #[test]
    fn verify_requires_an_outcome() {
        assert!(CliArgs::try_parse_from(["taskgrid", "wave", "verify", "--id", "1", "--by", "qa"]).is_err());
    }

    #[test]
    fn message_type_accepts_cli_spelling() {
        let args = CliArgs::try_parse_from([
            "taskgrid", "mailbox", "send", "--from", "a", "--to", "b", "--type", "shutdown-request",
            "--request-id", "r1", "--reason", "done",
        ])
        .unwrap();
        match args.command {
            Command::Mailbox {
                command: MailboxCommand::Send(send),
            } => assert_eq!(send.kind, MessageKind::ShutdownRequest),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
