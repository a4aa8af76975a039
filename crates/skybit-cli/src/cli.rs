use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Output format for CLI commands
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

#[derive(Parser)]
#[command(name = "skybit")]
#[command(version, about = "Skybit - scheduled agent tasks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (defaults to ~/.skybit/skybit.db)
    #[arg(long, global = true, env = "SKYBIT_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Config file (defaults to ~/.skybit/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Run the scheduler in the foreground until interrupted
    Daemon,

    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// List all tasks
    List,

    /// Show a task with its last outcome
    Show { id: String },

    /// Create a task
    Create(CreateTaskArgs),

    /// Update fields of a task
    Update(UpdateTaskArgs),

    /// Delete a task
    Delete { id: String },

    /// Enable a task and schedule it
    Enable { id: String },

    /// Disable a task, keeping its definition
    Disable { id: String },

    /// Run a task now and wait for the outcome
    Run { id: String },

    /// Show the step trace of the latest run
    Steps { id: String },
}

#[derive(Args)]
pub struct CreateTaskArgs {
    /// Task name; the task ID is derived from it
    #[arg(long)]
    pub name: String,

    /// Instruction text sent to the agent
    #[arg(long)]
    pub prompt: String,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Sandbox type (ubuntu, browser)
    #[arg(long, default_value = "ubuntu")]
    pub instance: String,

    /// Model provider (openai, anthropic)
    #[arg(long, default_value = "openai")]
    pub provider: String,

    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Run every N minutes
    #[arg(long, conflicts_with = "cron")]
    pub interval: Option<u32>,

    /// 5-field cron expression, evaluated in UTC
    #[arg(long)]
    pub cron: Option<String>,

    /// Enabled tool (bash, computer, edit); repeatable
    #[arg(long = "tool")]
    pub tools: Vec<String>,

    /// JSON schema for structured output
    #[arg(long)]
    pub schema: Option<String>,

    /// Create the task without scheduling it
    #[arg(long)]
    pub disabled: bool,
}

#[derive(Args)]
pub struct UpdateTaskArgs {
    pub id: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub prompt: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub instance: Option<String>,

    #[arg(long)]
    pub provider: Option<String>,

    #[arg(long, conflicts_with = "clear_system_prompt")]
    pub system_prompt: Option<String>,

    /// Fall back to the default system prompt
    #[arg(long)]
    pub clear_system_prompt: bool,

    /// Schedule type (interval, cron)
    #[arg(long)]
    pub schedule_type: Option<String>,

    #[arg(long)]
    pub interval: Option<u32>,

    #[arg(long)]
    pub cron: Option<String>,

    /// Replace the tool list; repeatable
    #[arg(long = "tool")]
    pub tools: Vec<String>,

    #[arg(long, conflicts_with = "clear_schema")]
    pub schema: Option<String>,

    #[arg(long)]
    pub clear_schema: bool,

    #[arg(long)]
    pub enabled: Option<bool>,
}
