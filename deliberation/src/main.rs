//! Deliberation engine CLI.
//!
//! Manages a state directory (`.deliberation/` by default) holding the
//! engine's persisted state, config, and cycle audit logs. Cycles themselves
//! are driven by a host that supplies the reasoner, memory, and tools.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use deliberation::core::types::MissionSource;
use deliberation::exit_codes;
use deliberation::io::init::{InitOptions, init_state_dir};
use deliberation::missions::{add_mission, decay_missions};
use deliberation::status::status_from_root;
use deliberation::validate::validate_state_dir;

#[derive(Parser)]
#[command(
    name = "deliberation",
    version,
    about = "Bounded goal-driven deliberation engine"
)]
struct Cli {
    /// State directory holding config.toml, state.json, and audit logs.
    #[arg(long, global = true, default_value = ".deliberation")]
    state_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the state directory with default config and empty state.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print cycle count, missions, and active goals.
    Status,
    /// Manage the mission queue.
    Mission {
        #[command(subcommand)]
        command: MissionCommand,
    },
    /// Check the persisted state against the engine invariants.
    Validate,
}

#[derive(Subcommand)]
enum MissionCommand {
    /// Enqueue a mission; it becomes active if nothing else is.
    Add {
        description: String,
        #[arg(long, value_enum, default_value_t = SourceArg::User)]
        source: SourceArg,
        #[arg(long, default_value_t = 0.5)]
        priority: f64,
    },
    /// Lower the priority of idle missions and drop exhausted ones.
    Decay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    User,
    Ai,
}

impl From<SourceArg> for MissionSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::User => MissionSource::User,
            SourceArg::Ai => MissionSource::Ai,
        }
    }
}

fn main() {
    deliberation::logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.state_dir.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Status => cmd_status(root),
        Command::Mission { command } => cmd_mission(root, command),
        Command::Validate => cmd_validate(root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let report = init_state_dir(root, &InitOptions { force })?;
    println!(
        "init: root={} config={} state={}",
        root.display(),
        if report.wrote_config { "written" } else { "kept" },
        if report.wrote_state { "written" } else { "kept" }
    );
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path) -> Result<i32> {
    let report = status_from_root(root)?;
    print!("{report}");
    Ok(exit_codes::OK)
}

fn cmd_mission(root: &Path, command: MissionCommand) -> Result<i32> {
    let now = Utc::now();
    match command {
        MissionCommand::Add {
            description,
            source,
            priority,
        } => {
            let added = add_mission(root, &description, source.into(), priority, now)?;
            println!("mission: {:?}", added.outcome);
            if let Some(id) = added.promoted {
                println!("mission: promoted {id}");
            }
        }
        MissionCommand::Decay => {
            let report = decay_missions(root, now)?;
            println!(
                "mission: decayed={} dropped={}",
                report.decayed.len(),
                report.dropped.len()
            );
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let outcome = validate_state_dir(root, Utc::now())?;
    if outcome.is_valid() {
        println!("validate: ok cycles={}", outcome.cycle_count);
        return Ok(exit_codes::OK);
    }
    eprintln!("invariant violations:\n- {}", outcome.violations.join("\n- "));
    Ok(exit_codes::VIOLATIONS)
}
