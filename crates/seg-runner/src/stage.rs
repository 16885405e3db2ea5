use crate::config::SweepConfig;
use crate::matrix::Task;
use crate::stream::stream_command;
use crate::{announce, ensure_dir};
use anyhow::{Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// The four pipeline steps, in the only order they ever run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Kmeans,
    Diffusion,
    Baselines,
    Metrics,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Kmeans,
        Stage::Diffusion,
        Stage::Baselines,
        Stage::Metrics,
    ];

    /// 1-based position within a task.
    pub fn index(&self) -> usize {
        match self {
            Stage::Kmeans => 1,
            Stage::Diffusion => 2,
            Stage::Baselines => 3,
            Stage::Metrics => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Kmeans => "kmeans",
            Stage::Diffusion => "diffusion",
            Stage::Baselines => "baselines",
            Stage::Metrics => "metrics",
        }
    }

    pub fn default_script(&self) -> &'static str {
        match self {
            Stage::Kmeans => "generate_kmeans.py",
            Stage::Diffusion => "generate_diffusion.py",
            Stage::Baselines => "generate_baselines.py",
            Stage::Metrics => "run_metrics.py",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of one task. Stages are entered in order and a failed stage is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running(Stage),
    Done,
    Failed(Stage),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub label: String,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} FAILED (exit code {})", self.label, code),
            None => write!(f, "{} FAILED (terminated by signal)", self.label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    Failed(StageFailure),
}

impl TaskOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done)
    }
}

/// A fully resolved external script call for one stage of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub stage: Stage,
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl StageInvocation {
    pub fn new(config: &SweepConfig, task: &Task, stage: Stage, config_path: &Path) -> Self {
        let script = config.script_for(stage);
        let (program, mut args) = match config.interpreter.split_first() {
            Some((program, rest)) => {
                let mut args = rest.to_vec();
                args.push(script.to_string());
                (program.clone(), args)
            }
            None => {
                // Relative program paths are ambiguous once current_dir is set.
                let path = config.script_dir.join(script);
                let path = std::path::absolute(&path).unwrap_or(path);
                (path.to_string_lossy().to_string(), Vec::new())
            }
        };
        args.push("--config".to_string());
        args.push(config_path.to_string_lossy().to_string());
        Self {
            stage,
            label: format!("{}|{}", task, stage),
            program,
            args,
            working_dir: config.script_dir.clone(),
        }
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.current_dir(&self.working_dir);
        cmd
    }
}

/// Runs all stages of `task`, echoing progress and child output to stdout.
pub fn run_task(config: &SweepConfig, task: &Task) -> Result<TaskOutcome> {
    run_task_with(config, task, &mut io::stdout())
}

pub fn run_task_with<C: Write>(
    config: &SweepConfig,
    task: &Task,
    console: &mut C,
) -> Result<TaskOutcome> {
    let config_path = config.config_path(task);
    let log_path = config.log_path(task);
    ensure_dir(&config.log_dir)?;

    announce(console, &format!("STARTING {}", task))?;

    let mut log = File::create(&log_path)
        .with_context(|| format!("failed to create log file {}", log_path.display()))?;
    write!(
        log,
        "Method: {}\nSeed: {}\nConfig: {}\n\n",
        task.method(),
        task.seed(),
        config_path.display()
    )?;

    let mut state = TaskState::Pending;
    for stage in Stage::ALL {
        let invocation = StageInvocation::new(config, task, stage, &config_path);
        transition(task, &mut state, TaskState::Running(stage));
        announce(console, &format!("{} START", invocation.label))?;
        debug!(
            label = %invocation.label,
            program = %invocation.program,
            args = ?invocation.args,
            cwd = %invocation.working_dir.display(),
            "spawning stage"
        );

        let status = stream_command(invocation.command(), &invocation.label, &mut log, console)
            .with_context(|| {
                format!(
                    "{} could not run {} in {}",
                    invocation.label,
                    invocation.program,
                    invocation.working_dir.display()
                )
            })?;

        if !status.success() {
            transition(task, &mut state, TaskState::Failed(stage));
            let failure = StageFailure {
                stage,
                label: invocation.label,
                exit_code: status.code(),
            };
            announce(console, &failure.to_string())?;
            return Ok(TaskOutcome::Failed(failure));
        }
        announce(console, &format!("{} DONE", invocation.label))?;
    }

    transition(task, &mut state, TaskState::Done);
    announce(console, &format!("FINISHED {}", task))?;
    Ok(TaskOutcome::Done)
}

fn transition(task: &Task, state: &mut TaskState, next: TaskState) {
    debug_assert!(!state.is_terminal(), "{} left terminal state {:?}", task, state);
    debug!(task = %task, from = ?*state, to = ?next, "task state");
    *state = next;
}
