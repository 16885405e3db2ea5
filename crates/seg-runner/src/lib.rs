//! Orchestration for (method, seed) segmentation sweeps: every task runs the
//! k-means, diffusion, baseline and metrics scripts in sequence on a bounded
//! pool of worker slots, teeing each script's output into a per-task log.

pub mod config;
pub mod dispatch;
pub mod matrix;
pub mod stage;
pub mod stream;

pub use config::{ConfigError, FailurePolicy, StageScripts, SweepConfig};
pub use dispatch::{run_sweep, Dispatcher, SweepReport, TaskReport, TaskStatus};
pub use matrix::{build_matrix, Task};
pub use stage::{run_task, Stage, StageFailure, StageInvocation, TaskOutcome, TaskState};
pub use stream::stream_command;

use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory {}", path.display()))
}

/// Wall-clock `HH:MM:SS` used on progress lines.
pub fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

pub(crate) fn announce<W: Write>(out: &mut W, message: &str) -> io::Result<()> {
    let line = format!("[{}] {}\n", timestamp(), message);
    out.write_all(line.as_bytes())?;
    out.flush()
}
