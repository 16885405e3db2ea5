use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use seg_data::{BratsMidAxialBinary, SegmentationDataset, DEFAULT_BASE_PATH};
use seg_runner::{FailurePolicy, SweepConfig, SweepReport, TaskStatus};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "segsweep",
    version,
    about = "Run segmentation experiment sweeps over (method, seed) grids"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every task of the sweep on a bounded worker pool.
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        max_processes: Option<usize>,
        #[arg(long = "method")]
        methods: Vec<String>,
        #[arg(long = "seed")]
        seeds: Vec<i64>,
        /// Stop dispatching new tasks after the first failure.
        #[arg(long)]
        abort_on_failure: bool,
        /// Exit non-zero when any task failed.
        #[arg(long)]
        fail_on_error: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show the resolved sweep without running it.
    Plan {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Write the default sweep config.
    Init {
        #[arg(long, default_value = "sweep.yaml")]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Load one dataset sample and report its shape and statistics.
    InspectData {
        #[arg(long, default_value = DEFAULT_BASE_PATH)]
        base_path: PathBuf,
        #[arg(long, default_value_t = 0)]
        index: usize,
        #[arg(long, default_value_t = 128)]
        height: usize,
        #[arg(long, default_value_t = 128)]
        width: usize,
        #[arg(long)]
        no_normalize: bool,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            config,
            max_processes,
            methods,
            seeds,
            abort_on_failure,
            fail_on_error,
            json,
        } => {
            let mut sweep = load_config(config.as_deref())?;
            if let Some(n) = max_processes {
                sweep.max_processes = n;
            }
            if !methods.is_empty() {
                sweep.methods = methods;
            }
            if !seeds.is_empty() {
                sweep.seeds = seeds;
            }
            if abort_on_failure {
                sweep.failure_policy = FailurePolicy::AbortBatch;
            }

            let report = seg_runner::run_sweep(&sweep)?;
            let failed = report.failed().count();
            if json {
                if fail_on_error && failed > 0 {
                    emit_json(&json_error(
                        "tasks_failed",
                        format!("{} task(s) failed", failed),
                        report_to_json(&report),
                    ));
                    std::process::exit(1);
                }
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "report": report_to_json(&report),
                })));
            }
            print_report(&report);
            if fail_on_error && failed > 0 {
                return Err(anyhow!("{} task(s) failed", failed));
            }
        }
        Commands::Plan { config, json } => {
            let sweep = load_config(config.as_deref())?;
            sweep.validate()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plan",
                    "plan": plan_to_json(&sweep),
                })));
            }
            print_plan(&sweep)?;
        }
        Commands::Init { path, force } => {
            if path.exists() && !force {
                return Err(anyhow!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ));
            }
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    seg_runner::ensure_dir(parent)?;
                }
            }
            std::fs::write(&path, SweepConfig::default().to_yaml()?)?;
            println!("wrote: {}", path.display());
            println!("next: segsweep plan --config {}", path.display());
        }
        Commands::InspectData {
            base_path,
            index,
            height,
            width,
            no_normalize,
            json,
        } => {
            let dataset = BratsMidAxialBinary::new(&base_path, (height, width), !no_normalize)?;
            let sample = dataset.get(index)?;
            let (min, max, sum) = sample.image.iter().fold(
                (f32::INFINITY, f32::NEG_INFINITY, 0f64),
                |(lo, hi, s), v| (lo.min(*v), hi.max(*v), s + *v as f64),
            );
            let mean = sum / sample.image.len().max(1) as f64;
            let tumor_pixels = sample.label.iter().filter(|v| **v > 0).count();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "inspect-data",
                    "cases": dataset.len(),
                    "index": index,
                    "case_id": sample.case_id,
                    "image_shape": sample.image.shape(),
                    "label_shape": sample.label.shape(),
                    "image_min": min,
                    "image_max": max,
                    "image_mean": mean,
                    "tumor_pixels": tumor_pixels,
                    "channels": dataset.num_image_channels(),
                    "classes": dataset.num_classes(),
                })));
            }
            println!("cases: {}", dataset.len());
            println!("case_id: {}", sample.case_id);
            println!("image_shape: {:?}", sample.image.shape());
            println!("label_shape: {:?}", sample.label.shape());
            println!("image_range: [{:.4}, {:.4}]", min, max);
            println!("image_mean: {:.4}", mean);
            println!("tumor_pixels: {}", tumor_pixels);
        }
    }
    Ok(None)
}

fn load_config(path: Option<&Path>) -> Result<SweepConfig> {
    match path {
        Some(p) => SweepConfig::load(p),
        None => Ok(SweepConfig::default()),
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Plan { json, .. }
        | Commands::InspectData { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}

fn status_to_json(status: &TaskStatus) -> Value {
    match status {
        TaskStatus::Failed(failure) => json!({
            "status": status.as_str(),
            "stage": failure.stage.name(),
            "stage_index": failure.stage.index(),
            "label": failure.label,
            "exit_code": failure.exit_code,
        }),
        TaskStatus::Errored(message) => json!({
            "status": status.as_str(),
            "message": message,
        }),
        TaskStatus::Done | TaskStatus::Skipped => json!({ "status": status.as_str() }),
    }
}

fn report_to_json(report: &SweepReport) -> Value {
    let tasks: Vec<Value> = report
        .tasks
        .iter()
        .map(|r| {
            json!({
                "method": r.task.method(),
                "seed": r.task.seed(),
                "result": status_to_json(&r.status),
                "elapsed_ms": r.elapsed.as_millis() as u64,
            })
        })
        .collect();
    json!({
        "tasks": tasks,
        "succeeded": report.succeeded().count(),
        "failed": report.failed().count(),
        "skipped": report.skipped().count(),
        "elapsed_ms": report.elapsed.as_millis() as u64,
    })
}

fn plan_to_json(sweep: &SweepConfig) -> Value {
    let tasks: Vec<Value> = sweep
        .tasks()
        .iter()
        .map(|t| {
            json!({
                "method": t.method(),
                "seed": t.seed(),
                "config": sweep.config_path(t).display().to_string(),
                "log": sweep.log_path(t).display().to_string(),
            })
        })
        .collect();
    json!({
        "max_processes": sweep.max_processes,
        "failure_policy": sweep.failure_policy.as_str(),
        "script_dir": sweep.script_dir.display().to_string(),
        "interpreter": sweep.interpreter,
        "stages": seg_runner::Stage::ALL
            .iter()
            .map(|s| json!({ "stage": s.name(), "script": sweep.script_for(*s) }))
            .collect::<Vec<_>>(),
        "tasks": tasks,
    })
}

fn print_plan(sweep: &SweepConfig) -> Result<()> {
    print!("{}", sweep.to_yaml()?);
    let tasks = sweep.tasks();
    println!("tasks: {}", tasks.len());
    for task in &tasks {
        println!(
            "  {}  config={}  log={}",
            task,
            sweep.config_path(task).display(),
            sweep.log_path(task).display()
        );
    }
    Ok(())
}

fn print_report(report: &SweepReport) {
    for r in &report.tasks {
        match &r.status {
            TaskStatus::Done => println!("{}: done ({:.1}s)", r.task, r.elapsed.as_secs_f64()),
            TaskStatus::Failed(failure) => println!("{}: {}", r.task, failure),
            TaskStatus::Errored(message) => println!("{}: errored: {}", r.task, message),
            TaskStatus::Skipped => println!("{}: skipped", r.task),
        }
    }
    println!(
        "succeeded: {}  failed: {}  skipped: {}  elapsed: {:.1}s",
        report.succeeded().count(),
        report.failed().count(),
        report.skipped().count(),
        report.elapsed.as_secs_f64()
    );
}
