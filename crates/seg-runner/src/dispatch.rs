use crate::config::{FailurePolicy, SweepConfig};
use crate::ensure_dir;
use crate::matrix::Task;
use crate::stage::{run_task, StageFailure, TaskOutcome};
use anyhow::Result;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Done,
    Failed(StageFailure),
    /// The task could not run at all (spawn or log I/O failure, panic).
    Errored(String),
    /// Never taken from the queue because the batch was aborted.
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Done => "done",
            TaskStatus::Failed(_) => "failed",
            TaskStatus::Errored(_) => "errored",
            TaskStatus::Skipped => "skipped",
        }
    }

    fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed(_) | TaskStatus::Errored(_))
    }
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Position of the task in the matrix.
    pub index: usize,
    pub task: Task,
    pub status: TaskStatus,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub tasks: Vec<TaskReport>,
    pub elapsed: Duration,
}

impl SweepReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Done))
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|r| r.status.is_failure())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Skipped))
    }

    pub fn is_success(&self) -> bool {
        self.tasks
            .iter()
            .all(|r| matches!(r.status, TaskStatus::Done))
    }
}

/// Fixed-size pool of worker slots pulling tasks from a shared queue.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    max_processes: usize,
    failure_policy: FailurePolicy,
}

impl Dispatcher {
    pub fn new(max_processes: usize, failure_policy: FailurePolicy) -> Self {
        Self {
            max_processes: max_processes.max(1),
            failure_policy,
        }
    }

    pub fn from_config(config: &SweepConfig) -> Self {
        Self::new(config.max_processes, config.failure_policy)
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes
    }

    /// Runs `exec` once per task with at most `max_processes` tasks in
    /// flight. Failures are recorded in the report and never propagate to
    /// sibling slots.
    pub fn run<F>(&self, tasks: Vec<Task>, exec: F) -> SweepReport
    where
        F: Fn(&Task) -> Result<TaskOutcome> + Sync,
    {
        let started = Instant::now();
        let total = tasks.len();
        let slots = self.max_processes.min(total);
        let queue: Mutex<VecDeque<(usize, Task)>> =
            Mutex::new(tasks.into_iter().enumerate().collect());
        let aborted = AtomicBool::new(false);
        let reports: Mutex<Vec<TaskReport>> = Mutex::new(Vec::with_capacity(total));

        thread::scope(|s| {
            for slot in 0..slots {
                let queue = &queue;
                let aborted = &aborted;
                let reports = &reports;
                let exec = &exec;
                s.spawn(move || {
                    while let Some((index, task)) = self.take_next(queue, aborted) {
                        let report = execute(slot, index, task, exec);
                        if report.status.is_failure()
                            && self.failure_policy == FailurePolicy::AbortBatch
                        {
                            let _queue = lock(queue);
                            aborted.store(true, Ordering::SeqCst);
                        }
                        lock(reports).push(report);
                    }
                });
            }
        });

        let mut reports = reports
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let leftover = queue.into_inner().unwrap_or_else(PoisonError::into_inner);
        for (index, task) in leftover {
            reports.push(TaskReport {
                index,
                task,
                status: TaskStatus::Skipped,
                elapsed: Duration::ZERO,
            });
        }
        reports.sort_by_key(|r| r.index);
        SweepReport {
            tasks: reports,
            elapsed: started.elapsed(),
        }
    }

    fn take_next(
        &self,
        queue: &Mutex<VecDeque<(usize, Task)>>,
        aborted: &AtomicBool,
    ) -> Option<(usize, Task)> {
        let mut queue = lock(queue);
        if aborted.load(Ordering::SeqCst) {
            return None;
        }
        queue.pop_front()
    }
}

fn execute<F>(slot: usize, index: usize, task: Task, exec: &F) -> TaskReport
where
    F: Fn(&Task) -> Result<TaskOutcome>,
{
    let started = Instant::now();
    let status = match panic::catch_unwind(AssertUnwindSafe(|| exec(&task))) {
        Ok(Ok(TaskOutcome::Done)) => TaskStatus::Done,
        Ok(Ok(TaskOutcome::Failed(failure))) => {
            warn!(slot, task = %task, stage = %failure.stage, exit_code = ?failure.exit_code, "task failed");
            TaskStatus::Failed(failure)
        }
        Ok(Err(err)) => {
            warn!(slot, task = %task, error = %format!("{:#}", err), "task errored");
            TaskStatus::Errored(format!("{:#}", err))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(slot, task = %task, panic = %message, "task panicked");
            TaskStatus::Errored(format!("panicked: {}", message))
        }
    };
    TaskReport {
        index,
        task,
        status,
        elapsed: started.elapsed(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Validates `config`, builds the task matrix and runs every task's stages
/// on the dispatcher.
pub fn run_sweep(config: &SweepConfig) -> Result<SweepReport> {
    config.validate()?;
    let tasks = config.tasks();
    ensure_dir(&config.log_dir)?;
    let dispatcher = Dispatcher::from_config(config);
    info!(
        tasks = tasks.len(),
        max_processes = dispatcher.max_processes(),
        failure_policy = config.failure_policy.as_str(),
        "starting sweep"
    );
    let report = dispatcher.run(tasks, |task| run_task(config, task));
    info!(
        succeeded = report.succeeded().count(),
        failed = report.failed().count(),
        skipped = report.skipped().count(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::build_matrix;
    use crate::stage::Stage;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicUsize;

    fn failure(task: &Task) -> TaskOutcome {
        TaskOutcome::Failed(StageFailure {
            stage: Stage::Baselines,
            label: format!("{}|baselines", task),
            exit_code: Some(1),
        })
    }

    #[test]
    fn never_exceeds_max_processes_and_runs_each_task_once() {
        let tasks = build_matrix(&["a", "b"], &[1, 2, 3, 4, 5]);
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let seen = Mutex::new(Vec::new());
        let dispatcher = Dispatcher::new(3, FailurePolicy::Isolate);
        let report = dispatcher.run(tasks.clone(), |task| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            seen.lock().unwrap().push(task.clone());
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(TaskOutcome::Done)
        });

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(
            peak.load(Ordering::SeqCst) > 1,
            "tasks never overlapped: peak {}",
            peak.load(Ordering::SeqCst)
        );
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        let mut expected = tasks.clone();
        expected.sort();
        assert_eq!(seen, expected);
        assert!(report.is_success());
        let order: Vec<Task> = report.tasks.iter().map(|r| r.task.clone()).collect();
        assert_eq!(order, tasks);
    }

    #[test]
    fn failures_are_isolated_from_siblings() {
        let tasks = build_matrix(&["m"], &[1, 2, 3, 4]);
        let dispatcher = Dispatcher::new(2, FailurePolicy::Isolate);
        let report = dispatcher.run(tasks, |task| match task.seed() {
            2 => Ok(failure(task)),
            3 => Err(anyhow!("log dir vanished")),
            4 => panic!("boom"),
            _ => Ok(TaskOutcome::Done),
        });

        let statuses: Vec<&str> = report.tasks.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(statuses, vec!["done", "failed", "errored", "errored"]);
        assert_eq!(report.succeeded().count(), 1);
        assert_eq!(report.failed().count(), 3);
        assert!(!report.is_success());
        match &report.tasks[1].status {
            TaskStatus::Failed(f) => assert_eq!(f.label, "m|seed2|baselines"),
            other => panic!("unexpected {:?}", other),
        }
        match &report.tasks[3].status {
            TaskStatus::Errored(msg) => assert!(msg.contains("boom"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn abort_batch_stops_taking_new_tasks() {
        let tasks = build_matrix(&["m"], &[1, 2, 3, 4]);
        let calls = AtomicUsize::new(0);
        let dispatcher = Dispatcher::new(1, FailurePolicy::AbortBatch);
        let report = dispatcher.run(tasks, |task| {
            calls.fetch_add(1, Ordering::SeqCst);
            if task.seed() == 2 {
                Ok(failure(task))
            } else {
                Ok(TaskOutcome::Done)
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let statuses: Vec<&str> = report.tasks.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(statuses, vec!["done", "failed", "skipped", "skipped"]);
        assert_eq!(report.skipped().count(), 2);
    }

    #[test]
    fn empty_task_list_does_no_work() {
        let dispatcher = Dispatcher::new(3, FailurePolicy::Isolate);
        let report = dispatcher.run(Vec::new(), |_| panic!("no task to run"));
        assert!(report.tasks.is_empty());
        assert!(report.is_success());
    }

    #[test]
    fn zero_slots_is_clamped_to_one() {
        assert_eq!(Dispatcher::new(0, FailurePolicy::Isolate).max_processes(), 1);
    }

    #[test]
    fn run_sweep_rejects_invalid_config() {
        let config = SweepConfig {
            max_processes: 0,
            ..SweepConfig::default()
        };
        let err = run_sweep(&config).expect_err("invalid");
        assert!(err.to_string().contains("max_processes"), "{}", err);
    }

    #[cfg(unix)]
    #[test]
    fn brain_tumor_grid_runs_three_tasks_concurrently() {
        use crate::config::StageScripts;
        use chrono::Utc;
        use std::fs;

        let root = std::env::temp_dir().join(format!(
            "segsweep_grid_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let script_dir = root.join("scripts");
        let arrivals = root.join("arrivals");
        ensure_dir(&script_dir).expect("scripts");
        ensure_dir(&arrivals).expect("arrivals");

        // Each task's first stage waits until all three tasks have started;
        // a serial dispatcher would time out here.
        fs::write(
            script_dir.join("kmeans.sh"),
            format!(
                "touch '{dir}'/$(basename \"$2\")\n\
                 n=0\n\
                 while [ $(ls '{dir}' | wc -l) -lt 3 ]; do\n\
                   sleep 0.05\n\
                   n=$((n+1))\n\
                   if [ $n -gt 400 ]; then exit 9; fi\n\
                 done\n\
                 echo kmeans ok\n",
                dir = arrivals.display()
            ),
        )
        .expect("kmeans");
        for name in ["diffusion", "baselines", "metrics"] {
            fs::write(script_dir.join(format!("{}.sh", name)), format!("echo {} ok\n", name))
                .expect("script");
        }

        let config = SweepConfig {
            methods: vec!["brain_tumor".to_string()],
            seeds: vec![1, 2, 3],
            max_processes: 3,
            config_dir: root.join("config"),
            log_dir: root.join("logs"),
            script_dir,
            interpreter: vec!["sh".to_string()],
            scripts: StageScripts {
                kmeans: "kmeans.sh".to_string(),
                diffusion: "diffusion.sh".to_string(),
                baselines: "baselines.sh".to_string(),
                metrics: "metrics.sh".to_string(),
            },
            failure_policy: FailurePolicy::Isolate,
        };

        let report = run_sweep(&config).expect("sweep");
        assert_eq!(report.tasks.len(), 3);
        assert!(report.is_success(), "{:?}", report.tasks);
        for seed in 1..=3 {
            let log = root.join("logs").join(format!("brain_tumor_seed{}.log", seed));
            let text = fs::read_to_string(&log).expect("log file");
            assert!(text.starts_with(&format!("Method: brain_tumor\nSeed: {}\n", seed)));
            assert!(text.ends_with("kmeans ok\ndiffusion ok\nbaselines ok\nmetrics ok\n"));
        }
        let _ = fs::remove_dir_all(root);
    }
}
