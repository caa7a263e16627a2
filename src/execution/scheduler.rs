//! Process Scheduling
//!
//! All parallelism is delegated to OS processes; this module only decides
//! when to start them and collects their exit status.
//!
//! - Serial: each process is awaited before the next starts; the first
//!   failure aborts the run.
//! - Batch: each process occupies `np` of `maxproc` slots. A launch is
//!   admitted only when `in_use + np <= maxproc`; finished processes are
//!   found by polling. Failures are collected and raised together once every
//!   sibling has finished.
//!
//! A process that never exits holds its slots forever; there is no timeout.

use std::path::PathBuf;
use std::process::Child;
use std::thread;
use std::time::Duration;

use log::{debug, error, info};

use crate::error::{ProcessFailure, Result, WorkflowError};
use crate::execution::launch::Launch;

/// Exit status of a finished process: `Some(code)`, or `None` when killed
/// by a signal.
pub type ExitStatus = Option<i32>;

/// A started process the scheduler can poll.
pub trait RunningProcess {
    /// Non-blocking status check. `Ok(None)` while still running.
    fn try_wait(&mut self) -> Result<Option<ExitStatus>>;

    /// Blocks until the process exits.
    fn wait(&mut self) -> Result<ExitStatus>;
}

impl RunningProcess for Child {
    fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Child::try_wait(self)
            .map(|status| status.map(|s| s.code()))
            .map_err(|e| WorkflowError::io(".", e))
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        Child::wait(self)
            .map(|s| s.code())
            .map_err(|e| WorkflowError::io(".", e))
    }
}

fn succeeded(status: ExitStatus) -> bool {
    status == Some(0)
}

fn failure(launch: &Launch, status: ExitStatus) -> ProcessFailure {
    ProcessFailure {
        label: launch.label.clone(),
        case_dir: launch.case_dir.clone(),
        exit_code: status,
    }
}

/// Runs launches one after another, stopping at the first failure.
pub fn run_serial<P, F>(launches: &[Launch], mut spawn: F) -> Result<usize>
where
    P: RunningProcess,
    F: FnMut(&Launch) -> Result<P>,
{
    for launch in launches {
        info!("Running {}", launch);
        let status = spawn(launch)?.wait()?;
        if !succeeded(status) {
            error!("{} failed with exit code {:?}", launch.label, status);
            return Err(WorkflowError::SubprocessFailure(vec![failure(launch, status)]));
        }
    }
    Ok(launches.len())
}

/// How batch launches are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Admit while `in_use + np <= maxproc`
    Budget { maxproc: usize },
    /// Admit everything (MPI enforces its own limits)
    Unbounded,
}

/// Outcome of a single admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Launched,
    Deferred,
}

struct Running<P> {
    label: String,
    case_dir: Option<PathBuf>,
    np: usize,
    process: P,
}

/// Bounded-slot scheduler for batch launches.
pub struct BatchScheduler<P: RunningProcess> {
    policy: AdmissionPolicy,
    in_use: usize,
    running: Vec<Running<P>>,
    failures: Vec<ProcessFailure>,
    poll_interval: Duration,
    launched: usize,
}

impl<P: RunningProcess> BatchScheduler<P> {
    pub fn new(policy: AdmissionPolicy, poll_interval: Duration) -> Self {
        Self {
            policy,
            in_use: 0,
            running: Vec::new(),
            failures: Vec::new(),
            poll_interval,
            launched: 0,
        }
    }

    /// Slots currently held by running processes.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Number of processes still running.
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// True if a launch needing `np` slots may start now. An idle scheduler
    /// always admits, so an oversized request cannot stall the batch.
    pub fn can_admit(&self, np: usize) -> bool {
        match self.policy {
            AdmissionPolicy::Unbounded => true,
            AdmissionPolicy::Budget { maxproc } => self.running.is_empty() || self.in_use + np <= maxproc,
        }
    }

    /// Starts the launch if its slots are free.
    pub fn try_admit<F>(&mut self, launch: &Launch, spawn: F) -> Result<Admission>
    where
        F: FnOnce(&Launch) -> Result<P>,
    {
        if !self.can_admit(launch.np) {
            return Ok(Admission::Deferred);
        }
        let process = spawn(launch)?;
        self.in_use += launch.np;
        self.launched += 1;
        debug!(
            "Admitted {} ({} slot(s), {} in use)",
            launch.label, launch.np, self.in_use
        );
        self.running.push(Running {
            label: launch.label.clone(),
            case_dir: launch.case_dir.clone(),
            np: launch.np,
            process,
        });
        Ok(Admission::Launched)
    }

    /// Polls every running process once and releases finished ones.
    /// Returns how many finished.
    pub fn reap(&mut self) -> Result<usize> {
        let mut finished = 0;
        let mut index = 0;
        while index < self.running.len() {
            match self.running[index].process.try_wait()? {
                Some(status) => {
                    let done = self.running.swap_remove(index);
                    self.release(done, status);
                    finished += 1;
                }
                None => index += 1,
            }
        }
        Ok(finished)
    }

    fn release(&mut self, done: Running<P>, status: ExitStatus) {
        self.in_use = self.in_use.saturating_sub(done.np);
        if succeeded(status) {
            debug!("{} finished ({} in use)", done.label, self.in_use);
        } else {
            error!("{} failed with exit code {:?}", done.label, status);
            self.failures.push(ProcessFailure {
                label: done.label,
                case_dir: done.case_dir,
                exit_code: status,
            });
        }
    }

    /// Starts the launch, polling until slots free up.
    pub fn admit<F>(&mut self, launch: &Launch, mut spawn: F) -> Result<()>
    where
        F: FnMut(&Launch) -> Result<P>,
    {
        loop {
            if self.try_admit(launch, &mut spawn)? == Admission::Launched {
                return Ok(());
            }
            if self.reap()? == 0 {
                thread::sleep(self.poll_interval);
            }
        }
    }

    /// Waits for every running process, then raises all collected failures
    /// as one error. Returns the number of launches on success.
    pub fn wait_all(mut self) -> Result<usize> {
        for mut done in std::mem::take(&mut self.running) {
            let status = done.process.wait()?;
            self.release(done, status);
        }
        if self.failures.is_empty() {
            Ok(self.launched)
        } else {
            Err(WorkflowError::SubprocessFailure(self.failures))
        }
    }
}

/// Runs all launches under the batch policy.
pub fn run_batch<P, F>(
    launches: &[Launch],
    policy: AdmissionPolicy,
    poll_interval: Duration,
    mut spawn: F,
) -> Result<usize>
where
    P: RunningProcess,
    F: FnMut(&Launch) -> Result<P>,
{
    let mut scheduler = BatchScheduler::new(policy, poll_interval);
    for launch in launches {
        info!("Queueing {}", launch);
        scheduler.admit(launch, &mut spawn)?;
    }
    scheduler.wait_all()
}
