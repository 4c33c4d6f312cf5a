use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::MonitorError;
use crate::models::{KillDecision, TerminationOutcome, TerminationRecord};
use crate::services::process_table::ProcessTable;

/// 发送信号
pub trait Signaller {
    fn send(&self, pid: u32, signal: Signal) -> Result<(), Errno>;
}

/// 通过 kill(2) 发送信号
#[derive(Debug, Default)]
pub struct NixSignaller;

impl Signaller for NixSignaller {
    fn send(&self, pid: u32, signal: Signal) -> Result<(), Errno> {
        let raw = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
        signal::kill(Pid::from_raw(raw), signal)
    }
}

pub struct WorkerTerminator<'a> {
    table: &'a dyn ProcessTable,
    signaller: &'a dyn Signaller,
    master_pid: u32,
    signal: Signal,
    dry_run: bool,
    max_depth: usize,
}

impl<'a> WorkerTerminator<'a> {
    pub fn new(
        table: &'a dyn ProcessTable,
        signaller: &'a dyn Signaller,
        master_pid: u32,
        signal: Signal,
        dry_run: bool,
        max_depth: usize,
    ) -> Self {
        Self {
            table,
            signaller,
            master_pid,
            signal,
            dry_run,
            max_depth,
        }
    }

    pub fn terminate(&self, decisions: &[KillDecision]) -> Vec<TerminationRecord> {
        decisions
            .iter()
            .map(|decision| {
                let outcome = self.terminate_one(decision);
                log_outcome(decision, &outcome);
                TerminationRecord {
                    decision: decision.clone(),
                    outcome,
                }
            })
            .collect()
    }

    fn terminate_one(&self, decision: &KillDecision) -> TerminationOutcome {
        if let Err(e) = self.verify(decision) {
            return match e {
                Verification::Gone => TerminationOutcome::AlreadyGone,
                Verification::Mismatch(err) => {
                    log::warn!("Safety abort: {}", err);
                    TerminationOutcome::AncestryMismatch
                }
            };
        }

        if self.dry_run {
            return TerminationOutcome::DryRun;
        }

        match self.signaller.send(decision.pid, self.signal) {
            Ok(()) => TerminationOutcome::Terminated,
            Err(Errno::ESRCH) => TerminationOutcome::AlreadyGone,
            Err(Errno::EPERM) => TerminationOutcome::PermissionDenied,
            Err(errno) => TerminationOutcome::Failed(errno.desc().to_string()),
        }
    }

    /// 重新读取进程表，确认 PID 仍然属于主进程树且没有被复用
    fn verify(&self, decision: &KillDecision) -> Result<(), Verification> {
        let race = |message: String| {
            Verification::Mismatch(MonitorError::TerminationRace {
                pid: decision.pid,
                message,
            })
        };

        if decision.pid == self.master_pid {
            return Err(race("refusing to signal the master process".into()));
        }

        let snapshot = self
            .table
            .snapshot()
            .map_err(|e| race(format!("cannot re-read process table: {}", e)))?;

        let process = snapshot.get(decision.pid).ok_or(Verification::Gone)?;
        if process.start_time != decision.start_time {
            return Err(race(format!(
                "PID was reused (start time {} != {})",
                process.start_time, decision.start_time
            )));
        }
        if !snapshot.descends_from(decision.pid, self.master_pid, self.max_depth) {
            return Err(race(format!(
                "PID no longer descends from master {}",
                self.master_pid
            )));
        }
        Ok(())
    }
}

enum Verification {
    Gone,
    Mismatch(MonitorError),
}

fn log_outcome(decision: &KillDecision, outcome: &TerminationOutcome) {
    let reasons = decision
        .violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let request = decision.request.as_deref().unwrap_or("last request unknown");
    match outcome {
        TerminationOutcome::Terminated => log::info!(
            "Killed {} worker {} ({}) [{}]",
            if decision.busy { "active" } else { "idle" },
            decision.pid,
            reasons,
            request
        ),
        TerminationOutcome::DryRun => log::info!(
            "Would kill worker {} ({}) [{}]",
            decision.pid,
            reasons,
            request
        ),
        TerminationOutcome::AlreadyGone => {
            log::info!("Worker {} exited before it could be killed", decision.pid)
        }
        other => log::warn!("Failed to kill worker {}: {}", decision.pid, other),
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// 记录收到的信号，可预设错误
    #[derive(Default)]
    pub struct RecordingSignaller {
        pub sent: RefCell<Vec<(u32, Signal)>>,
        pub errors: HashMap<u32, Errno>,
    }

    impl Signaller for RecordingSignaller {
        fn send(&self, pid: u32, signal: Signal) -> Result<(), Errno> {
            self.sent.borrow_mut().push((pid, signal));
            match self.errors.get(&pid) {
                Some(errno) => Err(*errno),
                None => Ok(()),
            }
        }
    }
}
