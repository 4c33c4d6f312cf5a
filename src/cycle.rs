//! 一个完整的监控周期：获取 → 解析 → 关联 → 评估 → 终止 → 快照

use crate::config::Settings;
use crate::error::{MonitorError, Result};
use crate::models::{KillDecision, TerminationRecord};
use crate::services::correlator::{Correlation, Correlator, MAX_ANCESTRY_DEPTH};
use crate::services::evaluator::{count_hanging, evaluate};
use crate::services::fetcher::StatusFetcher;
use crate::services::process_table::ProcessTable;
use crate::services::snapshot::Snapshot;
use crate::services::status_parser::{parse_status_report, ReportFormat};
use crate::services::terminator::{Signaller, WorkerTerminator};

/// 进程退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Completed,
    /// 进程表不可用，或有终止失败
    Degraded,
    Failed,
}

impl CycleStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Failed => 1,
            Self::Degraded => 3,
        }
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub snapshot: Snapshot,
    /// 状态页获取或解析失败时为 None
    pub correlation: Option<Correlation>,
    pub decisions: Vec<KillDecision>,
    pub terminations: Vec<TerminationRecord>,
    pub error: Option<MonitorError>,
}

impl CycleReport {
    pub fn failed(error: MonitorError) -> Self {
        Self {
            snapshot: Snapshot::unreachable(),
            correlation: None,
            decisions: Vec::new(),
            terminations: Vec::new(),
            error: Some(error),
        }
    }

    pub fn status(&self) -> CycleStatus {
        if self.error.is_some() {
            return CycleStatus::Failed;
        }
        let kill_failed = self.terminations.iter().any(|t| t.outcome.is_degraded());
        if !self.snapshot.process_table_available || kill_failed {
            CycleStatus::Degraded
        } else {
            CycleStatus::Completed
        }
    }
}

/// 执行周期所需的协作者
pub struct Monitor<'a> {
    settings: &'a Settings,
    table: &'a dyn ProcessTable,
    signaller: &'a dyn Signaller,
}

impl<'a> Monitor<'a> {
    pub fn new(
        settings: &'a Settings,
        table: &'a dyn ProcessTable,
        signaller: &'a dyn Signaller,
    ) -> Self {
        Self {
            settings,
            table,
            signaller,
        }
    }

    pub async fn run(&self, fetcher: &StatusFetcher, kill: bool) -> CycleReport {
        let pages = async {
            let text = fetcher.fetch(ReportFormat::PlainText).await?;
            let html = fetcher.fetch(ReportFormat::Html).await?;
            Ok::<_, MonitorError>((text, html))
        };
        match pages.await {
            Ok((text, html)) => self.process(&text, &html, kill),
            Err(e) => {
                log::error!("{}", e);
                CycleReport::failed(e)
            }
        }
    }

    /// 处理已经获取到的状态页
    pub fn process(&self, text: &str, html: &str, kill: bool) -> CycleReport {
        match self.try_process(text, html, kill) {
            Ok(report) => report,
            Err(e) => {
                log::error!("{}", e);
                CycleReport::failed(e)
            }
        }
    }

    fn try_process(&self, text: &str, html: &str, kill: bool) -> Result<CycleReport> {
        let text_report = parse_status_report(text, ReportFormat::PlainText)?;
        let html_report = parse_status_report(html, ReportFormat::Html)?;
        if text_report.partial || html_report.partial {
            log::warn!("Apache status page was truncated, using the complete part only");
        }
        let server = text_report.server.merge(&html_report.server);
        let workers = html_report.workers;

        let snapshot = match self.table.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("{}", MonitorError::from(e));
                None
            }
        };

        let master_pid = match self.settings.master.resolve(snapshot.as_ref()) {
            Ok(pid) => {
                log::debug!("Apache master process is PID {}", pid);
                Some(pid)
            }
            Err(e) => {
                log::warn!("Cannot identify the Apache master process: {}", e);
                None
            }
        };

        // 没有主进程就无法判断 native，按进程表不可用处理
        let correlator = Correlator::new(
            master_pid.unwrap_or_default(),
            &self.settings.group_pattern,
            MAX_ANCESTRY_DEPTH,
        )?;
        let correlation = match master_pid {
            Some(_) => correlator.correlate(&workers, snapshot.as_ref()),
            None => correlator.correlate(&workers, None),
        };

        let decisions = if kill {
            if correlation.degraded {
                log::warn!("Not killing any workers because correlation is degraded");
            }
            evaluate(&correlation.workers, &self.settings.thresholds)
        } else {
            Vec::new()
        };

        let terminations = match master_pid {
            Some(master_pid) if !decisions.is_empty() => WorkerTerminator::new(
                self.table,
                self.signaller,
                master_pid,
                self.settings.signal,
                self.settings.dry_run,
                MAX_ANCESTRY_DEPTH,
            )
            .terminate(&decisions),
            _ => Vec::new(),
        };
        if kill && terminations.is_empty() {
            log::info!("No Apache workers to kill");
        }

        let mut result = Snapshot {
            server: Some(
                server.with_worker_counts(correlation.native_count(), correlation.foreign_count()),
            ),
            process_table_available: !correlation.degraded,
            workers_hanging: count_hanging(
                &correlation.workers,
                self.settings.hanging_report_threshold.as_secs(),
            ),
            workers_killed_active: 0,
            workers_killed_idle: 0,
            groups: correlation.groups.clone(),
        };
        result.count_kills(&terminations);

        Ok(CycleReport {
            snapshot: result,
            correlation: Some(correlation),
            decisions,
            terminations,
            error: None,
        })
    }
}
