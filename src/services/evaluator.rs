use std::collections::BTreeMap;

use crate::models::{ClassifiedWorker, KillDecision, ThresholdConfig, Violation};

/// 根据阈值选出需要终止的 native worker
///
/// 只检查已解析到进程的 native worker，所有比较都是严格大于。
/// 没有配置任何阈值时总是返回空列表。同一个 PID 的多个槽位
/// （线程化 MPM）合并为一个决策，结果按 PID 排序。
pub fn evaluate(workers: &[ClassifiedWorker], config: &ThresholdConfig) -> Vec<KillDecision> {
    if config.is_empty() {
        return Vec::new();
    }

    let mut decisions: BTreeMap<u32, KillDecision> = BTreeMap::new();

    for worker in workers.iter().filter(|w| w.is_eligible()) {
        let (Some(pid), Some(process)) = (worker.record.pid, worker.process.as_ref()) else {
            continue;
        };
        let busy = worker.record.is_busy();
        let violations = check(worker, config);
        if violations.is_empty() {
            continue;
        }

        let decision = decisions.entry(pid).or_insert_with(|| KillDecision {
            pid,
            slot: worker.record.slot,
            busy,
            start_time: process.start_time,
            request: worker.record.request.clone(),
            violations: Vec::new(),
        });
        decision.busy |= busy;
        for violation in violations {
            if !decision.violations.iter().any(|v| v.reason() == violation.reason()) {
                decision.violations.push(violation);
            }
        }
    }

    decisions.into_values().collect()
}

fn check(worker: &ClassifiedWorker, config: &ThresholdConfig) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some(process) = worker.process.as_ref() else {
        return violations;
    };
    let busy = worker.record.is_busy();

    if let Some(limit) = config.memory_limit(busy) {
        if process.memory_bytes > limit {
            violations.push(Violation::Memory {
                observed: process.memory_bytes,
                limit,
            });
        }
    }

    if let Some(limit) = config.max_cpu_time {
        // 进程表的累计 CPU 时间优先，状态页的 CPU 列作为后备
        let observed = if process.cpu_seconds > 0.0 {
            process.cpu_seconds
        } else {
            worker.record.cpu_seconds.unwrap_or(0.0)
        };
        if observed > limit.as_secs_f64() {
            violations.push(Violation::CpuTime {
                observed,
                limit: limit.as_secs_f64(),
            });
        }
    }

    if let Some(limit) = config.max_age {
        if process.age_seconds > limit.as_secs() {
            violations.push(Violation::Age {
                observed: process.age_seconds,
                limit: limit.as_secs(),
            });
        }
    }

    if let Some(limit) = config.hanging_threshold {
        if let Some(observed) = worker.record.seconds_since_activity {
            if busy && observed > limit.as_secs() {
                violations.push(Violation::Hanging {
                    observed,
                    limit: limit.as_secs(),
                });
            }
        }
    }

    violations
}

/// 忙碌且超过阈值的 worker 数（只用于报告，不触发终止）
pub fn count_hanging(workers: &[ClassifiedWorker], threshold_secs: u64) -> usize {
    workers
        .iter()
        .filter(|w| w.record.is_busy())
        .filter(|w| w.record.seconds_since_activity.unwrap_or(0) >= threshold_secs)
        .count()
}
