use serde::Serialize;
use std::collections::BTreeMap;

/// 服务器级别的全局指标
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerRecord {
    /// 运行时长（秒）
    pub uptime: Option<u64>,
    pub total_accesses: Option<u64>,
    /// 总流量（字节）
    pub total_traffic: Option<u64>,
    pub cpu_load: Option<f64>,
    pub requests_per_second: Option<f64>,
    pub bytes_per_second: Option<f64>,
    pub bytes_per_request: Option<f64>,
    pub busy_workers: Option<u64>,
    pub idle_workers: Option<u64>,
    /// 记分板各状态计数（键为状态字符）
    pub scoreboard: BTreeMap<char, u64>,
    /// 关联进程表之后才能确定的 worker 数量
    pub native_workers: Option<usize>,
    pub foreign_workers: Option<usize>,
}

impl ServerRecord {
    /// 返回带有 native / foreign 计数的新记录
    pub fn with_worker_counts(&self, native: usize, foreign: usize) -> Self {
        Self {
            native_workers: Some(native),
            foreign_workers: Some(foreign),
            ..self.clone()
        }
    }

    /// 合并两份报告：自身已有的字段优先
    pub fn merge(&self, other: &ServerRecord) -> Self {
        Self {
            uptime: self.uptime.or(other.uptime),
            total_accesses: self.total_accesses.or(other.total_accesses),
            total_traffic: self.total_traffic.or(other.total_traffic),
            cpu_load: self.cpu_load.or(other.cpu_load),
            requests_per_second: self.requests_per_second.or(other.requests_per_second),
            bytes_per_second: self.bytes_per_second.or(other.bytes_per_second),
            bytes_per_request: self.bytes_per_request.or(other.bytes_per_request),
            busy_workers: self.busy_workers.or(other.busy_workers),
            idle_workers: self.idle_workers.or(other.idle_workers),
            scoreboard: if self.scoreboard.is_empty() {
                other.scoreboard.clone()
            } else {
                self.scoreboard.clone()
            },
            native_workers: self.native_workers.or(other.native_workers),
            foreign_workers: self.foreign_workers.or(other.foreign_workers),
        }
    }

    /// 快照中的服务器指标，按名称排序，缺失的字段输出 0
    pub fn metrics(&self) -> Vec<(&'static str, String)> {
        let int = |v: Option<u64>| v.unwrap_or(0).to_string();
        let float = |v: Option<f64>| v.unwrap_or(0.0).to_string();
        vec![
            ("busy-workers", int(self.busy_workers)),
            ("bytes-per-request", float(self.bytes_per_request)),
            ("bytes-per-second", float(self.bytes_per_second)),
            ("cpu-load", float(self.cpu_load)),
            ("idle-workers", int(self.idle_workers)),
            ("requests-per-second", float(self.requests_per_second)),
            ("total-accesses", int(self.total_accesses)),
            ("total-traffic", int(self.total_traffic)),
            ("uptime", int(self.uptime)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_worker_counts_keeps_original() {
        let record = ServerRecord {
            uptime: Some(10),
            ..Default::default()
        };
        let counted = record.with_worker_counts(4, 2);
        assert_eq!(counted.native_workers, Some(4));
        assert_eq!(counted.foreign_workers, Some(2));
        assert_eq!(counted.uptime, Some(10));
        assert_eq!(record.native_workers, None);
    }

    #[test]
    fn test_merge_prefers_self() {
        let text = ServerRecord {
            uptime: Some(100),
            busy_workers: None,
            ..Default::default()
        };
        let html = ServerRecord {
            uptime: Some(1),
            busy_workers: Some(3),
            ..Default::default()
        };
        let merged = text.merge(&html);
        assert_eq!(merged.uptime, Some(100));
        assert_eq!(merged.busy_workers, Some(3));
    }

    #[test]
    fn test_metrics_are_sorted() {
        let names: Vec<_> = ServerRecord::default().metrics().into_iter().map(|(n, _)| n).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
