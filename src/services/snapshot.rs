//! 指标快照：供 Zabbix 等外部采集程序轮询读取
//!
//! 每行是以制表符分隔的 `名称 值`，`#` 开头的是注释。写入时先写同目录下的
//! 临时文件再原子重命名，读者永远看不到写了一半的文件。

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::error::{MonitorError, Result};
use crate::metrics;
use crate::models::{ServerRecord, TerminationRecord, WorkerGroup, NATIVE_GROUP};

/// 快照文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    /// 制表符分隔的键值对
    #[default]
    Text,
    /// Prometheus textfile collector 格式
    Prometheus,
}

/// 一个周期的最终结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// 状态页获取或解析失败时为 None
    pub server: Option<ServerRecord>,
    pub process_table_available: bool,
    pub workers_hanging: usize,
    pub workers_killed_active: usize,
    pub workers_killed_idle: usize,
    /// native 组在前
    pub groups: Vec<WorkerGroup>,
}

impl Snapshot {
    /// 状态页不可达：只输出内部指标
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn status_ok(&self) -> bool {
        self.server.is_some()
    }

    /// 按终止结果统计活跃 / 空闲被杀的数量
    pub fn count_kills(&mut self, terminations: &[TerminationRecord]) {
        for record in terminations.iter().filter(|r| r.outcome.counts_as_killed()) {
            if record.decision.busy {
                self.workers_killed_active += 1;
            } else {
                self.workers_killed_idle += 1;
            }
        }
    }

    /// 内部指标；布尔值 0 表示正常，1 表示异常
    pub fn internal_metrics(&self) -> Vec<(&'static str, String)> {
        let server = self.server.as_ref();
        let flag = |ok: bool| if ok { "0" } else { "1" }.to_string();
        vec![
            ("process-table", flag(self.process_table_available)),
            ("status-response", flag(self.status_ok())),
            (
                "workers-foreign",
                server.and_then(|s| s.foreign_workers).unwrap_or(0).to_string(),
            ),
            ("workers-hanging", self.workers_hanging.to_string()),
            ("workers-killed-active", self.workers_killed_active.to_string()),
            ("workers-killed-idle", self.workers_killed_idle.to_string()),
            (
                "workers-native",
                server.and_then(|s| s.native_workers).unwrap_or(0).to_string(),
            ),
        ]
    }

    pub fn render_text(&self) -> String {
        let mut output = Vec::new();

        if let Some(server) = &self.server {
            output.push("# Global Apache server metrics.".to_string());
            for (name, value) in server.metrics() {
                output.push(format!("{}\t{}", name, value));
            }
            output.push(String::new());
        }

        output.push("# Metrics internal to apache-manager.".to_string());
        for (name, value) in self.internal_metrics() {
            output.push(format!("{}\t{}", name, value));
        }

        for group in &self.groups {
            output.push(String::new());
            if group.name == NATIVE_GROUP {
                output.push("# Memory usage of native Apache worker processes.".to_string());
            } else {
                output.push(format!("# Memory usage of '{}' worker processes.", group.name));
            }
            let stats = group.memory_stats();
            output.push(format!("memory-usage\t{}\tcount\t{}", group.name, stats.count));
            output.push(format!("memory-usage\t{}\tmin\t{}", group.name, stats.min));
            output.push(format!("memory-usage\t{}\tmax\t{}", group.name, stats.max));
            output.push(format!("memory-usage\t{}\taverage\t{}", group.name, stats.average));
            output.push(format!("memory-usage\t{}\tmedian\t{}", group.name, stats.median));
            for member in &group.members {
                output.push(format!(
                    "memory-usage\t{}\t{}\t{}",
                    group.name, member.pid, member.memory_bytes
                ));
            }
            for member in &group.members {
                output.push(format!(
                    "cpu-time\t{}\t{}\t{:.2}",
                    group.name, member.pid, member.cpu_seconds
                ));
            }
        }

        output.join("\n") + "\n"
    }
}

pub struct SnapshotWriter {
    path: PathBuf,
    format: SnapshotFormat,
}

impl SnapshotWriter {
    /// `-` 表示输出到标准输出
    pub fn new(path: impl Into<PathBuf>, format: SnapshotFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_stdout(&self) -> bool {
        self.path.as_os_str() == "-"
    }

    pub fn render(&self, snapshot: &Snapshot) -> Result<String> {
        match self.format {
            SnapshotFormat::Text => Ok(snapshot.render_text()),
            SnapshotFormat::Prometheus => metrics::render_prometheus(snapshot),
        }
    }

    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let content = self.render(snapshot)?;

        if self.is_stdout() {
            log::debug!("Reporting metrics on standard output ..");
            print!("{}", content);
            return io::stdout().flush().map_err(|e| self.error(e));
        }

        log::debug!("Storing metrics in {} ..", self.path.display());
        write_atomically(&self.path, |file| file.write_all(content.as_bytes()))
            .map_err(|e| self.error(e))
    }

    fn error(&self, source: io::Error) -> MonitorError {
        MonitorError::SnapshotWrite {
            path: self.path.clone(),
            source,
        }
    }
}

/// 在目标目录创建临时文件，写完并落盘后重命名为目标文件
///
/// `fill` 失败时临时文件被删除，目标文件保持不变。
fn write_atomically<F>(path: &Path, fill: F) -> io::Result<()>
where
    F: FnOnce(&mut fs::File) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    fill(temp.as_file_mut())?;
    temp.as_file_mut().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
