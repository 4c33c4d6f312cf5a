use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::error::{MonitorError, ProcessTableError, Result};
use crate::models::{ProcessDescriptor, ProcessSnapshot};

/// 读取操作系统进程表
pub trait ProcessTable {
    fn snapshot(&self) -> std::result::Result<ProcessSnapshot, ProcessTableError>;
}

/// 基于 sysinfo 的进程表
#[derive(Debug, Default)]
pub struct SysinfoProcessTable;

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn snapshot(&self) -> std::result::Result<ProcessSnapshot, ProcessTableError> {
        probe_proc()?;

        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .without_tasks()
                .with_memory()
                .with_cpu()
                .with_cmd(UpdateKind::Always),
        );

        // Linux 上线程也会作为进程条目出现，只保留真正的进程
        let snapshot = ProcessSnapshot::new(sys
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| ProcessDescriptor {
                pid: pid.as_u32(),
                parent_pid: process.parent().map(|p| p.as_u32()),
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
                memory_bytes: process.memory(),
                age_seconds: process.run_time(),
                cpu_seconds: process.accumulated_cpu_time() as f64 / 1000.0,
                start_time: process.start_time(),
            }));

        if snapshot.is_empty() {
            return Err(ProcessTableError::Empty);
        }
        log::debug!("Captured {} processes from the process table", snapshot.len());
        Ok(snapshot)
    }
}

/// sysinfo 遇到权限问题时只会静默返回空表，先自己探测一次
#[cfg(target_os = "linux")]
fn probe_proc() -> std::result::Result<(), ProcessTableError> {
    match fs::read_dir("/proc") {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ProcessTableError::PermissionDenied)
        }
        Err(e) => Err(ProcessTableError::Io { source: e }),
    }
}

#[cfg(not(target_os = "linux"))]
fn probe_proc() -> std::result::Result<(), ProcessTableError> {
    Ok(())
}

/// 如何确定 Apache 主进程
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterIdentity {
    /// 已知的 PID
    Pid(u32),
    /// 主进程写入的 PID 文件
    PidFile(PathBuf),
    /// 按命令行正则匹配，取最上层的进程
    Command(String),
}

impl MasterIdentity {
    pub fn resolve(&self, snapshot: Option<&ProcessSnapshot>) -> Result<u32> {
        match self {
            Self::Pid(pid) => Ok(*pid),
            Self::PidFile(path) => read_pid_file(path),
            Self::Command(pattern) => {
                let snapshot = snapshot.ok_or_else(|| {
                    MonitorError::config("cannot match the master process without a process table")
                })?;
                get_main_process_pid(snapshot, pattern)?.ok_or_else(|| {
                    MonitorError::config(format!("no process matches master pattern '{}'", pattern))
                })
            }
        }
    }
}

fn read_pid_file(path: &Path) -> Result<u32> {
    let contents = fs::read_to_string(path).map_err(|e| {
        MonitorError::config(format!("failed to read PID file {}: {}", path.display(), e))
    })?;
    let pid_str = contents.trim();
    pid_str.parse::<u32>().map_err(|e| {
        MonitorError::config(format!("invalid PID '{}' in {}: {}", pid_str, path.display(), e))
    })
}

/// 获取匹配进程中的主进程 PID
///
/// 策略优先级：
/// 1. PPID = 1 的进程（systemd 直接启动）
/// 2. PPID 不在匹配列表中的进程（父进程，非子进程）
/// 3. 最小 PID（通常是最早创建的主进程）
pub fn get_main_process_pid(snapshot: &ProcessSnapshot, pattern: &str) -> Result<Option<u32>> {
    let regex = Regex::new(pattern)
        .map_err(|e| MonitorError::config(format!("invalid master pattern '{}': {}", pattern, e)))?;

    let mut matching: Vec<&ProcessDescriptor> = snapshot
        .iter()
        .filter(|p| regex.is_match(&p.cmdline))
        .collect();
    matching.sort_by_key(|p| p.pid);

    if matching.len() <= 1 {
        return Ok(matching.first().map(|p| p.pid));
    }

    // 策略1: 找 PPID = 1 的进程
    if let Some(process) = matching.iter().find(|p| p.parent_pid == Some(1)) {
        log::debug!("Found master process (PPID=1): PID {}", process.pid);
        return Ok(Some(process.pid));
    }

    // 策略2: 父进程不在匹配列表中的进程
    let matching_pids: Vec<u32> = matching.iter().map(|p| p.pid).collect();
    for process in &matching {
        if let Some(parent) = process.parent_pid {
            if !matching_pids.contains(&parent) {
                log::debug!(
                    "Found master process (parent not in group): PID {} (PPID={})",
                    process.pid,
                    parent
                );
                return Ok(Some(process.pid));
            }
        }
    }

    // 策略3: 最小 PID
    log::debug!(
        "Found master process (min PID fallback): PID {} from {} matches",
        matching_pids[0],
        matching_pids.len()
    );
    Ok(Some(matching_pids[0]))
}
