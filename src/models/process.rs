use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::models::WorkerRecord;

/// native worker 所在分组的名称
pub const NATIVE_GROUP: &str = "native";

/// 操作系统进程信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessDescriptor {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    /// 完整命令行
    pub cmdline: String,
    /// 常驻内存（字节）
    pub memory_bytes: u64,
    /// 已运行时长（秒）
    pub age_seconds: u64,
    /// 累计 CPU 时间（秒）
    pub cpu_seconds: f64,
    /// 启动时间（Unix 时间），用于识别 PID 复用
    pub start_time: u64,
}

/// 某一时刻的进程表
#[derive(Debug, Clone, Default)]
pub struct ProcessSnapshot {
    processes: HashMap<u32, ProcessDescriptor>,
}

impl ProcessSnapshot {
    pub fn new(processes: impl IntoIterator<Item = ProcessDescriptor>) -> Self {
        Self {
            processes: processes.into_iter().map(|p| (p.pid, p)).collect(),
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessDescriptor> {
        self.processes.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessDescriptor> {
        self.processes.values()
    }

    /// 沿父进程链向上查找，最多 `max_depth` 步
    ///
    /// `pid` 本身等于 `ancestor` 时返回 false：主进程不是自己的后代。
    pub fn descends_from(&self, pid: u32, ancestor: u32, max_depth: usize) -> bool {
        let mut current = match self.get(pid) {
            Some(process) => process,
            None => return false,
        };
        for _ in 0..max_depth {
            let parent = match current.parent_pid {
                Some(parent) if parent != current.pid => parent,
                _ => return false,
            };
            if parent == ancestor {
                return true;
            }
            current = match self.get(parent) {
                Some(process) => process,
                None => return false,
            };
        }
        log::debug!(
            "Gave up walking ancestry of PID {} after {} levels",
            pid,
            max_depth
        );
        false
    }
}

/// worker 的归属
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WorkerClass {
    /// 主进程派生的 worker，可以被终止
    Native,
    /// 独立管理的进程组（如 mod_wsgi daemon）
    Foreign { group: String },
    /// 进程存在，但既不属于主进程树也不匹配任何进程组
    Unmanaged,
    /// 没有 PID 或 PID 不在进程表中
    Unresolved,
}

impl WorkerClass {
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }
}

impl fmt::Display for WorkerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Foreign { group } => write!(f, "foreign ({})", group),
            Self::Unmanaged => write!(f, "unmanaged"),
            Self::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// 状态表记录 + 对应的操作系统进程
#[derive(Debug, Clone)]
pub struct ClassifiedWorker {
    pub record: WorkerRecord,
    pub process: Option<ProcessDescriptor>,
    pub class: WorkerClass,
}

impl ClassifiedWorker {
    pub fn unresolved(record: WorkerRecord) -> Self {
        Self {
            record,
            process: None,
            class: WorkerClass::Unresolved,
        }
    }

    /// 只有解析到进程的 native worker 才可能被终止
    pub fn is_eligible(&self) -> bool {
        self.class.is_native() && self.process.is_some() && self.record.pid.is_some()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn process(pid: u32, parent: u32, cmdline: &str) -> ProcessDescriptor {
        ProcessDescriptor {
            pid,
            parent_pid: Some(parent),
            cmdline: cmdline.to_string(),
            memory_bytes: 10 * 1024 * 1024,
            age_seconds: 60,
            cpu_seconds: 1.0,
            start_time: 1_700_000_000 + pid as u64,
        }
    }
}
