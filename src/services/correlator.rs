//! 将状态页中的 worker 与操作系统进程关联，并区分 native / foreign

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;

use crate::error::{MonitorError, Result};
use crate::models::{
    ClassifiedWorker, GroupMember, ProcessDescriptor, ProcessSnapshot, WorkerClass, WorkerGroup,
    WorkerRecord, NATIVE_GROUP,
};

/// mod_wsgi daemon 进程的命令行形如 `(wsgi:group-name)  -k start`
pub const DEFAULT_GROUP_PATTERN: &str = r"\(wsgi:([^)]+)\)";

/// 向上追溯父进程的最大层数，防止损坏的进程表导致死循环
pub const MAX_ANCESTRY_DEPTH: usize = 32;

/// 关联结果
#[derive(Debug, Clone)]
pub struct Correlation {
    pub workers: Vec<ClassifiedWorker>,
    /// native 组在前，其余按名称排序；只包含命名的进程组
    pub groups: Vec<WorkerGroup>,
    /// 不属于主进程树也不属于任何进程组的进程数（去重）
    pub unmanaged: usize,
    /// 进程表不可用，本周期不做任何终止
    pub degraded: bool,
}

impl Correlation {
    /// 去重后的 native worker 数量
    pub fn native_count(&self) -> usize {
        self.group(NATIVE_GROUP).map(|g| g.members.len()).unwrap_or(0)
    }

    /// 其它所有组的进程数，加上 unmanaged 进程和无法解析的槽位
    pub fn foreign_count(&self) -> usize {
        let resolved: usize = self
            .groups
            .iter()
            .filter(|g| g.name != NATIVE_GROUP)
            .map(|g| g.members.len())
            .sum();
        let unresolved = self
            .workers
            .iter()
            .filter(|w| w.class == WorkerClass::Unresolved && !w.record.state.is_open_slot())
            .count();
        resolved + self.unmanaged + unresolved
    }

    pub fn group(&self, name: &str) -> Option<&WorkerGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// 当前存活的独立进程组名称（用于 discovery）
    pub fn foreign_group_names(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter(|g| g.name != NATIVE_GROUP)
            .map(|g| g.name.clone())
            .collect()
    }
}

pub struct Correlator {
    master_pid: u32,
    group_pattern: Regex,
    max_depth: usize,
}

impl Correlator {
    pub fn new(master_pid: u32, group_pattern: &str, max_depth: usize) -> Result<Self> {
        let group_pattern = Regex::new(group_pattern).map_err(|e| {
            MonitorError::config(format!("invalid group pattern '{}': {}", group_pattern, e))
        })?;
        if group_pattern.captures_len() < 2 {
            return Err(MonitorError::config(
                "group pattern needs a capture group for the group name",
            ));
        }
        Ok(Self {
            master_pid,
            group_pattern,
            max_depth,
        })
    }

    /// `snapshot` 为 None 表示进程表不可用
    pub fn correlate(
        &self,
        records: &[WorkerRecord],
        snapshot: Option<&ProcessSnapshot>,
    ) -> Correlation {
        let Some(snapshot) = snapshot else {
            log::warn!("No process table available, treating all workers as unresolved");
            return Correlation {
                workers: records.iter().cloned().map(ClassifiedWorker::unresolved).collect(),
                groups: vec![WorkerGroup::new(NATIVE_GROUP)],
                unmanaged: 0,
                degraded: true,
            };
        };

        let mut native = WorkerGroup::new(NATIVE_GROUP);
        let mut foreign: BTreeMap<String, WorkerGroup> = BTreeMap::new();
        let mut unmanaged = BTreeSet::new();

        let workers: Vec<ClassifiedWorker> = records
            .iter()
            .map(|record| {
                let worker = self.classify(record, snapshot);
                if let Some(process) = &worker.process {
                    match &worker.class {
                        WorkerClass::Native => native.add(member(process)),
                        WorkerClass::Foreign { group } => foreign
                            .entry(group.clone())
                            .or_insert_with(|| WorkerGroup::new(group.clone()))
                            .add(member(process)),
                        WorkerClass::Unmanaged => {
                            unmanaged.insert(process.pid);
                        }
                        WorkerClass::Unresolved => {}
                    }
                }
                worker
            })
            .collect();

        // 独立发现：即使状态页没有引用，也列出所有存活的进程组
        for process in snapshot.iter() {
            if let Some(group) = self.group_of(process) {
                foreign
                    .entry(group.clone())
                    .or_insert_with(|| WorkerGroup::new(group))
                    .add(member(process));
            }
        }

        let mut groups = vec![native];
        groups.extend(foreign.into_values().map(|mut g| {
            g.members.sort_by_key(|m| m.pid);
            g
        }));
        groups[0].members.sort_by_key(|m| m.pid);

        log::debug!(
            "Classified {} workers: {} native processes, {} groups, {} unmanaged",
            workers.len(),
            groups[0].members.len(),
            groups.len() - 1,
            unmanaged.len()
        );

        Correlation {
            workers,
            groups,
            unmanaged: unmanaged.len(),
            degraded: false,
        }
    }

    fn classify(&self, record: &WorkerRecord, snapshot: &ProcessSnapshot) -> ClassifiedWorker {
        let process = match record.pid.and_then(|pid| snapshot.get(pid)) {
            Some(process) => process.clone(),
            None => return ClassifiedWorker::unresolved(record.clone()),
        };

        let class = if let Some(group) = self.group_of(&process) {
            WorkerClass::Foreign { group }
        } else if process.pid != self.master_pid
            && snapshot.descends_from(process.pid, self.master_pid, self.max_depth)
        {
            WorkerClass::Native
        } else {
            log::debug!(
                "PID {} does not descend from master {}, treating as unmanaged",
                process.pid,
                self.master_pid
            );
            WorkerClass::Unmanaged
        };

        ClassifiedWorker {
            record: record.clone(),
            process: Some(process),
            class,
        }
    }

    fn group_of(&self, process: &ProcessDescriptor) -> Option<String> {
        let caps = self.group_pattern.captures(&process.cmdline)?;
        let name = caps.get(1)?.as_str().trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

fn member(process: &ProcessDescriptor) -> GroupMember {
    GroupMember {
        pid: process.pid,
        memory_bytes: process.memory_bytes,
        cpu_seconds: process.cpu_seconds,
    }
}
