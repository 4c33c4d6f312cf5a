use serde::Serialize;

/// 进程组中单个进程的资源占用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub pid: u32,
    /// 常驻内存（字节）
    pub memory_bytes: u64,
    /// 累计 CPU 时间（秒）
    pub cpu_seconds: f64,
}

/// 一个 worker 组（native 或某个独立进程组）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerGroup {
    pub name: String,
    pub members: Vec<GroupMember>,
}

impl WorkerGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// 按 PID 去重加入
    pub fn add(&mut self, member: GroupMember) {
        if !self.members.iter().any(|m| m.pid == member.pid) {
            self.members.push(member);
        }
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats::from_values(self.members.iter().map(|m| m.memory_bytes).collect())
    }
}

/// 内存统计
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct MemoryStats {
    pub count: usize,
    pub min: u64,
    pub max: u64,
    pub average: f64,
    pub median: f64,
}

impl MemoryStats {
    /// 创建一个空的统计数据
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_values(mut values: Vec<u64>) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        values.sort_unstable();
        let count = values.len();
        let total: u64 = values.iter().sum();
        let median = if count % 2 == 1 {
            values[count / 2] as f64
        } else {
            (values[count / 2 - 1] as f64 + values[count / 2] as f64) / 2.0
        };
        Self {
            count,
            min: values[0],
            max: values[count - 1],
            average: total as f64 / count as f64,
            median,
        }
    }

    /// 判断是否有有效数据
    pub fn is_valid(&self) -> bool {
        self.count > 0
    }
}
