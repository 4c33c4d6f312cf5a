use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use humansize::{format_size, BINARY};

/// 终止阈值；`None` 表示不检查该维度
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// 所有 worker 的内存上限（字节）
    #[serde(default, deserialize_with = "size_opt")]
    pub max_memory: Option<u64>,
    /// 忙碌 worker 的内存上限，优先于 `max_memory`
    #[serde(default, deserialize_with = "size_opt")]
    pub max_memory_active: Option<u64>,
    /// 空闲 worker 的内存上限，优先于 `max_memory`
    #[serde(default, deserialize_with = "size_opt")]
    pub max_memory_idle: Option<u64>,
    #[serde(default, with = "humantime_serde_opt")]
    pub max_cpu_time: Option<Duration>,
    #[serde(default, with = "humantime_serde_opt")]
    pub max_age: Option<Duration>,
    /// 忙碌状态下无进展的最长时间
    #[serde(default, with = "humantime_serde_opt")]
    pub hanging_threshold: Option<Duration>,
}

impl ThresholdConfig {
    pub fn is_empty(&self) -> bool {
        self.max_memory.is_none()
            && self.max_memory_active.is_none()
            && self.max_memory_idle.is_none()
            && self.max_cpu_time.is_none()
            && self.max_age.is_none()
            && self.hanging_threshold.is_none()
    }

    /// 针对 worker 当前状态生效的内存上限
    pub fn memory_limit(&self, busy: bool) -> Option<u64> {
        let specific = if busy {
            self.max_memory_active
        } else {
            self.max_memory_idle
        };
        specific.or(self.max_memory)
    }
}

/// 内存上限可以写成字节数，也可以写成 "256M" 这样的字符串
fn size_opt<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Bytes(bytes)) => Ok(Some(bytes)),
        Some(Raw::Text(text)) => crate::services::units::parse_size(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid size '{}'", text))),
    }
}

/// 配置文件里的时间段以 humantime 字符串书写（如 "5m"）
pub(crate) mod humantime_serde_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_str(&humantime::format_duration(*d).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// 超出的阈值及观测值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Violation {
    Memory { observed: u64, limit: u64 },
    CpuTime { observed: f64, limit: f64 },
    Age { observed: u64, limit: u64 },
    Hanging { observed: u64, limit: u64 },
}

impl Violation {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Memory { .. } => "memory",
            Self::CpuTime { .. } => "cpu",
            Self::Age { .. } => "age",
            Self::Hanging { .. } => "hanging",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory { observed, limit } => write!(
                f,
                "memory {} > {}",
                format_size(*observed, BINARY),
                format_size(*limit, BINARY)
            ),
            Self::CpuTime { observed, limit } => {
                write!(f, "cpu time {:.1}s > {:.1}s", observed, limit)
            }
            Self::Age { observed, limit } => write!(f, "age {}s > {}s", observed, limit),
            Self::Hanging { observed, limit } => {
                write!(f, "hanging for {}s > {}s", observed, limit)
            }
        }
    }
}

/// 一个需要被终止的 native worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KillDecision {
    pub pid: u32,
    pub slot: usize,
    /// 决策时 worker 是否处于忙碌状态
    pub busy: bool,
    /// 决策时观测到的进程启动时间
    pub start_time: u64,
    pub request: Option<String>,
    pub violations: Vec<Violation>,
}

impl KillDecision {
    pub fn reasons(&self) -> Vec<&'static str> {
        self.violations.iter().map(Violation::reason).collect()
    }
}

/// 单个终止动作的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TerminationOutcome {
    Terminated,
    /// 进程在动作前已退出
    AlreadyGone,
    PermissionDenied,
    /// PID 已被复用或不再属于主进程树，放弃终止
    AncestryMismatch,
    /// 演练模式，没有发送信号
    DryRun,
    Failed(String),
}

impl TerminationOutcome {
    /// 是否算作成功终止（演练模式也计数）
    pub fn counts_as_killed(&self) -> bool {
        matches!(self, Self::Terminated | Self::DryRun)
    }

    /// 是否使本次运行降级
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::Failed(_))
    }
}

impl fmt::Display for TerminationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated => write!(f, "terminated"),
            Self::AlreadyGone => write!(f, "already-gone"),
            Self::PermissionDenied => write!(f, "permission-denied"),
            Self::AncestryMismatch => write!(f, "ancestry-mismatch-aborted"),
            Self::DryRun => write!(f, "dry-run"),
            Self::Failed(message) => write!(f, "failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminationRecord {
    pub decision: KillDecision,
    pub outcome: TerminationOutcome,
}
