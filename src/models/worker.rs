use serde::Serialize;
use std::fmt;

/// mod_status 记分板上的 worker 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScoreboardState {
    /// `.` 空槽位，没有进程
    OpenSlot,
    /// `S` 启动中
    Starting,
    /// `R` 读取请求
    ReadingRequest,
    /// `W` 发送响应
    SendingReply,
    /// `_` 等待连接
    Waiting,
    /// `K` Keepalive
    Keepalive,
    /// `D` DNS 查询
    DnsLookup,
    /// `C` 关闭连接
    Closing,
    /// `L` 记录日志
    Logging,
    /// `G` 优雅退出中
    GracefullyFinishing,
    /// `I` 空闲清理
    IdleCleanup,
    /// 其它未知字符
    Unknown(char),
}

impl ScoreboardState {
    pub fn from_char(c: char) -> Self {
        match c {
            '.' => Self::OpenSlot,
            'S' => Self::Starting,
            'R' => Self::ReadingRequest,
            'W' => Self::SendingReply,
            '_' => Self::Waiting,
            'K' => Self::Keepalive,
            'D' => Self::DnsLookup,
            'C' => Self::Closing,
            'L' => Self::Logging,
            'G' => Self::GracefullyFinishing,
            'I' => Self::IdleCleanup,
            other => Self::Unknown(other),
        }
    }

    /// 解析状态表中的 `M` 列，空值视为未知
    pub fn from_mode(mode: &str) -> Self {
        let mut chars = mode.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => Self::Unknown('?'),
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::OpenSlot => '.',
            Self::Starting => 'S',
            Self::ReadingRequest => 'R',
            Self::SendingReply => 'W',
            Self::Waiting => '_',
            Self::Keepalive => 'K',
            Self::DnsLookup => 'D',
            Self::Closing => 'C',
            Self::Logging => 'L',
            Self::GracefullyFinishing => 'G',
            Self::IdleCleanup => 'I',
            Self::Unknown(c) => *c,
        }
    }

    /// 正在处理请求的状态（用于挂起检测和活跃/空闲内存阈值）
    ///
    /// `I`（空闲清理）与未知状态都不算忙碌。
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Starting
                | Self::ReadingRequest
                | Self::SendingReply
                | Self::Keepalive
                | Self::DnsLookup
                | Self::Closing
                | Self::Logging
                | Self::GracefullyFinishing
        )
    }

    pub fn is_open_slot(&self) -> bool {
        matches!(self, Self::OpenSlot)
    }
}

impl fmt::Display for ScoreboardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// 状态表中的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerRecord {
    /// 行序号（从 0 开始，仅在同一份报告内稳定）
    pub slot: usize,
    /// 进程 ID，mod_status 可能不给出
    pub pid: Option<u32>,
    pub state: ScoreboardState,
    /// 子进程编号与代数（`Srv` 列）
    pub server_generation: Option<(u32, u32)>,
    /// 本连接 / 本子进程 / 本槽位的访问次数（`Acc` 列）
    pub accesses: Option<(u64, u64, u64)>,
    pub client: Option<String>,
    pub vhost: Option<String>,
    /// 最近一次请求行，`NULL` 视为空
    pub request: Option<String>,
    /// 距最近一次请求开始的秒数（`SS` 列）
    pub seconds_since_activity: Option<u64>,
    /// 累计 CPU 秒数
    pub cpu_seconds: Option<f64>,
    /// 最近一次请求耗时（毫秒，`Req` 列）
    pub request_millis: Option<u64>,
    pub bytes_connection: Option<u64>,
    pub bytes_child: Option<u64>,
    pub bytes_slot: Option<u64>,
}

impl WorkerRecord {
    pub fn new(slot: usize, pid: Option<u32>, state: ScoreboardState) -> Self {
        Self {
            slot,
            pid,
            state,
            server_generation: None,
            accesses: None,
            client: None,
            vhost: None,
            request: None,
            seconds_since_activity: None,
            cpu_seconds: None,
            request_millis: None,
            bytes_connection: None,
            bytes_child: None,
            bytes_slot: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }
}

impl fmt::Display for WorkerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(
                f,
                "worker {} in slot {} ({})",
                pid,
                self.slot,
                if self.is_busy() { "active" } else { "idle" }
            ),
            None => write!(f, "slot {} without pid", self.slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_states() {
        for c in ['S', 'R', 'W', 'K', 'D', 'C', 'L', 'G'] {
            assert!(ScoreboardState::from_char(c).is_busy(), "{} should be busy", c);
        }
        for c in ['_', '.', 'I', '?', 'x'] {
            assert!(!ScoreboardState::from_char(c).is_busy(), "{} should not be busy", c);
        }
    }

    #[test]
    fn test_idle_cleanup_is_not_busy() {
        // 空闲清理中的 worker 不参与挂起检测
        assert!(!ScoreboardState::IdleCleanup.is_busy());
    }

    #[test]
    fn test_from_mode() {
        assert_eq!(ScoreboardState::from_mode(" W "), ScoreboardState::SendingReply);
        assert_eq!(ScoreboardState::from_mode(""), ScoreboardState::Unknown('?'));
        assert_eq!(ScoreboardState::from_mode("WW"), ScoreboardState::Unknown('?'));
        assert_eq!(ScoreboardState::from_char('Z').as_char(), 'Z');
    }
}
