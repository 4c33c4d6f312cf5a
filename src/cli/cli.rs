use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::snapshot::SnapshotFormat;
use crate::services::units::{parse_size_arg, parse_timespan_arg};

/// Apache Manager - 监控 Apache worker 并终止超出资源阈值的进程
///
/// 不带任何动作参数时，在终端输出服务器指标与 worker 内存占用。
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// 采集指标并写入数据文件（见 --data-file）
    #[arg(short = 'c', long)]
    pub collect_metrics: bool,

    /// 终止超出阈值的 worker（见 --dry-run）
    #[arg(short = 'k', long)]
    pub kill_workers: bool,

    /// 类似 top，每隔一段时间刷新一次指标直到被中断
    #[arg(short = 'w', long)]
    pub watch: bool,

    /// 输出 Zabbix 低级发现所需的 JSON
    #[arg(short = 'z', long)]
    pub zabbix_discovery: bool,

    /// 不真正终止任何 worker
    #[arg(short = 'n', long, visible_alias = "simulate")]
    pub dry_run: bool,

    /// 忙碌 worker 的内存上限（如 50K、42M、2G）
    #[arg(short = 'a', long, value_parser = parse_size_arg)]
    pub max_memory_active: Option<u64>,

    /// 空闲 worker 的内存上限
    #[arg(short = 'i', long, value_parser = parse_size_arg)]
    pub max_memory_idle: Option<u64>,

    /// 不区分状态的内存上限
    #[arg(long, value_parser = parse_size_arg)]
    pub max_memory: Option<u64>,

    /// 单个请求处理时间上限（如 2s、3m、5h）
    #[arg(short = 't', long, visible_alias = "max-ss", value_parser = parse_timespan_arg)]
    pub max_time: Option<Duration>,

    /// 累计 CPU 时间上限
    #[arg(long, value_parser = parse_timespan_arg)]
    pub max_cpu_time: Option<Duration>,

    /// 进程存活时长上限
    #[arg(long, value_parser = parse_timespan_arg)]
    pub max_age: Option<Duration>,

    /// 忙碌 worker 超过多久算作挂起（只影响 workers-hanging 指标）
    #[arg(short = 'T', long, value_parser = parse_timespan_arg)]
    pub hanging_worker_threshold: Option<Duration>,

    /// 指标数据文件，`-` 表示标准输出
    #[arg(short = 'f', long, env = "APACHE_MANAGER_DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// 数据文件格式
    #[arg(long, value_enum)]
    pub format: Option<SnapshotFormat>,

    /// 配置文件（默认读取 /etc/apache-manager.toml，如果存在）
    #[arg(long, env = "APACHE_MANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// 状态页的基础 URL（默认从 ports.conf 推断）
    #[arg(short = 'u', long, env = "APACHE_STATUS_URL")]
    pub status_url: Option<String>,

    /// Apache 的 ports.conf
    #[arg(long)]
    pub ports_config: Option<PathBuf>,

    /// 主进程 PID
    #[arg(long, conflicts_with_all = ["pid_file", "master_command"])]
    pub master_pid: Option<u32>,

    /// 主进程的 PID 文件
    #[arg(long, conflicts_with = "master_command")]
    pub pid_file: Option<PathBuf>,

    /// 按命令行正则匹配主进程
    #[arg(long)]
    pub master_command: Option<String>,

    /// 终止 worker 使用的信号（如 SIGKILL、SIGTERM）
    #[arg(long)]
    pub signal: Option<String>,

    /// 识别独立进程组的正则，第一个捕获组是组名
    #[arg(long)]
    pub group_pattern: Option<String>,

    /// 整个周期的超时时间
    #[arg(long, value_parser = parse_timespan_arg)]
    pub timeout: Option<Duration>,

    /// --watch 的刷新间隔
    #[arg(long, value_parser = parse_timespan_arg)]
    pub interval: Option<Duration>,

    /// 增加日志详细程度（可重复）
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// 减少日志详细程度（可重复）
    #[arg(short = 'q', long, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl CommandArgs {
    /// 没有请求任何动作时输出终端报告
    pub fn wants_report(&self) -> bool {
        !(self.collect_metrics || self.kill_workers || self.watch || self.zabbix_discovery)
    }

    /// env_logger 的默认级别，RUST_LOG 仍然优先
    pub fn log_level(&self) -> &'static str {
        const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];
        let index = 3 + self.verbose as i32 - self.quiet as i32;
        LEVELS[index.clamp(0, LEVELS.len() as i32 - 1) as usize]
    }
}
