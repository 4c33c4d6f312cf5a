//! 运行配置：可选的 TOML 配置文件 + 命令行参数（命令行优先）

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::Deserialize;

use crate::cli::CommandArgs;
use crate::error::{MonitorError, Result};
use crate::models::ThresholdConfig;
use crate::services::correlator::DEFAULT_GROUP_PATTERN;
use crate::services::ports::{self, PORTS_CONF};
use crate::services::process_table::MasterIdentity;
use crate::services::snapshot::SnapshotFormat;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/apache-manager.toml";
pub const DEFAULT_DATA_FILE: &str = "/tmp/apache-manager.txt";
pub const DEFAULT_PID_FILE: &str = "/var/run/apache2/apache2.pid";
pub const DEFAULT_HANGING_THRESHOLD: Duration = Duration::from_secs(300);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(10);

/// 配置文件的内容，所有字段都可省略
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub status_url: Option<String>,
    pub ports_config: Option<PathBuf>,
    pub master: Option<MasterIdentity>,
    pub thresholds: ThresholdConfig,
    #[serde(with = "crate::models::decision::humantime_serde_opt")]
    pub hanging_worker_threshold: Option<Duration>,
    pub data_file: Option<PathBuf>,
    pub format: Option<SnapshotFormat>,
    pub signal: Option<String>,
    pub group_pattern: Option<String>,
    #[serde(with = "crate::models::decision::humantime_serde_opt")]
    pub timeout: Option<Duration>,
    #[serde(with = "crate::models::decision::humantime_serde_opt")]
    pub fetch_timeout: Option<Duration>,
    #[serde(with = "crate::models::decision::humantime_serde_opt")]
    pub watch_interval: Option<Duration>,
}

impl FileConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MonitorError::config(e.to_string()))
    }

    /// 显式指定的配置文件必须存在；默认位置的文件不存在时使用空配置
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        log::debug!("Loading configuration from {} ..", path.display());
        let text = fs::read_to_string(path).map_err(|e| {
            MonitorError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
            .map_err(|e| MonitorError::config(format!("{}: {}", path.display(), e)))
    }
}

/// 一次运行所需的全部配置
#[derive(Debug, Clone)]
pub struct Settings {
    /// None 时从 ports.conf 推断
    pub status_url: Option<String>,
    pub ports_config: PathBuf,
    pub master: MasterIdentity,
    pub thresholds: ThresholdConfig,
    /// workers-hanging 指标使用的阈值
    pub hanging_report_threshold: Duration,
    pub data_file: PathBuf,
    pub format: SnapshotFormat,
    pub signal: Signal,
    pub dry_run: bool,
    pub group_pattern: String,
    pub timeout: Duration,
    pub fetch_timeout: Duration,
    pub watch_interval: Duration,
}

impl Settings {
    pub fn load(args: &CommandArgs) -> Result<Self> {
        let file = FileConfig::load(args.config.as_deref())?;
        Self::merge(file, args)
    }

    pub fn merge(file: FileConfig, args: &CommandArgs) -> Result<Self> {
        let master = if let Some(pid) = args.master_pid {
            MasterIdentity::Pid(pid)
        } else if let Some(path) = &args.pid_file {
            MasterIdentity::PidFile(path.clone())
        } else if let Some(pattern) = &args.master_command {
            MasterIdentity::Command(pattern.clone())
        } else {
            file.master
                .unwrap_or_else(|| MasterIdentity::PidFile(PathBuf::from(DEFAULT_PID_FILE)))
        };

        let mut thresholds = file.thresholds;
        if args.max_memory.is_some() {
            thresholds.max_memory = args.max_memory;
        }
        if args.max_memory_active.is_some() {
            thresholds.max_memory_active = args.max_memory_active;
        }
        if args.max_memory_idle.is_some() {
            thresholds.max_memory_idle = args.max_memory_idle;
        }
        if args.max_time.is_some() {
            thresholds.hanging_threshold = args.max_time;
        }
        if args.max_cpu_time.is_some() {
            thresholds.max_cpu_time = args.max_cpu_time;
        }
        if args.max_age.is_some() {
            thresholds.max_age = args.max_age;
        }

        let signal_name = args.signal.clone().or(file.signal);
        let signal = match signal_name {
            Some(name) => parse_signal(&name)?,
            None => Signal::SIGKILL,
        };

        Ok(Self {
            status_url: args.status_url.clone().or(file.status_url),
            ports_config: args
                .ports_config
                .clone()
                .or(file.ports_config)
                .unwrap_or_else(|| PathBuf::from(PORTS_CONF)),
            master,
            thresholds,
            hanging_report_threshold: args
                .hanging_worker_threshold
                .or(file.hanging_worker_threshold)
                .unwrap_or(DEFAULT_HANGING_THRESHOLD),
            data_file: args
                .data_file
                .clone()
                .or(file.data_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE)),
            format: args.format.or(file.format).unwrap_or_default(),
            signal,
            dry_run: args.dry_run,
            group_pattern: args
                .group_pattern
                .clone()
                .or(file.group_pattern)
                .unwrap_or_else(|| DEFAULT_GROUP_PATTERN.to_string()),
            timeout: args.timeout.or(file.timeout).unwrap_or(DEFAULT_TIMEOUT),
            fetch_timeout: file.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT),
            watch_interval: args
                .interval
                .or(file.watch_interval)
                .unwrap_or(DEFAULT_WATCH_INTERVAL),
        })
    }

    /// 状态页的基础 URL
    pub fn base_url(&self) -> Result<String> {
        match &self.status_url {
            Some(url) => Ok(url.trim_end_matches('/').to_string()),
            None => ports::discover_base_url(&self.ports_config),
        }
    }
}

/// 接受 `SIGTERM`、`TERM`、`sigterm` 这几种写法
pub fn parse_signal(name: &str) -> Result<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&full).map_err(|_| MonitorError::config(format!("unknown signal '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn args(argv: &[&str]) -> CommandArgs {
        CommandArgs::try_parse_from(std::iter::once("apache-manager").chain(argv.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::merge(FileConfig::default(), &args(&[])).unwrap();
        assert_eq!(
            settings.master,
            MasterIdentity::PidFile(PathBuf::from(DEFAULT_PID_FILE))
        );
        assert_eq!(settings.data_file, PathBuf::from(DEFAULT_DATA_FILE));
        assert_eq!(settings.hanging_report_threshold, Duration::from_secs(300));
        assert_eq!(settings.signal, Signal::SIGKILL);
        assert_eq!(settings.format, SnapshotFormat::Text);
        assert!(settings.thresholds.is_empty());
        assert_eq!(settings.group_pattern, DEFAULT_GROUP_PATTERN);
    }

    #[test]
    fn test_file_config() {
        let file = FileConfig::from_toml(
            r#"
            status_url = "http://127.0.0.1:8080/"
            data_file = "/var/lib/zabbix/apache.txt"
            format = "prometheus"
            signal = "TERM"
            timeout = "30s"

            [master]
            command = "^/usr/sbin/apache2"

            [thresholds]
            max_memory_active = "256M"
            hanging_threshold = "5m"
            "#,
        )
        .unwrap();
        let settings = Settings::merge(file, &args(&[])).unwrap();
        assert_eq!(settings.base_url().unwrap(), "http://127.0.0.1:8080");
        assert_eq!(settings.format, SnapshotFormat::Prometheus);
        assert_eq!(settings.signal, Signal::SIGTERM);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(
            settings.master,
            MasterIdentity::Command("^/usr/sbin/apache2".into())
        );
        assert_eq!(settings.thresholds.max_memory_active, Some(256 * 1024 * 1024));
        assert_eq!(
            settings.thresholds.hanging_threshold,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_command_line_wins() {
        let file = FileConfig::from_toml(
            r#"
            data_file = "/from/file.txt"
            [thresholds]
            max_memory_idle = "64M"
            hanging_threshold = "5m"
            "#,
        )
        .unwrap();
        let settings =
            Settings::merge(file, &args(&["-f", "-", "-t", "1m", "--master-pid", "42"])).unwrap();
        assert_eq!(settings.data_file, PathBuf::from("-"));
        assert_eq!(
            settings.thresholds.hanging_threshold,
            Some(Duration::from_secs(60))
        );
        assert_eq!(settings.thresholds.max_memory_idle, Some(64 * 1024 * 1024));
        assert_eq!(settings.master, MasterIdentity::Pid(42));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(FileConfig::from_toml("max_memroy = 1").is_err());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        assert!(FileConfig::load(Some(Path::new("/nonexistent/apache-manager.toml"))).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "status_url = \"http://localhost\"").unwrap();
        let config = FileConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.status_url.as_deref(), Some("http://localhost"));
    }

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("hup").unwrap(), Signal::SIGHUP);
        assert!(parse_signal("SIGNOPE").is_err());
    }

    #[test]
    fn test_base_url_from_ports_conf() {
        let mut ports = tempfile::NamedTempFile::new().unwrap();
        writeln!(ports, "Listen 8080").unwrap();
        let settings = Settings::merge(
            FileConfig::default(),
            &args(&["--ports-config", ports.path().to_str().unwrap()]),
        )
        .unwrap();
        assert_eq!(settings.base_url().unwrap(), "http://127.0.0.1:8080");
    }
}
