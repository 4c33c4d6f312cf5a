use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use sysinfo::System;

use crate::error::Result;
use crate::services::snapshot::Snapshot;

/// 每次渲染都新建一个 registry，快照之间互不影响
pub struct MetricsRegistry {
    registry: Registry,
    hostname: String,

    // 每个进程组
    pub group_workers: GaugeVec,
    pub group_memory_bytes: GaugeVec,

    // 每个进程
    pub worker_memory_bytes: GaugeVec,
    pub worker_cpu_seconds: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());

        let group_workers = GaugeVec::new(
            Opts::new("apache_group_workers", "Number of worker processes in a group"),
            &["group", "hostname"],
        )?;
        let group_memory_bytes = GaugeVec::new(
            Opts::new(
                "apache_group_memory_bytes",
                "Memory usage statistics of a worker group in bytes",
            ),
            &["group", "stat", "hostname"],
        )?;
        let worker_memory_bytes = GaugeVec::new(
            Opts::new("apache_worker_memory_bytes", "Resident memory of a worker process"),
            &["group", "pid", "hostname"],
        )?;
        let worker_cpu_seconds = GaugeVec::new(
            Opts::new("apache_worker_cpu_seconds", "Accumulated CPU time of a worker process"),
            &["group", "pid", "hostname"],
        )?;

        registry.register(Box::new(group_workers.clone()))?;
        registry.register(Box::new(group_memory_bytes.clone()))?;
        registry.register(Box::new(worker_memory_bytes.clone()))?;
        registry.register(Box::new(worker_cpu_seconds.clone()))?;

        Ok(Self {
            registry,
            hostname,
            group_workers,
            group_memory_bytes,
            worker_memory_bytes,
            worker_cpu_seconds,
        })
    }

    /// 单值指标：`uptime` -> `apache_uptime`
    fn gauge(&self, prefix: &str, name: &str, help: &str, value: f64) -> Result<()> {
        let metric_name = format!("{}_{}", prefix, name.replace('-', "_"));
        let gauge = Gauge::with_opts(
            Opts::new(metric_name, help).const_label("hostname", self.hostname.as_str()),
        )?;
        gauge.set(value);
        self.registry.register(Box::new(gauge))?;
        Ok(())
    }

    pub fn observe(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(server) = &snapshot.server {
            for (name, value) in server.metrics() {
                let help = format!("Apache server-status '{}'", name);
                self.gauge("apache", name, &help, value.parse().unwrap_or(0.0))?;
            }
        }

        for (name, value) in snapshot.internal_metrics() {
            let help = format!("apache-manager internal metric '{}'", name);
            self.gauge("apache_manager", name, &help, value.parse().unwrap_or(0.0))?;
        }

        let host = self.hostname.as_str();
        for group in &snapshot.groups {
            let name = group.name.as_str();
            let stats = group.memory_stats();
            self.group_workers
                .with_label_values(&[name, host])
                .set(stats.count as f64);
            if !stats.is_valid() {
                continue;
            }
            for (stat, value) in [
                ("min", stats.min as f64),
                ("max", stats.max as f64),
                ("average", stats.average),
                ("median", stats.median),
            ] {
                self.group_memory_bytes
                    .with_label_values(&[name, stat, host])
                    .set(value);
            }

            for member in &group.members {
                let pid = member.pid.to_string();
                self.worker_memory_bytes
                    .with_label_values(&[name, &pid, host])
                    .set(member.memory_bytes as f64);
                self.worker_cpu_seconds
                    .with_label_values(&[name, &pid, host])
                    .set(member.cpu_seconds);
            }
        }
        Ok(())
    }

    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// 以 Prometheus textfile collector 格式输出快照
pub fn render_prometheus(snapshot: &Snapshot) -> Result<String> {
    let registry = MetricsRegistry::new()?;
    registry.observe(snapshot)?;
    registry.render()
}
