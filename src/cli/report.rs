use std::time::Duration;

use humansize::{format_size, BINARY};

use crate::models::{WorkerGroup, NATIVE_GROUP};
use crate::services::snapshot::Snapshot;

/// 终端输出的指标摘要；以冒号结尾的行是标题
pub fn report_metrics(snapshot: &Snapshot) -> Vec<String> {
    let mut lines = Vec::new();

    match &snapshot.server {
        Some(server) => {
            lines.push("Server metrics:".to_string());
            let int = |v: Option<u64>| v.unwrap_or(0).to_string();
            let size = |v: Option<f64>| format_size(v.unwrap_or(0.0).max(0.0) as u64, BINARY);
            let uptime = humantime::format_duration(Duration::from_secs(server.uptime.unwrap_or(0)));
            for (name, value) in [
                ("Busy workers", int(server.busy_workers)),
                ("Bytes per request", size(server.bytes_per_request)),
                ("Bytes per second", size(server.bytes_per_second)),
                ("Cpu load", format!("{:.1}%", server.cpu_load.unwrap_or(0.0))),
                ("Idle workers", int(server.idle_workers)),
                (
                    "Requests per second",
                    format!("{:.2}", server.requests_per_second.unwrap_or(0.0)),
                ),
                ("Total accesses", int(server.total_accesses)),
                (
                    "Total traffic",
                    format_size(server.total_traffic.unwrap_or(0), BINARY),
                ),
                ("Uptime", uptime.to_string()),
            ] {
                lines.push(format!(" - {}: {}", name, value));
            }
        }
        None => lines.push("Server metrics: unavailable (status page unreachable)".to_string()),
    }

    let has_foreign = snapshot.groups.iter().any(|g| g.name != NATIVE_GROUP);
    for group in &snapshot.groups {
        let label = if group.name != NATIVE_GROUP {
            format!("process group '{}'", group.name)
        } else if has_foreign {
            "main Apache workers".to_string()
        } else {
            "Apache workers".to_string()
        };
        report_memory_usage(&mut lines, &label, group);
    }
    lines
}

fn report_memory_usage(lines: &mut Vec<String>, label: &str, group: &WorkerGroup) {
    let stats = group.memory_stats();
    let workers = if stats.count == 1 { "worker" } else { "workers" };
    lines.push(String::new());
    lines.push(format!(
        "Memory usage of {} ({} {}):",
        label, stats.count, workers
    ));
    lines.push(format!(" - Minimum: {}", format_size(stats.min, BINARY)));
    lines.push(format!(" - Average: {}", format_size(stats.average as u64, BINARY)));
    lines.push(format!(" - Maximum: {}", format_size(stats.max, BINARY)));
}

pub fn line_is_heading(line: &str) -> bool {
    line.ends_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupMember, ServerRecord};

    #[test]
    fn test_report() {
        let mut native = WorkerGroup::new(NATIVE_GROUP);
        for (pid, memory_bytes) in [(1, 1024 * 1024), (2, 3 * 1024 * 1024)] {
            native.add(GroupMember {
                pid,
                memory_bytes,
                cpu_seconds: 0.0,
            });
        }
        let snapshot = Snapshot {
            server: Some(ServerRecord {
                uptime: Some(5163),
                total_traffic: Some(169318 * 1024),
                cpu_load: Some(7.03642),
                ..Default::default()
            }),
            groups: vec![native, WorkerGroup::new("shop")],
            ..Default::default()
        };

        let lines = report_metrics(&snapshot);
        assert_eq!(lines[0], "Server metrics:");
        assert!(lines.contains(&" - Uptime: 1h 26m 3s".to_string()));
        assert!(lines.contains(&" - Cpu load: 7.0%".to_string()));
        assert!(lines.contains(&"Memory usage of main Apache workers (2 workers):".to_string()));
        assert!(lines.contains(&" - Average: 2 MiB".to_string()));
        assert!(lines.contains(&"Memory usage of process group 'shop' (0 workers):".to_string()));
        assert!(line_is_heading(&lines[0]));
        assert!(!line_is_heading(&lines[1]));
    }

    #[test]
    fn test_report_unreachable() {
        let lines = report_metrics(&Snapshot::unreachable());
        assert_eq!(lines.len(), 1);
        assert!(!line_is_heading(&lines[0]));
    }
}
