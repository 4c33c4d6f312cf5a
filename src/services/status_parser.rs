//! mod_status 状态页解析
//!
//! 支持两种形式：`?auto` 机器可读纯文本（服务器全局指标）和 HTML 页面
//! （worker 状态表）。所有按行匹配的模式都锚定在行首，避免新版本
//! Apache 增加的字段（如 `ServerUptime: 1 hour ...`）被误识别。

use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{MonitorError, Result};
use crate::models::{ScoreboardState, ServerRecord, WorkerRecord};
use crate::services::units::parse_size;

/// 状态表必须包含的列（归一化之前的写法）
pub const STATUS_COLUMNS: [&str; 13] = [
    "Srv", "PID", "Acc", "M", "CPU", "SS", "Req", "Conn", "Child", "Slot", "Client", "VHost",
    "Request",
];

lazy_static! {
    static ref KEY_VALUE: Regex = Regex::new(r"^([A-Za-z][A-Za-z0-9 _-]*?)\s*:\s*(.*?)\s*$").unwrap();
    static ref BLOCK_TAG: Regex = Regex::new(r"(?i)<(dt|dd|br|p|tr|table|hr|h1|h2|pre)\b").unwrap();
    static ref ANY_TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref CELL: Regex = Regex::new(r"(?is)<t([hd])\b[^>]*>(.*?)</t[hd]>").unwrap();
    static ref HTML_ACCESSES: Regex = Regex::new(
        r"(?i)^Total accesses:\s*(\d+)\s*-\s*Total Traffic:\s*([0-9.]+\s*[kmgt]?i?b)"
    ).unwrap();
    static ref HTML_CPU: Regex =
        Regex::new(r"(?i)^CPU Usage:.*-\s*([0-9.]+)%\s*CPU load").unwrap();
    static ref HTML_RATES: Regex = Regex::new(
        r"(?i)^([0-9.]+)\s*requests/sec\s*-\s*([0-9.]+\s*[kmgt]?i?b)/second\s*-\s*([0-9.]+\s*[kmgt]?i?b)/request"
    ).unwrap();
    static ref HTML_WORKERS: Regex = Regex::new(
        r"(?i)^(\d+)\s+requests?\s+currently being processed,\s*(\d+)\s+idle workers?"
    ).unwrap();
    static ref HTML_UPTIME: Regex = Regex::new(r"(?i)^Server uptime:\s*(.+)$").unwrap();
    static ref UPTIME_PART: Regex =
        Regex::new(r"(?i)(\d+)\s+(day|hour|minute|second)s?").unwrap();
}

/// 状态页的形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// `server-status?auto`
    PlainText,
    /// `server-status`
    Html,
}

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    pub server: ServerRecord,
    /// 按报告中的顺序排列
    pub workers: Vec<WorkerRecord>,
    /// 文档被截断，只返回了完整的部分
    pub partial: bool,
}

pub fn parse_status_report(text: &str, format: ReportFormat) -> Result<ParsedReport> {
    match format {
        ReportFormat::PlainText => parse_plain_text(text),
        ReportFormat::Html => parse_html(text),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TextKey {
    ServerUptimeSeconds,
    Uptime,
    TotalAccesses,
    TotalKBytes,
    CpuLoad,
    ReqPerSec,
    BytesPerSec,
    BytesPerReq,
    BusyWorkers,
    IdleWorkers,
    Scoreboard,
}

impl TextKey {
    /// 精确匹配归一化后的键名；`ServerUptime`（人类可读）不在其中
    fn lookup(raw_key: &str) -> Option<Self> {
        let key: String = raw_key
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "serveruptimeseconds" => Some(Self::ServerUptimeSeconds),
            "uptime" => Some(Self::Uptime),
            "totalaccesses" => Some(Self::TotalAccesses),
            "totalkbytes" => Some(Self::TotalKBytes),
            "cpuload" => Some(Self::CpuLoad),
            "reqpersec" => Some(Self::ReqPerSec),
            "bytespersec" => Some(Self::BytesPerSec),
            "bytesperreq" => Some(Self::BytesPerReq),
            "busyworkers" => Some(Self::BusyWorkers),
            "idleworkers" => Some(Self::IdleWorkers),
            "scoreboard" => Some(Self::Scoreboard),
            _ => None,
        }
    }
}

fn parse_plain_text(text: &str) -> Result<ParsedReport> {
    let mut values: HashMap<TextKey, &str> = HashMap::new();

    for line in text.lines() {
        let Some(caps) = KEY_VALUE.captures(line) else {
            continue;
        };
        let (raw_key, value) = match (caps.get(1), caps.get(2)) {
            (Some(k), Some(v)) => (k.as_str(), v.as_str()),
            _ => continue,
        };
        match TextKey::lookup(raw_key) {
            Some(key) => {
                // 同一个键只取第一次出现的值
                values.entry(key).or_insert(value);
            }
            None => log::debug!("Ignoring unrecognized status key '{}'", raw_key),
        }
    }

    if values.is_empty() {
        return Err(MonitorError::parsing(
            "no recognized keys found in plain text status page",
        ));
    }

    let int = |key: TextKey| -> Option<u64> {
        let raw = values.get(&key)?;
        match raw.parse::<u64>() {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("Status key {:?} has non-numeric value '{}'", key, raw);
                None
            }
        }
    };
    let float = |key: TextKey| -> Option<f64> {
        let raw = values.get(&key)?;
        match raw.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("Status key {:?} has non-numeric value '{}'", key, raw);
                None
            }
        }
    };

    let server = ServerRecord {
        uptime: int(TextKey::ServerUptimeSeconds).or_else(|| int(TextKey::Uptime)),
        total_accesses: int(TextKey::TotalAccesses),
        total_traffic: int(TextKey::TotalKBytes).map(|kb| kb.saturating_mul(1024)),
        cpu_load: float(TextKey::CpuLoad),
        requests_per_second: float(TextKey::ReqPerSec),
        bytes_per_second: float(TextKey::BytesPerSec),
        bytes_per_request: float(TextKey::BytesPerReq),
        busy_workers: int(TextKey::BusyWorkers),
        idle_workers: int(TextKey::IdleWorkers),
        scoreboard: values
            .get(&TextKey::Scoreboard)
            .map(|s| tally_scoreboard(s))
            .unwrap_or_default(),
        native_workers: None,
        foreign_workers: None,
    };

    // mod_status 总是最后输出 Scoreboard
    let partial = !values.contains_key(&TextKey::Scoreboard);
    if partial {
        log::warn!("Plain text status page has no scoreboard, it may have been truncated");
    }

    Ok(ParsedReport {
        server,
        workers: Vec::new(),
        partial,
    })
}

fn tally_scoreboard(scoreboard: &str) -> BTreeMap<char, u64> {
    let mut tally = BTreeMap::new();
    for c in scoreboard.chars().filter(|c| !c.is_whitespace()) {
        *tally.entry(c).or_insert(0) += 1;
    }
    tally
}

fn parse_html(text: &str) -> Result<ParsedReport> {
    let lower = text.to_ascii_lowercase();
    if !["<html", "<table", "<dl", "<dt"].iter().any(|m| lower.contains(m)) {
        return Err(MonitorError::parsing("document is not an HTML status page"));
    }

    let server = parse_html_facts(text);
    let (workers, table_truncated) = find_worker_table(text, &lower);
    let partial = table_truncated || !lower.contains("</html>");
    if partial {
        log::warn!(
            "HTML status page appears truncated, using {} complete worker rows",
            workers.len()
        );
    }

    Ok(ParsedReport {
        server,
        workers,
        partial,
    })
}

/// 从 `<dt>` 等块中提取服务器级指标
fn parse_html_facts(text: &str) -> ServerRecord {
    let broken = BLOCK_TAG.replace_all(text, "\n<$1");
    let mut server = ServerRecord::default();

    for raw_line in broken.lines() {
        let line = html_text(raw_line);
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = HTML_ACCESSES.captures(&line) {
            server.total_accesses = server.total_accesses.or(caps[1].parse().ok());
            server.total_traffic = server.total_traffic.or(parse_size(&caps[2]));
        } else if let Some(caps) = HTML_CPU.captures(&line) {
            // 页面上是百分比，纯文本页是同样的数值
            server.cpu_load = server.cpu_load.or(caps[1].parse().ok());
        } else if let Some(caps) = HTML_RATES.captures(&line) {
            server.requests_per_second = server.requests_per_second.or(caps[1].parse().ok());
            server.bytes_per_second = server
                .bytes_per_second
                .or(parse_size(&caps[2]).map(|v| v as f64));
            server.bytes_per_request = server
                .bytes_per_request
                .or(parse_size(&caps[3]).map(|v| v as f64));
        } else if let Some(caps) = HTML_WORKERS.captures(&line) {
            server.busy_workers = server.busy_workers.or(caps[1].parse().ok());
            server.idle_workers = server.idle_workers.or(caps[2].parse().ok());
        } else if let Some(caps) = HTML_UPTIME.captures(&line) {
            server.uptime = server.uptime.or(parse_human_uptime(&caps[1]));
        }
    }
    server
}

/// "2 days 3 hours 5 minutes 10 seconds" -> 秒
fn parse_human_uptime(text: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut matched = false;
    for caps in UPTIME_PART.captures_iter(text) {
        let amount: u64 = caps[1].parse().ok()?;
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "day" => 86400,
            "hour" => 3600,
            "minute" => 60,
            _ => 1,
        };
        total = total.saturating_add(amount.saturating_mul(unit));
        matched = true;
    }
    matched.then_some(total)
}

/// 查找包含全部必需列的第一张表，返回 (worker 行, 是否被截断)
fn find_worker_table(text: &str, lower: &str) -> (Vec<WorkerRecord>, bool) {
    let required: Vec<String> = STATUS_COLUMNS.iter().map(|c| normalize_heading(c)).collect();
    let mut search_from = 0;

    while let Some(offset) = lower[search_from..].find("<table") {
        let start = search_from + offset;
        let (body, truncated, next) = match lower[start..].find("</table>") {
            Some(end) => (&text[start..start + end], false, start + end),
            None => (&text[start..], true, text.len()),
        };
        search_from = next.max(start + 1);

        let Some((headings, rows)) = split_table(body) else {
            continue;
        };
        if !required.iter().all(|c| headings.contains(c)) {
            log::debug!("Skipping table with headings {:?}", headings);
            continue;
        }

        let workers = rows
            .iter()
            .enumerate()
            .map(|(slot, cells)| worker_from_row(slot, &headings, cells))
            .collect();
        return (workers, truncated);
    }

    (Vec::new(), false)
}

/// 拆分表格为表头和完整的数据行；没有表头的表返回 None
fn split_table(body: &str) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    let lower = body.to_ascii_lowercase();
    let mut headings: Vec<String> = Vec::new();
    let mut rows = Vec::new();

    let starts: Vec<usize> = lower.match_indices("<tr").map(|(i, _)| i).collect();
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(body.len());
        let row = &body[start..end];
        // 截断的最后一行没有 </tr>，丢弃
        if !row.to_ascii_lowercase().contains("</tr>") {
            continue;
        }
        let mut cells = Vec::new();
        let mut is_header = false;
        for caps in CELL.captures_iter(row) {
            is_header |= caps[1].eq_ignore_ascii_case("h");
            cells.push(html_text(&caps[2]));
        }
        if is_header && headings.is_empty() {
            headings = cells.iter().map(|c| normalize_heading(c)).collect();
        } else if !is_header && !cells.is_empty() {
            rows.push(cells);
        }
    }

    if headings.is_empty() {
        None
    } else {
        Some((headings, rows))
    }
}

fn worker_from_row(slot: usize, headings: &[String], cells: &[String]) -> WorkerRecord {
    let field = |name: &str| -> Option<&str> {
        let index = headings.iter().position(|h| h == name)?;
        let value = cells.get(index)?.as_str();
        (!value.is_empty()).then_some(value)
    };
    let number = |name: &str| -> Option<f64> { field(name)?.parse::<f64>().ok() };

    let state = field("m").map(ScoreboardState::from_mode).unwrap_or(ScoreboardState::Unknown('?'));
    let pid = field("pid")
        .and_then(|p| p.parse::<u32>().ok())
        .filter(|p| *p != 0);

    let mut worker = WorkerRecord::new(slot, pid, state);
    worker.server_generation = field("srv").and_then(|s| {
        let (child, generation) = s.split_once('-')?;
        Some((child.parse().ok()?, generation.parse().ok()?))
    });
    worker.accesses = field("acc").and_then(|s| {
        let mut parts = s.split('/').map(|n| n.trim().parse::<u64>().ok());
        Some((parts.next()??, parts.next()??, parts.next()??))
    });
    worker.client = field("client").map(str::to_string);
    worker.vhost = field("vhost").map(str::to_string);
    worker.request = field("request")
        .filter(|r| *r != "NULL")
        .map(str::to_string);
    worker.seconds_since_activity = field("ss").and_then(|s| s.parse().ok());
    worker.cpu_seconds = number("cpu");
    worker.request_millis = field("req").and_then(|s| s.parse().ok());
    // Conn 为 KiB，Child / Slot 为 MiB
    worker.bytes_connection = number("conn").map(|kb| (kb * 1024.0).round() as u64);
    worker.bytes_child = number("child").map(|mb| (mb * 1024.0 * 1024.0).round() as u64);
    worker.bytes_slot = number("slot").map(|mb| (mb * 1024.0 * 1024.0).round() as u64);
    worker
}

/// 去掉标签并解码常见实体
fn html_text(fragment: &str) -> String {
    ANY_TAG
        .replace_all(fragment, "")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// 有损归一化：小写并去掉非字母数字字符
fn normalize_heading(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_old_format_text_status() {
        let report = parse_status_report(OLD_TEXT_STATUS, ReportFormat::PlainText).unwrap();
        assert!(!report.partial);
        assert!(report.workers.is_empty());
        assert_eq!(report.server.uptime, Some(181556));
        assert_eq!(report.server.total_accesses, Some(100));
        assert_eq!(report.server.total_traffic, Some(275 * 1024));
        assert_eq!(report.server.cpu_load, Some(0.000203794));
        assert_eq!(report.server.busy_workers, Some(1));
        assert_eq!(report.server.idle_workers, Some(5));
        assert_eq!(report.server.scoreboard.get(&'W'), Some(&1));
        assert_eq!(report.server.scoreboard.get(&'_'), Some(&5));
    }

    #[test]
    fn test_new_format_text_status() {
        // 回归测试：新版状态页的 "ServerUptime: 1 hour ..." 不能覆盖真实的运行时长
        let report = parse_status_report(NEW_TEXT_STATUS, ReportFormat::PlainText).unwrap();
        assert_eq!(report.server.uptime, Some(5163));
        assert_eq!(report.server.total_accesses, Some(49038));
        assert_eq!(report.server.total_traffic, Some(169318 * 1024));
        assert_eq!(report.server.cpu_load, Some(7.03642));
        assert_eq!(report.server.requests_per_second, Some(0.576802));
        assert_eq!(report.server.bytes_per_request, Some(3535.66));
        assert_eq!(report.server.busy_workers, Some(2));
        assert_eq!(report.server.idle_workers, Some(6));
    }

    #[test]
    fn test_uptime_synonyms_yield_single_canonical_value() {
        let text = "ServerUptimeSeconds: 5163\nUptime: 5100\nScoreboard: _\n";
        let report = parse_status_report(text, ReportFormat::PlainText).unwrap();
        assert_eq!(report.server.uptime, Some(5163));

        // 顺序颠倒时仍以 ServerUptimeSeconds 为准
        let text = "Uptime: 5100\nServerUptimeSeconds: 5163\nScoreboard: _\n";
        let report = parse_status_report(text, ReportFormat::PlainText).unwrap();
        assert_eq!(report.server.uptime, Some(5163));
    }

    #[test]
    fn test_human_uptime_is_not_read_as_seconds() {
        let text = "ServerUptime: 1 hour 26 minutes\nTotal Accesses: 3\nScoreboard: _\n";
        let report = parse_status_report(text, ReportFormat::PlainText).unwrap();
        assert_eq!(report.server.uptime, None);
    }

    #[test]
    fn test_unanchored_keys_do_not_match() {
        let text = "XTotal Accesses: 999\nTotal Accesses: 7\nScoreboard: _\n";
        let report = parse_status_report(text, ReportFormat::PlainText).unwrap();
        assert_eq!(report.server.total_accesses, Some(7));
    }

    #[test]
    fn test_parsing_is_deterministic() {
        for (text, format) in [
            (OLD_TEXT_STATUS, ReportFormat::PlainText),
            (NEW_TEXT_STATUS, ReportFormat::PlainText),
            (HTML_STATUS, ReportFormat::Html),
        ] {
            let first = parse_status_report(text, format).unwrap();
            let second = parse_status_report(text, format).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_unrecognized_text_fails() {
        let result = parse_status_report("hello world\n", ReportFormat::PlainText);
        assert!(matches!(result, Err(MonitorError::Parsing { .. })));
    }

    #[test]
    fn test_truncated_text_is_partial() {
        let truncated = &OLD_TEXT_STATUS[..OLD_TEXT_STATUS.find("BusyWorkers").unwrap()];
        let report = parse_status_report(truncated, ReportFormat::PlainText).unwrap();
        assert!(report.partial);
        assert_eq!(report.server.uptime, Some(181556));
        assert_eq!(report.server.busy_workers, None);
    }

    #[test]
    fn test_bad_value_leaves_field_empty() {
        let text = "Total Accesses: lots\nUptime: 12\nScoreboard: _\n";
        let report = parse_status_report(text, ReportFormat::PlainText).unwrap();
        assert_eq!(report.server.total_accesses, None);
        assert_eq!(report.server.uptime, Some(12));
    }

    #[test]
    fn test_huge_values_saturate() {
        let text = "Total kBytes: 18446744073709551615\nUptime: 12\nScoreboard: _\n";
        let report = parse_status_report(text, ReportFormat::PlainText).unwrap();
        assert_eq!(report.server.total_traffic, Some(u64::MAX));

        assert_eq!(
            parse_human_uptime("18446744073709551615 days 5 hours"),
            Some(u64::MAX)
        );
        assert_eq!(parse_human_uptime("1 hour 26 minutes 3 seconds"), Some(5163));
    }

    #[test]
    fn test_html_worker_table() {
        let report = parse_status_report(HTML_STATUS, ReportFormat::Html).unwrap();
        assert!(!report.partial);
        assert_eq!(report.workers.len(), 3);

        let idle = &report.workers[0];
        assert_eq!(idle.slot, 0);
        assert_eq!(idle.pid, Some(31212));
        assert_eq!(idle.state, ScoreboardState::Waiting);
        assert_eq!(idle.server_generation, Some((0, 0)));
        assert_eq!(idle.accesses, Some((0, 6, 128)));
        assert_eq!(idle.seconds_since_activity, Some(234));
        assert_eq!(idle.request.as_deref(), Some("GET /server-status HTTP/1.1"));
        assert_eq!(idle.vhost.as_deref(), Some("localhost:80"));

        let busy = &report.workers[1];
        assert_eq!(busy.pid, Some(4821));
        assert_eq!(busy.state, ScoreboardState::SendingReply);
        assert_eq!(busy.seconds_since_activity, Some(400));
        assert_eq!(busy.cpu_seconds, Some(1.52));
        assert_eq!(busy.bytes_slot, Some(1572864));
        assert_eq!(busy.client.as_deref(), Some("10.0.0.7"));

        let open = &report.workers[2];
        assert_eq!(open.pid, None);
        assert!(open.state.is_open_slot());
        assert_eq!(open.request, None);
        assert_eq!(open.client, None);
    }

    #[test]
    fn test_html_server_facts() {
        let report = parse_status_report(HTML_STATUS, ReportFormat::Html).unwrap();
        let server = report.server;
        assert_eq!(server.uptime, Some(3600 + 26 * 60 + 3));
        assert_eq!(server.total_accesses, Some(49038));
        assert_eq!(server.total_traffic, Some((165.3 * 1024.0 * 1024.0_f64).round() as u64));
        assert_eq!(server.cpu_load, Some(0.188));
        assert_eq!(server.requests_per_second, Some(0.576));
        assert_eq!(server.bytes_per_second, Some(2039.0));
        assert_eq!(server.busy_workers, Some(4));
        assert_eq!(server.idle_workers, Some(3));
    }

    #[test]
    fn test_html_without_worker_table() {
        // ExtendedStatus 关闭时没有状态表
        let html = "<html><body><dl><dt>Total accesses: 5 - Total Traffic: 1 kB</dt></dl></body></html>";
        let report = parse_status_report(html, ReportFormat::Html).unwrap();
        assert!(report.workers.is_empty());
        assert!(!report.partial);
        assert_eq!(report.server.total_accesses, Some(5));
    }

    #[test]
    fn test_truncated_html_returns_complete_rows() {
        let cut = HTML_STATUS.find("<tr><td><b>2-0</b>").unwrap() + 40;
        let report = parse_status_report(&HTML_STATUS[..cut], ReportFormat::Html).unwrap();
        assert!(report.partial);
        assert_eq!(report.workers.len(), 2);
        assert_eq!(report.workers[1].pid, Some(4821));
    }

    #[test]
    fn test_non_html_fails() {
        let result = parse_status_report(OLD_TEXT_STATUS, ReportFormat::Html);
        assert!(matches!(result, Err(MonitorError::Parsing { .. })));
    }

    #[test]
    fn test_normalize_heading() {
        assert_eq!(normalize_heading("VHost"), "vhost");
        assert_eq!(normalize_heading(" CPU\n"), "cpu");
        assert_eq!(normalize_heading("Srv"), "srv");
    }
}
