use std::io::{IsTerminal, Write};
use std::time::Duration;

use anyhow::bail;

use crate::cli::report::{line_is_heading, report_metrics};
use crate::cycle::Monitor;
use crate::services::fetcher::StatusFetcher;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// 类似 top：定期刷新指标，直到收到 Ctrl-C
pub async fn watch_metrics(
    monitor: &Monitor<'_>,
    fetcher: &StatusFetcher,
    interval: Duration,
) -> anyhow::Result<()> {
    if !std::io::stdout().is_terminal() {
        bail!("The 'apache-manager --watch' command requires an interactive terminal!");
    }

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = monitor.run(fetcher, false).await;
                redraw(&report_metrics(&report.snapshot))?;
            }
            _ = tokio::signal::ctrl_c() => {
                log::debug!("Interrupted, leaving watch mode ..");
                return Ok(());
            }
        }
    }
}

fn redraw(lines: &[String]) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{}", CLEAR_SCREEN)?;
    for line in lines {
        if line_is_heading(line) {
            writeln!(stdout, "{}{}{}", BOLD, line, RESET)?;
        } else {
            writeln!(stdout, "{}", line)?;
        }
    }
    stdout.flush()
}
