use anyhow::Context;
use clap::Parser;

mod cli;
mod config;
mod cycle;
mod error;
mod metrics;
mod models;
mod services;

use cli::report::report_metrics;
use cli::watch::watch_metrics;
use cli::CommandArgs;
use config::Settings;
use cycle::{CycleReport, CycleStatus, Monitor};
use error::MonitorError;
use services::discovery::discovery_payload;
use services::{NixSignaller, SnapshotWriter, StatusFetcher, SysinfoProcessTable};

#[tokio::main]
async fn main() {
    let args = CommandArgs::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level()))
        .init();

    let code = match run(&args).await {
        Ok(status) => status.exit_code(),
        Err(e) => {
            log::error!("{:#}", e);
            CycleStatus::Failed.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(args: &CommandArgs) -> anyhow::Result<CycleStatus> {
    let settings = Settings::load(args).context("Failed to load configuration")?;
    if settings.dry_run {
        log::info!("Performing a dry run ..");
    }

    let table = SysinfoProcessTable::new();
    let signaller = NixSignaller;
    let monitor = Monitor::new(&settings, &table, &signaller);

    let (fetcher, address_error) = match settings
        .base_url()
        .and_then(|base_url| StatusFetcher::new(&base_url, settings.fetch_timeout))
    {
        Ok(fetcher) => (Some(fetcher), None),
        Err(e) => (None, Some(e)),
    };

    let needs_cycle =
        args.collect_metrics || args.kill_workers || args.zabbix_discovery || args.wants_report();
    let report = match (&fetcher, address_error) {
        _ if !needs_cycle => None,
        (Some(fetcher), _) => Some(run_cycle(&monitor, fetcher, &settings, args).await),
        (None, error) => {
            let error = error.unwrap_or_else(|| MonitorError::config("no status page URL"));
            log::error!("{}", error);
            Some(CycleReport::failed(error))
        }
    };

    if args.watch {
        let fetcher = fetcher.as_ref().context("Cannot watch without a status page URL")?;
        watch_metrics(&monitor, fetcher, settings.watch_interval).await?;
    }

    let Some(report) = report else {
        return Ok(CycleStatus::Completed);
    };

    let over_limit: Vec<String> = report
        .decisions
        .iter()
        .map(|d| format!("{} ({})", d.pid, d.reasons().join(", ")))
        .collect();
    if !over_limit.is_empty() {
        log::info!("Workers over their limits: {}", over_limit.join("; "));
    }

    if args.zabbix_discovery {
        let groups = report
            .correlation
            .as_ref()
            .map(|c| c.foreign_group_names())
            .unwrap_or_default();
        println!("{}", discovery_payload(&groups));
    }

    let writer = SnapshotWriter::new(&settings.data_file, settings.format);
    if args.wants_report() && !writer.is_stdout() {
        for line in report_metrics(&report.snapshot) {
            println!("{}", line);
        }
    }

    if args.collect_metrics {
        if writer.is_stdout() || !settings.dry_run {
            writer.write(&report.snapshot)?;
        } else {
            log::info!(
                "Not saving metrics to {} during a dry run",
                writer.path().display()
            );
        }
    }

    Ok(report.status())
}

async fn run_cycle(
    monitor: &Monitor<'_>,
    fetcher: &StatusFetcher,
    settings: &Settings,
    args: &CommandArgs,
) -> CycleReport {
    match tokio::time::timeout(settings.timeout, monitor.run(fetcher, args.kill_workers)).await {
        Ok(report) => report,
        Err(_) => {
            let error = MonitorError::Timeout {
                limit: settings.timeout,
            };
            log::error!("{}", error);
            CycleReport::failed(error)
        }
    }
}
