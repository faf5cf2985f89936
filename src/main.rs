//! fleetsync CLI entry point

use anyhow::{Context, Result};
use fleetsync::config::cli::{
    BarrierArgs, Cli, Command, CsvCommand, EventCommand, MetricCommand, ResultCommand, WaitArgs,
};
use fleetsync::config::{cli_convert, toml::load_config, validator::validate_config, Config};
use fleetsync::data::{NextOptions, TableRegistry};
use fleetsync::distributed::{
    BarrierCoordinator, Condition, EventWatcher, HttpMetricStore, MetricQuery, MetricStore,
};
use fleetsync::output::{sink_for, ResultWriter};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();
    cli.validate()?;

    // JSON logs when running under an orchestrator
    fleetsync::telemetry::init_tracing(cli.info.is_some(), cli.debug);

    let config = load_config(&cli)?;
    validate_config(&config).context("Configuration validation failed")?;
    if cli.debug {
        eprintln!("{}", config);
    }

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Info => print_json(&config.info),
        Command::Csv(command) => run_csv(command, &config).await,
        Command::Metric(MetricCommand::Get { name, key, namespace }) => {
            let coordinator = build_coordinator(&config, metric_store(&config)?);
            let query = MetricQuery::new(name, key).with_namespace(namespace);
            let value = coordinator.get(&query).await?;
            println!("{}", value);
            Ok(())
        }
        Command::Wait(args) => run_wait(args, &config).await,
        Command::Barrier(args) => run_barrier(args, &config).await,
        Command::Event(EventCommand::Wait { name, timeout, default }) => {
            let timeout = cli_convert::parse_timeout(timeout.as_deref())?;
            // Defaults that are not valid JSON are taken as plain strings
            let default = default.map(|d| {
                serde_json::from_str(&d).unwrap_or(serde_json::Value::String(d))
            });

            let watcher = event_watcher(&config);
            let contents = watcher.wait_for(&name, timeout, default).await;
            watcher.finish();
            print_json(&contents?)
        }
        Command::Result(command) => run_result(command, &config),
    }
}

async fn run_csv(command: CsvCommand, config: &Config) -> Result<()> {
    let mut tables = TableRegistry::new(config.identity());

    match command {
        CsvCommand::Get { table, index } => print_json(&tables.open(&table)?.get(index)?),
        CsvCommand::Random { table } => print_json(&tables.open(&table)?.random()),
        CsvCommand::Next { table, rows, no_wrap, shared } => {
            let mut options = NextOptions::rows(rows);
            if no_wrap || !config.run.data.wrap {
                options = options.no_wrap();
            }

            let table = tables.open(&table)?;
            let rows = if shared || config.run.data.shared_cursor {
                let store = metric_store(config)?;
                table.next_shared(store.as_deref(), options).await?
            } else {
                table.next(options)?
            };

            for row in &rows {
                println!("{}", serde_json::to_string(row)?);
            }
            Ok(())
        }
    }
}

async fn run_wait(args: WaitArgs, config: &Config) -> Result<()> {
    let coordinator = build_coordinator(config, metric_store(config)?);
    let target = args.value.unwrap_or(coordinator.concurrency() as f64);
    let condition = Condition::at_least(args.name, target)
        .key(args.key)
        .namespace(args.namespace)
        .timeout(cli_convert::parse_timeout(args.timeout.as_deref())?);

    let value = coordinator.wait_for_condition(condition).await?;
    println!("{}", value);
    Ok(())
}

async fn run_barrier(args: BarrierArgs, config: &Config) -> Result<()> {
    let coordinator = build_coordinator(config, metric_store(config)?);
    let timeout = cli_convert::parse_timeout(args.timeout.as_deref())?;

    let value = coordinator.barrier(&args.name, args.value, timeout).await?;
    println!("{}", value);
    Ok(())
}

fn run_result(command: ResultCommand, config: &Config) -> Result<()> {
    let sink = sink_for(config.run.output.result_file.as_deref())?;
    let writer = ResultWriter::new(sink);

    match command {
        ResultCommand::Timing(m) => writer
            .scoped(m.resource, m.url)
            .timing(&m.name, m.val, m.units.as_deref()),
        ResultCommand::Counter(m) => writer
            .scoped(m.resource, m.url)
            .counter(&m.name, m.val, m.units.as_deref()),
        ResultCommand::Log { level, message } => writer.log(level, message),
    }
}

/// HTTP store when a URL is configured
fn metric_store(config: &Config) -> Result<Option<Arc<dyn MetricStore>>> {
    let Some(ref url) = config.run.store.url else {
        return Ok(None);
    };

    let store = HttpMetricStore::new(
        url.clone(),
        config.identity().execution_id,
        Duration::from_secs(config.run.store.request_timeout_secs),
    )?;
    Ok(Some(Arc::new(store)))
}

fn build_coordinator(config: &Config, store: Option<Arc<dyn MetricStore>>) -> BarrierCoordinator {
    match store {
        Some(store) => BarrierCoordinator::new(store, config.identity().concurrent_clients)
            .with_poll_interval(Duration::from_millis(config.run.store.poll_interval_ms)),
        None => BarrierCoordinator::standalone(),
    }
}

fn event_watcher(config: &Config) -> EventWatcher {
    match config.run.events.file {
        Some(ref path) => EventWatcher::spawn(
            path.clone(),
            Duration::from_millis(config.run.events.tail_interval_ms),
        ),
        None => EventWatcher::local(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
