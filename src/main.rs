mod cli;

use crate::cli::{Cli, Commands, LookupArgs, OmegawattArgs, SnmpArgs, WindowArgs};
use anyhow::{bail, Context, Result};
use clap::Parser;
use power_forwarder::aggregate::SourceAggregator;
use power_forwarder::config::Config;
use power_forwarder::metadata::{
    LookupMode, MetadataResolver, ReferenceApiResolver, StaticResolver,
};
use power_forwarder::model::LogicalPoint;
use power_forwarder::observe::{PollObserver, TracingObserver};
use power_forwarder::scheduler::{Scheduler, TokioClock};
use power_forwarder::sink::SinkAdapter;
use power_forwarder::source::{
    build_http_client, KwapiReader, OmegawattReader, SnmpReader, SourceReader,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Exit status on any failure: the unsigned form of `-1`.
const FAILURE_EXIT: u8 = 255;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,power_forwarder=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing() {
        eprintln!("power-forwarder: {err}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "power-forwarder failed");
            ExitCode::from(FAILURE_EXIT)
        }
    }
}

struct Runtime {
    config: Config,
    site: String,
    http: reqwest::Client,
    sink: SinkAdapter,
    observer: Arc<dyn PollObserver>,
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    if cli.site.is_some() {
        config.site = cli.site;
    }
    if let Some(sink) = cli.sink {
        config.sink = sink;
    }
    if cli.login.is_some() {
        config.login = cli.login;
    }
    if cli.password.is_some() {
        config.password = cli.password;
    }

    let site = config
        .site
        .clone()
        .context("--site or POWER_FORWARDER_SITE is required")?;
    let http = build_http_client(config.http_timeout, config.http_insecure)
        .context("failed to build http client")?;
    let sink = SinkAdapter::from_url(&config.sink, &config.sink_table, config.http_timeout)?;
    tracing::info!(site = %site, sink = sink.kind(), "power-forwarder starting");

    let runtime = Runtime {
        config,
        site,
        http,
        sink,
        observer: Arc::new(TracingObserver),
    };

    match cli.command {
        Commands::Kwapi(args) => run_kwapi(runtime, args).await,
        Commands::Omegawatt(args) => run_omegawatt(runtime, args).await,
        Commands::Snmp(args) => run_snmp(runtime, args).await,
    }
}

async fn resolve_point(
    rt: &Runtime,
    node: &str,
    lookup: &LookupArgs,
    mode: LookupMode,
) -> Result<LogicalPoint> {
    let static_sources = lookup.static_sources()?;
    let sources = if static_sources.is_empty() {
        ReferenceApiResolver::new(
            rt.http.clone(),
            &rt.config.api_base,
            &rt.site,
            rt.config.auth(),
            mode,
        )
        .with_cluster(lookup.cluster.clone().or_else(|| rt.config.cluster.clone()))
        .resolve(node)
        .await
    } else {
        StaticResolver::new(static_sources).resolve(node).await
    }
    .with_context(|| format!("failed to resolve power sources of {node}"))?;

    for source in &sources {
        tracing::info!(node, source = %source, "resolved power source");
    }
    Ok(LogicalPoint::new(node, sources))
}

/// The series goes to stdout, so delivered records need somewhere else to go.
fn check_delivery(deliver: bool, sink: &SinkAdapter) -> Result<()> {
    if deliver && matches!(sink, SinkAdapter::Stdout(_)) {
        bail!("--deliver needs a file or postgres sink; stdout carries the series");
    }
    Ok(())
}

async fn run_bounded<R: SourceReader>(
    rt: Runtime,
    reader: R,
    point: LogicalPoint,
    args: &WindowArgs,
) -> Result<()> {
    let settings = rt.config.scheduler_settings();
    let aggregator = SourceAggregator::prepare(reader, point).await?;
    let mut scheduler = Scheduler::new(aggregator, rt.sink, TokioClock, settings, rt.observer);
    let series = scheduler.run_bounded(args.start, args.stop, args.deliver).await?;

    let sensor = args.label.then_some(args.node.as_str());
    println!("{}", series.to_json(sensor));
    Ok(())
}

async fn run_kwapi(rt: Runtime, args: WindowArgs) -> Result<()> {
    check_delivery(args.deliver, &rt.sink)?;
    let reader = KwapiReader::new(rt.http.clone(), &rt.config.api_base, rt.config.auth());
    let point = LogicalPoint::new(&args.node, vec![KwapiReader::source_for(&rt.site, &args.node)]);
    run_bounded(rt, reader, point, &args).await
}

async fn run_omegawatt(rt: Runtime, args: OmegawattArgs) -> Result<()> {
    check_delivery(args.window.deliver, &rt.sink)?;
    let reader = OmegawattReader::for_site(rt.http.clone(), &rt.config.wattmetre_base, &rt.site);
    let point =
        resolve_point(&rt, &args.window.node, &args.lookup, LookupMode::WattmeterPorts).await?;
    run_bounded(rt, reader, point, &args.window).await
}

async fn run_snmp(rt: Runtime, args: SnmpArgs) -> Result<()> {
    let reader = SnmpReader::new(rt.config.snmp_community.clone(), rt.config.snmp_timeout);
    let point = resolve_point(&rt, &args.node, &args.lookup, LookupMode::PduOutlets).await?;
    let settings = rt.config.scheduler_settings();
    let aggregator = SourceAggregator::prepare(reader, point).await?;
    let mut scheduler = Scheduler::new(aggregator, rt.sink, TokioClock, settings, rt.observer);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
            Err(err) => tracing::warn!(error = %err, "failed to listen for shutdown signal"),
        }
    });

    let stats = scheduler.run_continuous(&cancel).await?;
    tracing::info!(
        node = %args.node,
        cycles = stats.cycles,
        delivered = stats.delivered,
        stale = stats.stale,
        degraded = stats.degraded,
        rejected = stats.rejected,
        "polling stopped"
    );
    Ok(())
}
