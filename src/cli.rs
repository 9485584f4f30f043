use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use power_forwarder::model::PhysicalSource;

#[derive(Parser)]
#[command(name = "power-forwarder", version, about = "Per-node power sampling forwarder")]
pub struct Cli {
    /// Testbed site hosting the node (overrides POWER_FORWARDER_SITE).
    #[arg(long, global = true)]
    pub site: Option<String>,
    /// `stdout`, `file:///path.jsonl` or `postgres://…` (overrides POWER_FORWARDER_SINK).
    #[arg(long, global = true)]
    pub sink: Option<String>,
    #[arg(long, global = true)]
    pub login: Option<String>,
    #[arg(long, global = true)]
    pub password: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bounded window from the time-series power API.
    Kwapi(WindowArgs),
    /// Bounded window from the wattmeter hourly logs.
    Omegawatt(OmegawattArgs),
    /// Continuous polling of the node's PDU outlets until interrupted.
    Snmp(SnmpArgs),
}

#[derive(Args)]
pub struct WindowArgs {
    pub node: String,
    /// Epoch seconds, inclusive.
    #[arg(allow_negative_numbers = true)]
    pub start: i64,
    /// Epoch seconds, inclusive.
    #[arg(allow_negative_numbers = true)]
    pub stop: i64,
    /// Also write the filled slots to the sink.
    #[arg(long, default_value_t = false)]
    pub deliver: bool,
    /// Add the node name as `sensor` in the printed series.
    #[arg(long, default_value_t = false)]
    pub label: bool,
}

#[derive(Args)]
pub struct OmegawattArgs {
    #[command(flatten)]
    pub window: WindowArgs,
    #[command(flatten)]
    pub lookup: LookupArgs,
}

#[derive(Args)]
pub struct SnmpArgs {
    pub node: String,
    #[command(flatten)]
    pub lookup: LookupArgs,
}

#[derive(Args)]
pub struct LookupArgs {
    /// `ENDPOINT:PORT` pair (PDU address and outlet, or wattmeter uid and
    /// port). Repeatable; skips the reference API lookup.
    #[arg(long = "source", value_name = "ENDPOINT:PORT")]
    pub sources: Vec<String>,
    /// Cluster name when it cannot be derived from the node name.
    #[arg(long)]
    pub cluster: Option<String>,
}

impl LookupArgs {
    pub fn static_sources(&self) -> Result<Vec<PhysicalSource>> {
        self.sources.iter().map(|raw| parse_source(raw)).collect()
    }
}

pub fn parse_source(raw: &str) -> Result<PhysicalSource> {
    let (endpoint, port) = raw
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("source {raw:?} is not ENDPOINT:PORT"))?;
    if endpoint.is_empty() {
        return Err(anyhow!("source {raw:?} has an empty endpoint"));
    }
    let port = port
        .parse::<u32>()
        .with_context(|| format!("invalid port in source {raw:?}"))?;
    Ok(PhysicalSource::port(endpoint, port))
}
