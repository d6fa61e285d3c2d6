use anyhow::{bail, Context, Result};
use cgminer::CgminerClient;
use clap::{Args, Parser};
use miner_core::{find_operation, CancellationToken, Dispatcher, Params, ProtocolClient, Report};
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};
use vnish::VnishClient;

mod config;
mod logging;
mod output;

use config::{OutputFormat, Overrides, Protocol, RunConfig};
use output::RunInfo;

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Debug, Parser)]
#[command(name = "miner-cli", version, about = "Query and control fleets of ASIC miners")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./miner-cli.yaml if present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Operation to run on every host. `list` prints the available operations
    /// and `scan` finds responding miners.
    operation: String,
    /// Address specs: single IP, start-end range or CIDR block. Repeatable, comma-separated.
    #[arg(short = 'i', long = "ips", value_delimiter = ',')]
    ips: Vec<String>,
    /// API port (default depends on the protocol)
    #[arg(short, long, value_parser = iprange::parse_port)]
    port: Option<u16>,
    /// Per-call timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,
    /// Concurrent workers; zero or negative selects the built-in default
    #[arg(short, long, allow_negative_numbers = true)]
    workers: Option<i64>,
    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,
    /// Show response details and info-level logs
    #[arg(short, long)]
    verbose: bool,
    /// Miner API protocol
    #[arg(long, value_enum)]
    protocol: Option<Protocol>,
    /// API key sent to Vnish firmware
    #[arg(long, env = "VNISH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[command(flatten)]
    op: OperationArgs,
}

/// Parameters consumed by individual operations.
#[derive(Debug, Default, Args)]
struct OperationArgs {
    /// Pool index (switchpool, enablepool, disablepool, removepool, switch-pool)
    #[arg(long)]
    pool: Option<u64>,
    /// Pool URL (addpool)
    #[arg(long)]
    url: Option<String>,
    /// Pool worker name (addpool)
    #[arg(long)]
    user: Option<String>,
    /// Pool password (addpool)
    #[arg(long)]
    pass: Option<String>,
    /// Raw API command (custom)
    #[arg(long)]
    cmd: Option<String>,
    /// Raw API command arguments (custom)
    #[arg(long)]
    args: Option<String>,
    /// Hash board index (reset-autotune)
    #[arg(long)]
    chain: Option<u64>,
    /// Log to fetch (logs)
    #[arg(long = "log-type")]
    log_type: Option<String>,
    /// Blink the locator LED (find-miner)
    #[arg(long)]
    blink: Option<bool>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            protocol: self.protocol,
            ips: self.ips.clone(),
            port: self.port,
            timeout: self.timeout,
            workers: self.workers,
            output: self.output,
            verbose: self.verbose,
            api_key: self.api_key.clone(),
        }
    }
}

fn params_from(op: &OperationArgs) -> Params {
    let mut p = Params::new();
    if let Some(v) = op.pool { p.insert("pool", v); }
    if let Some(v) = &op.url { p.insert("url", v.as_str()); }
    if let Some(v) = &op.user { p.insert("user", v.as_str()); }
    if let Some(v) = &op.pass { p.insert("pass", v.as_str()); }
    if let Some(v) = &op.cmd { p.insert("cmd", v.as_str()); }
    if let Some(v) = &op.args { p.insert("args", v.as_str()); }
    if let Some(v) = op.chain { p.insert("chain", v); }
    if let Some(v) = &op.log_type { p.insert("log_type", v.as_str()); }
    if let Some(v) = op.blink { p.insert("blink", v); }
    p
}

fn build_client(cfg: &RunConfig) -> Result<Arc<dyn ProtocolClient>> {
    Ok(match cfg.protocol {
        Protocol::Cgminer => Arc::new(CgminerClient::new(cfg.timeout)),
        Protocol::Vnish => Arc::new(VnishClient::new(cfg.timeout, cfg.api_key.clone()).context("failed to build HTTP client")?),
    })
}

/// Budget for a whole run: one timeout per round of `workers` hosts, plus one.
fn run_deadline(timeout: Duration, hosts: usize, workers: usize) -> Duration {
    let rounds = hosts / workers.max(1) + 1;
    timeout.saturating_mul(u32::try_from(rounds).unwrap_or(u32::MAX))
}

fn banner(scan: bool, operation: &str, hosts: usize) -> String {
    if scan {
        format!("Scanning {} hosts for active miners...", hosts)
    } else {
        format!("Executing '{}' on {} hosts...", operation, hosts)
    }
}

async fn dispatch(dispatcher: &Dispatcher, deadline: Duration, hosts: &[IpAddr], port: u16, operation: &str, params: Params) -> Report {
    let cancel = CancellationToken::new();
    let watchdog = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let sleep = tokio::time::sleep(deadline);
            tokio::pin!(sleep);
            tokio::select! {
                _ = &mut sleep => warn!(?deadline, "run deadline reached, cancelling remaining hosts"),
                r = tokio::signal::ctrl_c() => match r {
                    Ok(()) => warn!("interrupted, cancelling remaining hosts"),
                    Err(e) => {
                        warn!(error = %e, "cannot listen for Ctrl-C");
                        (&mut sleep).await;
                        warn!(?deadline, "run deadline reached, cancelling remaining hosts");
                    }
                },
            }
            cancel.cancel();
        }
    });
    let report = dispatcher.run(&cancel, hosts, port, operation, params).await;
    watchdog.abort();
    report
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_cfg = config::load_config(cli.config.as_deref())?;
    let cfg = RunConfig::resolve(cli.overrides(), file_cfg);
    logging::init(cfg.verbose);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let client = build_client(&cfg)?;
    if cli.operation == "list" {
        output::render_operations(client.protocol(), client.operations(), &mut out)?;
        return Ok(());
    }

    let scan = cli.operation == "scan";
    let operation = if scan { client.probe_operation() } else { cli.operation.as_str() };
    if find_operation(client.operations(), operation).is_none() {
        bail!("unknown command '{}' for protocol {} (run 'miner-cli list' to see available commands)", operation, client.protocol());
    }
    if cfg.ips.is_empty() {
        bail!("no IP ranges specified, use -i flag");
    }
    let hosts = iprange::expand_many(&cfg.ips).context("failed to parse IP ranges")?;
    if hosts.is_empty() {
        bail!("no valid IPs in specified ranges");
    }

    let port = cfg.port.unwrap_or_else(|| client.default_port());
    let dispatcher = Dispatcher::new(client, cfg.workers);
    let deadline = run_deadline(cfg.timeout, hosts.count(), dispatcher.workers());
    let params = params_from(&cli.op);
    info!(protocol = dispatcher.client().protocol(), operation, hosts = hosts.count(), port, workers = dispatcher.workers(), ?deadline, "starting run");
    if cfg.output != OutputFormat::Json {
        eprintln!("{}", banner(scan, operation, hosts.count()));
    }

    let run = RunInfo { started_at: now_rfc3339() };
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(dispatch(&dispatcher, deadline, hosts.as_slice(), port, operation, params));

    if scan && cfg.output != OutputFormat::Json {
        output::render_scan(&report, &mut out)?;
    } else {
        output::formatter(cfg.output, cfg.verbose).render(&report, &run, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_repeated_and_comma_separated_ips() {
        let cli = Cli::try_parse_from(["miner-cli", "summary", "-i", "10.0.0.1,10.0.0.2", "-i", "192.168.1.0/24"]).unwrap();
        assert_eq!(cli.operation, "summary");
        assert_eq!(cli.ips, vec!["10.0.0.1", "10.0.0.2", "192.168.1.0/24"]);
        assert_eq!(cli.port, None);
    }

    #[test]
    fn accepts_negative_workers_and_rejects_bad_ports() {
        let cli = Cli::try_parse_from(["miner-cli", "pools", "-i", "10.0.0.1", "-w", "-3", "-p", "4029"]).unwrap();
        assert_eq!(cli.workers, Some(-3));
        assert_eq!(cli.port, Some(4029));
        assert!(Cli::try_parse_from(["miner-cli", "pools", "-p", "0"]).is_err());
        assert!(Cli::try_parse_from(["miner-cli", "pools", "-p", "70000"]).is_err());
    }

    #[test]
    fn operation_flags_become_params() {
        let cli = Cli::try_parse_from([
            "miner-cli", "addpool", "-i", "10.0.0.1", "--url", "stratum+tcp://pool:3333", "--user", "w1", "--pass", "x", "--pool", "2",
        ])
        .unwrap();
        let p = params_from(&cli.op);
        assert_eq!(p.get("url"), Some(&json!("stratum+tcp://pool:3333")));
        assert_eq!(p.get("user"), Some(&json!("w1")));
        assert_eq!(p.get("pool"), Some(&json!(2)));
        assert_eq!(p.get("chain"), None);
        assert!(params_from(&OperationArgs::default()).is_empty());
    }

    #[test]
    fn blink_and_log_type_flags() {
        let cli = Cli::try_parse_from(["miner-cli", "find-miner", "--protocol", "vnish", "--blink", "false", "--log-type", "miner"]).unwrap();
        assert_eq!(cli.protocol, Some(Protocol::Vnish));
        let p = params_from(&cli.op);
        assert_eq!(p.get("blink"), Some(&json!(false)));
        assert_eq!(p.get("log_type"), Some(&json!("miner")));
    }

    #[test]
    fn version_is_a_cgminer_operation() {
        let cli = Cli::try_parse_from(["miner-cli", "version", "-i", "10.0.0.1"]).unwrap();
        assert_eq!(cli.operation, "version");
        let client = build_client(&RunConfig::resolve(cli.overrides(), None)).unwrap();
        assert!(find_operation(client.operations(), &cli.operation).is_some());
        assert_eq!(client.probe_operation(), "version");

        let err = Cli::try_parse_from(["miner-cli", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn scan_banner_names_the_sweep() {
        assert_eq!(banner(true, "version", 254), "Scanning 254 hosts for active miners...");
        assert_eq!(banner(false, "pools", 3), "Executing 'pools' on 3 hosts...");
    }

    #[test]
    fn deadline_scales_with_rounds() {
        let t = Duration::from_secs(2);
        assert_eq!(run_deadline(t, 1, 255), Duration::from_secs(2));
        assert_eq!(run_deadline(t, 254, 10), Duration::from_secs(52));
        assert_eq!(run_deadline(t, 10, 0), Duration::from_secs(22));
    }

    #[test]
    fn clients_match_protocol() {
        let cfg = RunConfig::resolve(Overrides::default(), None);
        let c = build_client(&cfg).unwrap();
        assert_eq!(c.protocol(), "cgminer");
        assert_eq!(c.default_port(), 4028);
        let cfg = RunConfig::resolve(Overrides { protocol: Some(Protocol::Vnish), ..Default::default() }, None);
        let c = build_client(&cfg).unwrap();
        assert_eq!(c.default_port(), 80);
        assert_eq!(c.probe_operation(), "info");
    }
}
