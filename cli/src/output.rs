use crate::config::OutputFormat;
use anyhow::Result;
use colored::Colorize;
use miner_core::{Outcome, OperationInfo, Payload, Report};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};

const DETAIL_WIDTH: usize = 60;

/// Context shared by every rendering of one run.
#[derive(Debug, Clone)]
pub struct RunInfo {
    /// RFC 3339 timestamp taken just before dispatch.
    pub started_at: String,
}

pub trait Formatter {
    fn render(&self, report: &Report, run: &RunInfo, out: &mut dyn Write) -> Result<()>;
}

pub fn formatter(format: OutputFormat, verbose: bool) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Color => Box::new(ColorFormatter { verbose }),
        OutputFormat::Json => Box::new(JsonFormatter { pretty: verbose }),
        OutputFormat::Table => Box::new(TableFormatter { verbose }),
        OutputFormat::Summary => Box::new(SummaryFormatter { verbose }),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// Outcomes ordered by address; the report itself is in completion order.
fn by_host(report: &Report) -> Vec<&Outcome> {
    let mut v: Vec<&Outcome> = report.iter().collect();
    v.sort_by_key(|o| (o.host, o.port));
    v
}

fn payload_text(p: &Payload) -> String {
    match p {
        Payload::Message(m) => m.clone(),
        Payload::Document(v) => v.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut t: String = s.chars().take(max.saturating_sub(3)).collect();
    t.push_str("...");
    t
}

fn duration_ms(o: &Outcome) -> u64 {
    o.elapsed.as_millis() as u64
}

pub struct ColorFormatter {
    verbose: bool,
}

impl Formatter for ColorFormatter {
    fn render(&self, report: &Report, _run: &RunInfo, out: &mut dyn Write) -> Result<()> {
        for o in by_host(report) {
            let target = format!("{}:{}", o.host, o.port);
            match &o.result {
                Ok(p) => {
                    writeln!(out, "{} {} ({} ms)", "✓".green(), target.bold(), duration_ms(o))?;
                    if self.verbose {
                        let body = match p {
                            Payload::Message(m) => m.clone(),
                            Payload::Document(v) => serde_json::to_string_pretty(v)?,
                        };
                        for line in body.lines() {
                            writeln!(out, "    {}", line)?;
                        }
                    }
                }
                Err(e) => writeln!(out, "{} {}: {}", "✗".red(), target.bold(), e.to_string().red())?,
            }
        }
        writeln!(out)?;
        writeln!(
            out,
            "{} {}  {} {}",
            "Success:".green(),
            report.successes(),
            "Failed:".red(),
            report.failures()
        )?;
        Ok(())
    }
}

pub struct JsonFormatter {
    pretty: bool,
}

fn outcome_json(o: &Outcome, run: &RunInfo) -> Value {
    let mut obj = json!({
        "ip": o.host.to_string(),
        "port": o.port,
        "command": o.operation,
        "duration": format!("{:?}", o.elapsed),
        "started_at": run.started_at,
    });
    match &o.result {
        Ok(p) => obj["response"] = serde_json::to_value(p).unwrap_or(Value::Null),
        Err(e) => obj["error"] = Value::String(e.to_string()),
    }
    obj
}

impl Formatter for JsonFormatter {
    fn render(&self, report: &Report, run: &RunInfo, out: &mut dyn Write) -> Result<()> {
        let arr: Vec<Value> = report.iter().map(|o| outcome_json(o, run)).collect();
        let arr = Value::Array(arr);
        if self.pretty {
            writeln!(out, "{}", serde_json::to_string_pretty(&arr)?)?;
        } else {
            writeln!(out, "{}", serde_json::to_string(&arr)?)?;
        }
        Ok(())
    }
}

pub struct TableFormatter {
    verbose: bool,
}

impl Formatter for TableFormatter {
    fn render(&self, report: &Report, _run: &RunInfo, out: &mut dyn Write) -> Result<()> {
        let rows: Vec<[String; 4]> = by_host(report)
            .into_iter()
            .filter(|o| self.verbose || o.is_success())
            .map(|o| {
                let (status, detail) = match &o.result {
                    Ok(p) => ("ok".to_string(), payload_text(p)),
                    Err(e) => (e.kind().to_string(), e.to_string()),
                };
                [format!("{}:{}", o.host, o.port), status, format!("{}ms", duration_ms(o)), truncate(&detail, DETAIL_WIDTH)]
            })
            .collect();
        let header = ["HOST", "STATUS", "TIME", "DETAILS"];
        let mut widths = header.map(str::len);
        for r in &rows {
            for (w, cell) in widths.iter_mut().zip(r.iter()) {
                *w = (*w).max(cell.chars().count());
            }
        }
        writeln!(out, "{:<w0$}  {:<w1$}  {:>w2$}  {}", header[0], header[1], header[2], header[3], w0 = widths[0], w1 = widths[1], w2 = widths[2])?;
        for r in &rows {
            writeln!(out, "{:<w0$}  {:<w1$}  {:>w2$}  {}", r[0], r[1], r[2], r[3], w0 = widths[0], w1 = widths[1], w2 = widths[2])?;
        }
        writeln!(out)?;
        writeln!(out, "{}/{} hosts responded", report.successes(), report.len())?;
        Ok(())
    }
}

pub struct SummaryFormatter {
    verbose: bool,
}

/// Group key: the /24 network for IPv4, the address itself otherwise.
fn subnet_of(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) & 0xFFFF_FF00)),
        other => other,
    }
}

fn summary_fields(o: &Outcome) -> Option<&Map<String, Value>> {
    o.payload()?.as_document()?.get("SUMMARY")?.get(0)?.as_object()
}

fn field(fields: &Map<String, Value>, key: &str) -> f64 {
    fields.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn ghs(mhs: f64) -> String {
    format!("{:.2} GH/s", mhs / 1000.0)
}

impl Formatter for SummaryFormatter {
    fn render(&self, report: &Report, _run: &RunInfo, out: &mut dyn Write) -> Result<()> {
        let mut groups: BTreeMap<IpAddr, Vec<&Outcome>> = BTreeMap::new();
        for o in by_host(report) {
            groups.entry(subnet_of(o.host)).or_default().push(o);
        }
        let mut fleet_mhs = 0.0;
        for (net, hosts) in &groups {
            let label = if net.is_ipv4() { format!("{}/24", net) } else { net.to_string() };
            let up = hosts.iter().filter(|o| o.is_success()).count();
            writeln!(out, "{} ({}/{} responding)", label.bold(), up, hosts.len())?;
            let mut subnet_mhs = 0.0;
            for o in hosts {
                match (summary_fields(o), &o.result) {
                    (Some(f), _) => {
                        let av = field(f, "MHS av");
                        subnet_mhs += av;
                        writeln!(
                            out,
                            "  {:<15}  5s {:>14}  avg {:>14}  accepted {:>8}  hw errors {:>6}",
                            o.host.to_string(),
                            ghs(field(f, "MHS 5s")),
                            ghs(av),
                            field(f, "Accepted") as u64,
                            field(f, "Hardware Errors") as u64
                        )?;
                    }
                    (None, Ok(p)) => writeln!(out, "  {:<15}  {}", o.host.to_string(), truncate(&payload_text(p), DETAIL_WIDTH))?,
                    (None, Err(e)) if self.verbose => writeln!(out, "  {:<15}  {}", o.host.to_string(), e.to_string().red())?,
                    (None, Err(_)) => {}
                }
            }
            writeln!(out, "  subnet total: {}", ghs(subnet_mhs))?;
            fleet_mhs += subnet_mhs;
        }
        writeln!(out)?;
        writeln!(out, "Fleet: {}/{} responding, {}", report.successes(), report.len(), ghs(fleet_mhs))?;
        Ok(())
    }
}

pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn render(&self, report: &Report, run: &RunInfo, out: &mut dyn Write) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(["ip", "port", "command", "status", "duration_ms", "response", "error", "started_at"])?;
        for o in report.iter() {
            let (status, response, error) = match &o.result {
                Ok(p) => ("ok", payload_text(p), String::new()),
                Err(e) => (e.kind(), String::new(), e.to_string()),
            };
            wtr.write_record([
                o.host.to_string(),
                o.port.to_string(),
                o.operation.clone(),
                status.to_string(),
                duration_ms(o).to_string(),
                response,
                error,
                run.started_at.clone(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Output of the `scan` command: the hosts that answered the probe.
pub fn render_scan(report: &Report, out: &mut dyn Write) -> Result<()> {
    let found: Vec<&Outcome> = by_host(report).into_iter().filter(|o| o.is_success()).collect();
    writeln!(out, "Active Miners Found: {}", found.len())?;
    for o in found {
        writeln!(out, "  {}:{}", o.host, o.port)?;
    }
    Ok(())
}

/// Output of the `list` command.
pub fn render_operations(protocol: &str, ops: &[OperationInfo], out: &mut dyn Write) -> Result<()> {
    writeln!(out, "Available commands for {}:", protocol)?;
    let width = ops.iter().map(|op| op.name.len()).max().unwrap_or(0);
    for op in ops {
        writeln!(out, "  {:<width$}  {}", op.name, op.description, width = width)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use miner_core::DispatchError;
    use std::time::Duration;

    fn outcome(host: &str, result: Result<Payload, DispatchError>) -> Outcome {
        Outcome { host: host.parse().unwrap(), port: 4028, operation: "summary".into(), result, elapsed: Duration::from_millis(12) }
    }

    fn summary_doc(mhs: f64, accepted: u64) -> Payload {
        Payload::Document(json!({
            "STATUS": [{"STATUS": "S"}],
            "SUMMARY": [{"MHS av": mhs, "MHS 5s": mhs, "Accepted": accepted, "Hardware Errors": 3}]
        }))
    }

    fn sample() -> Report {
        Report::from(vec![
            outcome("10.0.1.7", Ok(summary_doc(90_000.0, 10))),
            outcome("10.0.0.2", Err(DispatchError::Transport("dial tcp 10.0.0.2:4028: connection refused".into()))),
            outcome("10.0.0.1", Ok(summary_doc(100_000.0, 42))),
        ])
    }

    fn run() -> RunInfo {
        RunInfo { started_at: "2026-01-01T00:00:00Z".into() }
    }

    fn render(format: OutputFormat, verbose: bool, report: &Report) -> String {
        colored::control::set_override(false);
        let mut buf = Vec::new();
        formatter(format, verbose).render(report, &run(), &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn json_has_one_entry_per_outcome() {
        let text = render(OutputFormat::Json, false, &sample());
        let v: Value = serde_json::from_str(&text).unwrap();
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        let failed = arr.iter().find(|e| e["ip"] == "10.0.0.2").unwrap();
        assert!(failed["error"].as_str().unwrap().contains("connection refused"));
        assert!(failed.get("response").is_none());
        let ok = arr.iter().find(|e| e["ip"] == "10.0.0.1").unwrap();
        assert_eq!(ok["response"]["SUMMARY"][0]["Accepted"], 42);
        assert_eq!(ok["command"], "summary");
        assert!(ok.get("error").is_none());
    }

    #[test]
    fn color_lists_hosts_in_address_order_with_totals() {
        let text = render(OutputFormat::Color, false, &sample());
        let first = text.find("10.0.0.1:4028").unwrap();
        let second = text.find("10.0.0.2:4028").unwrap();
        let third = text.find("10.0.1.7:4028").unwrap();
        assert!(first < second && second < third);
        assert!(text.contains("✗ 10.0.0.2:4028: dial tcp"));
        assert!(text.contains("Success: 2  Failed: 1"));
        assert!(!text.contains("SUMMARY"));
    }

    #[test]
    fn color_verbose_prints_payload() {
        let text = render(OutputFormat::Color, true, &sample());
        assert!(text.contains("\"SUMMARY\""));
    }

    #[test]
    fn table_hides_failures_unless_verbose() {
        let quiet = render(OutputFormat::Table, false, &sample());
        assert!(quiet.starts_with("HOST"));
        assert!(!quiet.contains("10.0.0.2"));
        assert!(quiet.contains("2/3 hosts responded"));
        let loud = render(OutputFormat::Table, true, &sample());
        assert!(loud.contains("10.0.0.2:4028  transport"));
    }

    #[test]
    fn summary_groups_by_subnet() {
        let text = render(OutputFormat::Summary, false, &sample());
        let a = text.find("10.0.0.0/24 (1/2 responding)").unwrap();
        let b = text.find("10.0.1.0/24 (1/1 responding)").unwrap();
        assert!(a < b);
        assert!(text.contains("subnet total: 100.00 GH/s"));
        assert!(text.contains("accepted       42"));
        assert!(text.contains("Fleet: 2/3 responding, 190.00 GH/s"));
    }

    #[test]
    fn csv_has_header_and_rows() {
        let text = render(OutputFormat::Csv, false, &sample());
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("ip,port,command,status,duration_ms,response,error,started_at"));
        assert_eq!(lines.count(), 3);
        assert!(text.contains("10.0.0.2,4028,summary,transport,12,,"));
    }

    #[test]
    fn scan_lists_responders() {
        let mut buf = Vec::new();
        render_scan(&sample(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "Active Miners Found: 2\n  10.0.0.1:4028\n  10.0.1.7:4028\n");
    }

    #[test]
    fn operations_are_listed() {
        let ops = [
            OperationInfo { name: "summary", description: "Mining summary" },
            OperationInfo { name: "switchpool", description: "Switch active pool" },
        ];
        let mut buf = Vec::new();
        render_operations("cgminer", &ops, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("Available commands for cgminer:\n"));
        assert!(text.contains("  summary     Mining summary\n"));
    }
}
