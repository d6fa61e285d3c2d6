//! CGMiner API client: one JSON command per TCP connection, reply read until the miner closes.

use async_trait::async_trait;
use miner_core::{DispatchError, OperationInfo, Params, Payload, ProtocolClient};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{error::Elapsed, timeout};
use tracing::{debug, trace};

pub const DEFAULT_PORT: u16 = 4028;

// Large `stats` replies from multi-board rigs stay well under this.
const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

pub const OPERATIONS: &[OperationInfo] = &[
    OperationInfo { name: "summary", description: "Get mining summary information" },
    OperationInfo { name: "devs", description: "Get information about all devices" },
    OperationInfo { name: "pools", description: "Get information about all pools" },
    OperationInfo { name: "stats", description: "Get detailed statistics" },
    OperationInfo { name: "version", description: "Get miner version information" },
    OperationInfo { name: "switchpool", description: "Switch to a different pool (requires --pool)" },
    OperationInfo { name: "enablepool", description: "Enable a pool (requires --pool)" },
    OperationInfo { name: "disablepool", description: "Disable a pool (requires --pool)" },
    OperationInfo { name: "addpool", description: "Add a new pool (requires --url, --user, --pass)" },
    OperationInfo { name: "removepool", description: "Remove a pool (requires --pool)" },
    OperationInfo { name: "restart", description: "Restart the miner" },
    OperationInfo { name: "quit", description: "Stop the miner" },
    OperationInfo { name: "custom", description: "Run a custom command (requires --cmd)" },
];

/// Encode a CGMiner API request. The parameter is always sent as a string.
pub fn build_request(command: &str, parameter: Option<&str>) -> Vec<u8> {
    let req = match parameter {
        Some(p) => json!({ "command": command, "parameter": p }),
        None => json!({ "command": command }),
    };
    req.to_string().into_bytes()
}

/// Escape `,` and `\` inside one field of a comma-separated parameter list.
pub fn escape_param(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        if c == ',' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Decode a reply and surface `STATUS` codes `E`/`F` as errors.
pub fn decode_response(command: &str, text: &str) -> Result<Value, DispatchError> {
    let v: Value = serde_json::from_str(text)
        .map_err(|e| DispatchError::transport(format!("malformed response to {}: {}", command, e)))?;
    check_status(command, &v)?;
    Ok(v)
}

fn check_status(command: &str, v: &Value) -> Result<(), DispatchError> {
    let status = match v.get("STATUS") {
        Some(Value::Array(items)) => items.first(),
        Some(obj @ Value::Object(_)) => Some(obj),
        _ => None,
    };
    if let Some(s) = status {
        let code = s.get("STATUS").and_then(Value::as_str).unwrap_or("");
        if code == "E" || code == "F" {
            let msg = s.get("Msg").and_then(Value::as_str).unwrap_or("unknown error");
            return Err(DispatchError::transport(format!("{} failed: {}", command, msg)));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CgminerClient {
    timeout: Duration,
}

impl CgminerClient {
    pub fn new(timeout: Duration) -> Self {
        CgminerClient { timeout }
    }

    fn bounded<T>(&self, r: Result<std::io::Result<T>, Elapsed>, what: &str, addr: SocketAddr) -> Result<T, DispatchError> {
        match r {
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(DispatchError::transport(format!("{} {}: {}", what, addr, e))),
            Ok(Ok(v)) => Ok(v),
        }
    }

    /// Send one command and return the reply text with the trailing NUL removed.
    pub async fn raw_call(&self, host: IpAddr, port: u16, command: &str, parameter: Option<&str>) -> Result<String, DispatchError> {
        let addr = SocketAddr::new(host, port);
        debug!(%addr, command, "cgminer request");
        let mut stream = self.bounded(timeout(self.timeout, TcpStream::connect(addr)).await, "dial tcp", addr)?;
        let req = build_request(command, parameter);
        self.bounded(timeout(self.timeout, stream.write_all(&req)).await, "write", addr)?;
        let mut buf = Vec::new();
        self.bounded(
            timeout(self.timeout, (&mut stream).take(MAX_RESPONSE_BYTES).read_to_end(&mut buf)).await,
            "read",
            addr,
        )?;
        let text = String::from_utf8_lossy(&buf);
        let text = text.trim_end_matches('\0').trim();
        trace!(%addr, bytes = buf.len(), "cgminer reply");
        if text.is_empty() {
            return Err(DispatchError::transport(format!("empty response from {}", addr)));
        }
        Ok(text.to_string())
    }

    pub async fn call(&self, host: IpAddr, port: u16, command: &str, parameter: Option<&str>) -> Result<Value, DispatchError> {
        let text = self.raw_call(host, port, command, parameter).await?;
        decode_response(command, &text)
    }

    /// `restart` and `quit` may answer with plain text; only an explicit error status fails.
    async fn acknowledge(&self, host: IpAddr, port: u16, command: &str) -> Result<(), DispatchError> {
        let text = self.raw_call(host, port, command, None).await?;
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => check_status(command, &v),
            Err(_) => Ok(()),
        }
    }

    async fn pool_command(&self, host: IpAddr, port: u16, command: &str, params: &Params, ack: &str) -> Result<Payload, DispatchError> {
        let id = params.require_u64(command, "pool")?;
        let pools = self.call(host, port, "pools", None).await.map_err(|e| match e {
            DispatchError::Transport(m) => DispatchError::transport(format!("failed to get pools: {}", m)),
            other => other,
        })?;
        let configured = pools.get("POOLS").and_then(Value::as_array).map_or(0, Vec::len) as u64;
        if id >= configured {
            return Err(DispatchError::parameter(command, format!("pool ID {} not found", id)));
        }
        self.call(host, port, command, Some(&id.to_string())).await?;
        Ok(Payload::message(ack))
    }
}

#[async_trait]
impl ProtocolClient for CgminerClient {
    fn protocol(&self) -> &'static str {
        "cgminer"
    }

    fn default_port(&self) -> u16 {
        DEFAULT_PORT
    }

    fn operations(&self) -> &'static [OperationInfo] {
        OPERATIONS
    }

    fn probe_operation(&self) -> &'static str {
        "version"
    }

    async fn invoke(&self, host: IpAddr, port: u16, operation: &str, params: &Params) -> Result<Payload, DispatchError> {
        match operation {
            "summary" | "devs" | "pools" | "stats" | "version" => {
                self.call(host, port, operation, None).await.map(Payload::Document)
            }
            "switchpool" => self.pool_command(host, port, operation, params, "Pool switched successfully").await,
            "enablepool" => self.pool_command(host, port, operation, params, "Pool enabled successfully").await,
            "disablepool" => self.pool_command(host, port, operation, params, "Pool disabled successfully").await,
            "removepool" => self.pool_command(host, port, operation, params, "Pool removed successfully").await,
            "addpool" => {
                let fields = [
                    params.require_str(operation, "url")?,
                    params.require_str(operation, "user")?,
                    params.require_str(operation, "pass")?,
                ];
                let parameter = fields.iter().map(|f| escape_param(f)).collect::<Vec<_>>().join(",");
                self.call(host, port, operation, Some(&parameter)).await?;
                Ok(Payload::message("Pool added successfully"))
            }
            "restart" => {
                self.acknowledge(host, port, operation).await?;
                Ok(Payload::message("Miner restarting"))
            }
            "quit" => {
                self.acknowledge(host, port, operation).await?;
                Ok(Payload::message("Miner quitting"))
            }
            "custom" => {
                let cmd = params.require_str(operation, "cmd")?;
                let args = match params.get("args") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                };
                let text = self.raw_call(host, port, cmd, args.as_deref()).await?;
                Ok(Payload::from_text(&text))
            }
            other => Err(DispatchError::UnknownOperation(other.to_string())),
        }
    }
}
