//! Vnish firmware REST client (`http://<host>:<port>/api/v1`).

use anyhow::Result;
use async_trait::async_trait;
use miner_core::{DispatchError, OperationInfo, Params, Payload, ProtocolClient};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PORT: u16 = 80;

pub const OPERATIONS: &[OperationInfo] = &[
    OperationInfo { name: "info", description: "Get system information" },
    OperationInfo { name: "model", description: "Get model information" },
    OperationInfo { name: "status", description: "Get current miner status" },
    OperationInfo { name: "summary", description: "Get mining summary" },
    OperationInfo { name: "perf-summary", description: "Get performance summary" },
    OperationInfo { name: "chains", description: "Get hash chain information" },
    OperationInfo { name: "factory-info", description: "Get chain factory information" },
    OperationInfo { name: "chips", description: "Get per-chip information" },
    OperationInfo { name: "layout", description: "Get chip layout" },
    OperationInfo { name: "settings", description: "Get current settings" },
    OperationInfo { name: "metrics", description: "Get metrics" },
    OperationInfo { name: "autotune-presets", description: "Get available autotune presets" },
    OperationInfo { name: "logs", description: "Get logs of one type (requires --log-type)" },
    OperationInfo { name: "start", description: "Start mining" },
    OperationInfo { name: "stop", description: "Stop mining" },
    OperationInfo { name: "restart", description: "Restart mining" },
    OperationInfo { name: "pause", description: "Pause mining" },
    OperationInfo { name: "resume", description: "Resume mining" },
    OperationInfo { name: "switch-pool", description: "Switch to a different pool (requires --pool)" },
    OperationInfo { name: "reset-autotune", description: "Reset autotune for one chain (requires --chain)" },
    OperationInfo { name: "reset-all-autotune", description: "Reset autotune for all chains" },
    OperationInfo { name: "reboot", description: "Reboot the system" },
    OperationInfo { name: "find-miner", description: "Blink the miner LEDs (--blink=false to stop)" },
];

/// One REST call derived from an operation and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Acknowledgement returned for mutating calls instead of the response body.
    pub ack: Option<&'static str>,
}

impl Plan {
    fn get(path: &str) -> Self {
        Plan { method: Method::GET, path: path.to_string(), body: None, ack: None }
    }

    fn post(path: impl Into<String>, body: Option<Value>, ack: &'static str) -> Self {
        Plan { method: Method::POST, path: path.into(), body, ack: Some(ack) }
    }
}

/// Map an operation to its endpoint, validating parameters without touching the network.
pub fn plan(operation: &str, params: &Params) -> Result<Plan, DispatchError> {
    let p = match operation {
        "info" => Plan::get("/info"),
        "model" => Plan::get("/model"),
        "status" => Plan::get("/status"),
        "summary" => Plan::get("/summary"),
        "perf-summary" => Plan::get("/perf-summary"),
        "chains" => Plan::get("/chains"),
        "factory-info" => Plan::get("/chains/factory-info"),
        "chips" => Plan::get("/chips"),
        "layout" => Plan::get("/layout"),
        "settings" => Plan::get("/settings"),
        "metrics" => Plan::get("/metrics"),
        "autotune-presets" => Plan::get("/autotune/presets"),
        "logs" => {
            let kind = params.require_str(operation, "log_type")?;
            if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
                return Err(DispatchError::parameter(operation, format!("invalid log type '{}'", kind)));
            }
            Plan::get(&format!("/logs/{}", kind))
        }
        "start" => Plan::post("/mining/start", None, "Mining started"),
        "stop" => Plan::post("/mining/stop", None, "Mining stopped"),
        "restart" => Plan::post("/mining/restart", None, "Mining restarted"),
        "pause" => Plan::post("/mining/pause", None, "Mining paused"),
        "resume" => Plan::post("/mining/resume", None, "Mining resumed"),
        "switch-pool" => {
            let id = params.require_u64(operation, "pool")?;
            Plan::post("/mining/switch-pool", Some(json!({ "pool_id": id })), "Pool switched successfully")
        }
        "reset-autotune" => {
            let chain = params.require_u64(operation, "chain")?;
            Plan::post(format!("/autotune/reset?chain={}", chain), None, "Autotune reset")
        }
        "reset-all-autotune" => Plan::post("/autotune/reset-all", None, "Autotune reset on all chains"),
        "reboot" => Plan::post("/system/reboot", None, "Rebooting"),
        "find-miner" => {
            let blink = params.get_bool(operation, "blink")?.unwrap_or(true);
            Plan { method: Method::POST, path: "/find-miner".into(), body: Some(json!({ "blink": blink })), ack: None }
        }
        other => return Err(DispatchError::UnknownOperation(other.to_string())),
    };
    Ok(p)
}

/// Turn a non-success status into an error message, preferring the API's `{"error": ...}` body.
fn http_error(status: StatusCode, body: &str) -> DispatchError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    DispatchError::transport(format!("HTTP {}: {}", status.as_u16(), detail))
}

#[derive(Debug, Clone)]
pub struct VnishClient {
    http: Client,
    api_key: Option<String>,
    timeout: Duration,
}

impl VnishClient {
    pub fn new(timeout: Duration, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(format!("miner-cli/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(VnishClient { http, api_key: api_key.filter(|k| !k.is_empty()), timeout })
    }

    fn map_err(&self, e: reqwest::Error) -> DispatchError {
        if e.is_timeout() {
            DispatchError::Timeout(self.timeout)
        } else {
            DispatchError::transport(format!("request failed: {}", e))
        }
    }

    pub async fn execute(&self, host: IpAddr, port: u16, plan: &Plan) -> Result<Payload, DispatchError> {
        let url = format!("http://{}/api/v1{}", SocketAddr::new(host, port), plan.path);
        debug!(method = %plan.method, %url, "vnish request");
        let mut req = self.http.request(plan.method.clone(), &url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }
        if let Some(body) = &plan.body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| self.map_err(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_err(e))?;
        if status.is_client_error() || status.is_server_error() {
            return Err(http_error(status, &body));
        }
        match (plan.ack, body.trim()) {
            (Some(ack), _) => Ok(Payload::message(ack)),
            (None, "") => Ok(Payload::message("OK")),
            (None, text) => serde_json::from_str(text)
                .map(Payload::Document)
                .map_err(|e| DispatchError::transport(format!("failed to parse response: {}", e))),
        }
    }
}

#[async_trait]
impl ProtocolClient for VnishClient {
    fn protocol(&self) -> &'static str {
        "vnish"
    }

    fn default_port(&self) -> u16 {
        DEFAULT_PORT
    }

    fn operations(&self) -> &'static [OperationInfo] {
        OPERATIONS
    }

    fn probe_operation(&self) -> &'static str {
        "info"
    }

    async fn invoke(&self, host: IpAddr, port: u16, operation: &str, params: &Params) -> Result<Payload, DispatchError> {
        let plan = plan(operation, params)?;
        self.execute(host, port, &plan).await
    }
}
