use async_trait::async_trait;
use miner_core::{CancellationToken, DispatchError, Dispatcher, OperationInfo, Params, Payload, ProtocolClient};
use serde_json::json;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const OPS: &[OperationInfo] = &[OperationInfo { name: "summary", description: "Mining summary" }];

/// Answers from 10.0.0.1 only; every other host refuses the connection.
struct OneLiveMiner {
    calls: AtomicUsize,
}

#[async_trait]
impl ProtocolClient for OneLiveMiner {
    fn protocol(&self) -> &'static str {
        "fake"
    }

    fn default_port(&self) -> u16 {
        4028
    }

    fn operations(&self) -> &'static [OperationInfo] {
        OPS
    }

    fn probe_operation(&self) -> &'static str {
        "summary"
    }

    async fn invoke(&self, host: IpAddr, port: u16, _operation: &str, _params: &Params) -> Result<Payload, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if host.to_string() == "10.0.0.1" {
            Ok(Payload::Document(json!({"SUMMARY": [{"MHS av": 100000.0}]})))
        } else {
            Err(DispatchError::transport(format!("dial tcp {}:{}: connection refused", host, port)))
        }
    }
}

#[tokio::test]
async fn slash_30_reaches_both_usable_hosts() {
    let hosts = iprange::expand_many(&["10.0.0.0/30"]).unwrap();
    assert_eq!(hosts.to_string_list(), vec!["10.0.0.1", "10.0.0.2"]);

    let client = Arc::new(OneLiveMiner { calls: AtomicUsize::new(0) });
    let dispatcher = Dispatcher::new(client.clone(), 4);
    let report = dispatcher
        .run(&CancellationToken::new(), hosts.as_slice(), 4028, "summary", Params::new())
        .await;

    assert_eq!(report.len(), 2);
    assert_eq!(report.successes(), 1);
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    for o in &report {
        assert_eq!(o.port, 4028);
        assert_eq!(o.operation, "summary");
        match o.host.to_string().as_str() {
            "10.0.0.1" => assert!(o.payload().and_then(Payload::as_document).is_some()),
            "10.0.0.2" => assert!(matches!(o.error(), Some(DispatchError::Transport(m)) if m.contains("connection refused"))),
            other => panic!("unexpected host {}", other),
        }
    }
}

#[test]
fn bad_spec_stops_before_dispatch() {
    let err = iprange::expand_many(&["10.0.0.1", "10.0.0.9-10.0.0.3"]).unwrap_err();
    assert_eq!(err.spec(), Some("10.0.0.9-10.0.0.3"));
}
