use crate::error::DispatchError;
use crate::params::{Params, Payload};
use async_trait::async_trait;
use std::net::IpAddr;

/// Name and one-line help text of an operation a protocol client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// One device wire protocol. Implementations open whatever connection they need inside
/// `invoke`, bound it by their own timeout, and release it before returning.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Short protocol name, e.g. `cgminer`.
    fn protocol(&self) -> &'static str;

    fn default_port(&self) -> u16;

    fn operations(&self) -> &'static [OperationInfo];

    /// Operation used by `scan` to tell whether a host speaks this protocol.
    fn probe_operation(&self) -> &'static str;

    async fn invoke(&self, host: IpAddr, port: u16, operation: &str, params: &Params) -> Result<Payload, DispatchError>;
}

pub fn find_operation<'a>(ops: &'a [OperationInfo], name: &str) -> Option<&'a OperationInfo> {
    ops.iter().find(|o| o.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPS: &[OperationInfo] = &[
        OperationInfo { name: "summary", description: "Get mining summary information" },
        OperationInfo { name: "restart", description: "Restart the miner" },
    ];

    #[test]
    fn find_operation_by_name() {
        assert_eq!(find_operation(OPS, "restart").map(|o| o.description), Some("Restart the miner"));
        assert!(find_operation(OPS, "reboot").is_none());
    }
}
