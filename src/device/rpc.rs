//! Boundary to the RPC transport used for controller devices.
//!
//! The wire protocol lives outside this crate. The registry only needs to
//! open a client for a `(host, port, target)` triple and to close it again.

use anyhow::{bail, Result};
use std::fmt;
use std::sync::Arc;

/// Which object a controller client binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcTarget {
    /// Use the controller's single exported target
    Auto,
    /// Bind to the named target
    Named(String),
}

impl From<Option<String>> for RpcTarget {
    fn from(name: Option<String>) -> Self {
        name.map_or(RpcTarget::Auto, RpcTarget::Named)
    }
}

impl fmt::Display for RpcTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcTarget::Auto => f.write_str("<auto>"),
            RpcTarget::Named(name) => f.write_str(name),
        }
    }
}

/// How to establish the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Connect now and fail if the controller is unreachable
    Blocking,
    /// Never fail on connection problems; calls on an unreachable
    /// controller are dropped by the client
    BestEffort,
}

/// Connected controller client.
pub trait RpcClient: Send + Sync {
    /// Close the underlying connection.
    fn close_rpc(&self) -> Result<()>;
}

/// Factory for controller clients.
pub trait RpcConnector: Send + Sync {
    /// Connect to the controller at `host:port`.
    fn connect(
        &self,
        host: &str,
        port: u16,
        target: RpcTarget,
        mode: ConnectMode,
    ) -> Result<Arc<dyn RpcClient>>;
}

/// Connector for workers without an RPC transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRpc;

impl RpcConnector for DisabledRpc {
    fn connect(
        &self,
        host: &str,
        port: u16,
        target: RpcTarget,
        _mode: ConnectMode,
    ) -> Result<Arc<dyn RpcClient>> {
        bail!(
            "no RPC transport configured, cannot reach controller {} at {}:{}",
            target,
            host,
            port
        )
    }
}
