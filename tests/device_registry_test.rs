//! Integration tests for DeviceRegistry
//!
//! These tests verify the registry correctly:
//! - Creates local drivers through the catalog, passing itself and arguments
//! - Connects controller clients with the requested target and mode
//! - Closes handles in reverse creation order, surviving close failures
//! - Leaves caller-owned virtual devices alone

use anyhow::bail;
use rust_daq_worker::device::{
    ConnectMode, Device, DeviceCatalog, DeviceHandle, DeviceRegistry, RpcClient, RpcConnector,
    RpcTarget, TomlDeviceDb,
};
use rust_daq_worker::DaqError;
use std::any::Any;
use std::sync::{Arc, Mutex};
use tracing_test::traced_test;

type Journal = Arc<Mutex<Vec<String>>>;

/// Driver that records its close in a shared journal.
struct Recorder {
    name: String,
    journal: Journal,
    fail_close: bool,
    _depends_on: Option<DeviceHandle>,
}

impl Device for Recorder {
    fn close(&self) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push(self.name.clone());
        if self.fail_close {
            bail!("{} refused to close", self.name);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Panicker;

impl Device for Panicker {
    fn close(&self) -> anyhow::Result<()> {
        panic!("driver bug");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Catalog with `test.Recorder`: arguments `label`, optional `depends_on`
/// and `fail_close`.
fn catalog(journal: &Journal) -> DeviceCatalog {
    let journal = journal.clone();
    DeviceCatalog::new()
        .with_factory(
            "test",
            "Recorder",
            move |registry: &mut DeviceRegistry, args: &toml::Table| {
                let depends_on = match args.get("depends_on").and_then(|v| v.as_str()) {
                    Some(dep) => Some(registry.get(dep)?),
                    None => None,
                };
                Ok(Arc::new(Recorder {
                    name: args["label"].as_str().unwrap_or("?").to_string(),
                    journal: journal.clone(),
                    fail_close: args
                        .get("fail_close")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    _depends_on: depends_on,
                }) as Arc<dyn Device>)
            },
        )
        .with_factory(
            "test",
            "Panicker",
            |_: &mut DeviceRegistry, _: &toml::Table| Ok(Arc::new(Panicker) as Arc<dyn Device>),
        )
}

fn registry(db: &str, journal: &Journal) -> DeviceRegistry {
    let db: TomlDeviceDb = db.parse().unwrap();
    DeviceRegistry::new(Arc::new(db), Arc::new(catalog(journal)))
}

const CHAIN_DB: &str = r#"
a = { type = "local", module = "test", class = "Recorder", arguments = { label = "A" } }
b = { type = "local", module = "test", class = "Recorder", arguments = { label = "B", depends_on = "a", fail_close = true } }
c = { type = "local", module = "test", class = "Recorder", arguments = { label = "C", depends_on = "b" } }
"#;

#[test]
#[traced_test]
fn test_close_order_reverse_of_creation_despite_failure() {
    let journal = Journal::default();
    let mut reg = registry(CHAIN_DB, &journal);

    // Requesting C builds A and B first through the factory.
    reg.get("c").unwrap();
    assert_eq!(reg.active_devices(), ["a", "b", "c"]);

    let failures = reg.close_all();
    assert_eq!(*journal.lock().unwrap(), ["C", "B", "A"]);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "b");
    assert!(failures[0].error.to_string().contains("B refused to close"));
    assert!(reg.active_devices().is_empty());
    assert!(logs_contain("Exception when closing device"));
}

#[test]
fn test_close_all_twice_is_noop() {
    let journal = Journal::default();
    let mut reg = registry(CHAIN_DB, &journal);
    reg.get("a").unwrap();

    assert!(reg.close_all().is_empty());
    assert!(reg.close_all().is_empty());
    assert_eq!(*journal.lock().unwrap(), ["A"]);
}

#[test]
fn test_panicking_close_does_not_stop_teardown() {
    let journal = Journal::default();
    let mut reg = registry(
        r#"
a = { type = "local", module = "test", class = "Recorder", arguments = { label = "A" } }
p = { type = "local", module = "test", class = "Panicker" }
"#,
        &journal,
    );
    reg.get("a").unwrap();
    reg.get("p").unwrap();

    let failures = reg.close_all();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "p");
    assert!(failures[0].error.to_string().contains("driver bug"));
    assert_eq!(*journal.lock().unwrap(), ["A"]);
}

#[test]
fn test_drop_closes_remaining_devices() {
    let journal = Journal::default();
    {
        let mut reg = registry(CHAIN_DB, &journal);
        reg.get("a").unwrap();
    }
    assert_eq!(*journal.lock().unwrap(), ["A"]);
}

#[test]
fn test_virtual_device_is_never_closed() {
    let journal = Journal::default();
    let scheduler = DeviceHandle::Local(Arc::new(Recorder {
        name: "scheduler".into(),
        journal: journal.clone(),
        fail_close: false,
        _depends_on: None,
    }));
    let mut reg = registry(CHAIN_DB, &journal).with_virtual_device("scheduler", scheduler);

    let handle = reg.get("scheduler").unwrap();
    assert_eq!(handle.downcast_ref::<Recorder>().unwrap().name, "scheduler");
    reg.close_all();
    assert!(journal.lock().unwrap().is_empty());
}

#[test]
fn test_self_dependency_is_detected() {
    let journal = Journal::default();
    let mut reg = registry(
        r#"x = { type = "local", module = "test", class = "Recorder", arguments = { label = "X", depends_on = "x" } }"#,
        &journal,
    );
    let err = reg.get("x").unwrap_err();
    assert!(matches!(err, DaqError::DeviceCreation { ref name, .. } if name == "x"));
    assert!(reg.active_devices().is_empty());
}

#[test]
fn test_unknown_type_tag_surfaces_from_get() {
    let journal = Journal::default();
    let mut reg = registry(r#"x = { type = "grpc", host = "h" }"#, &journal);
    assert!(matches!(reg.get("x"), Err(DaqError::Configuration(_))));
}

// ============================================================================
// Controllers
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Connection {
    host: String,
    port: u16,
    target: RpcTarget,
    mode: ConnectMode,
}

struct FakeClient {
    closed: Journal,
    label: String,
}

impl RpcClient for FakeClient {
    fn close_rpc(&self) -> anyhow::Result<()> {
        self.closed.lock().unwrap().push(self.label.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeConnector {
    connections: Mutex<Vec<Connection>>,
    closed: Journal,
}

impl RpcConnector for FakeConnector {
    fn connect(
        &self,
        host: &str,
        port: u16,
        target: RpcTarget,
        mode: ConnectMode,
    ) -> anyhow::Result<Arc<dyn RpcClient>> {
        if host == "unreachable" && mode == ConnectMode::Blocking {
            bail!("connection refused");
        }
        self.connections.lock().unwrap().push(Connection {
            host: host.to_string(),
            port,
            target,
            mode,
        });
        Ok(Arc::new(FakeClient {
            closed: self.closed.clone(),
            label: format!("{}:{}", host, port),
        }))
    }
}

const CONTROLLER_DB: &str = r#"
lda = { type = "controller", host = "::1", port = 3253 }
pdq = { type = "controller", host = "10.0.0.2", port = 4000, target_name = "pdq0", best_effort = true }
attenuator = "lda"
down = { type = "controller", host = "unreachable", port = 1 }
"#;

fn controller_registry(connector: &Arc<FakeConnector>) -> DeviceRegistry {
    let journal = Journal::default();
    registry(CONTROLLER_DB, &journal).with_rpc(connector.clone())
}

#[test]
fn test_controller_target_and_mode() {
    let connector = Arc::new(FakeConnector::default());
    let mut reg = controller_registry(&connector);

    assert!(reg.get("attenuator").unwrap().as_controller().is_some());
    reg.get("pdq").unwrap();

    let connections = connector.connections.lock().unwrap().clone();
    assert_eq!(
        connections,
        [
            Connection {
                host: "::1".into(),
                port: 3253,
                target: RpcTarget::Auto,
                mode: ConnectMode::Blocking,
            },
            Connection {
                host: "10.0.0.2".into(),
                port: 4000,
                target: RpcTarget::Named("pdq0".into()),
                mode: ConnectMode::BestEffort,
            },
        ]
    );
}

#[test]
fn test_controllers_closed_via_rpc_in_reverse_order() {
    let connector = Arc::new(FakeConnector::default());
    let mut reg = controller_registry(&connector);
    reg.get("lda").unwrap();
    reg.get("pdq").unwrap();

    assert!(reg.close_all().is_empty());
    assert_eq!(
        *connector.closed.lock().unwrap(),
        ["10.0.0.2:4000", "::1:3253"]
    );
}

#[test]
fn test_failed_connection_is_not_cached() {
    let connector = Arc::new(FakeConnector::default());
    let mut reg = controller_registry(&connector);

    assert!(matches!(
        reg.get("down"),
        Err(DaqError::DeviceCreation { .. })
    ));
    assert!(reg.active_devices().is_empty());
}

#[test]
fn test_get_device_db_passthrough() {
    let connector = Arc::new(FakeConnector::default());
    let reg = controller_registry(&connector);
    let db = reg.get_device_db().unwrap();
    assert_eq!(db.len(), 4);
    assert!(db.contains_key("attenuator"));
}
