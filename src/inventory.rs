//! Pool inventories and the in-memory connection built from them.
//!
//! An inventory is a TOML snapshot of one or more pools: their VMs, disks,
//! repositories, interfaces, networks and hosts. [`InventoryConnection`]
//! serves such a snapshot through the [`Connection`] trait so a check can be
//! run offline. Remote faults are scripted per pool; every remote call is
//! recorded so the caller can see exactly what was asked of the platform.
//!
//! ```toml
//! [pools.pool-a]
//!
//! [[pools.pool-a.vm]]
//! ref = "OpaqueRef:vm-1"
//! name_label = "web-01"
//! vbds = ["OpaqueRef:vbd-1"]
//!
//! [pools.pool-a.faults.assert_can_migrate]
//! code = "VM_HAS_PCI_ATTACHED"
//! params = ["OpaqueRef:vm-1"]
//! detail = "The VM has one or more PCI devices passed through."
//! ```

use crate::cache::ObjectCache;
use crate::connection::{ApiResult, Connection};
use crate::error::{Failure, PreflightError};
use crate::xenapi::{
    ApiOptions, ConnectionId, Host, Network, OpaqueRef, Pif, ReceiveMapping, Session, Sr, Vbd,
    Vdi, VdiMap, Vif, VifMap, Vm,
};
use crate::{Result, log_debug};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub pools: BTreeMap<String, PoolInventory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolInventory {
    #[serde(default)]
    pub vm: Vec<Vm>,
    #[serde(default)]
    pub vbd: Vec<Vbd>,
    #[serde(default)]
    pub vdi: Vec<Vdi>,
    #[serde(default)]
    pub sr: Vec<Sr>,
    #[serde(default)]
    pub vif: Vec<Vif>,
    #[serde(default)]
    pub network: Vec<Network>,
    #[serde(default)]
    pub host: Vec<Host>,
    #[serde(default)]
    pub pif: Vec<Pif>,
    #[serde(default)]
    pub faults: ScriptedFaults,
}

/// Faults a pool answers with instead of succeeding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedFaults {
    #[serde(default)]
    pub duplicate_session: Option<Failure>,
    #[serde(default)]
    pub migrate_receive: Option<Failure>,
    #[serde(default)]
    pub assert_can_migrate: Option<Failure>,
}

impl Inventory {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let inventory: Inventory = toml::from_str(contents)?;
        Ok(inventory)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| PreflightError::InventoryError(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn pool(&self, name: &str) -> Result<&PoolInventory> {
        self.pools
            .get(name)
            .ok_or_else(|| PreflightError::PoolNotFound(name.to_string()))
    }

    pub fn list_pools(&self) -> Vec<&String> {
        self.pools.keys().collect()
    }

    /// Open an in-memory connection serving pool `name`.
    pub fn connect(&self, name: &str) -> Result<InventoryConnection> {
        let pool = self.pool(name)?;
        Ok(InventoryConnection::from_pool(name, pool))
    }
}

/// A remote call as the connection received it.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    MigrateReceive {
        session: Session,
        host: OpaqueRef<Host>,
        network: OpaqueRef<Network>,
        options: ApiOptions,
    },
    AssertCanMigrate {
        session: Session,
        vm: OpaqueRef<Vm>,
        dest: ReceiveMapping,
        live: bool,
        vdi_map: VdiMap,
        vif_map: VifMap,
        options: ApiOptions,
    },
}

pub struct InventoryConnection {
    id: ConnectionId,
    cache: ObjectCache,
    session: Session,
    faults: ScriptedFaults,
    calls: Mutex<Vec<RecordedCall>>,
    sessions_issued: AtomicUsize,
    sessions_released: AtomicUsize,
}

impl InventoryConnection {
    /// An empty pool called `id`.
    pub fn new(id: impl Into<String>) -> Self {
        let id = ConnectionId(id.into());
        Self {
            session: new_session(&id),
            id,
            cache: ObjectCache::new(),
            faults: ScriptedFaults::default(),
            calls: Mutex::new(Vec::new()),
            sessions_issued: AtomicUsize::new(0),
            sessions_released: AtomicUsize::new(0),
        }
    }

    pub fn from_pool(id: impl Into<String>, pool: &PoolInventory) -> Self {
        let conn = Self::new(id).with_faults(pool.faults.clone());
        let cache = conn.cache();
        pool.vm.iter().cloned().for_each(|o| cache.insert(o));
        pool.vbd.iter().cloned().for_each(|o| cache.insert(o));
        pool.vdi.iter().cloned().for_each(|o| cache.insert(o));
        pool.sr.iter().cloned().for_each(|o| cache.insert(o));
        pool.vif.iter().cloned().for_each(|o| cache.insert(o));
        pool.network.iter().cloned().for_each(|o| cache.insert(o));
        pool.host.iter().cloned().for_each(|o| cache.insert(o));
        pool.pif.iter().cloned().for_each(|o| cache.insert(o));
        log_debug!(
            pool = %conn.id,
            vms = cache.count::<Vm>(),
            hosts = cache.count::<Host>(),
            "Loaded pool inventory"
        );
        conn
    }

    pub fn with_faults(mut self, faults: ScriptedFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Every remote call received so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of sessions handed out by `duplicate_session`.
    pub fn sessions_issued(&self) -> usize {
        self.sessions_issued.load(Ordering::SeqCst)
    }

    /// Number of sessions handed back through `logout`.
    pub fn sessions_released(&self) -> usize {
        self.sessions_released.load(Ordering::SeqCst)
    }

    fn record(&self, call: RecordedCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn check_session(&self, session: &Session) -> ApiResult<()> {
        if session.connection == self.id {
            Ok(())
        } else {
            Err(Failure::new(
                "SESSION_INVALID",
                vec![session.id.clone()],
                format!("Session {} does not belong to pool {}", session.id, self.id),
            ))
        }
    }
}

fn new_session(connection: &ConnectionId) -> Session {
    Session {
        id: format!("OpaqueRef:{}", Uuid::new_v4()),
        connection: connection.clone(),
    }
}

fn handle_invalid<T>(class: &str, opaque_ref: &OpaqueRef<T>) -> Failure {
    Failure::new(
        Failure::HANDLE_INVALID,
        vec![class.to_string(), opaque_ref.to_string()],
        format!("The {} handle {} is invalid.", class, opaque_ref),
    )
}

#[async_trait]
impl Connection for InventoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    fn session(&self) -> &Session {
        &self.session
    }

    async fn duplicate_session(&self) -> ApiResult<Session> {
        if let Some(failure) = &self.faults.duplicate_session {
            return Err(failure.clone());
        }
        self.sessions_issued.fetch_add(1, Ordering::SeqCst);
        Ok(new_session(&self.id))
    }

    async fn logout(&self, session: &Session) -> ApiResult<()> {
        self.check_session(session)?;
        self.sessions_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn migrate_receive(
        &self,
        session: &Session,
        host: &OpaqueRef<Host>,
        network: &OpaqueRef<Network>,
        options: &ApiOptions,
    ) -> ApiResult<ReceiveMapping> {
        self.record(RecordedCall::MigrateReceive {
            session: session.clone(),
            host: host.clone(),
            network: network.clone(),
            options: options.clone(),
        });
        self.check_session(session)?;
        if let Some(failure) = &self.faults.migrate_receive {
            return Err(failure.clone());
        }

        let record = self
            .cache
            .resolve(host)
            .ok_or_else(|| handle_invalid("host", host))?;
        if self.cache.resolve(network).is_none() {
            return Err(handle_invalid("network", network));
        }

        let mut mapping = ReceiveMapping::new();
        mapping.insert("host".to_string(), host.to_string());
        mapping.insert("master".to_string(), record.address.clone());
        mapping.insert("session_id".to_string(), session.id.clone());
        mapping.insert(
            "xenops".to_string(),
            format!("http://{}/services/xenops?session_id={}", record.address, session.id),
        );
        mapping.insert(
            "SM".to_string(),
            format!("http://{}/services/SM?session_id={}", record.address, session.id),
        );
        Ok(mapping)
    }

    async fn assert_can_migrate(
        &self,
        session: &Session,
        vm: &OpaqueRef<Vm>,
        dest: &ReceiveMapping,
        live: bool,
        vdi_map: &VdiMap,
        vif_map: &VifMap,
        options: &ApiOptions,
    ) -> ApiResult<()> {
        self.record(RecordedCall::AssertCanMigrate {
            session: session.clone(),
            vm: vm.clone(),
            dest: dest.clone(),
            live,
            vdi_map: vdi_map.clone(),
            vif_map: vif_map.clone(),
            options: options.clone(),
        });
        self.check_session(session)?;
        if self.cache.resolve(vm).is_none() {
            return Err(handle_invalid("VM", vm));
        }
        match &self.faults.assert_can_migrate {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = r#"
[pools.pool-a]

[[pools.pool-a.vm]]
ref = "OpaqueRef:vm-1"
name_label = "web-01"
vbds = ["OpaqueRef:vbd-1"]
vifs = ["OpaqueRef:vif-1"]

[[pools.pool-a.vbd]]
ref = "OpaqueRef:vbd-1"
vm = "OpaqueRef:vm-1"
vdi = "OpaqueRef:vdi-1"

[[pools.pool-a.vdi]]
ref = "OpaqueRef:vdi-1"
sr = "OpaqueRef:sr-1"

[[pools.pool-a.sr]]
ref = "OpaqueRef:sr-1"
type = "nfs"
shared = true

[[pools.pool-a.sr]]
ref = "OpaqueRef:sr-cifs"
type = "cifs"

[pools.pool-b]

[[pools.pool-b.host]]
ref = "OpaqueRef:host-b1"
address = "10.0.1.10"

[pools.pool-b.faults.assert_can_migrate]
code = "VM_REQUIRES_SR"
params = ["OpaqueRef:vm-1", "OpaqueRef:sr-1"]
detail = "You attempted to run a VM on a host which doesn't have access to an SR needed by the VM."
"#;

    #[test]
    fn parses_pools_and_faults() {
        let inventory = Inventory::from_str(POOL).unwrap();
        assert_eq!(inventory.list_pools(), vec!["pool-a", "pool-b"]);

        let a = inventory.pool("pool-a").unwrap();
        assert_eq!(a.vm[0].vbds.len(), 1);
        assert!(a.vbd[0].device.is_empty());
        assert_eq!(a.faults, ScriptedFaults::default());

        let b = inventory.pool("pool-b").unwrap();
        let fault = b.faults.assert_can_migrate.as_ref().unwrap();
        assert_eq!(fault.code, "VM_REQUIRES_SR");
        assert_eq!(fault.params.len(), 2);
    }

    #[test]
    fn unknown_pool_is_an_error() {
        let inventory = Inventory::from_str(POOL).unwrap();
        assert!(matches!(
            inventory.connect("pool-z"),
            Err(PreflightError::PoolNotFound(name)) if name == "pool-z"
        ));
    }

    #[test]
    fn connection_serves_pool_records() {
        let inventory = Inventory::from_str(POOL).unwrap();
        let conn = inventory.connect("pool-a").unwrap();

        assert_eq!(conn.id().to_string(), "pool-a");
        let vm = conn
            .cache()
            .resolve(&OpaqueRef::<Vm>::new("OpaqueRef:vm-1"))
            .unwrap();
        assert_eq!(vm.name_label, "web-01");
        assert_eq!(conn.cache().count::<Sr>(), 2);
    }

    #[tokio::test]
    async fn foreign_session_is_rejected() {
        let a = InventoryConnection::new("pool-a");
        let b = InventoryConnection::new("pool-b");

        let failure = a
            .assert_can_migrate(
                b.session(),
                &"OpaqueRef:vm-1".into(),
                &ReceiveMapping::new(),
                true,
                &VdiMap::new(),
                &VifMap::new(),
                &ApiOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.code, "SESSION_INVALID");
        assert_eq!(a.calls().len(), 1);
    }

    #[tokio::test]
    async fn receive_for_unknown_host_is_handle_invalid() {
        let conn = InventoryConnection::new("pool-b");
        let session = conn.duplicate_session().await.unwrap();

        let failure = conn
            .migrate_receive(
                &session,
                &"OpaqueRef:nope".into(),
                &"OpaqueRef:net".into(),
                &ApiOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.code, Failure::HANDLE_INVALID);
        assert_eq!(failure.params, vec!["host".to_string(), "OpaqueRef:nope".to_string()]);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.toml");

        let inventory = Inventory::from_str(POOL).unwrap();
        inventory.save_to_file(&path).unwrap();
        let reloaded = Inventory::from_file(&path).unwrap();

        assert_eq!(reloaded.list_pools(), inventory.list_pools());
        assert_eq!(
            reloaded.pool("pool-b").unwrap().faults,
            inventory.pool("pool-b").unwrap().faults
        );
        let types: Vec<&str> = reloaded
            .pool("pool-a")
            .unwrap()
            .sr
            .iter()
            .map(|sr| sr.sr_type.as_str())
            .collect();
        assert_eq!(types, vec!["nfs", "cifs"]);
    }
}
