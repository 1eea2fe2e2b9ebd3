//! Pool connection abstraction.
//!
//! The control plane is reached through this trait only. Implementations own
//! transport, authentication and timeouts; the checks in this crate await
//! each call to completion and never retry.

use crate::cache::ObjectCache;
use crate::error::Failure;
use crate::xenapi::{
    ApiOptions, ConnectionId, Host, Network, OpaqueRef, ReceiveMapping, Session, VdiMap, VifMap, Vm,
};
use async_trait::async_trait;

/// Result type for remote control-plane calls
pub type ApiResult<T> = std::result::Result<T, Failure>;

/// Unified interface for a connection to one pool
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identity of the pool behind this connection
    fn id(&self) -> &ConnectionId;

    /// Live object cache for the pool
    fn cache(&self) -> &ObjectCache;

    /// The connection's own logged-in session
    fn session(&self) -> &Session;

    /// Log in again with the connection's credentials without prompting
    async fn duplicate_session(&self) -> ApiResult<Session>;

    /// Release a session obtained from [`duplicate_session`](Self::duplicate_session)
    async fn logout(&self, session: &Session) -> ApiResult<()>;

    /// `host.migrate_receive`: prepare `host` to receive a VM over `network`
    async fn migrate_receive(
        &self,
        session: &Session,
        host: &OpaqueRef<Host>,
        network: &OpaqueRef<Network>,
        options: &ApiOptions,
    ) -> ApiResult<ReceiveMapping>;

    /// `VM.assert_can_migrate`: `Ok` only when the described migration would go through
    #[allow(clippy::too_many_arguments)]
    async fn assert_can_migrate(
        &self,
        session: &Session,
        vm: &OpaqueRef<Vm>,
        dest: &ReceiveMapping,
        live: bool,
        vdi_map: &VdiMap,
        vif_map: &VifMap,
        options: &ApiOptions,
    ) -> ApiResult<()>;

    /// Whether `other` talks to the same pool as this connection
    fn same_pool(&self, other: &dyn Connection) -> bool {
        self.id() == other.id()
    }
}
