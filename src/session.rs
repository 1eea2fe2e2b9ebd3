//! Receive-side negotiation with the destination host.

use crate::connection::{ApiResult, Connection};
use crate::error::Failure;
use crate::xenapi::{ApiOptions, Host, Network, OpaqueRef, Pif, ReceiveMapping, Session};
use crate::{log_debug, log_warn};

/// A completed receive-side handshake.
///
/// The destination session stays open until [`release`](Self::release): the
/// receive mapping refers to it, so it must outlive the assertion.
#[derive(Debug)]
pub struct Negotiation {
    pub session: Session,
    pub receive_mapping: ReceiveMapping,
}

impl Negotiation {
    pub async fn release(self, destination: &dyn Connection) {
        release(destination, &self.session).await;
    }
}

/// Ask `host` to prepare to receive a VM and return the parameters it hands
/// back for `VM.assert_can_migrate`.
///
/// The call goes out on a session duplicated from `destination`, over the
/// network of the host's management interface, with no options. Any fault
/// from the platform is returned unchanged. On failure the session has
/// already been released.
pub async fn negotiate(
    destination: &dyn Connection,
    host: &OpaqueRef<Host>,
) -> ApiResult<Negotiation> {
    let network = management_network(destination, host)?;

    let session = destination.duplicate_session().await?;
    log_debug!(
        host = %host,
        network = %network,
        pool = %destination.id(),
        "Calling migrate_receive"
    );

    let received = destination
        .migrate_receive(&session, host, &network, &ApiOptions::new())
        .await;
    match received {
        Ok(receive_mapping) => Ok(Negotiation {
            session,
            receive_mapping,
        }),
        Err(failure) => {
            release(destination, &session).await;
            Err(failure)
        }
    }
}

// A logout fault never changes the outcome of a check.
async fn release(destination: &dyn Connection, session: &Session) {
    if let Err(failure) = destination.logout(session).await {
        log_warn!(
            pool = %destination.id(),
            code = %failure.code,
            "Could not release session: {}",
            failure
        );
    }
}

/// Network behind the host's primary management interface.
pub fn management_network(
    destination: &dyn Connection,
    host: &OpaqueRef<Host>,
) -> ApiResult<OpaqueRef<Network>> {
    let cache = destination.cache();

    let pif = cache
        .find::<Pif>(|pif| pif.management && &pif.host == host)
        .ok_or_else(|| {
            Failure::new(
                Failure::HOST_HAS_NO_MANAGEMENT_IP,
                vec![host.to_string()],
                format!("Host {} has no management interface configured", host),
            )
        })?;

    cache
        .resolve(&pif.network)
        .map(|network: Network| network.opaque_ref)
        .ok_or_else(|| {
            Failure::new(
                Failure::HANDLE_INVALID,
                vec!["network".to_string(), pif.network.to_string()],
                format!("Management network {} of host {} no longer exists", pif.network, host),
            )
        })
}
