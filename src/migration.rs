use crate::connection::Connection;
use crate::error::{Failure, PreflightError};
use crate::observer::{CheckEvent, CheckObserver, CheckState, TracingObserver};
use crate::remap::{build_vdi_map, build_vif_map};
use crate::session::negotiate;
use crate::xenapi::{ApiOptions, Host, Network, OpaqueRef, Sr, VdiMap, VifMap, Vm};
use crate::{Result, log_debug, log_error};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Where a VM would go: the destination pool plus the storage and network
/// choices the caller made for it.
#[derive(Clone)]
pub struct MigrationTarget {
    pub destination: Arc<dyn Connection>,
    /// Destination repositories in the caller's order of preference.
    pub target_srs: Vec<OpaqueRef<Sr>>,
    pub target_network: Option<OpaqueRef<Network>>,
}

impl MigrationTarget {
    pub fn new(destination: Arc<dyn Connection>, target_srs: Vec<OpaqueRef<Sr>>) -> Self {
        Self {
            destination,
            target_srs,
            target_network: None,
        }
    }

    pub fn with_network(mut self, network: OpaqueRef<Network>) -> Self {
        self.target_network = Some(network);
        self
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "failure", rename_all = "snake_case")]
pub enum Feasibility {
    Feasible,
    Infeasible(Failure),
}

impl Feasibility {
    pub fn is_feasible(&self) -> bool {
        matches!(self, Feasibility::Feasible)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Feasibility::Feasible => None,
            Feasibility::Infeasible(failure) => Some(failure),
        }
    }
}

/// The remapping that was put to the platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationRemap {
    pub vdi_map: VdiMap,
    pub vif_map: VifMap,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub check_id: Uuid,
    pub vm: OpaqueRef<Vm>,
    pub vm_name: String,
    pub host: OpaqueRef<Host>,
    pub state: CheckState,
    /// Absent when negotiation failed before any mapping was built.
    pub remap: Option<MigrationRemap>,
    pub outcome: Feasibility,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CheckReport {
    pub fn is_feasible(&self) -> bool {
        self.outcome.is_feasible()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Migration check {} (VM: {}, host: {})",
            self.check_id, self.vm_name, self.host
        )?;
        if let Some(remap) = &self.remap {
            writeln!(f, "\nStorage mapping:")?;
            if remap.vdi_map.is_empty() {
                writeln!(f, "  (none)")?;
            }
            for (vdi, sr) in &remap.vdi_map {
                writeln!(f, "  - {} -> {}", vdi, sr)?;
            }
            writeln!(f, "\nNetwork mapping:")?;
            if remap.vif_map.is_empty() {
                writeln!(f, "  (none)")?;
            }
            for (vif, network) in &remap.vif_map {
                writeln!(f, "  - {} -> {}", vif, network)?;
            }
        }
        match &self.outcome {
            Feasibility::Feasible => writeln!(f, "\n✅ Migration can proceed"),
            Feasibility::Infeasible(failure) => {
                writeln!(f, "\n⚠ Migration not possible [{}]:", failure.code)?;
                writeln!(f, "  {}", failure)
            }
        }
    }
}

/// A single `VM.assert_can_migrate` pre-flight check.
///
/// Build one per VM and destination host and run it once: [`run`](Self::run)
/// consumes the check. It opens its own session on the destination and logs
/// it out when done, so any number of checks can run side by side against
/// the same VM.
pub struct MigrationCheck {
    check_id: Uuid,
    vm: Vm,
    source: Arc<dyn Connection>,
    host: OpaqueRef<Host>,
    target: MigrationTarget,
    observer: Arc<dyn CheckObserver>,
    state: CheckState,
}

impl MigrationCheck {
    pub fn new(
        vm: Vm,
        source: Arc<dyn Connection>,
        host: OpaqueRef<Host>,
        target: MigrationTarget,
    ) -> Self {
        Self {
            check_id: Uuid::new_v4(),
            vm,
            source,
            host,
            target,
            observer: Arc::new(TracingObserver),
            state: CheckState::Pending,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CheckObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn id(&self) -> Uuid {
        self.check_id
    }

    /// Run the check on the tokio runtime in the background.
    pub fn spawn(self) -> JoinHandle<CheckReport> {
        tokio::spawn(self.run())
    }

    pub async fn check(self) -> Feasibility {
        self.run().await.outcome
    }

    pub async fn run(mut self) -> CheckReport {
        let started_at = Utc::now();
        let destination = Arc::clone(&self.target.destination);

        self.transition(CheckState::Negotiating, None);
        let negotiated = negotiate(destination.as_ref(), &self.host).await;
        let negotiation = match negotiated {
            Ok(negotiation) => negotiation,
            Err(failure) => return self.finish(started_at, None, Err(failure)),
        };

        self.transition(CheckState::Mapping, None);
        let same_pool = self.source.same_pool(destination.as_ref());
        let remap = MigrationRemap {
            vdi_map: build_vdi_map(self.source.cache(), &self.vm, &self.target.target_srs),
            vif_map: build_vif_map(
                self.source.cache(),
                &self.vm,
                self.target.target_network.as_ref(),
                same_pool,
            ),
        };
        log_debug!(
            check_id = %self.check_id,
            vdis = remap.vdi_map.len(),
            vifs = remap.vif_map.len(),
            same_pool,
            "Built migration remap"
        );

        self.transition(CheckState::Asserting, None);
        let result = self
            .source
            .assert_can_migrate(
                self.source.session(),
                &self.vm.opaque_ref,
                &negotiation.receive_mapping,
                true,
                &remap.vdi_map,
                &remap.vif_map,
                &ApiOptions::new(),
            )
            .await;
        negotiation.release(destination.as_ref()).await;

        self.finish(started_at, Some(remap), result)
    }

    fn finish(
        mut self,
        started_at: DateTime<Utc>,
        remap: Option<MigrationRemap>,
        result: std::result::Result<(), Failure>,
    ) -> CheckReport {
        let outcome = match result {
            Ok(()) => {
                self.transition(CheckState::Succeeded, None);
                Feasibility::Feasible
            }
            Err(failure) => {
                self.transition(CheckState::Failed, Some(&failure));
                Feasibility::Infeasible(failure)
            }
        };

        CheckReport {
            check_id: self.check_id,
            vm: self.vm.opaque_ref,
            vm_name: self.vm.name_label,
            host: self.host,
            state: self.state,
            remap,
            outcome,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn transition(&mut self, state: CheckState, failure: Option<&Failure>) {
        self.state = state;
        self.observer.on_transition(&CheckEvent {
            check_id: self.check_id,
            vm: self.vm.opaque_ref.clone(),
            host: self.host.clone(),
            state,
            failure: failure.cloned(),
            at: Utc::now(),
        });
    }
}

/// Check `vm` against every host in `hosts`, at most `max_concurrent` at a
/// time. Reports come back in the order of `hosts`.
pub async fn sweep_hosts(
    vm: Vm,
    source: Arc<dyn Connection>,
    hosts: Vec<OpaqueRef<Host>>,
    target: MigrationTarget,
    observer: Arc<dyn CheckObserver>,
    max_concurrent: usize,
) -> Result<Vec<CheckReport>> {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));

    let handles: Vec<JoinHandle<CheckReport>> = hosts
        .into_iter()
        .map(|host| {
            let check = MigrationCheck::new(vm.clone(), Arc::clone(&source), host, target.clone())
                .with_observer(Arc::clone(&observer));
            let permits = Arc::clone(&permits);
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                check.run().await
            })
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        let report = handle.await.map_err(|e| {
            log_error!("Migration check task failed: {}", e);
            PreflightError::TaskFailed(e.to_string())
        })?;
        reports.push(report);
    }
    Ok(reports)
}
