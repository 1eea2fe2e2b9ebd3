//! Storage and network remapping handed to `VM.assert_can_migrate`.
//!
//! Both builders are pure reads of the cache. References that no longer
//! resolve are skipped: the pool is live and objects come and go while a
//! check runs.

use crate::cache::ObjectCache;
use crate::xenapi::{Network, OpaqueRef, Sr, VdiMap, VifMap, Vm};

/// Map every relocatable disk of `vm` to a destination repository.
///
/// A disk goes to the first candidate that is not the repository it already
/// lives on. The server skips the storage compatibility check for a disk whose
/// source and destination repository are the same, so choosing a different
/// one makes both sides get validated. Disks with no such candidate and disks
/// on ISO libraries are left out of the map.
pub fn build_vdi_map(cache: &ObjectCache, vm: &Vm, candidates: &[OpaqueRef<Sr>]) -> VdiMap {
    let mut vdi_map = VdiMap::new();

    for vbd_ref in &vm.vbds {
        let Some(vbd) = cache.resolve(vbd_ref) else {
            continue;
        };
        let Some(vdi) = cache.resolve(&vbd.vdi) else {
            continue;
        };
        let Some(sr) = cache.resolve(&vdi.sr) else {
            continue;
        };
        if sr.is_removable_media() {
            continue;
        }

        if let Some(target) = candidates.iter().find(|target| **target != sr.opaque_ref) {
            vdi_map.insert(vdi.opaque_ref, target.clone());
        }
    }

    vdi_map
}

/// Map every interface of `vm` onto `target_network`.
///
/// Within one pool there is nothing to remap, so the map is empty whenever
/// `same_pool` is set, and also when no target network was chosen.
pub fn build_vif_map(
    cache: &ObjectCache,
    vm: &Vm,
    target_network: Option<&OpaqueRef<Network>>,
    same_pool: bool,
) -> VifMap {
    if same_pool {
        return VifMap::new();
    }
    let Some(network) = target_network else {
        return VifMap::new();
    };

    cache
        .resolve_all(&vm.vifs)
        .into_iter()
        .map(|vif| (vif.opaque_ref, network.clone()))
        .collect()
}
