//! Read-mostly object cache for one pool connection.
//!
//! The cache is fed by whatever keeps the connection in sync with the pool;
//! readers only ever get cloned snapshots. Objects may vanish between two
//! reads, so every lookup is an `Option` and a miss is a normal result.

use crate::xenapi::{Host, Network, OpaqueRef, Pif, Sr, Vbd, Vdi, Vif, Vm};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type Table<T> = RwLock<BTreeMap<OpaqueRef<T>, T>>;

/// A record class the cache knows how to store.
pub trait XenObject: Clone + Send + Sync + 'static {
    /// Class name as the platform spells it, used in messages.
    const CLASS: &'static str;

    fn opaque_ref(&self) -> &OpaqueRef<Self>;

    fn table(cache: &ObjectCache) -> &Table<Self>;
}

macro_rules! xen_object {
    ($ty:ty, $class:literal, $field:ident) => {
        impl XenObject for $ty {
            const CLASS: &'static str = $class;

            fn opaque_ref(&self) -> &OpaqueRef<Self> {
                &self.opaque_ref
            }

            fn table(cache: &ObjectCache) -> &Table<Self> {
                &cache.$field
            }
        }
    };
}

xen_object!(Vm, "VM", vms);
xen_object!(Vbd, "VBD", vbds);
xen_object!(Vdi, "VDI", vdis);
xen_object!(Sr, "SR", srs);
xen_object!(Vif, "VIF", vifs);
xen_object!(Network, "network", networks);
xen_object!(Host, "host", hosts);
xen_object!(Pif, "PIF", pifs);

#[derive(Debug, Default)]
pub struct ObjectCache {
    vms: Table<Vm>,
    vbds: Table<Vbd>,
    vdis: Table<Vdi>,
    srs: Table<Sr>,
    vifs: Table<Vif>,
    networks: Table<Network>,
    hosts: Table<Host>,
    pifs: Table<Pif>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned table still holds whole records; writers never leave one half-updated.
    fn read<T: XenObject>(&self) -> RwLockReadGuard<'_, BTreeMap<OpaqueRef<T>, T>> {
        T::table(self).read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<T: XenObject>(&self) -> RwLockWriteGuard<'_, BTreeMap<OpaqueRef<T>, T>> {
        T::table(self).write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a record.
    pub fn insert<T: XenObject>(&self, object: T) {
        self.write::<T>().insert(object.opaque_ref().clone(), object);
    }

    pub fn remove<T: XenObject>(&self, opaque_ref: &OpaqueRef<T>) -> Option<T> {
        self.write::<T>().remove(opaque_ref)
    }

    /// Best-effort lookup. Null references and records that are gone resolve
    /// to `None`.
    pub fn resolve<T: XenObject>(&self, opaque_ref: &OpaqueRef<T>) -> Option<T> {
        if opaque_ref.is_null() {
            return None;
        }
        self.read::<T>().get(opaque_ref).cloned()
    }

    /// Resolve a batch, silently dropping every reference that misses.
    pub fn resolve_all<T: XenObject>(&self, refs: &[OpaqueRef<T>]) -> Vec<T> {
        let table = self.read::<T>();
        refs.iter()
            .filter(|opaque_ref| !opaque_ref.is_null())
            .filter_map(|opaque_ref| table.get(opaque_ref).cloned())
            .collect()
    }

    /// First record, in reference order, matching `predicate`.
    pub fn find<T: XenObject>(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.read::<T>().values().find(|object| predicate(object)).cloned()
    }

    pub fn all<T: XenObject>(&self) -> Vec<T> {
        self.read::<T>().values().cloned().collect()
    }

    pub fn count<T: XenObject>(&self) -> usize {
        self.read::<T>().len()
    }
}
