//! Control-plane object model.
//!
//! Every object is addressed by an [`OpaqueRef`] typed by the class it points
//! at, so a disk reference can never be handed where a repository reference
//! is expected. Records are snapshots read out of a connection's
//! [`ObjectCache`](crate::cache::ObjectCache); this crate never writes them back.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

/// Reference value the platform uses for "points at nothing".
pub const NULL_REF: &str = "OpaqueRef:NULL";

/// Typed handle to a control-plane object.
pub struct OpaqueRef<T> {
    raw: String,
    _class: PhantomData<fn() -> T>,
}

impl<T> OpaqueRef<T> {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            _class: PhantomData,
        }
    }

    pub fn null() -> Self {
        Self::new(NULL_REF)
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_empty() || self.raw == NULL_REF
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl<T> Default for OpaqueRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for OpaqueRef<T> {
    fn clone(&self) -> Self {
        Self::new(self.raw.clone())
    }
}

impl<T> PartialEq for OpaqueRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for OpaqueRef<T> {}

impl<T> PartialOrd for OpaqueRef<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for OpaqueRef<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> Hash for OpaqueRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for OpaqueRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.raw)
    }
}

impl<T> fmt::Display for OpaqueRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl<T> From<&str> for OpaqueRef<T> {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl<T> Serialize for OpaqueRef<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de, T> Deserialize<'de> for OpaqueRef<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(OpaqueRef::new)
    }
}

/// Identity of a pool connection. Two objects share a connection when they
/// live in the same pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated session on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub connection: ConnectionId,
}

pub type ApiOptions = BTreeMap<String, String>;

/// Opaque parameters returned by `migrate_receive` on the destination host.
pub type ReceiveMapping = BTreeMap<String, String>;

pub type VdiMap = BTreeMap<OpaqueRef<Vdi>, OpaqueRef<Sr>>;
pub type VifMap = BTreeMap<OpaqueRef<Vif>, OpaqueRef<Network>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    #[serde(rename = "ref")]
    pub opaque_ref: OpaqueRef<Vm>,
    #[serde(default)]
    pub name_label: String,
    #[serde(default)]
    pub vbds: Vec<OpaqueRef<Vbd>>,
    #[serde(default)]
    pub vifs: Vec<OpaqueRef<Vif>>,
}

/// Attachment of a disk (or an empty drive) to a VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vbd {
    #[serde(rename = "ref")]
    pub opaque_ref: OpaqueRef<Vbd>,
    #[serde(default)]
    pub vm: OpaqueRef<Vm>,
    #[serde(default)]
    pub vdi: OpaqueRef<Vdi>,
    #[serde(default)]
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vdi {
    #[serde(rename = "ref")]
    pub opaque_ref: OpaqueRef<Vdi>,
    #[serde(default)]
    pub name_label: String,
    pub sr: OpaqueRef<Sr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sr {
    #[serde(rename = "ref")]
    pub opaque_ref: OpaqueRef<Sr>,
    #[serde(default)]
    pub name_label: String,
    #[serde(rename = "type")]
    pub sr_type: SrType,
    #[serde(default)]
    pub shared: bool,
}

impl Sr {
    pub fn is_removable_media(&self) -> bool {
        self.sr_type.is_removable_media()
    }
}

/// Storage repository driver classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SrType {
    Lvm,
    Ext,
    Nfs,
    LvmOverIscsi,
    LvmOverHba,
    Smb,
    Cifs,
    Gfs2,
    Iso,
    Udev,
    Other(String),
}

impl SrType {
    pub fn as_str(&self) -> &str {
        match self {
            SrType::Lvm => "lvm",
            SrType::Ext => "ext",
            SrType::Nfs => "nfs",
            SrType::LvmOverIscsi => "lvmoiscsi",
            SrType::LvmOverHba => "lvmohba",
            SrType::Smb => "smb",
            SrType::Cifs => "cifs",
            SrType::Gfs2 => "gfs2",
            SrType::Iso => "iso",
            SrType::Udev => "udev",
            SrType::Other(name) => name,
        }
    }

    /// Read-only ISO libraries. Disks on them stay where they are.
    pub fn is_removable_media(&self) -> bool {
        matches!(self, SrType::Iso)
    }
}

impl FromStr for SrType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "lvm" => SrType::Lvm,
            "ext" => SrType::Ext,
            "nfs" => SrType::Nfs,
            "lvmoiscsi" => SrType::LvmOverIscsi,
            "lvmohba" => SrType::LvmOverHba,
            "smb" => SrType::Smb,
            "cifs" => SrType::Cifs,
            "gfs2" => SrType::Gfs2,
            "iso" => SrType::Iso,
            "udev" => SrType::Udev,
            _ => SrType::Other(s.to_string()),
        })
    }
}

impl From<String> for SrType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(sr_type) => sr_type,
            Err(never) => match never {},
        }
    }
}

impl From<SrType> for String {
    fn from(value: SrType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vif {
    #[serde(rename = "ref")]
    pub opaque_ref: OpaqueRef<Vif>,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub vm: OpaqueRef<Vm>,
    #[serde(default)]
    pub network: OpaqueRef<Network>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(rename = "ref")]
    pub opaque_ref: OpaqueRef<Network>,
    #[serde(default)]
    pub name_label: String,
    #[serde(default)]
    pub bridge: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    #[serde(rename = "ref")]
    pub opaque_ref: OpaqueRef<Host>,
    #[serde(default)]
    pub name_label: String,
    #[serde(default)]
    pub address: String,
}

/// Physical interface of a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pif {
    #[serde(rename = "ref")]
    pub opaque_ref: OpaqueRef<Pif>,
    pub host: OpaqueRef<Host>,
    pub network: OpaqueRef<Network>,
    #[serde(default)]
    pub device: String,
    /// Set on the host's primary management interface.
    #[serde(default)]
    pub management: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_refs_are_recognised() {
        assert!(OpaqueRef::<Vdi>::null().is_null());
        assert!(OpaqueRef::<Vdi>::new("").is_null());
        assert!(!OpaqueRef::<Vdi>::new("OpaqueRef:a1").is_null());
        assert!(OpaqueRef::<Vdi>::default().is_null());
    }

    #[test]
    fn sr_type_parsing_keeps_unknown_drivers() {
        assert_eq!("ISO".parse::<SrType>().unwrap(), SrType::Iso);
        assert_eq!("lvmoiscsi".parse::<SrType>().unwrap(), SrType::LvmOverIscsi);
        assert_eq!(
            "zfs".parse::<SrType>().unwrap(),
            SrType::Other("zfs".to_string())
        );
        assert_eq!("cifs".parse::<SrType>().unwrap().as_str(), "cifs");
        assert_ne!("cifs".parse::<SrType>().unwrap(), SrType::Smb);
        assert!(SrType::Iso.is_removable_media());
        assert!(!SrType::Udev.is_removable_media());
        assert!(!SrType::Nfs.is_removable_media());
    }

    #[test]
    fn maps_serialize_with_string_keys() {
        let mut map = VdiMap::new();
        map.insert("OpaqueRef:vdi-1".into(), "OpaqueRef:sr-2".into());
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"OpaqueRef:vdi-1":"OpaqueRef:sr-2"}"#);
    }

    #[test]
    fn sr_deserializes_type_string() {
        let sr: Sr = toml::from_str(
            r#"
ref = "OpaqueRef:sr-iso"
name_label = "ISO library"
type = "iso"
"#,
        )
        .unwrap();
        assert!(sr.is_removable_media());
        assert!(!sr.shared);
    }
}
