//! Capability gate: free space and permission checks run before any write.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Minimum free space on the external volume, in MiB
pub const MIN_AVAILABLE_SPACE_MB: u64 = 32;

/// Minimum free space on internal storage, in MB
pub const MIN_INTERNAL_FREE_MB: u64 = 300;

/// Block statistics of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub block_size: u64,
    pub available_blocks: u64,
}

impl VolumeStats {
    pub fn available_megabytes(&self) -> u64 {
        self.available_blocks.saturating_mul(self.block_size) / 1_048_576
    }
}

/// Source of filesystem statistics
pub trait SpaceProbe: Send + Sync {
    /// Statistics of the primary external volume
    fn external_volume(&self) -> io::Result<VolumeStats>;

    /// Free bytes on the internal data partition
    fn internal_free_bytes(&self) -> io::Result<u64>;
}

/// The free space rule on already collected statistics
pub fn has_available_space(external: VolumeStats, internal_free_bytes: u64) -> bool {
    let data_free = internal_free_bytes / 1000 / 1000;
    let mega_available = external.available_megabytes();
    log::info!("{}MB", mega_available);
    mega_available > MIN_AVAILABLE_SPACE_MB || data_free > MIN_INTERNAL_FREE_MB
}

/// Check the available space in local storage
///
/// Advisory only: nothing is reserved, a concurrent writer can still fill the
/// volume. A probe that fails counts as no free space on that volume.
pub fn check_available_local_storage(probe: &dyn SpaceProbe) -> bool {
    let external = probe.external_volume().unwrap_or_else(|e| {
        log::warn!("Could not stat external volume: {}", e);
        VolumeStats {
            block_size: 0,
            available_blocks: 0,
        }
    });
    let internal = probe.internal_free_bytes().unwrap_or_else(|e| {
        log::warn!("Could not stat internal storage: {}", e);
        0
    });
    has_available_space(external, internal)
}

/// Space probe backed by the mounted disks reported by `sysinfo`
pub struct DiskSpaceProbe {
    external_root: PathBuf,
    internal_root: PathBuf,
}

impl DiskSpaceProbe {
    pub fn new(external_root: &Path, internal_root: &Path) -> Self {
        Self {
            external_root: external_root.to_path_buf(),
            internal_root: internal_root.to_path_buf(),
        }
    }

    /// Available bytes of the disk with the longest mount point containing `path`
    fn available_bytes(path: &Path) -> io::Result<u64> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no disk mounted for {}", path.display()),
                )
            })
    }
}

impl SpaceProbe for DiskSpaceProbe {
    fn external_volume(&self) -> io::Result<VolumeStats> {
        Ok(VolumeStats {
            block_size: 1,
            available_blocks: Self::available_bytes(&self.external_root)?,
        })
    }

    fn internal_free_bytes(&self) -> io::Result<u64> {
        Self::available_bytes(&self.internal_root)
    }
}

/// A runtime permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Internet,
    ReadExternalStorage,
    WriteExternalStorage,
    AccessFineLocation,
}

impl Permission {
    /// Platform name, e.g. `android.permission.INTERNET`
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Internet => "android.permission.INTERNET",
            Permission::ReadExternalStorage => "android.permission.READ_EXTERNAL_STORAGE",
            Permission::WriteExternalStorage => "android.permission.WRITE_EXTERNAL_STORAGE",
            Permission::AccessFineLocation => "android.permission.ACCESS_FINE_LOCATION",
        }
    }
}

pub const INTERNET: &[Permission] = &[Permission::Internet];
pub const LOCATION: &[Permission] = &[Permission::AccessFineLocation];
pub const STORAGE: &[Permission] = &[
    Permission::Internet,
    Permission::ReadExternalStorage,
    Permission::WriteExternalStorage,
];

/// Outcome of one entry of a permission request callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantResult {
    Granted,
    Denied,
}

/// Platform permission state
///
/// `request` only starts the system prompt; the answer arrives later through
/// the platform callback and the caller checks again then.
pub trait PermissionGate: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;

    fn request(&self, permissions: &[Permission], request_code: i32);
}

pub fn is_permission_granted(gate: &dyn PermissionGate, permissions: &[Permission]) -> bool {
    permissions.iter().all(|p| gate.is_granted(*p))
}

/// True when all `permissions` are granted, otherwise requests the denied ones
pub fn check_permission(
    gate: &dyn PermissionGate,
    permissions: &[Permission],
    request_code: i32,
) -> bool {
    let denied: Vec<Permission> = permissions
        .iter()
        .copied()
        .filter(|p| !gate.is_granted(*p))
        .collect();

    if denied.is_empty() {
        return true;
    }

    log::info!("Requesting permissions: {:?}", denied);
    gate.request(&denied, request_code);
    false
}

/// Evaluate the results delivered to the permission callback
pub fn is_all_permission_granted(grant_results: Option<&[GrantResult]>) -> bool {
    match grant_results {
        Some(results) => results.iter().all(|r| *r == GrantResult::Granted),
        None => false,
    }
}

/// Permission state held in memory, for desktop builds and tests
#[derive(Debug, Default)]
pub struct StaticPermissionGate {
    granted: Mutex<HashSet<Permission>>,
    requested: Mutex<Vec<(i32, Vec<Permission>)>>,
}

impl StaticPermissionGate {
    pub fn granting(permissions: &[Permission]) -> Self {
        let gate = Self::default();
        for permission in permissions {
            gate.grant(*permission);
        }
        gate
    }

    pub fn grant(&self, permission: Permission) {
        if let Ok(mut granted) = self.granted.lock() {
            granted.insert(permission);
        }
    }

    pub fn revoke(&self, permission: Permission) {
        if let Ok(mut granted) = self.granted.lock() {
            granted.remove(&permission);
        }
    }

    /// Requests issued so far, as (request code, permissions)
    pub fn requests(&self) -> Vec<(i32, Vec<Permission>)> {
        self.requested
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl PermissionGate for StaticPermissionGate {
    fn is_granted(&self, permission: Permission) -> bool {
        self.granted
            .lock()
            .map(|g| g.contains(&permission))
            .unwrap_or(false)
    }

    fn request(&self, permissions: &[Permission], request_code: i32) {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push((request_code, permissions.to_vec()));
        }
    }
}
