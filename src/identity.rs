//! Filesystem identity: device/inode fingerprints and the probe capability
//! used to read them.
//!
//! A fingerprint is a cheap hint for spotting the same audio file under two
//! paths (symlinks, hardlinks). Distinct files can share a fingerprint, so it
//! only ever nominates candidates; merging needs the full `(device, inode)`
//! pair or an explicit repeat declaration.

use std::path::Path;

/// Fold an inode and a device id into a 32-bit fingerprint.
///
/// The device is rotated by half the word width before the XOR so its bits
/// land on the half of the word that small inode numbers leave empty.
pub fn fingerprint(inode: u64, device: u64) -> u32 {
    (inode as u32) ^ (device as u32).rotate_left(16)
}

/// Physical identity of a file as seen by the filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Identity {
    pub device: u64,
    pub inode: u64,
    pub fingerprint: u32,
}

impl Identity {
    pub fn new(inode: u64, device: u64) -> Self {
        Self {
            device,
            inode,
            fingerprint: fingerprint(inode, device),
        }
    }

    /// True when both records point at the same inode on the same device.
    /// An all-zero identity (never probed) matches nothing.
    pub fn same_file(&self, other: &Identity) -> bool {
        self.inode != 0 && self.device == other.device && self.inode == other.inode
    }
}

/// Result of a successful `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub device: u64,
    pub inode: u64,
}

/// Synchronous filesystem capability. The catalog never touches the disk
/// itself; everything goes through one of these.
pub trait FsProbe: Sync {
    /// Returns `None` when the path cannot be read.
    fn stat(&self, path: &str) -> Option<FileStat>;

    fn is_reachable(&self, path: &str) -> bool {
        self.stat(path).is_some()
    }
}

/// Probe backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProbe;

impl FsProbe for StdProbe {
    #[cfg(unix)]
    fn stat(&self, path: &str) -> Option<FileStat> {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(Path::new(path)).ok()?;
        Some(FileStat {
            device: meta.dev(),
            inode: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn stat(&self, path: &str) -> Option<FileStat> {
        // No stable inode numbers here; reachability still works.
        std::fs::metadata(Path::new(path)).ok().map(|_| FileStat {
            device: 0,
            inode: 0,
        })
    }
}

/// Build the identity of `path` from persisted or extracted values.
///
/// When the device id is unknown and `verify` is set, the path is stat'ed
/// to recover it, so the fingerprint is computed from a real device id
/// whenever the file is still there.
pub fn resolve_identity(
    probe: &dyn FsProbe,
    path: &str,
    inode: u64,
    device: Option<u64>,
    verify: bool,
) -> Identity {
    let device = match device {
        Some(dev) => dev,
        None if verify => match probe.stat(path) {
            Some(stat) => stat.device,
            None => {
                log::debug!("Could not stat {} for its device id", path);
                0
            }
        },
        None => 0,
    };
    Identity::new(inode, device)
}
