//! Namespace enumeration: list the block namespaces reachable under a
//! system locator.
//!
//! With a locator, the entries of that directory are listed as file-backed
//! namespaces. Without one, the block devices the system exposes are listed;
//! on Linux that is a `/sys/block` scan.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::device::DEFAULT_LBA_NBYTES;
use crate::error::Result;

/// One reachable namespace identity.
#[derive(Debug, Clone)]
pub struct Identity {
    pub node: PathBuf,
    pub lba_bytes: Option<u64>,
    pub nbytes: Option<u64>,
    pub bus: String,
}

impl Identity {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "node": self.node.display().to_string(),
            "lba_bytes": self.lba_bytes,
            "nbytes": self.nbytes,
            "bus": self.bus,
        })
    }
}

/// List namespaces. `all` keeps entries the default listing filters out:
/// dotfiles and empty backing files, `loop`/`ram`/`zram` nodes on Linux.
pub fn listing(sys_locator: Option<&Path>, all: bool) -> Result<Vec<Identity>> {
    match sys_locator {
        Some(dir) => dir_listing(dir, all),
        None => system_listing(all),
    }
}

fn dir_listing(dir: &Path, all: bool) -> Result<Vec<Identity>> {
    let mut entries: Vec<fs::DirEntry> =
        fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut out = Vec::new();
    for entry in entries {
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if (hidden || meta.len() == 0) && !all {
            continue;
        }
        out.push(Identity {
            node: entry.path(),
            lba_bytes: Some(DEFAULT_LBA_NBYTES),
            nbytes: Some(meta.len()),
            bus: "file".to_string(),
        });
    }
    Ok(out)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn system_listing(all: bool) -> Result<Vec<Identity>> {
            let mut entries: Vec<fs::DirEntry> =
                fs::read_dir("/sys/block")?.collect::<std::io::Result<Vec<_>>>()?;
            entries.sort_by_key(|e| e.file_name());

            let mut out = Vec::new();
            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                let virtual_node =
                    name.starts_with("loop") || name.starts_with("ram") || name.starts_with("zram");
                if virtual_node && !all {
                    continue;
                }
                let sys = entry.path();
                let lba_bytes = fs::read_to_string(sys.join("queue/logical_block_size"))
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok());
                // the sysfs size attribute counts 512-byte units regardless
                // of the logical block size
                let nbytes = fs::read_to_string(sys.join("size"))
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(|sectors| sectors * 512);
                let bus = fs::read_link(sys.join("device/subsystem"))
                    .ok()
                    .and_then(|l| l.file_name().map(|s| s.to_string_lossy().into_owned()))
                    .unwrap_or_else(|| "virtual".to_string());
                out.push(Identity {
                    node: PathBuf::from("/dev").join(&name),
                    lba_bytes,
                    nbytes,
                    bus,
                });
            }
            Ok(out)
        }
    } else {
        fn system_listing(_all: bool) -> Result<Vec<Identity>> {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "system enumeration needs --sys-locator on this platform",
            )
            .into())
        }
    }
}
