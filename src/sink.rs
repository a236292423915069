//! Raw buffer dumps: byte-for-byte, no header or framing.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Write exactly `nbytes` bytes of `buf`, from offset 0, to a fresh file at
/// `path`.
pub fn buf_to_file(buf: &[u8], nbytes: usize, path: &Path) -> Result<()> {
    debug_assert!(nbytes <= buf.len());
    let mut f = File::create(path)?;
    f.write_all(&buf[..nbytes])?;
    f.sync_all()?;
    Ok(())
}
