/// Per-namespace block geometry as reported by the device-access layer.
///
/// For extended-metadata formats `lba_bytes` is the full per-block stride,
/// data plus the interleaved out-of-band bytes, which is why such formats
/// never get a separate metadata buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub lba_bytes: u64,
    pub oob_bytes: u64,
    pub extended: bool,
}

impl Geometry {
    /// Bytes one block occupies across both regions of the backing store.
    pub fn stride_total(&self) -> u64 {
        if self.extended {
            self.lba_bytes
        } else {
            self.lba_bytes + self.oob_bytes
        }
    }
}

/// Buffer sizing for one command over the inclusive range `[slba, slba + nlb]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoLayout {
    pub data_bytes: u64,
    pub meta_bytes: u64,
}

impl IoLayout {
    /// Compute buffer sizes for a range of `nlb + 1` blocks. `nlb` counts
    /// blocks minus one, as it travels on the wire.
    ///
    /// Saturating arithmetic: absurd ranges surface as an oversized request
    /// that buffer acquisition rejects, never as an overflow panic.
    pub fn for_range(geo: &Geometry, nlb: u64) -> IoLayout {
        let blocks = nlb.saturating_add(1);
        let meta_bytes = if geo.extended {
            0
        } else {
            blocks.saturating_mul(geo.oob_bytes)
        };
        IoLayout {
            data_bytes: blocks.saturating_mul(geo.lba_bytes),
            meta_bytes,
        }
    }
}
