//! Device-access layer: opens a namespace by locator and submits identify,
//! read and write commands against it.
//!
//! A locator is either a raw block-device node or a regular backing file.
//! The backing store holds `nlbas` strides of `lba_bytes` followed, for
//! separate-metadata formats, by `nlbas` out-of-band records of `oob_bytes`.
//! Every submission is one blocking call returning a [`CmdResult`]; range
//! overflow is checked here, not by the callers.

use std::fmt;
use std::fs::{File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::buffer::DIRECT_IO_ALIGNMENT;
use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::identify::{IdentifyRecord, IDFY_RECORD_NBYTES};
use crate::report::Log;

pub const DEFAULT_LBA_NBYTES: u64 = 512;

/// Namespace id the emulated namespace answers to.
pub const EMULATED_NSID: u32 = 1;

/// Status codes a completion record can carry.
pub mod status {
    pub const SUCCESS: u16 = 0x00;
    pub const INVALID_FIELD: u16 = 0x02;
    pub const LBA_OUT_OF_RANGE: u16 = 0x80;

    pub fn name(code: u16) -> &'static str {
        match code {
            SUCCESS => "success",
            INVALID_FIELD => "invalid field",
            LBA_OUT_OF_RANGE => "lba out of range",
            _ => "vendor specific",
        }
    }
}

/// Per-command completion record written back by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Completion {
    pub status: u16,
    /// Command-specific result dword; blocks moved for read/write.
    pub result: u32,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completion: {{ status: {:#06x} ({}), result: {:#010x} }}",
            self.status,
            status::name(self.status),
            self.result
        )
    }
}

/// Raw outcome of one submission: the host-level verdict plus whatever the
/// device wrote into the completion record.
#[derive(Debug)]
pub struct CmdResult {
    pub host: Option<io::Error>,
    pub completion: Completion,
}

impl CmdResult {
    fn ok(result: u32) -> CmdResult {
        CmdResult {
            host: None,
            completion: Completion {
                status: status::SUCCESS,
                result,
            },
        }
    }

    fn with_status(status: u16) -> CmdResult {
        CmdResult {
            host: None,
            completion: Completion { status, result: 0 },
        }
    }

    fn host(err: io::Error) -> CmdResult {
        CmdResult {
            host: Some(err),
            completion: Completion::default(),
        }
    }

    /// A host error wins and the completion record is not trusted even when
    /// its status reads zero; otherwise a non-zero status fails the command.
    pub fn classify(self) -> Result<Completion> {
        match self.host {
            Some(source) => Err(Error::Submission {
                source,
                completion: self.completion,
            }),
            None if self.completion.status != status::SUCCESS => {
                Err(Error::Completion(self.completion))
            }
            None => Ok(self.completion),
        }
    }
}

/// How to open a namespace. Built once per invocation from the CLI and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct OpenSpec {
    pub locator: PathBuf,
    pub writable: bool,
    pub direct: bool,
    /// Per-block data size; probed from the locator when absent.
    pub lba_bytes: Option<u64>,
    pub oob_bytes: u64,
    pub extended: bool,
}

/// An open namespace handle, owned for the rest of the process lifetime and
/// exclusively borrowed by the single command it serves.
pub struct Device {
    file: File,
    locator: PathBuf,
    nsid: u32,
    geo: Geometry,
    nlbas: u64,
    direct: bool,
}

impl Device {
    pub fn open(spec: &OpenSpec, log: &Log) -> Result<Device> {
        let meta = std::fs::metadata(&spec.locator)?;
        let file = open_options(true, spec.writable, spec.direct, log).open(&spec.locator)?;

        let lba_data = match spec.lba_bytes {
            Some(n) => n,
            None => probe_lba_bytes(&spec.locator, &meta),
        };
        if lba_data == 0 {
            return Err(Error::Geometry("lba size must be non-zero"));
        }
        let geo = Geometry {
            // extended formats interleave the OOB bytes into the block stride
            lba_bytes: if spec.extended {
                lba_data + spec.oob_bytes
            } else {
                lba_data
            },
            oob_bytes: spec.oob_bytes,
            extended: spec.extended,
        };
        let raw_nbytes = locator_nbytes(&file, &meta)?;
        let nlbas = raw_nbytes / geo.stride_total();

        Ok(Device {
            file,
            locator: spec.locator.clone(),
            nsid: EMULATED_NSID,
            geo,
            nlbas,
            direct: spec.direct,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    pub fn nsid(&self) -> u32 {
        self.nsid
    }

    /// Addressable capacity in logical blocks.
    pub fn nlbas(&self) -> u64 {
        self.nlbas
    }

    /// Required buffer alignment for this handle.
    pub fn io_alignment(&self) -> usize {
        if self.direct {
            DIRECT_IO_ALIGNMENT
        } else {
            1
        }
    }

    /// Human-readable device/namespace state.
    pub fn describe(&self) -> String {
        format!(
            "dev: {{ locator: '{}', nsid: {:#x}, lba_bytes: {}, oob_bytes: {}, extended: {}, nlbas: {}, total_bytes: {} }}",
            self.locator.display(),
            self.nsid,
            self.geo.lba_bytes,
            self.geo.oob_bytes,
            self.geo.extended,
            self.nlbas,
            self.nlbas * self.geo.stride_total()
        )
    }

    /// Fill `buf` with the namespace identify record.
    pub fn identify(&mut self, nsid: u32, buf: &mut [u8]) -> CmdResult {
        if nsid != self.nsid {
            return CmdResult::with_status(status::INVALID_FIELD);
        }
        if buf.len() != IDFY_RECORD_NBYTES {
            return CmdResult::host(io::Error::new(
                io::ErrorKind::InvalidInput,
                "identify buffer must be exactly one record",
            ));
        }
        let record = IdentifyRecord {
            nsid: self.nsid,
            nsze: self.nlbas,
            ncap: self.nlbas,
            nuse: self.nlbas,
            lba_bytes: self.geo.lba_bytes as u32,
            oob_bytes: self.geo.oob_bytes as u16,
            extended: self.geo.extended,
        };
        record.write_to(buf);
        CmdResult::ok(0)
    }

    /// Read `nlb + 1` blocks starting at `slba` into the buffer pair.
    pub fn read(
        &mut self,
        nsid: u32,
        slba: u64,
        nlb: u64,
        dbuf: &mut [u8],
        mbuf: Option<&mut [u8]>,
    ) -> CmdResult {
        if let Some(failed) = self.check_cmd(nsid, slba, nlb) {
            return failed;
        }
        let res: io::Result<()> = (|| {
            self.file.seek(SeekFrom::Start(slba * self.geo.lba_bytes))?;
            self.file.read_exact(dbuf)?;
            if let Some(m) = mbuf {
                self.file.seek(SeekFrom::Start(self.meta_offset(slba)))?;
                self.file.read_exact(m)?;
            }
            Ok(())
        })();
        match res {
            Ok(()) => CmdResult::ok(blocks_moved(nlb)),
            Err(err) => CmdResult::host(err),
        }
    }

    /// Write `nlb + 1` blocks starting at `slba` from the buffer pair.
    pub fn write(
        &mut self,
        nsid: u32,
        slba: u64,
        nlb: u64,
        dbuf: &[u8],
        mbuf: Option<&[u8]>,
    ) -> CmdResult {
        if let Some(failed) = self.check_cmd(nsid, slba, nlb) {
            return failed;
        }
        let res: io::Result<()> = (|| {
            self.file.seek(SeekFrom::Start(slba * self.geo.lba_bytes))?;
            self.file.write_all(dbuf)?;
            if let Some(m) = mbuf {
                self.file.seek(SeekFrom::Start(self.meta_offset(slba)))?;
                self.file.write_all(m)?;
            }
            Ok(())
        })();
        match res {
            Ok(()) => CmdResult::ok(blocks_moved(nlb)),
            Err(err) => CmdResult::host(err),
        }
    }

    fn check_cmd(&self, nsid: u32, slba: u64, nlb: u64) -> Option<CmdResult> {
        if nsid != self.nsid {
            return Some(CmdResult::with_status(status::INVALID_FIELD));
        }
        let blocks = nlb.saturating_add(1);
        let in_range = slba
            .checked_add(blocks)
            .map_or(false, |end| end <= self.nlbas);
        if !in_range {
            return Some(CmdResult::with_status(status::LBA_OUT_OF_RANGE));
        }
        None
    }

    /// Separate OOB records live past the data region.
    fn meta_offset(&self, slba: u64) -> u64 {
        self.nlbas * self.geo.lba_bytes + slba * self.geo.oob_bytes
    }
}

fn blocks_moved(nlb: u64) -> u32 {
    nlb.saturating_add(1).min(u32::MAX as u64) as u32
}

fn open_options(read: bool, write: bool, direct: bool, log: &Log) -> OpenOptions {
    let mut opts = OpenOptions::new();
    if read {
        opts.read(true);
    }
    if write {
        opts.write(true);
    }
    if direct {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                use std::os::unix::fs::OpenOptionsExt;
                log.info("using O_DIRECT; buffers are 4096-aligned and transfers must be 512B multiples");
                opts.custom_flags(libc::O_DIRECT);
            } else {
                log.info("direct IO requested but not supported on this platform; ignored");
            }
        }
    }
    opts
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn probe_lba_bytes(locator: &Path, meta: &Metadata) -> u64 {
            use std::os::unix::fs::FileTypeExt;
            if meta.file_type().is_block_device() {
                if let Some(n) = sysfs_lba_bytes(locator) {
                    return n;
                }
            }
            DEFAULT_LBA_NBYTES
        }

        fn sysfs_lba_bytes(locator: &Path) -> Option<u64> {
            let dev = std::fs::canonicalize(locator).ok()?;
            let name = dev.file_name()?.to_str()?;
            std::fs::read_to_string(
                Path::new("/sys/block").join(name).join("queue/logical_block_size"),
            )
            .ok()?
            .trim()
            .parse()
            .ok()
        }

        /// Byte capacity behind the locator: file length for regular files,
        /// BLKGETSIZE64 for block-device nodes (their metadata length is 0).
        fn locator_nbytes(file: &File, meta: &Metadata) -> Result<u64> {
            use std::os::unix::fs::FileTypeExt;
            use std::os::unix::io::AsRawFd;
            if meta.file_type().is_block_device() {
                const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;
                let mut nbytes: u64 = 0;
                if unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut nbytes) } != 0 {
                    return Err(io::Error::last_os_error().into());
                }
                return Ok(nbytes);
            }
            Ok(meta.len())
        }
    } else {
        fn probe_lba_bytes(_locator: &Path, _meta: &Metadata) -> u64 {
            DEFAULT_LBA_NBYTES
        }

        fn locator_nbytes(_file: &File, meta: &Metadata) -> Result<u64> {
            Ok(meta.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backing_file(nbytes: u64) -> tempfile::NamedTempFile {
        let f = tempfile::NamedTempFile::new().unwrap();
        f.as_file().set_len(nbytes).unwrap();
        f
    }

    fn open_spec(path: &Path) -> OpenSpec {
        OpenSpec {
            locator: path.to_path_buf(),
            writable: true,
            direct: false,
            lba_bytes: Some(512),
            oob_bytes: 0,
            extended: false,
        }
    }

    #[test]
    fn capacity_counts_whole_strides() {
        let f = backing_file(512 * 8 + 100);
        let dev = Device::open(&open_spec(f.path()), &Log::to_stderr()).unwrap();
        assert_eq!(dev.nlbas(), 8);
        assert_eq!(dev.nsid(), EMULATED_NSID);
    }

    #[test]
    fn separate_oob_shrinks_the_data_region() {
        let f = backing_file((512 + 8) * 16);
        let mut spec = open_spec(f.path());
        spec.oob_bytes = 8;
        let dev = Device::open(&spec, &Log::to_stderr()).unwrap();
        assert_eq!(dev.nlbas(), 16);
        assert_eq!(dev.geometry().lba_bytes, 512);
    }

    #[test]
    fn extended_oob_widens_the_stride() {
        let f = backing_file(520 * 4);
        let mut spec = open_spec(f.path());
        spec.oob_bytes = 8;
        spec.extended = true;
        let dev = Device::open(&spec, &Log::to_stderr()).unwrap();
        assert_eq!(dev.geometry().lba_bytes, 520);
        assert_eq!(dev.nlbas(), 4);
    }

    #[test]
    fn zero_lba_size_is_refused() {
        let f = backing_file(4096);
        let mut spec = open_spec(f.path());
        spec.lba_bytes = Some(0);
        assert!(matches!(
            Device::open(&spec, &Log::to_stderr()),
            Err(Error::Geometry(_))
        ));
    }

    #[test]
    fn write_then_read_round_trips_data_and_metadata() {
        let f = backing_file((512 + 8) * 8);
        let mut spec = open_spec(f.path());
        spec.oob_bytes = 8;
        let mut dev = Device::open(&spec, &Log::to_stderr()).unwrap();

        let data: Vec<u8> = (0..512 * 2).map(|i| (i % 251) as u8).collect();
        let meta: Vec<u8> = (0..8 * 2).map(|i| 0xa0 + i as u8).collect();
        dev.write(1, 3, 1, &data, Some(&meta)).classify().unwrap();

        let mut dback = vec![0u8; data.len()];
        let mut mback = vec![0u8; meta.len()];
        let cpl = dev
            .read(1, 3, 1, &mut dback, Some(&mut mback))
            .classify()
            .unwrap();
        assert_eq!(cpl.result, 2);
        assert_eq!(dback, data);
        assert_eq!(mback, meta);
    }

    #[test]
    fn range_past_capacity_fails_with_device_status() {
        let f = backing_file(512 * 8);
        let mut dev = Device::open(&open_spec(f.path()), &Log::to_stderr()).unwrap();
        let mut buf = vec![0u8; 512 * 2];
        let res = dev.read(1, 7, 1, &mut buf, None);
        assert!(res.host.is_none());
        assert_eq!(res.completion.status, status::LBA_OUT_OF_RANGE);
        assert!(matches!(res.classify(), Err(Error::Completion(_))));
    }

    #[test]
    fn slba_overflow_is_out_of_range_not_a_panic() {
        let f = backing_file(512 * 8);
        let mut dev = Device::open(&open_spec(f.path()), &Log::to_stderr()).unwrap();
        let mut buf = vec![0u8; 512];
        let res = dev.read(1, u64::MAX, 0, &mut buf, None);
        assert_eq!(res.completion.status, status::LBA_OUT_OF_RANGE);
    }

    #[test]
    fn mismatched_nsid_is_an_invalid_field() {
        let f = backing_file(512 * 8);
        let mut dev = Device::open(&open_spec(f.path()), &Log::to_stderr()).unwrap();
        let mut buf = vec![0u8; 512];
        let res = dev.read(7, 0, 0, &mut buf, None);
        assert_eq!(res.completion.status, status::INVALID_FIELD);
    }

    #[test]
    fn host_error_wins_over_a_clean_completion() {
        let res = CmdResult {
            host: Some(io::Error::new(io::ErrorKind::Other, "handle gone")),
            completion: Completion::default(),
        };
        assert!(matches!(
            res.classify(),
            Err(Error::Submission { completion, .. }) if completion.status == status::SUCCESS
        ));
    }

    #[test]
    fn identify_reports_the_resolved_geometry() {
        let f = backing_file(512 * 64);
        let mut dev = Device::open(&open_spec(f.path()), &Log::to_stderr()).unwrap();
        let mut buf = vec![0u8; IDFY_RECORD_NBYTES];
        dev.identify(1, &mut buf).classify().unwrap();
        let record = IdentifyRecord::from_bytes(&buf);
        assert_eq!(record.nsze, 64);
        assert_eq!(record.lba_bytes, 512);
        assert_eq!(record.nsid, 1);
        assert!(!record.extended);
    }
}
