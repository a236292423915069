//! One function per subcommand.
//!
//! Each operation sizes its buffers from the resolved geometry, submits
//! exactly once, classifies the dual-channel outcome and optionally dumps
//! the payload. Buffers are owned by the operation scope and drop on every
//! return path; there are no retries.

use std::path::{Path, PathBuf};

use crate::buffer::IoBuffer;
use crate::device::{CmdResult, Completion, Device};
use crate::enumerate;
use crate::error::{Error, Result};
use crate::geometry::IoLayout;
use crate::identify::{IdentifyRecord, IDFY_RECORD_NBYTES};
use crate::report::Log;
use crate::sink;

/// Inclusive block range `[slba, slba + nlb]`.
#[derive(Debug, Clone, Copy)]
pub struct RangeSpec {
    pub slba: u64,
    /// Number of blocks addressed, minus one.
    pub nlb: u64,
}

#[derive(Debug, Clone, Default)]
pub struct EnumSpec {
    pub sys_locator: Option<PathBuf>,
    pub all: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct ReadSpec {
    pub range: RangeSpec,
    pub nsid: Option<u32>,
    pub data_output: Option<PathBuf>,
    pub meta_output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WriteSpec {
    pub range: RangeSpec,
    pub nsid: Option<u32>,
    pub data_input: Option<PathBuf>,
    pub meta_input: Option<PathBuf>,
}

/// List reachable namespaces; no device handle, no buffers.
pub fn enumerate(log: &Log, spec: &EnumSpec) -> Result<()> {
    log.info("enumerating namespaces");
    let listing = enumerate::listing(spec.sys_locator.as_deref(), spec.all)?;
    if spec.json {
        let values: Vec<serde_json::Value> = listing.iter().map(|id| id.to_json()).collect();
        println!("{:#}", serde_json::Value::Array(values));
        return Ok(());
    }
    println!("ns_listing: {} entries", listing.len());
    for id in &listing {
        println!(
            "  {{ node: '{}', lba_bytes: {}, nbytes: {}, bus: {} }}",
            id.node.display(),
            fmt_opt(id.lba_bytes),
            fmt_opt(id.nbytes),
            id.bus
        );
    }
    Ok(())
}

fn fmt_opt(v: Option<u64>) -> String {
    v.map_or_else(|| "?".to_string(), |n| n.to_string())
}

/// Print already-resolved device/namespace state; no submission.
pub fn info(log: &Log, dev: &Device) -> Result<()> {
    log.info("retrieving device state");
    println!("{}", dev.describe());
    Ok(())
}

/// Identify the namespace, print the parsed record, optionally dump the raw
/// buffer.
pub fn identify(
    log: &Log,
    dev: &mut Device,
    nsid: Option<u32>,
    data_output: Option<&Path>,
) -> Result<()> {
    let nsid = nsid.unwrap_or_else(|| dev.nsid());
    log.info(format!("identify: {{ nsid: {:#x} }}", nsid));

    let mut buf = IoBuffer::zeroed(IDFY_RECORD_NBYTES as u64, dev.io_alignment())?;
    let res = dev.identify(nsid, buf.as_mut_slice());
    finish(log, "identify", res)?;

    println!("{}", IdentifyRecord::from_bytes(buf.as_slice()));
    if let Some(path) = data_output {
        log.info(format!("dumping to '{}'", path.display()));
        dump(log, buf.as_slice(), buf.len(), path)?;
    }
    Ok(())
}

/// Read a block range into freshly zeroed buffers, optionally dump the data.
pub fn read(log: &Log, dev: &mut Device, spec: &ReadSpec) -> Result<()> {
    let nsid = spec.nsid.unwrap_or_else(|| dev.nsid());
    let layout = IoLayout::for_range(dev.geometry(), spec.range.nlb);
    log.info(format!(
        "reading {{ nsid: {:#x}, slba: {:#018x}, nlb: {} }}",
        nsid, spec.range.slba, spec.range.nlb
    ));

    let align = dev.io_alignment();
    log.info(format!("alloc/clear dbuf, {} bytes", layout.data_bytes));
    let mut dbuf = IoBuffer::zeroed(layout.data_bytes, align)?;
    let mut mbuf = match layout.meta_bytes {
        0 => None,
        nbytes => {
            log.info(format!("alloc/clear mbuf, {} bytes", nbytes));
            Some(IoBuffer::zeroed(nbytes, align)?)
        }
    };

    let res = dev.read(
        nsid,
        spec.range.slba,
        spec.range.nlb,
        dbuf.as_mut_slice(),
        mbuf.as_mut().map(|b| b.as_mut_slice()),
    );
    finish(log, "read", res)?;

    if let Some(ref path) = spec.data_output {
        log.info(format!("dumping to '{}'", path.display()));
        dump(log, dbuf.as_slice(), dbuf.len(), path)?;
    }
    if spec.meta_output.is_some() {
        log.info("metadata dump is not implemented; --meta-output ignored");
    }
    Ok(())
}

/// Write a block range from an input file or the fill pattern. Metadata
/// buffers are always pattern-filled.
pub fn write(log: &Log, dev: &mut Device, spec: &WriteSpec) -> Result<()> {
    let nsid = spec.nsid.unwrap_or_else(|| dev.nsid());
    let layout = IoLayout::for_range(dev.geometry(), spec.range.nlb);
    log.info(format!(
        "writing {{ nsid: {:#x}, slba: {:#018x}, nlb: {} }}",
        nsid, spec.range.slba, spec.range.nlb
    ));

    let align = dev.io_alignment();
    let dbuf = match spec.data_input {
        Some(ref path) => {
            log.info(format!(
                "alloc/fill dbuf from '{}', {} bytes",
                path.display(),
                layout.data_bytes
            ));
            IoBuffer::from_file(layout.data_bytes, align, path)?
        }
        None => {
            log.info(format!("alloc/fill dbuf, {} bytes", layout.data_bytes));
            IoBuffer::pattern(layout.data_bytes, align)?
        }
    };
    let mbuf = match layout.meta_bytes {
        0 => None,
        nbytes => {
            if spec.meta_input.is_some() {
                log.info("metadata input is not implemented; --meta-input ignored, using the fill pattern");
            }
            log.info(format!("alloc/fill mbuf, {} bytes", nbytes));
            Some(IoBuffer::pattern(nbytes, align)?)
        }
    };

    let res = dev.write(
        nsid,
        spec.range.slba,
        spec.range.nlb,
        dbuf.as_slice(),
        mbuf.as_ref().map(|b| b.as_slice()),
    );
    finish(log, "write", res)?;
    Ok(())
}

/// Reserved command. Fails before any allocation or submission.
pub fn write_zeroes(log: &Log) -> Result<()> {
    log.info("write-zeros is not implemented");
    Err(Error::Unsupported)
}

/// Reserved command. Fails before any allocation or submission.
pub fn write_uncor(log: &Log) -> Result<()> {
    log.info("write-uncor is not implemented");
    Err(Error::Unsupported)
}

/// Classify one submission; on either failure kind, surface the raw
/// completion record before propagating.
fn finish(log: &Log, what: &str, res: CmdResult) -> Result<Completion> {
    res.classify().map_err(|err| {
        log.error(format!("{} failed: {}", what, err));
        if let Error::Submission { ref completion, .. } | Error::Completion(ref completion) = err {
            log.info(completion.to_string());
        }
        err
    })
}

/// Persistence failures are secondary: report, return non-zero, leave the
/// completed command state alone.
fn dump(log: &Log, buf: &[u8], nbytes: usize, path: &Path) -> Result<()> {
    sink::buf_to_file(buf, nbytes, path).map_err(|err| {
        log.error(format!("dump to '{}' failed: {}", path.display(), err));
        err
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::device::OpenSpec;

    fn backing_file(nbytes: u64) -> tempfile::NamedTempFile {
        let f = tempfile::NamedTempFile::new().unwrap();
        f.as_file().set_len(nbytes).unwrap();
        f
    }

    fn open_dev(path: &Path, oob_bytes: u64) -> Device {
        Device::open(
            &OpenSpec {
                locator: path.to_path_buf(),
                writable: true,
                direct: false,
                lba_bytes: Some(512),
                oob_bytes,
                extended: false,
            },
            &Log::to_stderr(),
        )
        .unwrap()
    }

    fn range(slba: u64, nlb: u64) -> RangeSpec {
        RangeSpec { slba, nlb }
    }

    #[test]
    fn write_then_read_round_trips_the_fill_pattern() {
        let log = Log::to_stderr();
        let f = backing_file(512 * 16);
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("data.bin");

        let mut dev = open_dev(f.path(), 0);
        write(
            &log,
            &mut dev,
            &WriteSpec {
                range: range(2, 3),
                nsid: None,
                data_input: None,
                meta_input: None,
            },
        )
        .unwrap();

        let mut dev = open_dev(f.path(), 0);
        read(
            &log,
            &mut dev,
            &ReadSpec {
                range: range(2, 3),
                nsid: None,
                data_output: Some(dump_path.clone()),
                meta_output: None,
            },
        )
        .unwrap();

        let expected = IoBuffer::pattern(512 * 4, 1).unwrap();
        assert_eq!(fs::read(&dump_path).unwrap(), expected.as_slice());
    }

    #[test]
    fn write_takes_its_data_from_an_input_file() {
        let log = Log::to_stderr();
        let f = backing_file(512 * 8);
        let input: Vec<u8> = (0..512u32).map(|i| (i * 7 % 256) as u8).collect();
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.bin");
        fs::write(&input_path, &input).unwrap();

        let mut dev = open_dev(f.path(), 0);
        write(
            &log,
            &mut dev,
            &WriteSpec {
                range: range(0, 0),
                nsid: None,
                data_input: Some(input_path),
                meta_input: None,
            },
        )
        .unwrap();

        assert_eq!(&fs::read(f.path()).unwrap()[..512], &input[..]);
    }

    #[test]
    fn read_dump_length_matches_the_layout() {
        let log = Log::to_stderr();
        let f = backing_file(512 * 8);
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("r.bin");

        let mut dev = open_dev(f.path(), 0);
        read(
            &log,
            &mut dev,
            &ReadSpec {
                range: range(0, 7),
                nsid: None,
                data_output: Some(dump_path.clone()),
                meta_output: None,
            },
        )
        .unwrap();
        assert_eq!(fs::metadata(&dump_path).unwrap().len(), 4096);
    }

    #[test]
    fn meta_output_is_inert() {
        let log = Log::to_stderr();
        let f = backing_file(512 * 8);
        let dir = tempfile::tempdir().unwrap();
        let meta_path = dir.path().join("meta.bin");

        let mut dev = open_dev(f.path(), 0);
        read(
            &log,
            &mut dev,
            &ReadSpec {
                range: range(0, 0),
                nsid: None,
                data_output: None,
                meta_output: Some(meta_path.clone()),
            },
        )
        .unwrap();
        assert!(!meta_path.exists());
    }

    #[test]
    fn out_of_range_read_is_a_device_failure() {
        let log = Log::to_stderr();
        let f = backing_file(512 * 4);
        let mut dev = open_dev(f.path(), 0);
        let err = read(
            &log,
            &mut dev,
            &ReadSpec {
                range: range(3, 1),
                nsid: None,
                data_output: None,
                meta_output: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Completion(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn mismatched_nsid_fails_without_touching_the_store() {
        let log = Log::to_stderr();
        let f = backing_file(512 * 4);
        let mut dev = open_dev(f.path(), 0);
        let err = write(
            &log,
            &mut dev,
            &WriteSpec {
                range: range(0, 0),
                nsid: Some(9),
                data_input: None,
                meta_input: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Completion(_)));
        assert!(fs::read(f.path()).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn identify_dump_is_one_record() {
        let log = Log::to_stderr();
        let f = backing_file(512 * 4);
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("idfy.bin");

        let mut dev = open_dev(f.path(), 0);
        identify(&log, &mut dev, None, Some(&dump_path)).unwrap();
        assert_eq!(
            fs::metadata(&dump_path).unwrap().len(),
            IDFY_RECORD_NBYTES as u64
        );
    }

    #[test]
    fn reserved_commands_fail_without_side_effects() {
        let log = Log::to_stderr();
        let f = backing_file(512 * 4);

        let reserved: [fn(&Log) -> Result<()>; 2] = [write_zeroes, write_uncor];
        for op in reserved {
            let err = op(&log).unwrap_err();
            assert!(matches!(err, Error::Unsupported));
            assert_eq!(err.exit_code(), -1);
        }
        assert!(fs::read(f.path()).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn enumerate_lists_a_directory_of_backing_files() {
        let log = Log::to_stderr();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ns1.img"), vec![0u8; 2048]).unwrap();

        enumerate(
            &log,
            &EnumSpec {
                sys_locator: Some(dir.path().to_path_buf()),
                all: false,
                json: true,
            },
        )
        .unwrap();
    }
}
