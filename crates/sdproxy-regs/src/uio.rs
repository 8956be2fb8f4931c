use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::mmap::{page_size, Mapping};
use crate::mmio::MmioRegion;

pub const DEFAULT_UIO_DEVICE: &str = "/dev/uio0";
pub const SYSFS_UIO_ROOT: &str = "/sys/class/uio";

/// Memory resources exported by the SD block's UIO device, by map index.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UioRegion {
    /// Block data buffer (FPGA block RAM).
    Bram = 0,
    /// Command/status/data control registers.
    Control = 1,
    /// Reset/kick GPIO bank.
    Gpio = 2,
}

impl UioRegion {
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read size of map{index} from {}: {source}", path.display())]
    Size {
        index: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed size {text:?} for map{index}")]
    BadSize { index: usize, text: String },

    #[error("map{index} has zero size")]
    Empty { index: usize },

    #[error("mmap of map{index} ({len:#x} bytes) failed: {source}")]
    Mmap {
        index: usize,
        len: usize,
        #[source]
        source: io::Error,
    },
}

/// An open UIO device.
///
/// Map `N` of a UIO device is selected by mapping the device file at offset `N * page_size`;
/// the size of each map is published by the driver in sysfs.
#[derive(Debug)]
pub struct Uio {
    file: File,
    sysfs_dir: PathBuf,
}

impl Uio {
    /// Open `device` (e.g. `/dev/uio0`) and locate its sysfs description under
    /// [`SYSFS_UIO_ROOT`].
    pub fn open(device: impl AsRef<Path>) -> Result<Self, MapError> {
        Self::open_with_sysfs_root(device, SYSFS_UIO_ROOT)
    }

    /// Like [`Uio::open`], with the sysfs class directory overridden.
    pub fn open_with_sysfs_root(
        device: impl AsRef<Path>,
        sysfs_root: impl AsRef<Path>,
    ) -> Result<Self, MapError> {
        let device = device.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|source| MapError::Open {
                path: device.to_path_buf(),
                source,
            })?;
        let name = device.file_name().map(PathBuf::from).unwrap_or_default();
        Ok(Self {
            file,
            sysfs_dir: sysfs_root.as_ref().join(name),
        })
    }

    /// Size in bytes of map `index`, as reported by the driver.
    pub fn region_size(&self, index: usize) -> Result<usize, MapError> {
        let path = self
            .sysfs_dir
            .join("maps")
            .join(format!("map{index}"))
            .join("size");
        let text = std::fs::read_to_string(&path).map_err(|source| MapError::Size {
            index,
            path: path.clone(),
            source,
        })?;
        let size = parse_hex(&text).ok_or_else(|| MapError::BadSize {
            index,
            text: text.trim().to_string(),
        })?;
        if size == 0 {
            return Err(MapError::Empty { index });
        }
        Ok(size)
    }

    pub fn map(&self, region: UioRegion) -> Result<MmioRegion, MapError> {
        self.map_index(region.index())
    }

    pub fn map_index(&self, index: usize) -> Result<MmioRegion, MapError> {
        let len = self.region_size(index)?;
        let offset = (index * page_size()) as u64;
        let mapping =
            Mapping::shared(&self.file, len, offset).map_err(|source| MapError::Mmap {
                index,
                len,
                source,
            })?;
        tracing::debug!(index, len, "mapped uio region");
        Ok(MmioRegion::from_mapping(mapping))
    }
}

/// Parse the `0x...` hex format sysfs uses for UIO map attributes.
fn parse_hex(text: &str) -> Option<usize> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))?;
    usize::from_str_radix(digits, 16).ok()
}
