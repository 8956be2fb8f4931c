use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const SECTOR_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to open {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("image is empty")]
    Empty,

    #[error("image size {size} is not a multiple of 512-byte sectors")]
    Unaligned { size: u64 },

    #[error("sector {lba} out of range (image has {sectors} sectors)")]
    OutOfRange { lba: u64, sectors: u64 },

    #[error("image is read-only")]
    ReadOnly,

    #[error("I/O error at sector {lba}")]
    Io {
        lba: u64,
        #[source]
        source: io::Error,
    },
}

/// Sector store behind the card.
pub trait BlockBackend: Send {
    fn sector_count(&self) -> u64;

    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BackendError>;

    fn write_sector(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), BackendError>;

    fn size_bytes(&self) -> u64 {
        self.sector_count() * SECTOR_SIZE as u64
    }
}

impl<T: BlockBackend + ?Sized> BlockBackend for Box<T> {
    fn sector_count(&self) -> u64 {
        (**self).sector_count()
    }

    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BackendError> {
        (**self).read_sector(lba, buf)
    }

    fn write_sector(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), BackendError> {
        (**self).write_sector(lba, buf)
    }
}

fn sectors_for(size: u64) -> Result<u64, BackendError> {
    if size == 0 {
        return Err(BackendError::Empty);
    }
    if size % SECTOR_SIZE as u64 != 0 {
        return Err(BackendError::Unaligned { size });
    }
    Ok(size / SECTOR_SIZE as u64)
}

fn check_lba(lba: u64, sectors: u64) -> Result<u64, BackendError> {
    if lba >= sectors {
        return Err(BackendError::OutOfRange { lba, sectors });
    }
    Ok(lba * SECTOR_SIZE as u64)
}

/// A disk image file or block device.
///
/// The size is taken by seeking to the end, which also works for block devices.
#[derive(Debug)]
pub struct FileBackend {
    file: File,
    sectors: u64,
    writable: bool,
}

impl FileBackend {
    /// Open `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        Self::open_with(path.as_ref(), false)
    }

    pub fn open_writable(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        Self::open_with(path.as_ref(), true)
    }

    fn open_with(path: &Path, writable: bool) -> Result<Self, BackendError> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|source| BackendError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_file(file, writable)
    }

    pub fn from_file(mut file: File, writable: bool) -> Result<Self, BackendError> {
        let size = file
            .seek(SeekFrom::End(0))
            .map_err(|source| BackendError::Io { lba: 0, source })?;
        Ok(Self {
            file,
            sectors: sectors_for(size)?,
            writable,
        })
    }
}

#[cfg(unix)]
impl FileBackend {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, offset)
    }
}

#[cfg(not(unix))]
impl FileBackend {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::io::Read;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        use std::io::Write;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }
}

impl BlockBackend for FileBackend {
    fn sector_count(&self) -> u64 {
        self.sectors
    }

    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BackendError> {
        let offset = check_lba(lba, self.sectors)?;
        self.read_at(buf, offset)
            .map_err(|source| BackendError::Io { lba, source })
    }

    fn write_sector(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), BackendError> {
        if !self.writable {
            return Err(BackendError::ReadOnly);
        }
        let offset = check_lba(lba, self.sectors)?;
        self.write_at(buf, offset)
            .map_err(|source| BackendError::Io { lba, source })
    }
}

/// Sectors held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemBackend {
    data: Vec<u8>,
}

impl MemBackend {
    /// A zero-filled image of `sectors` sectors.
    pub fn new(sectors: usize) -> Self {
        Self {
            data: vec![0; sectors * SECTOR_SIZE],
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Result<Self, BackendError> {
        sectors_for(data.len() as u64)?;
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn sector_range(&self, lba: u64) -> Result<std::ops::Range<usize>, BackendError> {
        let start = check_lba(lba, self.sector_count())? as usize;
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockBackend for MemBackend {
    fn sector_count(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BackendError> {
        let range = self.sector_range(lba)?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sector(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), BackendError> {
        let range = self.sector_range(lba)?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_backend_reads_back_writes() {
        let mut backend = MemBackend::new(4);
        let sector = [0x5a; SECTOR_SIZE];
        backend.write_sector(2, &sector).unwrap();

        let mut back = [0u8; SECTOR_SIZE];
        backend.read_sector(2, &mut back).unwrap();
        assert_eq!(back, sector);
        backend.read_sector(1, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0));
    }

    #[test]
    fn mem_backend_bounds() {
        let mut backend = MemBackend::new(2);
        let mut buf = [0u8; SECTOR_SIZE];
        assert!(matches!(
            backend.read_sector(2, &mut buf),
            Err(BackendError::OutOfRange { lba: 2, sectors: 2 })
        ));
        assert_eq!(backend.size_bytes(), 1024);
    }

    #[test]
    fn mem_backend_rejects_partial_sectors() {
        assert!(matches!(
            MemBackend::from_vec(vec![0; 700]),
            Err(BackendError::Unaligned { size: 700 })
        ));
        assert!(matches!(
            MemBackend::from_vec(Vec::new()),
            Err(BackendError::Empty)
        ));
    }
}
