//! Fixed-size page I/O over a single file.
//!
//! A handle is opened fresh for each operation and dropped at the end
//! of it (RAII closes the file on every exit path, including early
//! returns from `?`), matching the single-writer, scoped-acquisition
//! model in spec.md §5: the data file is touched only through these
//! methods, and nothing here holds the handle open across operations.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::metrics::Stats;

pub struct DiskManager {
    path: PathBuf,
    page_size: u32,
}

impl DiskManager {
    /// Opens (creating if needed) the file at `path`, padding it to a
    /// page-size multiple if its length isn't already one.
    pub fn open(path: impl AsRef<Path>, page_size: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        let remainder = len % page_size as u64;
        if remainder != 0 {
            let padding = page_size as u64 - remainder;
            let mut file = file;
            file.seek(SeekFrom::End(0))?;
            file.write_all(&vec![0u8; padding as usize])?;
            file.flush()?;
            file.sync_all()?;
        }
        Ok(Self { path, page_size })
    }

    fn file(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?)
    }

    pub fn file_size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    pub fn page_count(&self) -> Result<u32> {
        Ok((self.file_size()? / self.page_size as u64) as u32)
    }

    pub fn read_page(&self, page_id: u32, stats: &mut Stats) -> Result<Vec<u8>> {
        let count = self.page_count()?;
        if page_id >= count {
            return Err(Error::State(format!(
                "page_id {page_id} out of range (file has {count} pages)"
            )));
        }
        let mut file = self.file()?;
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;
        let mut buf = vec![0u8; self.page_size as usize];
        file.read_exact(&mut buf)?;
        stats.inc("disk.reads");
        Ok(buf)
    }

    pub fn write_page(&self, page_id: u32, data: &[u8], stats: &mut Stats) -> Result<()> {
        if data.len() != self.page_size as usize {
            return Err(Error::State(format!(
                "page must be exactly {} bytes, got {}",
                self.page_size,
                data.len()
            )));
        }
        let count = self.page_count()?;
        if page_id >= count {
            return Err(Error::State(format!(
                "page_id {page_id} out of range; use append_page to grow the file"
            )));
        }
        let mut file = self.file()?;
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;
        file.write_all(data)?;
        stats.inc("disk.writes");
        Ok(())
    }

    pub fn append_page(&self, data: Option<&[u8]>, stats: &mut Stats) -> Result<u32> {
        let mut buf = data.map(|d| d.to_vec()).unwrap_or_default();
        if buf.len() > self.page_size as usize {
            return Err(Error::State("payload exceeds page size".into()));
        }
        buf.resize(self.page_size as usize, 0);
        let new_page_id = self.page_count()?;
        let mut file = self.file()?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(&buf)?;
        stats.inc("disk.writes");
        Ok(new_page_id)
    }

    pub fn flush(&self, stats: &mut Stats) -> Result<()> {
        let file = self.file()?;
        file.sync_all()?;
        stats.inc("io.flush.calls");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_short_file_to_page_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.dat");
        std::fs::write(&path, vec![1u8; 10]).unwrap();
        let dm = DiskManager::open(&path, 16).unwrap();
        assert_eq!(dm.file_size().unwrap(), 16);
        assert_eq!(dm.page_count().unwrap(), 1);
    }

    #[test]
    fn append_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("data.dat"), 64).unwrap();
        let mut stats = Stats::new();
        let mut payload = vec![7u8; 64];
        payload[0] = 42;
        let pid = dm.append_page(Some(&payload), &mut stats).unwrap();
        assert_eq!(pid, 0);
        let back = dm.read_page(pid, &mut stats).unwrap();
        assert_eq!(back, payload);
        assert_eq!(stats.counter("disk.reads"), 1);
        assert_eq!(stats.counter("disk.writes"), 1);
    }

    #[test]
    fn read_out_of_range_errors() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("data.dat"), 32).unwrap();
        let mut stats = Stats::new();
        assert!(dm.read_page(0, &mut stats).is_err());
    }

    #[test]
    fn write_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("data.dat"), 32).unwrap();
        let mut stats = Stats::new();
        dm.append_page(None, &mut stats).unwrap();
        assert!(dm.write_page(0, &[0u8; 10], &mut stats).is_err());
    }
}
