//! Positional-I/O storage backend over a shared file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::traits::storage::Storage;
use crate::traits::types::PiolError;

/// File-backed [`Storage`] using positional reads and writes, so every rank
/// can address its own byte ranges of one shared file without seeking.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    name: String,
    path: PathBuf,
}

impl FileStorage {
    /// Open an existing file read/write.
    ///
    /// # Errors
    /// `Io` when the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileStorage, PiolError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        Ok(FileStorage::wrap(file, path.as_ref()))
    }

    /// Create (or truncate) a file read/write.
    ///
    /// # Errors
    /// `Io` when the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<FileStorage, PiolError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        Ok(FileStorage::wrap(file, path.as_ref()))
    }

    fn wrap(file: File, path: &Path) -> FileStorage {
        FileStorage {
            file,
            name: path.display().to_string(),
            path: path.to_path_buf(),
        }
    }

    /// The path this storage was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Result<u64, PiolError> {
        Ok(self.file.metadata()?.len())
    }

    fn set_size(&self, size: u64) -> Result<(), PiolError> {
        self.file.set_len(size)?;
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), PiolError> {
        if buf.is_empty() {
            return Ok(());
        }
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), PiolError> {
        if buf.is_empty() {
            return Ok(());
        }
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn read_scattered(
        &self,
        block: usize,
        offsets: &[u64],
        buf: &mut [u8],
    ) -> Result<(), PiolError> {
        for (i, &offset) in offsets.iter().enumerate() {
            self.file
                .read_exact_at(&mut buf[i * block..(i + 1) * block], offset)?;
        }
        Ok(())
    }

    fn write_scattered(&self, block: usize, offsets: &[u64], buf: &[u8]) -> Result<(), PiolError> {
        for (i, &offset) in offsets.iter().enumerate() {
            self.file
                .write_all_at(&buf[i * block..(i + 1) * block], offset)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_positional_round_trip() {
        let path =
            std::env::temp_dir().join(format!("piol_posix_rt_{}", std::process::id()));
        let storage = FileStorage::create(&path).unwrap();
        storage.set_size(64).unwrap();
        storage.write_at(8, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        storage.read_at(8, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(storage.size().unwrap(), 64);

        let mut scattered = [0u8; 2];
        storage.read_scattered(1, &[9, 11], &mut scattered).unwrap();
        assert_eq!(scattered, [2, 4]);
        let _ = std::fs::remove_file(&path);
    }
}
