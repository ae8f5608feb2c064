use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, TableId};
use crate::storage::store::PageStore;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Stores each table in its own file, `table_<id>.dat`, inside a directory.
///
/// Page `n` of a table lives at byte offset `n * page_size`.
pub struct FilePageStore {
    dir: PathBuf,
    page_size: usize,
    files: Mutex<HashMap<TableId, File>>,
}

impl FilePageStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: &Path, page_size: usize) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            page_size,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn table_path(&self, table_id: TableId) -> PathBuf {
        self.dir.join(format!("table_{}.dat", table_id))
    }

    fn with_file<T>(
        &self,
        table_id: TableId,
        create: bool,
        f: impl FnOnce(&mut File) -> StorageResult<T>,
    ) -> StorageResult<Option<T>> {
        let mut files = self.files.lock();
        if !files.contains_key(&table_id) {
            let path = self.table_path(table_id);
            if !create && !path.exists() {
                return Ok(None);
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            debug!("opened table file {}", path.display());
            files.insert(table_id, file);
        }
        match files.get_mut(&table_id) {
            Some(file) => f(file).map(Some),
            None => Ok(None),
        }
    }

    fn check_size(&self, len: usize) -> StorageResult<()> {
        if len != self.page_size {
            return Err(StorageError::PageSizeMismatch {
                expected: self.page_size,
                actual: len,
            });
        }
        Ok(())
    }

    fn page_offset(&self, pid: PageId) -> u64 {
        pid.page_no as u64 * self.page_size as u64
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, pid: PageId) -> StorageResult<Vec<u8>> {
        let offset = self.page_offset(pid);
        let page_size = self.page_size;
        let data = self.with_file(pid.table_id, false, |file| {
            if offset + page_size as u64 > file.metadata()?.len() {
                return Err(StorageError::PageNotFound(pid));
            }
            let mut buf = vec![0u8; page_size];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
            Ok(buf)
        })?;
        data.ok_or(StorageError::PageNotFound(pid))
    }

    fn write_page(&self, pid: PageId, data: &[u8]) -> StorageResult<()> {
        self.check_size(data.len())?;
        let offset = self.page_offset(pid);
        self.with_file(pid.table_id, true, |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)?;
            file.sync_data()?;
            Ok(())
        })?;
        Ok(())
    }

    fn page_count(&self, table_id: TableId) -> StorageResult<u32> {
        let page_size = self.page_size as u64;
        let count = self.with_file(table_id, false, |file| {
            Ok((file.metadata()?.len() / page_size) as u32)
        })?;
        Ok(count.unwrap_or(0))
    }

    fn allocate_page(&self, table_id: TableId) -> StorageResult<PageId> {
        let page_size = self.page_size as u64;
        let pid = self.with_file(table_id, true, |file| {
            let pages = file.metadata()?.len() / page_size;
            file.set_len((pages + 1) * page_size)?;
            Ok(PageId::new(table_id, pages as u32))
        })?;
        pid.ok_or(StorageError::PageNotFound(PageId::new(table_id, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    const PAGE: usize = 256;

    #[test]
    fn test_empty_store() -> Result<()> {
        let dir = tempdir()?;
        let store = FilePageStore::open(dir.path(), PAGE)?;
        assert_eq!(store.page_count(0)?, 0);
        assert!(matches!(
            store.read_page(PageId::new(0, 0)),
            Err(StorageError::PageNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let store = FilePageStore::open(dir.path(), PAGE)?;

        let mut data = vec![0u8; PAGE];
        data[0] = 42;
        data[PAGE - 1] = 24;
        store.write_page(PageId::new(1, 0), &data)?;

        let read = store.read_page(PageId::new(1, 0))?;
        assert_eq!(read, data);
        assert_eq!(store.page_count(1)?, 1);
        assert_eq!(store.page_count(2)?, 0);
        Ok(())
    }

    #[test]
    fn test_tables_are_separate_files() -> Result<()> {
        let dir = tempdir()?;
        let store = FilePageStore::open(dir.path(), PAGE)?;
        store.write_page(PageId::new(1, 0), &vec![1u8; PAGE])?;
        store.write_page(PageId::new(2, 0), &vec![2u8; PAGE])?;

        assert!(store.table_path(1).exists());
        assert!(store.table_path(2).exists());
        assert_eq!(store.read_page(PageId::new(1, 0))?[0], 1);
        assert_eq!(store.read_page(PageId::new(2, 0))?[0], 2);
        Ok(())
    }

    #[test]
    fn test_page_boundary() -> Result<()> {
        let dir = tempdir()?;
        let store = FilePageStore::open(dir.path(), PAGE)?;
        store.write_page(PageId::new(0, 0), &vec![1u8; PAGE])?;
        store.write_page(PageId::new(0, 1), &vec![2u8; PAGE])?;

        assert!(store.read_page(PageId::new(0, 0))?.iter().all(|&b| b == 1));
        assert!(store.read_page(PageId::new(0, 1))?.iter().all(|&b| b == 2));
        Ok(())
    }

    #[test]
    fn test_file_growth() -> Result<()> {
        let dir = tempdir()?;
        let store = FilePageStore::open(dir.path(), PAGE)?;
        store.write_page(PageId::new(0, 5), &vec![5u8; PAGE])?;
        assert_eq!(store.page_count(0)?, 6);
        assert_eq!(store.read_page(PageId::new(0, 3))?, vec![0u8; PAGE]);
        Ok(())
    }

    #[test]
    fn test_invalid_page_size() -> Result<()> {
        let dir = tempdir()?;
        let store = FilePageStore::open(dir.path(), PAGE)?;
        let result = store.write_page(PageId::new(0, 0), &[0u8; 100]);
        assert!(matches!(
            result,
            Err(StorageError::PageSizeMismatch {
                expected: PAGE,
                actual: 100
            })
        ));
        Ok(())
    }

    #[test]
    fn test_allocate_page() -> Result<()> {
        let dir = tempdir()?;
        let store = FilePageStore::open(dir.path(), PAGE)?;
        assert_eq!(store.allocate_page(3)?, PageId::new(3, 0));
        assert_eq!(store.allocate_page(3)?, PageId::new(3, 1));
        assert_eq!(store.page_count(3)?, 2);
        assert_eq!(store.read_page(PageId::new(3, 1))?, vec![0u8; PAGE]);
        Ok(())
    }

    #[test]
    fn test_persistence() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = FilePageStore::open(dir.path(), PAGE)?;
            store.write_page(PageId::new(0, 0), &vec![99u8; PAGE])?;
        }
        let store = FilePageStore::open(dir.path(), PAGE)?;
        assert_eq!(store.read_page(PageId::new(0, 0))?[0], 99);
        Ok(())
    }
}
