//! Disk manager: reads and writes whole pages to a directory of
//! per-page files. Grounded on the teacher crate's `disk_manager` module,
//! simplified to drop shadow-page/transaction support, which this crate's
//! `Txn` handle does not need (see `crate::txn`).

use crate::error::{Error, Result};
use crate::page::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct DiskManager {
    dir: PathBuf,
    next_page_id: PageId,
}

impl DiskManager {
    /// Opens (creating if absent) a directory of page files, and seeds the
    /// page-id allocator by scanning the highest-numbered file already
    /// there so a reopened database keeps allocating fresh ids.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut next_page_id = crate::page::HEADER_PAGE_ID + 1;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<PageId>().ok())
            {
                next_page_id = next_page_id.max(id + 1);
            }
        }

        Ok(Self { dir, next_page_id })
    }

    /// Makes sure the reserved header page (page 0, which `allocate_page_id`
    /// never hands out) exists on disk, zeroed, so the tree can always
    /// `fetch` it even on a brand-new directory.
    pub fn ensure_header_page(&self) -> Result<()> {
        if !self.page_exists(crate::page::HEADER_PAGE_ID) {
            let mut page = Page::new();
            page.set_page_id(crate::page::HEADER_PAGE_ID);
            self.write_page(&page)?;
        }
        Ok(())
    }

    pub fn allocate_page_id(&mut self) -> PageId {
        let id = self.next_page_id;
        self.next_page_id += 1;
        id
    }

    fn path_for(&self, page_id: PageId) -> PathBuf {
        self.dir.join(page_id.to_string())
    }

    pub fn write_page(&self, page: &Page) -> Result<()> {
        if page.page_id() == INVALID_PAGE_ID {
            return Err(Error::InvalidPage(page.page_id()));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path_for(page.page_id()))?;

        file.write_all(page.data())?;
        Ok(())
    }

    pub fn read_page(&self, page_id: PageId) -> Result<Page> {
        if page_id == INVALID_PAGE_ID {
            return Err(Error::InvalidPage(page_id));
        }

        let mut file = OpenOptions::new().read(true).open(self.path_for(page_id))?;

        let mut buf = [0u8; PAGE_SIZE];
        file.read_exact(&mut buf)?;

        let mut page = Page::new();
        page.set_page_id(page_id);
        page.overwrite_from(&buf);
        page.mark_clean();
        Ok(page)
    }

    pub fn page_exists(&self, page_id: PageId) -> bool {
        self.path_for(page_id).is_file()
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let path = self.path_for(page_id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskManager::new(dir.path()).unwrap();

        let mut page = Page::new();
        page.set_page_id(5);
        page.data_mut()[0..4].copy_from_slice(&[1, 2, 3, 4]);

        disk.write_page(&page).unwrap();
        let read_back = disk.read_page(5).unwrap();

        assert_eq!(read_back.data()[0..4], [1, 2, 3, 4]);
    }

    #[test]
    fn allocate_page_id_resumes_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut disk = DiskManager::new(dir.path()).unwrap();
            let id = disk.allocate_page_id();
            let mut page = Page::new();
            page.set_page_id(id);
            disk.write_page(&page).unwrap();
        }

        let disk = DiskManager::new(dir.path()).unwrap();
        assert!(disk.next_page_id > crate::page::HEADER_PAGE_ID + 1);
    }

    #[test]
    fn reading_invalid_page_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskManager::new(dir.path()).unwrap();
        assert!(disk.read_page(INVALID_PAGE_ID).is_err());
    }
}
