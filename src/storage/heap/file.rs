use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, trace, warn};

use super::cursor::HeapFileCursor;
use super::page::{checked_slot_count, HeapPage};
use crate::common::{page_size, PageId, PageNo, TableId};
use crate::concurrency::{Permissions, TransactionId};
use crate::error::{DbError, IoContext, Result};
use crate::storage::{PageCache, PageRef};
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

/// A table stored as a file of fixed size pages, without any header.
///
/// Page `n` starts at byte `n * page_size()`. The number of pages is derived from
/// the current file length on every call, so pages appended by inserts are picked up
/// immediately. No file handle is kept open: every read or write opens its own.
///
/// Appends are serialized inside the process. The file must not be grown by another process.
#[derive(Debug)]
pub struct HeapFile {
    path: PathBuf,
    table_id: TableId,
    schema: Schema,
    append_lock: Mutex<()>,
}

/// Derives a table id from the canonical path of a file. Collisions are possible,
/// the id is only used as a lookup key.
fn table_id_for(canonical_path: &Path) -> TableId {
    crc32fast::hash(canonical_path.to_string_lossy().as_bytes())
}

impl HeapFile {
    /// Opens an existing heap file.
    pub fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let path = fs::canonicalize(path.as_ref()).io_context(|| {
            format!("Could not resolve heap file {}", path.as_ref().display())
        })?;
        let table_id = table_id_for(&path);
        debug!(path = %path.display(), table_id, "Opened heap file");
        Ok(Self {
            path,
            table_id,
            schema,
            append_lock: Mutex::new(()),
        })
    }

    /// Opens a heap file, creating an empty one if it does not exist yet.
    pub fn create(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let path = path.as_ref();
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .io_context(|| format!("Could not create heap file {}", path.display()))?;
        Self::open(path, schema)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the id of this table. It stays the same as long as the file is not moved.
    pub fn id(&self) -> TableId {
        self.table_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of complete pages currently stored in the file
    pub fn page_count(&self) -> Result<usize> {
        let size = fs::metadata(&self.path)
            .io_context(|| format!("Could not read size of heap file {}", self.path.display()))?
            .len();
        Ok((size / page_size() as u64) as usize)
    }

    fn check_page_id(&self, page_id: PageId) -> Result<()> {
        if page_id.table_id() != self.table_id {
            return Err(DbError::InvalidPageReference {
                page_id,
                reason: format!("page does not belong to table {}", self.table_id),
            });
        }
        let page_count = self.page_count()?;
        if page_id.page_no() as usize >= page_count {
            return Err(DbError::InvalidPageReference {
                page_id,
                reason: format!("table {} has only {} pages", self.table_id, page_count),
            });
        }
        Ok(())
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<HeapPage> {
        self.check_page_id(page_id)?;
        trace!(%page_id, "Reading page");

        let mut file = File::open(&self.path)
            .io_context(|| format!("Could not open heap file {}", self.path.display()))?;
        file.seek(SeekFrom::Start(page_id.offset()))
            .io_context(|| format!("Could not seek to page {page_id}"))?;
        let mut data = vec![0u8; page_size()];
        file.read_exact(&mut data)
            .io_context(|| format!("Could not read page {page_id}"))?;

        HeapPage::parse(page_id, &data, &self.schema)
    }

    /// Overwrites an existing page with the content of `page`. The file length never changes.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let page_id = page.page_id();
        self.check_page_id(page_id)?;
        trace!(%page_id, "Writing page");

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .io_context(|| format!("Could not open heap file {}", self.path.display()))?;
        file.seek(SeekFrom::Start(page_id.offset()))
            .io_context(|| format!("Could not seek to page {page_id}"))?;
        file.write_all(&page.page_data())
            .io_context(|| format!("Failed to write page {page_id}"))?;
        file.flush()
            .io_context(|| format!("Failed to flush page {page_id}"))?;
        file.sync_all()
            .io_context(|| format!("Failed to sync page {page_id}"))?;

        Ok(())
    }

    /// Appends a zeroed page and returns its page number.
    fn append_empty_page(&self) -> Result<PageNo> {
        // held until the page is complete, a concurrent append would look like a torn page
        let _append = self.append_lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .io_context(|| format!("Could not open heap file {}", self.path.display()))?;
        let len = file
            .metadata()
            .io_context(|| format!("Failed to get size of {}", self.path.display()))?
            .len();
        let torn = len % page_size() as u64;
        if torn != 0 {
            // drop the remains of an interrupted append so the new page stays aligned
            warn!(table_id = self.table_id, torn, "Truncating partial page");
            file.set_len(len - torn)
                .io_context(|| format!("Failed to truncate {}", self.path.display()))?;
        }
        file.write_all(&HeapPage::empty_page_data())
            .io_context(|| format!("Failed to append a page to {}", self.path.display()))?;
        file.sync_all()
            .io_context(|| format!("Failed to sync {}", self.path.display()))?;
        let end = file
            .stream_position()
            .io_context(|| format!("Failed to get size of {}", self.path.display()))?;

        let page_no = (end / page_size() as u64 - 1) as PageNo;
        debug!(table_id = self.table_id, page_no, "Appended page");
        Ok(page_no)
    }

    /// Inserts a tuple into the first page with a free slot, appending a page if every page is full.
    /// Every visited page is requested exclusively for `tid`.
    /// Returns the pages which have been modified, the caller is responsible for marking them dirty.
    pub fn insert_tuple(
        &self,
        cache: &dyn PageCache,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<Vec<PageRef>> {
        if !tuple.conforms_to(&self.schema) {
            return Err(DbError::DbOperation(format!(
                "Tuple does not match the schema {} of table {}",
                self.schema, self.table_id
            )));
        }
        if checked_slot_count(&self.schema)? == 0 {
            return Err(DbError::DbOperation(format!(
                "Tuples of {} bytes do not fit on a page of {} bytes",
                self.schema.byte_size(),
                page_size()
            )));
        }

        let page_count = self.page_count()?;
        for page_no in 0..page_count {
            let page_id = PageId::new(self.table_id, page_no as PageNo);
            let page = cache.get_page(tid, page_id, Permissions::ReadWrite)?;
            let mut guard = page.write().unwrap();
            if guard.free_slot_count() > 0 {
                guard.insert_tuple(tuple)?;
                drop(guard);
                return Ok(vec![page]);
            }
        }

        let page_no = self.append_empty_page()?;
        let page_id = PageId::new(self.table_id, page_no);
        let page = cache.get_page(tid, page_id, Permissions::ReadWrite)?;
        page.write().unwrap().insert_tuple(tuple)?;
        Ok(vec![page])
    }

    /// Removes a tuple from the page it has been read from.
    /// Returns the modified page, the caller is responsible for marking it dirty.
    pub fn delete_tuple(
        &self,
        cache: &dyn PageCache,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<PageRef> {
        let record_id = tuple.record_id().ok_or_else(|| {
            DbError::DbOperation("Cannot delete a tuple which has not been stored".to_owned())
        })?;
        let page_id = record_id.page_id();
        if page_id.table_id() != self.table_id {
            return Err(DbError::DbOperation(format!(
                "Tuple is stored in table {}, not in table {}",
                page_id.table_id(),
                self.table_id
            )));
        }
        if page_id.page_no() as usize >= self.page_count()? {
            return Err(DbError::DbOperation(format!(
                "Tuple is stored on page {page_id}, which does not exist"
            )));
        }

        let page = cache.get_page(tid, page_id, Permissions::ReadWrite)?;
        page.write().unwrap().delete_tuple(tuple)?;
        Ok(page)
    }

    /// Returns a cursor over every tuple of this file, reading pages through `cache` on behalf of `tid`.
    pub fn iter<'a>(&'a self, cache: &'a dyn PageCache, tid: TransactionId) -> HeapFileCursor<'a> {
        HeapFileCursor::new(self, cache, tid)
    }
}
