use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{DbError, Result};

pub type TableId = u32;
pub type PageNo = u32;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// Returns the size in bytes of every page of every heap file in this process.
pub fn page_size() -> usize {
    PAGE_SIZE.load(Ordering::Relaxed)
}

/// Changes the process-wide page size.
/// Must be called before any heap file is read or written, pages of different sizes cannot be mixed.
pub fn set_page_size(size: usize) -> Result<()> {
    if size == 0 {
        return Err(DbError::DbOperation("Page size must be positive".to_owned()));
    }
    PAGE_SIZE.store(size, Ordering::Relaxed);
    Ok(())
}

pub fn reset_page_size() {
    PAGE_SIZE.store(DEFAULT_PAGE_SIZE, Ordering::Relaxed);
}

/// Address of a single page: the table it belongs to and its position inside the table's file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    table_id: TableId,
    page_no: PageNo,
}

impl PageId {
    pub const fn new(table_id: TableId, page_no: PageNo) -> Self {
        Self { table_id, page_no }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }

    /// Byte offset of this page inside its table's file
    pub fn offset(&self) -> u64 {
        self.page_no as u64 * page_size() as u64
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.table_id, self.page_no)
    }
}
