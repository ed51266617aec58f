use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::clock_replacer::ClockReplacer;
use super::PoolPos;
use crate::catalog::Catalog;
use crate::common::{PageId, TableId};
use crate::concurrency::lock_manager::LockManager;
use crate::concurrency::{Permissions, TransactionId};
use crate::error::{DbError, Result};
use crate::storage::heap::file::HeapFile;
use crate::storage::{PageCache, PageRef};
use crate::tuple::Tuple;

#[derive(Clone, Debug)]
pub struct BufferPoolConfig {
    /// How many pages are cached at most
    pub capacity: usize,
    /// How long a transaction waits for a page lock before it is aborted
    pub lock_timeout: Duration,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            lock_timeout: Duration::from_millis(500),
        }
    }
}

struct Frame {
    page_id: PageId,
    page: PageRef,
}

struct PoolState {
    frames: Vec<Option<Frame>>,
    page_id_to_pool_pos: HashMap<PageId, PoolPos>,
    clock_replacer: ClockReplacer,
}

/// Caches pages and hands them out to transactions.
///
/// Every access takes a page lock first: shared for `ReadOnly`, exclusive for `ReadWrite`.
/// Locks are held until the transaction completes. Dirty pages are never evicted, they are
/// written when their transaction commits and dropped when it aborts.
pub struct BufferPool {
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(catalog: Arc<Catalog>, config: BufferPoolConfig) -> Self {
        assert!(config.capacity > 0, "buffer pool needs at least one frame");
        let state = PoolState {
            frames: (0..config.capacity).map(|_| None).collect(),
            page_id_to_pool_pos: HashMap::new(),
            clock_replacer: ClockReplacer::new(config.capacity),
        };
        Self {
            catalog,
            lock_manager: LockManager::new(config.lock_timeout),
            state: Mutex::new(state),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn heap_file(&self, table_id: TableId) -> Result<Arc<HeapFile>> {
        self.catalog
            .heap_file(table_id)
            .ok_or_else(|| DbError::DbOperation(format!("No table with id {table_id}")))
    }

    /// Finds an empty frame or evicts a clean page nobody else is using
    fn find_frame(state: &mut PoolState) -> Result<PoolPos> {
        if let Some(free_pool_pos) = state.frames.iter().position(Option::is_none) {
            return Ok(free_pool_pos);
        }

        let frames = &state.frames;
        let victim = state.clock_replacer.find_victim(|pool_pos| {
            frames[pool_pos].as_ref().map_or(true, |frame| {
                Arc::strong_count(&frame.page) == 1
                    && frame.page.read().unwrap().dirtied_by().is_none()
            })
        });

        match victim {
            Some(pool_pos) => {
                if let Some(frame) = state.frames[pool_pos].take() {
                    trace!(page_id = %frame.page_id, "Evicting page");
                    state.page_id_to_pool_pos.remove(&frame.page_id);
                }
                Ok(pool_pos)
            }
            None => {
                warn!("Buffer pool is full of dirty or used pages");
                Err(DbError::DbOperation(
                    "Could not cache page. All pages in the buffer pool are dirty or in use."
                        .to_owned(),
                ))
            }
        }
    }

    fn cached_page(state: &MutexGuard<PoolState>, page_id: PageId) -> Option<PageRef> {
        state
            .page_id_to_pool_pos
            .get(&page_id)
            .and_then(|pool_pos| state.frames[*pool_pos].as_ref())
            .map(|frame| Arc::clone(&frame.page))
    }

    /// Inserts a tuple into a table on behalf of a transaction and marks the modified pages dirty.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: TableId, tuple: Tuple) -> Result<()> {
        let file = self.heap_file(table_id)?;
        let pages = file.insert_tuple(self, tid, tuple)?;
        for page in pages {
            page.write().unwrap().mark_dirty(Some(tid));
        }
        Ok(())
    }

    /// Deletes a tuple from the table it has been read from and marks the page dirty.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let record_id = tuple.record_id().ok_or_else(|| {
            DbError::DbOperation("Cannot delete a tuple which has not been stored".to_owned())
        })?;
        let file = self.heap_file(record_id.page_id().table_id())?;
        let page = file.delete_tuple(self, tid, tuple)?;
        page.write().unwrap().mark_dirty(Some(tid));
        Ok(())
    }

    /// Writes a cached page to disk if it is dirty
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let state = self.state.lock().unwrap();
        if let Some(page) = Self::cached_page(&state, page_id) {
            let mut page = page.write().unwrap();
            if page.dirtied_by().is_some() {
                self.heap_file(page_id.table_id())?.write_page(&page)?;
                page.mark_dirty(None);
            }
        }
        Ok(())
    }

    /// Writes every dirty page to disk, regardless of the transaction which modified it.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids = {
            let state = self.state.lock().unwrap();
            state.page_id_to_pool_pos.keys().copied().collect::<Vec<_>>()
        };
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drops a page from the cache without writing it
    pub fn discard_page(&self, page_id: PageId) {
        let mut state = self.state.lock().unwrap();
        if let Some(pool_pos) = state.page_id_to_pool_pos.remove(&page_id) {
            state.frames[pool_pos] = None;
        }
    }

    /// Releases the lock of a transaction on a page before the transaction completes.
    /// Fails if the transaction modified the page, its changes still have to be committed or aborted.
    pub fn release_page(&self, tid: TransactionId, page_id: PageId) -> Result<()> {
        let page = {
            let state = self.state.lock().unwrap();
            Self::cached_page(&state, page_id)
        };
        if let Some(page) = page {
            if page.read().unwrap().dirtied_by() == Some(tid) {
                return Err(DbError::DbOperation(format!(
                    "Transaction {tid} cannot release page {page_id}, it has modified it"
                )));
            }
        }
        self.lock_manager.unlock_page(tid, page_id);
        Ok(())
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds_lock(tid, page_id)
    }

    /// Commits or aborts a transaction.
    /// On commit, the pages it modified are written to disk. On abort, they are dropped
    /// from the cache so that the next access reads them from disk again.
    /// Every lock of the transaction is released in both cases.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let result = self.complete_pages(tid, commit);
        self.lock_manager.release_all(tid);
        debug!(%tid, commit, "Transaction completed");
        result
    }

    /// If a page cannot be written, the remaining pages of the transaction are discarded
    /// and the error is returned. Pages written before stay written.
    fn complete_pages(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let mut result = Ok(());
        for page_id in self.lock_manager.locked_pages(tid) {
            let page = {
                let state = self.state.lock().unwrap();
                Self::cached_page(&state, page_id)
            };
            let Some(page) = page else {
                continue;
            };
            if page.read().unwrap().dirtied_by() != Some(tid) {
                continue;
            }
            if commit && result.is_ok() {
                result = self.flush_page(page_id);
                if result.is_ok() {
                    continue;
                }
                warn!(%tid, %page_id, "Failed to write page, discarding the remaining changes");
            }
            self.discard_page(page_id);
        }
        result
    }
}

impl PageCache for BufferPool {
    fn get_page(&self, tid: TransactionId, page_id: PageId, perm: Permissions) -> Result<PageRef> {
        self.lock_manager
            .lock_page(tid, page_id, perm.lock_mode())?;

        let mut state = self.state.lock().unwrap();
        if let Some(&pool_pos) = state.page_id_to_pool_pos.get(&page_id) {
            state.clock_replacer.touch(pool_pos);
            if let Some(frame) = &state.frames[pool_pos] {
                return Ok(Arc::clone(&frame.page));
            }
        }

        let page = self.heap_file(page_id.table_id())?.read_page(page_id)?;
        let pool_pos = Self::find_frame(&mut state)?;
        let page = Arc::new(RwLock::new(page));
        state.frames[pool_pos] = Some(Frame {
            page_id,
            page: Arc::clone(&page),
        });
        state.page_id_to_pool_pos.insert(page_id, pool_pos);
        state.clock_replacer.touch(pool_pos);
        Ok(page)
    }
}
