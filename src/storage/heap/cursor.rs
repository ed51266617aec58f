use std::vec;

use super::file::HeapFile;
use crate::common::{PageId, PageNo};
use crate::concurrency::{Permissions, TransactionId};
use crate::error::{DbError, Result};
use crate::storage::PageCache;
use crate::tuple::Tuple;

/// Iteration protocol over the tuples of a table
pub trait TupleIterator {
    /// Positions the iterator before the first tuple
    fn open(&mut self) -> Result<()>;
    fn has_next(&mut self) -> Result<bool>;
    /// Returns the next tuple, fails with `NoSuchElement` past the end
    fn next(&mut self) -> Result<Tuple>;
    /// Starts over from the first tuple
    fn rewind(&mut self) -> Result<()>;
    fn close(&mut self);
}

enum CursorState {
    Unopened,
    Positioned {
        /// the next page to fetch
        page_no: PageNo,
        /// remaining tuples of the previous page
        tuples: Option<vec::IntoIter<Tuple>>,
    },
    Exhausted,
    Closed,
}

/// Scans a heap file page by page, fetching every page read-only through the page cache.
///
/// Tuples are returned in ascending page order, then in slot order. Every page is
/// copied out of the cache when it is reached, so no page latch is held between calls.
pub struct HeapFileCursor<'a> {
    file: &'a HeapFile,
    cache: &'a dyn PageCache,
    tid: TransactionId,
    state: CursorState,
}

impl<'a> HeapFileCursor<'a> {
    pub fn new(file: &'a HeapFile, cache: &'a dyn PageCache, tid: TransactionId) -> Self {
        Self {
            file,
            cache,
            tid,
            state: CursorState::Unopened,
        }
    }

    pub fn transaction(&self) -> TransactionId {
        self.tid
    }

    fn fetch_page_tuples(&self, page_no: PageNo) -> Result<Vec<Tuple>> {
        let page_id = PageId::new(self.file.id(), page_no);
        let page = self
            .cache
            .get_page(self.tid, page_id, Permissions::ReadOnly)?;
        let page = page.read().unwrap();
        let tuples = page.tuples().cloned().collect();
        Ok(tuples)
    }
}

impl TupleIterator for HeapFileCursor<'_> {
    /// Also allowed on a closed cursor, which starts a new scan.
    fn open(&mut self) -> Result<()> {
        self.state = CursorState::Positioned {
            page_no: 0,
            tuples: None,
        };
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        loop {
            let page_no = match &self.state {
                CursorState::Unopened => return Err(DbError::IteratorState("not opened")),
                CursorState::Closed => return Err(DbError::IteratorState("closed")),
                CursorState::Exhausted => return Ok(false),
                CursorState::Positioned {
                    tuples: Some(tuples),
                    ..
                } if !tuples.as_slice().is_empty() => return Ok(true),
                CursorState::Positioned { page_no, .. } => *page_no,
            };

            if page_no as usize >= self.file.page_count()? {
                self.state = CursorState::Exhausted;
                return Ok(false);
            }

            let tuples = self.fetch_page_tuples(page_no)?;
            self.state = CursorState::Positioned {
                page_no: page_no + 1,
                tuples: Some(tuples.into_iter()),
            };
        }
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(DbError::NoSuchElement);
        }
        match &mut self.state {
            CursorState::Positioned {
                tuples: Some(tuples),
                ..
            } => tuples.next().ok_or(DbError::NoSuchElement),
            _ => Err(DbError::NoSuchElement),
        }
    }

    /// Pages appended since the last pass are visited by the next one.
    fn rewind(&mut self) -> Result<()> {
        match self.state {
            CursorState::Unopened => Err(DbError::IteratorState("not opened")),
            CursorState::Closed => Err(DbError::IteratorState("closed")),
            _ => self.open(),
        }
    }

    fn close(&mut self) {
        self.state = CursorState::Closed;
    }
}
