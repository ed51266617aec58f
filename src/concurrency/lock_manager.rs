use std::collections::{HashSet, VecDeque};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::TransactionId;
use crate::common::PageId;
use crate::error::{DbError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockStatus {
    current_mode: LockMode,
    holders: HashSet<TransactionId>,
    awaiting: VecDeque<LockRequest>,
}

impl LockStatus {
    fn new() -> Self {
        Self {
            current_mode: LockMode::Shared,
            holders: HashSet::new(),
            awaiting: VecDeque::new(),
        }
    }

    /// Returns whether `tid` already holds the lock in a mode at least as strong as `mode`
    fn is_held(&self, tid: TransactionId, mode: LockMode) -> bool {
        self.holders.contains(&tid)
            && (mode == LockMode::Shared || self.current_mode == LockMode::Exclusive)
    }

    fn compatible(&self, tid: TransactionId, mode: LockMode) -> bool {
        if self.holders.is_empty() {
            return true;
        }
        match mode {
            LockMode::Shared => self.current_mode == LockMode::Shared,
            // upgrading is only possible for the sole holder
            LockMode::Exclusive => self.holders.len() == 1 && self.holders.contains(&tid),
        }
    }

    fn grant(&mut self, tid: TransactionId, mode: LockMode) {
        if self.holders.is_empty() || mode == LockMode::Exclusive {
            self.current_mode = mode;
        }
        self.holders.insert(tid);
    }

    fn is_unused(&self) -> bool {
        self.holders.is_empty() && self.awaiting.is_empty()
    }
}

struct LockRequest {
    tid: TransactionId,
    mode: LockMode,
    grant_sender: Sender<()>,
}

/// Grants waiting requests in arrival order, until one cannot be granted
fn wake_up_waiting_requests(status: &mut LockStatus) {
    while let Some(request) = status.awaiting.front() {
        if !status.compatible(request.tid, request.mode) {
            break;
        }
        if let Some(request) = status.awaiting.pop_front() {
            status.grant(request.tid, request.mode);
            _ = request.grant_sender.send(());
        }
    }
}

/// Shared/exclusive page locks, held by transactions until they are released.
///
/// A transaction which waits longer than the configured timeout for a lock is
/// considered part of a deadlock and gets aborted.
pub struct LockManager {
    lock_table: DashMap<PageId, LockStatus>,
    held_by_transaction: DashMap<TransactionId, HashSet<PageId>>,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            lock_table: DashMap::new(),
            held_by_transaction: DashMap::new(),
            timeout,
        }
    }

    /// Locks a page for a transaction. Waits until the lock can be granted,
    /// or fails with `TransactionAborted` once the timeout elapsed.
    pub fn lock_page(&self, tid: TransactionId, page_id: PageId, mode: LockMode) -> Result<()> {
        let receiver = {
            let mut status = self
                .lock_table
                .entry(page_id)
                .or_insert_with(LockStatus::new);
            if status.is_held(tid, mode) {
                return Ok(());
            }
            let upgrade = status.holders.contains(&tid);
            if (status.awaiting.is_empty() || upgrade) && status.compatible(tid, mode) {
                status.grant(tid, mode);
                drop(status);
                self.remember(tid, page_id);
                return Ok(());
            }
            let (sender, receiver) = channel();
            status.awaiting.push_back(LockRequest {
                tid,
                mode,
                grant_sender: sender,
            });
            receiver
        };

        match receiver.recv_timeout(self.timeout) {
            Ok(()) => {
                self.remember(tid, page_id);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                if self.cancel_request(tid, page_id) {
                    debug!(%tid, %page_id, ?mode, "Lock wait timed out");
                    Err(DbError::TransactionAborted {
                        tid,
                        reason: format!("timed out waiting for a {mode:?} lock on page {page_id}"),
                    })
                } else {
                    // granted right after the timeout elapsed
                    self.remember(tid, page_id);
                    Ok(())
                }
            }
        }
    }

    /// Removes a pending request. Returns false if the request has already been granted.
    fn cancel_request(&self, tid: TransactionId, page_id: PageId) -> bool {
        match self.lock_table.entry(page_id) {
            Entry::Occupied(mut entry) => {
                let status = entry.get_mut();
                let before = status.awaiting.len();
                status.awaiting.retain(|request| request.tid != tid);
                let cancelled = status.awaiting.len() != before;
                wake_up_waiting_requests(status);
                if status.is_unused() {
                    entry.remove();
                }
                cancelled
            }
            Entry::Vacant(_) => false,
        }
    }

    fn remember(&self, tid: TransactionId, page_id: PageId) {
        self.held_by_transaction
            .entry(tid)
            .or_default()
            .insert(page_id);
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_table
            .get(&page_id)
            .map(|status| status.holders.contains(&tid))
            .unwrap_or(false)
    }

    /// Returns the pages on which `tid` currently holds a lock
    pub fn locked_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.held_by_transaction
            .get(&tid)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Releases the lock of a transaction on a single page
    pub fn unlock_page(&self, tid: TransactionId, page_id: PageId) {
        if let Some(mut pages) = self.held_by_transaction.get_mut(&tid) {
            pages.remove(&page_id);
        }
        if let Entry::Occupied(mut entry) = self.lock_table.entry(page_id) {
            let status = entry.get_mut();
            if status.holders.remove(&tid) {
                wake_up_waiting_requests(status);
            }
            if status.is_unused() {
                entry.remove();
            }
        }
    }

    /// Releases every lock held by a transaction
    pub fn release_all(&self, tid: TransactionId) {
        if let Some((_, pages)) = self.held_by_transaction.remove(&tid) {
            for page_id in pages {
                if let Entry::Occupied(mut entry) = self.lock_table.entry(page_id) {
                    let status = entry.get_mut();
                    if status.holders.remove(&tid) {
                        wake_up_waiting_requests(status);
                    }
                    if status.is_unused() {
                        entry.remove();
                    }
                }
            }
        }
    }
}
