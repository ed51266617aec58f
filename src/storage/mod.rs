use std::sync::{Arc, RwLock};

use crate::common::PageId;
use crate::concurrency::{Permissions, TransactionId};
use crate::error::Result;

use self::heap::page::HeapPage;

pub mod heap;

/// A cached page, shared by every transaction which has been granted access to it
pub type PageRef = Arc<RwLock<HeapPage>>;

/// The transaction-aware page cache heap files read and modify pages through.
///
/// Implementations take care of locking: a page requested with `ReadWrite` must be
/// exclusively accessible by `tid` until the transaction completes.
pub trait PageCache: Send + Sync {
    fn get_page(&self, tid: TransactionId, page_id: PageId, perm: Permissions) -> Result<PageRef>;
}
