use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tempfile::tempdir;

use heapdb::buffer::buffer_pool::{BufferPool, BufferPoolConfig};
use heapdb::catalog::Catalog;
use heapdb::common::{page_size, reset_page_size, set_page_size, PageId, DEFAULT_PAGE_SIZE};
use heapdb::concurrency::TransactionId;
use heapdb::error::DbError;
use heapdb::storage::heap::file::HeapFile;
use heapdb::storage::heap::page::{slot_count, HeapPage, MAX_SLOT_COUNT};
use heapdb::tuple::schema::{Schema, TypeId};
use heapdb::tuple::value::Value;
use heapdb::tuple::{Slot, Tuple};

// the page size is shared by the whole process
static PAGE_SIZE_LOCK: Mutex<()> = Mutex::new(());

struct PageSizeGuard(#[allow(dead_code)] MutexGuard<'static, ()>);

impl Drop for PageSizeGuard {
    fn drop(&mut self) {
        reset_page_size();
    }
}

fn use_page_size(size: usize) -> Result<PageSizeGuard> {
    let guard = PAGE_SIZE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    set_page_size(size)?;
    Ok(PageSizeGuard(guard))
}

fn setup(dir: &std::path::Path, schema: Schema) -> Result<(Arc<HeapFile>, BufferPool)> {
    let file = Arc::new(HeapFile::create(dir.join("table.dat"), schema)?);
    let catalog = Arc::new(Catalog::new());
    catalog.add_table(Arc::clone(&file), "table");
    let pool = BufferPool::new(catalog, BufferPoolConfig::default());
    Ok((file, pool))
}

fn insert_committed(pool: &BufferPool, file: &HeapFile, ids: std::ops::Range<i32>) -> Result<()> {
    let tid = TransactionId::new();
    for id in ids {
        pool.insert_tuple(
            tid,
            file.id(),
            Tuple::new(vec![Value::Integer(id), Value::Boolean(true)]),
        )?;
    }
    pool.transaction_complete(tid, true)?;
    Ok(())
}

#[test]
fn small_pages_change_the_file_layout() -> Result<()> {
    let _page_size = use_page_size(512)?;
    let dir = tempdir()?;
    let schema = Schema::named(&[TypeId::Integer, TypeId::Boolean], &["id", "flag"])?;
    // five bytes and one header bit per tuple
    let per_page = slot_count(&schema);
    assert_eq!(per_page, 512 * 8 / (5 * 8 + 1));
    let (file, pool) = setup(dir.path(), schema)?;

    insert_committed(&pool, &file, 0..per_page as i32 + 1)?;
    assert_eq!(file.page_count()?, 2);
    assert_eq!(fs::metadata(file.path())?.len(), 1024);

    let second = PageId::new(file.id(), 1);
    assert_eq!(second.offset(), 512);
    let page = file.read_page(second)?;
    let tuples = page.tuples().collect::<Vec<_>>();
    assert_eq!(tuples.len(), 1);
    assert_eq!(tuples[0].values()[0].as_i32(), per_page as i32);
    assert_eq!(tuples[0].record_id().map(|rid| rid.page_id()), Some(second));

    let mut raw = vec![0u8; 512];
    let mut handle = fs::File::open(file.path())?;
    handle.seek(SeekFrom::Start(512))?;
    handle.read_exact(&mut raw)?;
    assert_eq!(raw, page.page_data());
    assert_eq!(file.read_page(PageId::new(file.id(), 0))?.free_slot_count(), 0);
    assert!(file.read_page(PageId::new(file.id(), 2)).is_err());

    // a torn page is not counted and does not shift the next appended page
    OpenOptions::new()
        .append(true)
        .open(file.path())?
        .write_all(&[0xffu8; 100])?;
    assert_eq!(file.page_count()?, 2);
    insert_committed(&pool, &file, 1000..1000 + per_page as i32)?;
    assert_eq!(fs::metadata(file.path())?.len(), 3 * 512);
    assert_eq!(file.read_page(PageId::new(file.id(), 2))?.tuples().count(), 1);
    Ok(())
}

#[test]
fn every_addressable_slot_can_be_used() -> Result<()> {
    // 73728 * 8 / 9 is exactly one slot per slot number
    let _page_size = use_page_size(73728)?;
    let schema = Schema::anonymous(&[TypeId::Boolean])?;
    assert_eq!(slot_count(&schema), MAX_SLOT_COUNT);

    let header_size = MAX_SLOT_COUNT / 8;
    let mut data = vec![0xffu8; header_size];
    data.resize(page_size(), 1);
    let page_id = PageId::new(1, 0);

    let mut page = HeapPage::parse(page_id, &data, &schema)?;
    assert_eq!(page.tuples().count(), MAX_SLOT_COUNT);
    assert_eq!(page.free_slot_count(), 0);
    let last = page.tuples().last().and_then(|tuple| tuple.record_id());
    assert_eq!(last.map(|rid| rid.slot()), Some(Slot::MAX));
    assert_eq!(page.page_data(), data);
    assert!(matches!(
        page.insert_tuple(Tuple::new(vec![Value::Boolean(false)])),
        Err(DbError::DbOperation(_))
    ));
    Ok(())
}

#[test]
fn pages_with_unaddressable_slots_are_rejected() -> Result<()> {
    let _page_size = use_page_size(128 * 1024)?;
    let dir = tempdir()?;
    let schema = Schema::anonymous(&[TypeId::Boolean])?;
    assert!(slot_count(&schema) > MAX_SLOT_COUNT);

    assert!(matches!(
        HeapPage::parse(PageId::new(1, 0), &HeapPage::empty_page_data(), &schema),
        Err(DbError::DbOperation(_))
    ));

    let (file, pool) = setup(dir.path(), schema)?;
    let tid = TransactionId::new();
    let result = pool.insert_tuple(tid, file.id(), Tuple::new(vec![Value::Boolean(true)]));
    assert!(matches!(result, Err(DbError::DbOperation(_))));
    pool.transaction_complete(tid, false)?;
    // nothing has been appended
    assert_eq!(file.page_count()?, 0);
    Ok(())
}

#[test]
fn page_size_must_be_positive() -> Result<()> {
    let _page_size = use_page_size(1024)?;
    assert!(matches!(set_page_size(0), Err(DbError::DbOperation(_))));
    assert_eq!(page_size(), 1024);

    reset_page_size();
    assert_eq!(page_size(), DEFAULT_PAGE_SIZE);
    Ok(())
}
