use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tempfile::tempdir;

use heapdb::buffer::buffer_pool::{BufferPool, BufferPoolConfig};
use heapdb::catalog::Catalog;
use heapdb::concurrency::TransactionId;
use heapdb::error::DbError;
use heapdb::storage::heap::cursor::TupleIterator;
use heapdb::storage::heap::file::HeapFile;
use heapdb::storage::heap::page::slot_count;
use heapdb::tuple::schema::{Schema, TypeId};
use heapdb::tuple::value::Value;
use heapdb::tuple::Tuple;

const THREADS: i32 = 4;
const TRANSACTIONS_PER_THREAD: i32 = 25;
const TUPLES_PER_TRANSACTION: i32 = 10;

fn setup(dir: &std::path::Path) -> Result<(Arc<HeapFile>, Arc<BufferPool>)> {
    let schema = Schema::named(&[TypeId::Integer, TypeId::Text(32)], &["id", "name"])?;
    let file = Arc::new(HeapFile::create(dir.join("concurrent.dat"), schema)?);
    let catalog = Arc::new(Catalog::new());
    catalog.add_table(Arc::clone(&file), "concurrent");
    let pool = Arc::new(BufferPool::new(
        catalog,
        BufferPoolConfig {
            capacity: 64,
            lock_timeout: Duration::from_secs(5),
        },
    ));
    Ok((file, pool))
}

fn scan(file: &HeapFile, pool: &BufferPool) -> Result<Vec<i32>> {
    let tid = TransactionId::new();
    let mut cursor = file.iter(pool, tid);
    cursor.open()?;
    let mut ids = Vec::new();
    while cursor.has_next()? {
        ids.push(cursor.next()?.values()[0].as_i32());
    }
    cursor.close();
    pool.transaction_complete(tid, true)?;
    Ok(ids)
}

/// Inserts a batch of tuples in one transaction, starting over when the transaction gets aborted.
fn insert_batch(pool: &BufferPool, table_id: u32, first_id: i32) -> Result<()> {
    loop {
        let tid = TransactionId::new();
        let result = (first_id..first_id + TUPLES_PER_TRANSACTION).try_for_each(|id| {
            pool.insert_tuple(
                tid,
                table_id,
                Tuple::new(vec![Value::Integer(id), Value::String(format!("tuple {id}"))]),
            )
        });
        match result {
            Ok(()) => {
                pool.transaction_complete(tid, true)?;
                return Ok(());
            }
            Err(DbError::TransactionAborted { .. }) => pool.transaction_complete(tid, false)?,
            Err(e) => return Err(e.into()),
        }
    }
}

#[test]
fn concurrent_inserts_are_all_visible() -> Result<()> {
    let dir = tempdir()?;
    let (file, pool) = setup(dir.path())?;
    let table_id = file.id();

    let handles = (0..THREADS)
        .map(|thread_no| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || -> Result<()> {
                for batch in 0..TRANSACTIONS_PER_THREAD {
                    let first_id = (thread_no * TRANSACTIONS_PER_THREAD + batch) * TUPLES_PER_TRANSACTION;
                    insert_batch(&pool, table_id, first_id)?;
                }
                Ok(())
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap()?;
    }

    let total = (THREADS * TRANSACTIONS_PER_THREAD * TUPLES_PER_TRANSACTION) as usize;
    let ids = scan(&file, &pool)?;
    assert_eq!(ids.len(), total);
    let unique = ids.iter().copied().collect::<HashSet<_>>();
    assert_eq!(unique.len(), total);
    assert!(unique.iter().all(|id| (0..total as i32).contains(id)));

    let per_page = slot_count(file.schema());
    assert!(file.page_count()? >= (total + per_page - 1) / per_page);
    Ok(())
}

#[test]
fn committed_data_survives_reopening() -> Result<()> {
    let dir = tempdir()?;
    {
        let (file, pool) = setup(dir.path())?;
        insert_batch(&pool, file.id(), 100)?;
    }

    // a fresh catalog and cache only see what has been written to disk
    let (file, pool) = setup(dir.path())?;
    assert_eq!(file.page_count()?, 1);
    let ids = scan(&file, &pool)?;
    assert_eq!(ids, (100..100 + TUPLES_PER_TRANSACTION).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn scan_sees_pages_appended_before_rewind() -> Result<()> {
    let dir = tempdir()?;
    let (file, pool) = setup(dir.path())?;
    let per_page = slot_count(file.schema()) as i32;

    let tid = TransactionId::new();
    for id in 0..per_page {
        pool.insert_tuple(tid, file.id(), Tuple::new(vec![Value::Integer(id), Value::String(String::new())]))?;
    }

    let mut cursor = file.iter(pool.as_ref(), tid);
    cursor.open()?;
    let mut first_pass = 0;
    while cursor.has_next()? {
        cursor.next()?;
        first_pass += 1;
    }
    assert_eq!(first_pass, per_page);

    pool.insert_tuple(tid, file.id(), Tuple::new(vec![Value::Integer(-1), Value::String(String::new())]))?;
    assert_eq!(file.page_count()?, 2);

    cursor.rewind()?;
    let mut last = None;
    let mut second_pass = 0;
    while cursor.has_next()? {
        last = Some(cursor.next()?);
        second_pass += 1;
    }
    assert_eq!(second_pass, per_page + 1);
    assert_eq!(last.unwrap().values()[0], Value::Integer(-1));
    pool.transaction_complete(tid, true)?;
    Ok(())
}
