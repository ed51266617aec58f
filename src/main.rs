use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Error, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use heapdb::buffer::buffer_pool::{BufferPool, BufferPoolConfig};
use heapdb::catalog::Catalog;
use heapdb::common::{set_page_size, PageId, DEFAULT_PAGE_SIZE};
use heapdb::concurrency::TransactionId;
use heapdb::storage::heap::cursor::TupleIterator;
use heapdb::storage::heap::file::HeapFile;
use heapdb::tuple::schema::Schema;
use heapdb::tuple::value::Value;
use heapdb::tuple::{RecordId, Tuple};

#[derive(Parser)]
#[command(about = "Inspect and modify heap files")]
struct Config {
    #[arg(long, help = "Heap file to operate on, created if missing")]
    file: PathBuf,

    #[arg(long, help = "Fields of the table, e.g. \"int id, string(32) name\"")]
    schema: String,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE as u32, value_parser = clap::value_parser!(u32).range(1..))]
    page_size: u32,

    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..), help = "Size of buffer pool")]
    pool_size: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prints the table id, schema and page count
    Info,
    /// Prints every tuple with its location
    Scan,
    /// Inserts a single tuple, one value per field
    Insert { values: Vec<String> },
    /// Deletes the tuple stored in a slot
    Delete { page: u32, slot: u16 },
}

fn parse_tuple(schema: &Schema, literals: &[String]) -> Result<Tuple> {
    if literals.len() != schema.field_count() {
        return Err(Error::msg(format!(
            "Expected {} values for schema {}, got {}",
            schema.field_count(),
            schema,
            literals.len()
        )));
    }
    let values = literals
        .iter()
        .zip(schema.fields())
        .map(|(literal, field)| Value::parse_literal(literal, field.type_id()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Tuple::new(values))
}

fn run(config: Config) -> Result<()> {
    set_page_size(config.page_size as usize)?;
    let schema = Schema::parse(&config.schema).context("Invalid --schema")?;
    let file = Arc::new(
        HeapFile::create(&config.file, schema.clone())
            .with_context(|| format!("Could not open {}", config.file.display()))?,
    );
    let table_id = file.id();

    let catalog = Arc::new(Catalog::new());
    catalog.add_table(Arc::clone(&file), "table");
    let pool = BufferPool::new(
        catalog,
        BufferPoolConfig {
            capacity: config.pool_size as usize,
            ..Default::default()
        },
    );
    let tid = TransactionId::new();

    let result = match config.command {
        Command::Info => {
            println!("table id: {}", table_id);
            println!("schema:   {}", schema);
            println!("pages:    {}", file.page_count()?);
            Ok(())
        }
        Command::Scan => {
            let mut cursor = file.iter(&pool, tid);
            cursor.open()?;
            while cursor.has_next()? {
                let tuple = cursor.next()?;
                if let Some(record_id) = tuple.record_id() {
                    print!("{}:{}\t", record_id.page_id().page_no(), record_id.slot());
                }
                println!("{}", tuple);
            }
            cursor.close();
            Ok(())
        }
        Command::Insert { values } => parse_tuple(&schema, &values)
            .and_then(|tuple| Ok(pool.insert_tuple(tid, table_id, tuple)?)),
        Command::Delete { page, slot } => {
            let mut tuple = Tuple::new(Vec::new());
            tuple.set_record_id(Some(RecordId::new(PageId::new(table_id, page), slot)));
            pool.delete_tuple(tid, &tuple).map_err(Error::from)
        }
    };

    let commit = result.is_ok();
    pool.transaction_complete(tid, commit)
        .context("Failed to complete transaction")?;
    result
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    run(config)
}
