use crate::common::{page_size, PageId};
use crate::concurrency::TransactionId;
use crate::error::{DbError, Result};
use crate::tuple::schema::Schema;
use crate::tuple::value::Value;
use crate::tuple::{RecordId, Slot, Tuple};

/// A page of a heap file.
///
/// Layout:
/// 1. A bitmap with one bit per slot, the bit of slot `i` is bit `i % 8` of byte `i / 8`.
///    A set bit means that the slot is in use.
/// 2. `slot_count` fixed size tuple images, `schema.byte_size()` bytes each.
/// 3. Zero padding up to the page size.
#[derive(Debug, Clone)]
pub struct HeapPage {
    page_id: PageId,
    schema: Schema,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirtied_by: Option<TransactionId>,
}

/// Slots are numbered by `Slot`, a page never has more than this many.
pub const MAX_SLOT_COUNT: usize = Slot::MAX as usize + 1;

/// How many tuples of the given schema fit on a page. Every tuple needs its bytes plus one header bit.
pub fn slot_count(schema: &Schema) -> usize {
    (page_size() * 8) / (schema.byte_size() * 8 + 1)
}

/// Like `slot_count`, but fails if the slots of a page could not all be addressed.
pub fn checked_slot_count(schema: &Schema) -> Result<usize> {
    let slots = slot_count(schema);
    if slots > MAX_SLOT_COUNT {
        return Err(DbError::DbOperation(format!(
            "A page of {} bytes holds {} tuples of {} bytes, but only {} slots are addressable",
            page_size(),
            slots,
            schema.byte_size(),
            MAX_SLOT_COUNT
        )));
    }
    Ok(slots)
}

/// Slot numbers `0..count`, `count` is at most `MAX_SLOT_COUNT`
fn slots(count: usize) -> impl Iterator<Item = Slot> {
    (0..=Slot::MAX).take(count)
}

fn header_size(slot_count: usize) -> usize {
    (slot_count + 7) / 8
}

impl HeapPage {
    /// Decodes a page from its on-disk image
    pub fn parse(page_id: PageId, data: &[u8], schema: &Schema) -> Result<Self> {
        if data.len() != page_size() {
            return Err(DbError::DbOperation(format!(
                "Page {} has {} bytes, expected {}",
                page_id,
                data.len(),
                page_size()
            )));
        }
        let count = checked_slot_count(schema)?;
        let header = data[..header_size(count)].to_vec();

        let mut page = Self {
            page_id,
            schema: schema.clone(),
            header,
            tuples: Vec::with_capacity(count),
            dirtied_by: None,
        };

        let tuple_size = schema.byte_size();
        let mut offset = header_size(count);
        for slot in slots(count) {
            let tuple = if page.is_slot_used(slot) {
                let mut tuple = parse_tuple(&data[offset..offset + tuple_size], schema)?;
                tuple.set_record_id(Some(RecordId::new(page_id, slot)));
                Some(tuple)
            } else {
                None
            };
            page.tuples.push(tuple);
            offset += tuple_size;
        }

        Ok(page)
    }

    /// The image of a page without any tuples
    pub fn empty_page_data() -> Vec<u8> {
        vec![0u8; page_size()]
    }

    /// Encodes this page so that it can be written to disk
    pub fn page_data(&self) -> Vec<u8> {
        let mut data = vec![0u8; page_size()];
        data[..self.header.len()].copy_from_slice(&self.header);

        let tuple_size = self.schema.byte_size();
        let mut offset = self.header.len();
        for tuple in &self.tuples {
            if let Some(tuple) = tuple {
                serialize_tuple(&mut data[offset..offset + tuple_size], tuple, &self.schema);
            }
            offset += tuple_size;
        }
        data
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn slot_count(&self) -> usize {
        self.tuples.len()
    }

    pub fn free_slot_count(&self) -> usize {
        slots(self.tuples.len())
            .filter(|slot| !self.is_slot_used(*slot))
            .count()
    }

    pub fn is_slot_used(&self, slot: Slot) -> bool {
        let slot = slot as usize;
        match self.header.get(slot / 8) {
            Some(byte) => byte & (1 << (slot % 8)) != 0,
            None => false,
        }
    }

    fn set_slot_used(&mut self, slot: Slot, used: bool) {
        let slot = slot as usize;
        let mask = 1 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }

    /// The stored tuples in slot order
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    /// Stores a tuple in the first free slot and returns where it has been stored.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> Result<RecordId> {
        if !tuple.conforms_to(&self.schema) {
            return Err(DbError::DbOperation(format!(
                "Tuple does not match the schema {} of page {}",
                self.schema, self.page_id
            )));
        }
        let slot = slots(self.tuples.len())
            .find(|slot| !self.is_slot_used(*slot))
            .ok_or_else(|| DbError::DbOperation(format!("Page {} is full", self.page_id)))?;

        let record_id = RecordId::new(self.page_id, slot);
        tuple.set_record_id(Some(record_id));
        self.set_slot_used(slot, true);
        self.tuples[slot as usize] = Some(tuple);
        Ok(record_id)
    }

    /// Removes a tuple from the slot it has been read from.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let record_id = tuple.record_id().ok_or_else(|| {
            DbError::DbOperation("Cannot delete a tuple which has not been stored".to_owned())
        })?;
        if record_id.page_id() != self.page_id {
            return Err(DbError::DbOperation(format!(
                "Tuple is stored on page {}, not on page {}",
                record_id.page_id(),
                self.page_id
            )));
        }
        let slot = record_id.slot();
        if slot as usize >= self.tuples.len() || !self.is_slot_used(slot) {
            return Err(DbError::DbOperation(format!(
                "Slot {} of page {} is empty",
                slot, self.page_id
            )));
        }
        self.set_slot_used(slot, false);
        self.tuples[slot as usize] = None;
        Ok(())
    }

    /// Marks this page as modified by a transaction, or as clean
    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtied_by = tid;
    }

    /// The transaction which modified this page since it has been read, if any
    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }
}

fn parse_tuple(bytes: &[u8], schema: &Schema) -> Result<Tuple> {
    let mut offset = 0;
    let mut values = Vec::with_capacity(schema.field_count());
    for field in schema.fields() {
        let value = Value::parse_value(&bytes[offset..], field.type_id())?;
        offset += field.type_id().size();
        values.push(value);
    }
    Ok(Tuple::new(values))
}

fn serialize_tuple(buffer: &mut [u8], tuple: &Tuple, schema: &Schema) {
    let mut offset = 0;
    for (value, field) in tuple.values().iter().zip(schema.fields()) {
        value.serialize_value(&mut buffer[offset..], field.type_id());
        offset += field.type_id().size();
    }
}

#[cfg(test)]
mod tests {
    use lazy_static::lazy_static;

    use super::{slot_count, HeapPage};
    use crate::common::{page_size, PageId};
    use crate::concurrency::TransactionId;
    use crate::tuple::schema::{Schema, TypeId};
    use crate::tuple::value::Value;
    use crate::tuple::Tuple;

    lazy_static! {
        static ref TEST_SCHEMA: Schema = Schema::named(
            &[TypeId::Integer, TypeId::Text(32), TypeId::Boolean],
            &["id", "name", "active"]
        )
        .unwrap();
    }

    fn tuple(id: i32) -> Tuple {
        Tuple::new(vec![
            Value::Integer(id),
            Value::String(format!("name-{id}")),
            Value::Boolean(id % 2 == 0),
        ])
    }

    fn empty_page() -> HeapPage {
        HeapPage::parse(PageId::new(1, 0), &HeapPage::empty_page_data(), &TEST_SCHEMA).unwrap()
    }

    #[test]
    fn empty_page_has_only_free_slots() {
        let page = empty_page();
        // 37 bytes per tuple and one header bit
        assert_eq!(page.slot_count(), page_size() * 8 / (37 * 8 + 1));
        assert_eq!(page.slot_count(), slot_count(&TEST_SCHEMA));
        assert_eq!(page.free_slot_count(), page.slot_count());
        assert_eq!(page.tuples().count(), 0);
    }

    #[test]
    fn inserted_tuples_survive_encoding() {
        let mut page = empty_page();
        for id in 0..10 {
            let record_id = page.insert_tuple(tuple(id)).unwrap();
            assert_eq!(record_id.slot(), id as u16);
        }
        let data = page.page_data();
        assert_eq!(data.len(), page_size());
        // first ten header bits are set
        assert_eq!(data[0], 0xff);
        assert_eq!(data[1], 0b11);

        let parsed = HeapPage::parse(PageId::new(1, 0), &data, &TEST_SCHEMA).unwrap();
        assert_eq!(parsed.free_slot_count(), parsed.slot_count() - 10);
        for (id, stored) in parsed.tuples().enumerate() {
            assert_eq!(stored.values(), tuple(id as i32).values());
            assert_eq!(stored.record_id().unwrap().slot(), id as u16);
            assert_eq!(stored.record_id().unwrap().page_id(), PageId::new(1, 0));
        }
    }

    #[test]
    fn deleted_slot_is_reused() {
        let mut page = empty_page();
        for id in 0..3 {
            page.insert_tuple(tuple(id)).unwrap();
        }
        let second = page.tuples().nth(1).unwrap().clone();
        page.delete_tuple(&second).unwrap();
        assert!(!page.is_slot_used(1));
        assert!(page.delete_tuple(&second).is_err());

        let record_id = page.insert_tuple(tuple(7)).unwrap();
        assert_eq!(record_id.slot(), 1);
        let ids = page
            .tuples()
            .map(|tuple| tuple.values()[0].as_i32())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 7, 2]);
    }

    #[test]
    fn rejects_invalid_inserts_and_deletes() {
        let mut page = empty_page();
        let wrong_arity = Tuple::new(vec![Value::Integer(1)]);
        assert!(page.insert_tuple(wrong_arity).is_err());

        let mut other_page =
            HeapPage::parse(PageId::new(1, 1), &HeapPage::empty_page_data(), &TEST_SCHEMA)
                .unwrap();
        other_page.insert_tuple(tuple(1)).unwrap();
        let foreign = other_page.tuples().next().unwrap().clone();
        assert!(page.delete_tuple(&foreign).is_err());
        assert!(page.delete_tuple(&tuple(1)).is_err());
    }

    #[test]
    fn full_page_rejects_inserts() {
        let mut page = empty_page();
        for id in 0..page.slot_count() {
            page.insert_tuple(tuple(id as i32)).unwrap();
        }
        assert_eq!(page.free_slot_count(), 0);
        assert!(page.insert_tuple(tuple(-1)).is_err());
    }

    #[test]
    fn tracks_dirtying_transaction() {
        let mut page = empty_page();
        assert_eq!(page.dirtied_by(), None);
        let tid = TransactionId::new();
        page.mark_dirty(Some(tid));
        assert_eq!(page.dirtied_by(), Some(tid));
        page.mark_dirty(None);
        assert_eq!(page.dirtied_by(), None);
    }

    #[test]
    fn rejects_wrong_image_size() {
        assert!(HeapPage::parse(PageId::new(1, 0), &[0u8; 16], &TEST_SCHEMA).is_err());
    }
}
