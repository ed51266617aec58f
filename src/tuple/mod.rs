use std::fmt::Display;

use self::schema::Schema;
use self::value::Value;
use crate::common::PageId;

pub mod schema;
pub mod value;

pub type Slot = u16;

/// Location of a stored tuple: its page and the slot on that page
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordId {
    page_id: PageId,
    slot: Slot,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: Slot) -> Self {
        Self { page_id, slot }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tuple {
    values: Vec<Value>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            record_id: None,
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Where this tuple is stored. Only set for tuples read from or inserted into a page.
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Returns whether every value can be stored in the corresponding field of `schema`
    pub fn conforms_to(&self, schema: &Schema) -> bool {
        self.values.len() == schema.field_count()
            && self
                .values
                .iter()
                .zip(schema.fields())
                .all(|(value, field)| value.fits(field.type_id()))
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}
