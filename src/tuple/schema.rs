use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{DbError, Result};

const TEXT_LENGTH_PREFIX: u16 = std::mem::size_of::<u16>() as u16;

/// The type of a field. Every type has a fixed width when stored on a page.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeId {
    Boolean,
    Integer,
    /// Text occupying exactly the given number of bytes, including a two byte length prefix
    Text(u16),
}

impl TypeId {
    /// Returns how many bytes a value of this type occupies on a page
    pub fn size(&self) -> usize {
        match self {
            TypeId::Boolean => std::mem::size_of::<u8>(),
            TypeId::Integer => std::mem::size_of::<i32>(),
            TypeId::Text(width) => *width as usize,
        }
    }

    /// How many bytes of text fit into a text field of the given width
    pub(crate) fn text_capacity(width: u16) -> usize {
        width.saturating_sub(TEXT_LENGTH_PREFIX) as usize
    }
}

impl FromStr for TypeId {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "bool" | "boolean" => return Ok(TypeId::Boolean),
            "int" | "integer" => return Ok(TypeId::Integer),
            _ => (),
        }
        let width = lower
            .strip_prefix("string(")
            .or_else(|| lower.strip_prefix("text("))
            .and_then(|rest| rest.strip_suffix(')'))
            .and_then(|width| width.trim().parse::<u16>().ok());
        match width {
            Some(width) => Ok(TypeId::Text(width)),
            None => Err(DbError::InvalidSchema(format!("Invalid type {s:?}"))),
        }
    }
}

impl Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeId::Boolean => write!(f, "BOOLEAN"),
            TypeId::Integer => write!(f, "INT"),
            TypeId::Text(width) => write!(f, "STRING({width})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    type_id: TypeId,
    name: Option<String>,
}

impl FieldDescriptor {
    pub fn new(type_id: TypeId, name: Option<String>) -> Self {
        Self { type_id, name }
    }

    /// creates a field descriptor where only the type is known
    pub fn with_type_id(type_id: TypeId) -> Self {
        Self {
            type_id,
            name: None,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Display for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}({})", self.type_id, name),
            None => write!(f, "{}", self.type_id),
        }
    }
}

/// Describes every tuple of a table: an ordered, non-empty list of fields.
///
/// Two schemas are equal if their field types are equal position by position.
/// Field names are ignored by both `Eq` and `Hash`.
#[derive(Clone, Debug)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self> {
        if fields.is_empty() {
            return Err(DbError::InvalidSchema(
                "A schema needs at least one field".to_owned(),
            ));
        }
        for field in &fields {
            if let TypeId::Text(width) = field.type_id {
                if width <= TEXT_LENGTH_PREFIX {
                    return Err(DbError::InvalidSchema(format!(
                        "{} is too narrow to hold any text",
                        field.type_id
                    )));
                }
            }
        }
        Ok(Self { fields })
    }

    /// Creates a schema with named fields. `types` and `names` must have the same length.
    pub fn named(types: &[TypeId], names: &[&str]) -> Result<Self> {
        if types.len() != names.len() {
            return Err(DbError::InvalidSchema(format!(
                "Got {} types but {} names",
                types.len(),
                names.len()
            )));
        }
        let fields = types
            .iter()
            .zip(names)
            .map(|(type_id, name)| FieldDescriptor::new(*type_id, Some((*name).to_owned())))
            .collect();
        Self::new(fields)
    }

    /// Creates a schema with anonymous fields
    pub fn anonymous(types: &[TypeId]) -> Result<Self> {
        Self::new(types.iter().copied().map(FieldDescriptor::with_type_id).collect())
    }

    /// Parses a comma separated field list such as `int id, string(32) name, bool`
    pub fn parse(definition: &str) -> Result<Self> {
        let fields = definition
            .split(',')
            .map(|field| {
                let mut parts = field.split_whitespace();
                let type_id = parts
                    .next()
                    .ok_or_else(|| DbError::InvalidSchema(format!("Empty field in {definition:?}")))?
                    .parse()?;
                let name = parts.next().map(str::to_owned);
                if parts.next().is_some() {
                    return Err(DbError::InvalidSchema(format!("Malformed field {field:?}")));
                }
                Ok(FieldDescriptor::new(type_id, name))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(fields)
    }

    /// Concatenates two schemas. Duplicate names are kept.
    pub fn merge(first: &Schema, second: &Schema) -> Schema {
        let fields = first
            .fields
            .iter()
            .chain(second.fields.iter())
            .cloned()
            .collect();
        Schema { fields }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    fn field(&self, index: usize) -> Result<&FieldDescriptor> {
        self.fields.get(index).ok_or(DbError::FieldIndex {
            index,
            field_count: self.fields.len(),
        })
    }

    /// Returns the name of the field at `index`, which may be unset
    pub fn field_name(&self, index: usize) -> Result<Option<&str>> {
        self.field(index).map(FieldDescriptor::name)
    }

    pub fn field_type(&self, index: usize) -> Result<TypeId> {
        self.field(index).map(FieldDescriptor::type_id)
    }

    /// Returns the index of the first field called `name`
    pub fn index_of_field(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|field| field.name() == Some(name))
            .ok_or_else(|| DbError::NoSuchField(name.to_owned()))
    }

    /// Size in bytes of a tuple of this schema
    pub fn byte_size(&self) -> usize {
        self.fields.iter().map(|field| field.type_id.size()).sum()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.type_id == b.type_id)
    }
}

impl Eq for Schema {}

impl Hash for Schema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.fields.len());
        for field in &self.fields {
            field.type_id.hash(state);
        }
    }
}

impl Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}
