use std::fmt::Display;

use super::schema::TypeId;
use crate::error::{DbError, Result};

const LENGTH_PREFIX_SIZE: usize = std::mem::size_of::<u16>();

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    String(String),
}

impl Value {
    /// Parses a value of the given type from the first `type_id.size()` bytes.
    pub fn parse_value(bytes: &[u8], type_id: TypeId) -> Result<Self> {
        match type_id {
            TypeId::Boolean => Ok(Value::Boolean(bytes[0] == 1)),
            TypeId::Integer => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&bytes[..4]);
                Ok(Value::Integer(i32::from_be_bytes(raw)))
            }
            TypeId::Text(width) => {
                let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
                if len > TypeId::text_capacity(width) {
                    return Err(DbError::DbOperation(format!(
                        "Corrupted text field: length {len} exceeds capacity of {}",
                        type_id
                    )));
                }
                let slice = &bytes[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len];
                let val = std::str::from_utf8(slice)
                    .map_err(|e| DbError::DbOperation(format!("Corrupted text field: {e}")))?;
                Ok(Value::String(val.to_owned()))
            }
        }
    }

    /// Writes this value as a field of `type_id`, padding with zeros up to the field width.
    /// The value has to fit the type, see [`Value::fits`].
    pub fn serialize_value(&self, buffer: &mut [u8], type_id: TypeId) {
        debug_assert!(self.fits(type_id), "{self} does not fit into {type_id}");
        let field = &mut buffer[..type_id.size()];
        field.fill(0);
        match self {
            Value::Boolean(b) => field[0] = *b as u8,
            Value::Integer(val) => field.copy_from_slice(val.to_be_bytes().as_slice()),
            Value::String(val) => {
                let len = val.len();
                field[..LENGTH_PREFIX_SIZE].copy_from_slice((len as u16).to_be_bytes().as_slice());
                field[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len].copy_from_slice(val.as_bytes());
            }
        }
    }

    /// Returns whether this value can be stored in a field of the given type
    pub fn fits(&self, type_id: TypeId) -> bool {
        match (self, type_id) {
            (Value::Boolean(_), TypeId::Boolean) => true,
            (Value::Integer(_), TypeId::Integer) => true,
            (Value::String(val), TypeId::Text(width)) => val.len() <= TypeId::text_capacity(width),
            _ => false,
        }
    }

    /// Parses user input into a value of the given type
    pub fn parse_literal(literal: &str, type_id: TypeId) -> Result<Self> {
        let value = match type_id {
            TypeId::Boolean => match literal.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Value::Boolean(true),
                "false" | "f" | "0" => Value::Boolean(false),
                _ => return Err(DbError::DbOperation(format!("{literal:?} is not a boolean"))),
            },
            TypeId::Integer => literal
                .parse()
                .map(Value::Integer)
                .map_err(|_| DbError::DbOperation(format!("{literal:?} is not an integer")))?,
            TypeId::Text(_) => Value::String(literal.to_owned()),
        };
        if value.fits(type_id) {
            Ok(value)
        } else {
            Err(DbError::DbOperation(format!(
                "{literal:?} does not fit into {type_id}"
            )))
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Value::Integer(val) => *val,
            _ => unreachable!(),
        }
    }

    pub fn as_str(&self) -> &str {
        match &self {
            Value::String(val) => val,
            _ => unreachable!(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Boolean(val) => write!(f, "{val}"),
            Value::Integer(val) => write!(f, "{val}"),
            Value::String(val) => write!(f, "{val}"),
        }
    }
}
