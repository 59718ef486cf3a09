// ── Tagged words ─────────────────────────────────────────────────────
//
// Every stack slot, heap slot and constant operand is one u32 word. The
// low bits select how the rest of the word is read:
//
//   ...payload:31 | 0     small non-negative integer
//   ...index:30   | 0 1   heap reference
//   ...index:30   | 1 1   constant table index
//
// Anything that does not fit inline (strings, negative or large integers,
// booleans, functions, classes, undefined) lives in the constant table.

use super::{ConstantTable, ObjectRef, Value};
use crate::heap::Heap;
use crate::vm::VmError;

const TAG_MASK: u32 = 0b11;
const TAG_REFERENCE: u32 = 0b01;
const TAG_CONSTANT: u32 = 0b11;

/// Largest integer stored inline.
pub const SMALL_INT_MAX: i64 = (u32::MAX >> 1) as i64;
/// Largest heap or constant index a word can address.
pub const INDEX_MAX: u32 = u32::MAX >> 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagValue(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    SmallInt(u32),
    Reference(u32),
    Constant(u32),
}

impl TagValue {
    /// The only value a conditional jump treats as false. Comparison
    /// primitives return the integers 1 and 0, so this is the small int 0.
    pub const FALSE: TagValue = TagValue(0);
    pub const TRUE: TagValue = TagValue(1 << 1);
    /// Undefined is always registered first in a [`ConstantTable`].
    pub const UNDEFINED: TagValue = TagValue(TAG_CONSTANT);

    #[inline]
    pub fn small_int(value: u32) -> Self {
        debug_assert!(value as i64 <= SMALL_INT_MAX);
        TagValue(value << 1)
    }

    #[inline]
    pub fn reference(index: u32) -> Self {
        debug_assert!(index <= INDEX_MAX);
        TagValue((index << 2) | TAG_REFERENCE)
    }

    #[inline]
    pub fn constant(index: u32) -> Self {
        debug_assert!(index <= INDEX_MAX);
        TagValue((index << 2) | TAG_CONSTANT)
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        TagValue(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn kind(self) -> Kind {
        if self.0 & 1 == 0 {
            Kind::SmallInt(self.0 >> 1)
        } else if self.0 & TAG_MASK == TAG_REFERENCE {
            Kind::Reference(self.0 >> 2)
        } else {
            Kind::Constant(self.0 >> 2)
        }
    }

    #[inline]
    pub fn as_reference(self) -> Option<u32> {
        match self.kind() {
            Kind::Reference(index) => Some(index),
            _ => None,
        }
    }
}

/// Inline encoding for `0..=SMALL_INT_MAX`; `None` means the value has to go
/// through the constant table.
pub fn encode_small_int(n: i64) -> Option<TagValue> {
    if (0..=SMALL_INT_MAX).contains(&n) {
        Some(TagValue::small_int(n as u32))
    } else {
        None
    }
}

pub fn encode_reference(heap_index: u32) -> TagValue {
    TagValue::reference(heap_index)
}

/// Stores `value` in the table (or finds an equal entry) and returns its word.
pub fn encode_constant(value: Value, table: &mut ConstantTable) -> TagValue {
    TagValue::constant(table.register(value))
}

/// Picks the cheapest representation: inline integer, heap reference, or
/// constant table entry.
pub fn encode_any_value(value: &Value, table: &mut ConstantTable) -> TagValue {
    match value {
        Value::Int(n) => match encode_small_int(*n) {
            Some(word) => word,
            None => encode_constant(value.clone(), table),
        },
        Value::Object(obj) => encode_reference(obj.index),
        other => encode_constant(other.clone(), table),
    }
}

/// Dispatches on the tag bits alone. References decode to an [`ObjectRef`]
/// carrying the class from the object header; fields are not read.
pub fn decode(word: TagValue, table: &ConstantTable, heap: &Heap) -> Result<Value, VmError> {
    match word.kind() {
        Kind::SmallInt(n) => Ok(Value::Int(n as i64)),
        Kind::Constant(index) => table.get(index).cloned().ok_or(VmError::InvalidConstant { index }),
        Kind::Reference(index) => {
            let class_word = heap.class_of(index)?;
            match decode(class_word, table, heap)? {
                Value::Class(class) => Ok(Value::Object(ObjectRef { index, class })),
                other => Err(VmError::TypeMismatch { expected: "class header", found: other.type_name() }),
            }
        }
    }
}
