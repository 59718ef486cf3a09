//! Flat, append-only object heap.
//!
//! Objects are laid out as `[class word, gc mark, field words...]` and
//! allocated by bumping a single free pointer. Nothing is ever reclaimed:
//! running out of words is fatal.

use tracing::debug;

use crate::value::TagValue;
use crate::value::tag::INDEX_MAX;
use crate::vm::VmError;

pub const OBJECT_HEADER_SIZE: usize = 2;
const CLASS_OFFSET: usize = 0;
const GC_OFFSET: usize = 1;
/// Mark word written into every fresh object; no collector ever changes it.
pub const GC_EMPTY: u32 = u32::MAX - 1;

#[derive(Debug)]
pub struct Heap {
    words: Vec<u32>,
    hp: usize,
}

impl Heap {
    pub fn with_capacity(words: usize) -> Self {
        // references carry a 30-bit index
        let capacity = words.min(INDEX_MAX as usize + 1);
        Heap { words: vec![0; capacity], hp: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    pub fn used(&self) -> usize {
        self.hp
    }

    /// Writes a new object and returns a reference word to it.
    pub fn allocate(&mut self, class_word: TagValue, fields: &[TagValue]) -> Result<TagValue, VmError> {
        let size = OBJECT_HEADER_SIZE + fields.len();
        if self.hp + size > self.words.len() {
            debug!(used = self.hp, requested = size, capacity = self.words.len(), "heap exhausted");
            return Err(VmError::HeapExhausted { requested: size, available: self.words.len() - self.hp });
        }
        let r = self.hp;
        self.words[r + CLASS_OFFSET] = class_word.raw();
        self.words[r + GC_OFFSET] = GC_EMPTY;
        for (i, field) in fields.iter().enumerate() {
            self.words[r + OBJECT_HEADER_SIZE + i] = field.raw();
        }
        self.hp += size;
        Ok(TagValue::reference(r as u32))
    }

    pub fn class_of(&self, reference: u32) -> Result<TagValue, VmError> {
        let r = reference as usize;
        if r + OBJECT_HEADER_SIZE > self.hp {
            return Err(VmError::InvalidReference { index: reference });
        }
        Ok(TagValue::from_raw(self.words[r + CLASS_OFFSET]))
    }

    /// Reads field `slot`. The slot must come from the object's class
    /// descriptor; it is only checked in debug builds.
    pub fn field_get(&self, reference: u32, slot: usize) -> TagValue {
        let at = reference as usize + OBJECT_HEADER_SIZE + slot;
        debug_assert!(at < self.hp, "field slot {} out of bounds for object @{}", slot, reference);
        TagValue::from_raw(self.words[at])
    }

    pub fn field_put(&mut self, reference: u32, slot: usize, value: TagValue) {
        let at = reference as usize + OBJECT_HEADER_SIZE + slot;
        debug_assert!(at < self.hp, "field slot {} out of bounds for object @{}", slot, reference);
        self.words[at] = value.raw();
    }

    pub fn gc_mark(&self, reference: u32) -> u32 {
        self.words[reference as usize + GC_OFFSET]
    }
}
