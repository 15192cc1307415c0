//! Slot allocation for the stack machine
//!
//! The virtual machine has no registers: every location is a typed local
//! slot. Slots are recycled per type once their interval ends. Parameters
//! always get fresh slots, so they occupy slots `0..n` in declaration order.

use peis_ir::{LocalVariable, PrimitiveType, RegisterBackend, Storage};
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Default)]
pub struct BytecodeBackend {
    /// Type of every slot handed out so far
    slots: Vec<PrimitiveType>,
    free: HashMap<PrimitiveType, Vec<u32>>,
}

impl BytecodeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_types(&self) -> &[PrimitiveType] {
        &self.slots
    }

    /// Names of the locals sharing each slot, joined with `|`
    pub fn slot_names(&self, locals: &[LocalVariable]) -> Vec<String> {
        let mut names: Vec<Vec<&str>> = vec![Vec::new(); self.slots.len()];
        for local in locals {
            if let Storage::Stack(slot) = local.storage {
                if let Some(entry) = names.get_mut(slot as usize) {
                    entry.push(&local.name);
                }
            }
        }
        names.into_iter().map(|n| n.join("|")).collect()
    }

    fn fresh_slot(&mut self, ty: PrimitiveType) -> u32 {
        self.slots.push(ty);
        (self.slots.len() - 1) as u32
    }
}

impl RegisterBackend for BytecodeBackend {
    fn get_location(&mut self, ty: PrimitiveType, is_parameter: bool) -> Storage {
        let reused = if is_parameter {
            None
        } else {
            self.free.get_mut(&ty).and_then(Vec::pop)
        };
        let slot = match reused {
            Some(slot) => slot,
            None => self.fresh_slot(ty),
        };
        trace!(slot, %ty, is_parameter, "bytecode slot");
        Storage::Stack(slot)
    }

    fn return_location(&mut self, location: Storage) {
        if let Storage::Stack(slot) = location {
            if let Some(&ty) = self.slots.get(slot as usize) {
                self.free.entry(ty).or_default().push(slot);
            }
        }
    }
}
