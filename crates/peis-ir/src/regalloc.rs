//! Linear-scan register allocation
//!
//! Locals are visited in order of interval start. Intervals that ended
//! before the current one starts give their location back to the backend.
//! When the backend can only offer a stack slot, the allocator steals the
//! register of the active interval that lives longest, if it outlives the
//! current one, and sends that interval to the stack instead.

use crate::function::Function;
use crate::local::{LocalId, LocalVariable, Storage};
use crate::types::PrimitiveType;
use std::cmp::Reverse;
use tracing::{debug, trace};

/// Source of locations for one allocation run
pub trait RegisterBackend {
    /// Hands out a register or a stack slot for a value of type `ty`
    fn get_location(&mut self, ty: PrimitiveType, is_parameter: bool) -> Storage;

    /// Gives a location back once its interval has ended
    fn return_location(&mut self, location: Storage);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationResult {
    /// Number of stack slots in use: highest slot index plus one
    pub stack_slots: u32,
    /// Locals that ended up on the stack
    pub spilled: usize,
}

fn interval_end(local: &LocalVariable) -> i32 {
    local.interval.map_or(i32::MIN, |i| i.end)
}

/// Assigns a location to every live local of `function`. Intervals must be
/// computed first. Locals written but never read get no location.
pub fn assign_registers(function: &mut Function, backend: &mut dyn RegisterBackend) -> AllocationResult {
    let locals = &mut function.locals;

    let mut order: Vec<LocalId> = (0..locals.len() as u32)
        .map(LocalId)
        .filter(|id| locals[id.index()].interval.is_some())
        .collect();
    order.sort_by_key(|id| locals[id.index()].interval.map_or(i32::MAX, |i| i.start));

    // Sorted by descending end
    let mut active: Vec<LocalId> = Vec::new();

    for id in order {
        let Some(interval) = locals[id.index()].interval else {
            continue;
        };

        active.retain(|&other| {
            let expired = &locals[other.index()];
            if interval_end(expired) <= interval.start {
                backend.return_location(expired.storage);
                false
            } else {
                true
            }
        });

        let local = &locals[id.index()];
        if interval.is_zero_width() && !local.is_parameter {
            continue;
        }
        let (ty, is_parameter) = (local.ty, local.is_parameter);

        let location = backend.get_location(ty, is_parameter);
        locals[id.index()].storage = location;

        if matches!(location, Storage::Stack(_)) && !is_parameter {
            // Longest-lived active interval holding a register of the same kind
            let victim = active.iter().copied().find(|&other| {
                let candidate = &locals[other.index()];
                matches!(candidate.storage, Storage::Register(_)) && !candidate.is_parameter && candidate.ty == ty
            });
            if let Some(victim) = victim {
                if interval_end(&locals[victim.index()]) > interval.end {
                    let register = locals[victim.index()].storage;
                    locals[victim.index()].storage = location;
                    locals[id.index()].storage = register;
                    trace!(
                        spilled = %locals[victim.index()].name,
                        kept = %locals[id.index()].name,
                        "swapped register with longer-lived interval"
                    );
                }
            }
        }

        active.push(id);
        active.sort_by_key(|&other| Reverse(interval_end(&locals[other.index()])));
    }

    let mut result = AllocationResult::default();
    for local in locals.iter() {
        if let Storage::Stack(slot) = local.storage {
            result.stack_slots = result.stack_slots.max(slot + 1);
            result.spilled += 1;
        }
    }

    debug!(
        function = %function.full_name,
        stack_slots = result.stack_slots,
        spilled = result.spilled,
        "register allocation"
    );
    result
}
