//! Local variables and their allocation state

use crate::types::PrimitiveType;
use std::fmt;

/// Index into a function's local table. Index 0 is always `$result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

impl LocalId {
    pub const RESULT: LocalId = LocalId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Closed range of touch positions. Parameters are pinned at `[-1, -1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    pub start: i32,
    pub end: i32,
}

impl LiveInterval {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    /// Written once and never read afterwards
    pub fn is_zero_width(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Where a local lives once allocation has run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Storage {
    /// Not allocated: a dead store, or allocation has not run
    #[default]
    Unassigned,
    /// Backend register number
    Register(u8),
    /// Stack slot index
    Stack(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    pub name: String,
    pub ty: PrimitiveType,
    /// Number of expressions storing into this local
    pub assignment_count: u32,
    /// Number of `LocalLoad`s reading it
    pub use_count: u32,
    pub interval: Option<LiveInterval>,
    pub is_parameter: bool,
    pub storage: Storage,
}

impl LocalVariable {
    pub fn new(name: impl Into<String>, ty: PrimitiveType, is_parameter: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            assignment_count: 0,
            use_count: 0,
            interval: None,
            is_parameter,
            storage: Storage::Unassigned,
        }
    }

    pub fn on_stack(&self) -> bool {
        matches!(self.storage, Storage::Stack(_))
    }

    /// Never touched by the body
    pub fn is_dead(&self) -> bool {
        self.assignment_count == 0 && self.use_count == 0
    }

    /// Forgets interval and location so another backend can allocate
    pub fn reset_allocation(&mut self) {
        self.interval = None;
        self.storage = Storage::Unassigned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_overlap() {
        let a = LiveInterval::new(0, 2);
        let b = LiveInterval::new(1, 3);
        let c = LiveInterval::new(2, 4);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(LiveInterval::new(-1, -1).is_zero_width());
    }

    #[test]
    fn test_fresh_local_is_dead() {
        let local = LocalVariable::new("x", PrimitiveType::Int, false);
        assert!(local.is_dead());
        assert!(!local.on_stack());
    }
}
