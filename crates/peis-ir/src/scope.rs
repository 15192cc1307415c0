//! Lexical scopes for locals during IR construction

use crate::local::LocalId;
use std::collections::HashMap;

/// Stack of scopes mapping case-folded names to locals
#[derive(Debug)]
pub struct LocalVariableContext {
    scopes: Vec<HashMap<String, LocalId>>,
}

impl LocalVariableContext {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Declares in the innermost scope; returns false if already declared there
    pub fn declare(&mut self, name: &str, id: LocalId) -> bool {
        match self.scopes.last_mut() {
            Some(scope) if !scope.contains_key(name) => {
                scope.insert(name.to_string(), id);
                true
            }
            _ => false,
        }
    }

    /// Innermost declaration of `name`
    pub fn lookup(&self, name: &str) -> Option<LocalId> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }
}

impl Default for LocalVariableContext {
    fn default() -> Self {
        Self::new()
    }
}
