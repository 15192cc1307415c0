//! Live interval computation
//!
//! A depth-first walk numbers every touch point in evaluation order. A local's
//! interval runs from its first to its last touch; parameters are pinned at
//! `[-1, -1]` and only ever extended. Locals read inside a loop but defined
//! before it stay live until the loop's last position.

use crate::expression::{ExprKind, Expression};
use crate::function::Function;
use crate::local::{LiveInterval, LocalId, LocalVariable};

struct LivenessWalker<'a> {
    position: i32,
    locals: &'a mut [LocalVariable],
}

/// Recomputes every interval of `function`, clearing previous allocations
pub fn compute_intervals(function: &mut Function) {
    function.reset_allocation();
    for local in function.locals.iter_mut().filter(|l| l.is_parameter) {
        local.interval = Some(LiveInterval::new(-1, -1));
    }

    let mut walker = LivenessWalker {
        position: 0,
        locals: &mut function.locals,
    };
    walker.visit(&function.body);
}

impl LivenessWalker<'_> {
    fn next_position(&mut self) -> i32 {
        let position = self.position;
        self.position += 1;
        position
    }

    fn touch(&mut self, id: LocalId, position: i32) {
        let local = &mut self.locals[id.index()];
        local.interval = Some(match local.interval {
            None => LiveInterval::new(position, position),
            Some(interval) => LiveInterval::new(interval.start, interval.end.max(position)),
        });
    }

    /// Also used to retouch operands, which are consumed where their parent computes
    fn touch_store(&mut self, expr: &Expression, position: i32) {
        if let Some(store) = expr.store {
            self.touch(store, position);
        }
    }

    fn visit(&mut self, expr: &Expression) {
        match &expr.kind {
            ExprKind::Constant(_) => {
                let position = self.next_position();
                self.touch_store(expr, position);
            }

            ExprKind::LocalLoad(id) => {
                let position = self.next_position();
                self.touch(*id, position);
                self.touch_store(expr, position);
            }

            ExprKind::Binary { left, right, .. } => {
                self.visit(left);
                self.visit(right);
                let position = self.next_position();
                self.touch_store(left, position);
                self.touch_store(right, position);
                self.touch_store(expr, position);
            }

            ExprKind::Unary { operand: inner, .. } | ExprKind::RealConversion(inner) => {
                self.visit(inner);
                let position = self.next_position();
                self.touch_store(inner, position);
                self.touch_store(expr, position);
            }

            ExprKind::FunctionCall { args, .. } | ExprKind::Print(args) => {
                for arg in args {
                    self.visit(arg);
                }
                let position = self.next_position();
                for arg in args {
                    self.touch_store(arg, position);
                }
                self.touch_store(expr, position);
            }

            ExprKind::Return(value) => {
                if let Some(value) = value {
                    self.visit(value);
                }
            }

            ExprKind::Sequence(statements) => {
                for statement in statements {
                    self.visit(statement);
                }
            }

            ExprKind::If { condition, then_branch, else_branch } => {
                self.visit(condition);
                self.visit(then_branch);
                if let Some(else_branch) = else_branch {
                    self.visit(else_branch);
                }
            }

            ExprKind::While { condition, body } => {
                let loop_start = self.position;
                self.visit(condition);
                self.visit(body);
                let loop_end = self.position - 1;
                self.extend_across_loop(loop_start, loop_end);
            }

            ExprKind::FailFast => {}
        }
    }

    /// Values defined before the loop and touched inside it are needed again
    /// on the next iteration
    fn extend_across_loop(&mut self, loop_start: i32, loop_end: i32) {
        if loop_end < loop_start {
            return;
        }
        for local in self.locals.iter_mut() {
            if let Some(interval) = &mut local.interval {
                if interval.start < loop_start && interval.end >= loop_start {
                    interval.end = interval.end.max(loop_end);
                }
            }
        }
    }
}
