//! Tree-walking evaluation of typed expressions.
//!
//! This is the reference backend: the JIT and compiled backends must agree
//! with [`eval`] on every input.

use std::sync::Arc;

use kestrel_common::bits;
use kestrel_config::BackendKind;
use kestrel_ir::{BinaryOp, CheckedModule, CombStep, Node, TypedExpr, UnaryOp};

use crate::kernel::Evaluator;
use crate::plan::SimPlan;

/// Evaluates `expr` against the current signal values.
pub fn eval(expr: &TypedExpr, signals: &[u64]) -> u64 {
    let width = expr.width;
    match &expr.node {
        Node::Const(value) => *value,
        Node::Signal(id) => signals[id.as_raw() as usize],
        Node::Slice { expr: inner, low } => bits::mask(eval(inner, signals) >> low, width),
        Node::Concat(parts) => parts.iter().fold(0, |acc, part| {
            bits::shl(acc, u64::from(part.width), 64) | eval(part, signals)
        }),
        Node::Unary { op, operand } => {
            let value = eval(operand, signals);
            match op {
                UnaryOp::Not => bits::mask(!value, width),
                UnaryOp::Neg => bits::mask(value.wrapping_neg(), width),
                UnaryOp::ReduceAnd => u64::from(value == bits::width_mask(operand.width)),
                UnaryOp::ReduceOr => u64::from(value != 0),
                UnaryOp::ReduceXor => u64::from(value.count_ones() % 2 == 1),
                UnaryOp::LogicNot => u64::from(value == 0),
            }
        }
        Node::Binary { op, lhs, rhs } => {
            let a = eval(lhs, signals);
            let b = eval(rhs, signals);
            binary(*op, a, b, lhs, rhs, width)
        }
        Node::Mux {
            cond,
            when_true,
            when_false,
        } => {
            if eval(cond, signals) != 0 {
                eval(when_true, signals)
            } else {
                eval(when_false, signals)
            }
        }
        Node::Case {
            selector,
            arms,
            default,
        } => {
            let key = eval(selector, signals);
            match arms.iter().find(|(value, _)| *value == key) {
                Some((_, arm)) => eval(arm, signals),
                None => eval(default, signals),
            }
        }
        Node::Resize(inner) => bits::resize(eval(inner, signals), inner.width, width, inner.signed),
    }
}

fn binary(op: BinaryOp, a: u64, b: u64, lhs: &TypedExpr, rhs: &TypedExpr, width: u32) -> u64 {
    let signed = TypedExpr::signed_compare(lhs, rhs);
    let operand_width = lhs.width;
    match op {
        BinaryOp::Add => bits::mask(a.wrapping_add(b), width),
        BinaryOp::Sub => bits::mask(a.wrapping_sub(b), width),
        BinaryOp::Mul => bits::mask(a.wrapping_mul(b), width),
        BinaryOp::Div => bits::div(a, b),
        BinaryOp::Rem => bits::rem(a, b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => bits::shl(a, b, width),
        BinaryOp::Shr => bits::shr(a, b, width, lhs.signed),
        BinaryOp::Eq => u64::from(a == b),
        BinaryOp::Ne => u64::from(a != b),
        BinaryOp::Lt => u64::from(bits::less_than(a, b, operand_width, signed)),
        BinaryOp::Le => u64::from(!bits::less_than(b, a, operand_width, signed)),
        BinaryOp::Gt => u64::from(bits::less_than(b, a, operand_width, signed)),
        BinaryOp::Ge => u64::from(!bits::less_than(a, b, operand_width, signed)),
    }
}

/// Reads `memory[addr]`, zero when out of range.
pub fn read_word(memory: &[u64], addr: u64) -> u64 {
    usize::try_from(addr)
        .ok()
        .and_then(|index| memory.get(index))
        .copied()
        .unwrap_or(0)
}

/// Evaluator that walks the checked expression trees directly.
pub struct Interpreter {
    module: Arc<CheckedModule>,
    slots: Vec<TypedExpr>,
}

impl Interpreter {
    /// Creates an interpreter for `module` sampling the slots of `plan`.
    pub fn new(module: Arc<CheckedModule>, plan: &SimPlan) -> Self {
        Self {
            module,
            slots: plan.slots.clone(),
        }
    }
}

impl Evaluator for Interpreter {
    fn kind(&self) -> BackendKind {
        BackendKind::Interpreter
    }

    fn settle(&mut self, signals: &mut [u64], memories: &[Vec<u64>]) {
        for step in &self.module.comb {
            match step {
                CombStep::Assign { target, expr } => {
                    signals[target.as_raw() as usize] = eval(expr, signals);
                }
                CombStep::MemRead { memory, addr, data } => {
                    let addr = eval(addr, signals);
                    signals[data.as_raw() as usize] =
                        read_word(&memories[memory.as_raw() as usize], addr);
                }
            }
        }
    }

    fn sample(&mut self, signals: &[u64], _memories: &[Vec<u64>], samples: &mut [u64]) {
        for (slot, expr) in samples.iter_mut().zip(&self.slots) {
            *slot = eval(expr, signals);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ir::SignalId;

    fn sig(index: u32, width: u32, signed: bool) -> TypedExpr {
        TypedExpr {
            node: Node::Signal(SignalId::from_raw(index)),
            width,
            signed,
        }
    }

    fn bin(op: BinaryOp, lhs: TypedExpr, rhs: TypedExpr, width: u32) -> TypedExpr {
        TypedExpr {
            node: Node::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            width,
            signed: false,
        }
    }

    #[test]
    fn add_wraps_at_width() {
        let e = bin(BinaryOp::Add, sig(0, 8, false), sig(1, 8, false), 8);
        assert_eq!(eval(&e, &[200, 100]), 44);
    }

    #[test]
    fn signed_compare_needs_both_signed() {
        let lt = |ls, rs| bin(BinaryOp::Lt, sig(0, 4, ls), sig(1, 4, rs), 1);
        // 0xF is -1 when signed.
        assert_eq!(eval(&lt(true, true), &[0xF, 1]), 1);
        assert_eq!(eval(&lt(true, false), &[0xF, 1]), 0);
        let ge = bin(BinaryOp::Ge, sig(0, 4, true), sig(1, 4, true), 1);
        assert_eq!(eval(&ge, &[0xF, 1]), 0);
    }

    #[test]
    fn shr_is_arithmetic_for_signed_lhs() {
        let e = TypedExpr {
            signed: true,
            ..bin(BinaryOp::Shr, sig(0, 8, true), sig(1, 4, false), 8)
        };
        assert_eq!(eval(&e, &[0x80, 2]), 0xE0);
        assert_eq!(eval(&e, &[0x80, 12]), 0xFF);
        let logical = bin(BinaryOp::Shr, sig(0, 8, false), sig(1, 4, false), 8);
        assert_eq!(eval(&logical, &[0x80, 12]), 0);
    }

    #[test]
    fn division_by_zero_is_zero() {
        let div = bin(BinaryOp::Div, sig(0, 8, false), sig(1, 8, false), 8);
        let rem = bin(BinaryOp::Rem, sig(0, 8, false), sig(1, 8, false), 8);
        assert_eq!(eval(&div, &[7, 0]), 0);
        assert_eq!(eval(&rem, &[7, 0]), 0);
        assert_eq!(eval(&div, &[7, 2]), 3);
    }

    #[test]
    fn concat_packs_msb_first() {
        let e = TypedExpr {
            node: Node::Concat(vec![sig(0, 4, false), sig(1, 4, false)]),
            width: 8,
            signed: false,
        };
        assert_eq!(eval(&e, &[0xA, 0x5]), 0xA5);
    }

    #[test]
    fn full_width_concat_part() {
        let e = TypedExpr {
            node: Node::Concat(vec![sig(0, 64, false)]),
            width: 64,
            signed: false,
        };
        assert_eq!(eval(&e, &[u64::MAX]), u64::MAX);
    }

    #[test]
    fn resize_sign_extends_signed_operand() {
        let e = TypedExpr {
            node: Node::Resize(Box::new(sig(0, 4, true))),
            width: 8,
            signed: true,
        };
        assert_eq!(eval(&e, &[0x8]), 0xF8);
    }

    #[test]
    fn case_takes_first_matching_arm() {
        let e = TypedExpr {
            node: Node::Case {
                selector: Box::new(sig(0, 2, false)),
                arms: vec![
                    (1, TypedExpr::constant(10, 8)),
                    (1, TypedExpr::constant(20, 8)),
                ],
                default: Box::new(TypedExpr::constant(99, 8)),
            },
            width: 8,
            signed: false,
        };
        assert_eq!(eval(&e, &[1]), 10);
        assert_eq!(eval(&e, &[3]), 99);
    }

    #[test]
    fn reductions() {
        let red = |op| TypedExpr {
            node: Node::Unary {
                op,
                operand: Box::new(sig(0, 3, false)),
            },
            width: 1,
            signed: false,
        };
        assert_eq!(eval(&red(UnaryOp::ReduceAnd), &[0b111]), 1);
        assert_eq!(eval(&red(UnaryOp::ReduceAnd), &[0b101]), 0);
        assert_eq!(eval(&red(UnaryOp::ReduceXor), &[0b101]), 0);
        assert_eq!(eval(&red(UnaryOp::LogicNot), &[0]), 1);
    }

    #[test]
    fn out_of_range_read_is_zero() {
        assert_eq!(read_word(&[1, 2], 1), 2);
        assert_eq!(read_word(&[1, 2], 2), 0);
        assert_eq!(read_word(&[1, 2], u64::MAX), 0);
    }
}
