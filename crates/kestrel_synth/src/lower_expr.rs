//! Expression lowering: typed expression trees to gate networks.
//!
//! Buses are `Vec<NetId>` with the least significant bit first. Operands are
//! lowered before their parent, so gate ids follow a post-order walk of the
//! tree.

use kestrel_ir::{BinaryOp, Node, TypedExpr, UnaryOp};

use crate::error::LowerError;
use crate::netlist::{NetId, NetlistBuilder};

/// Lowers `expr`, reading signal values from `buses` (indexed by signal id).
///
/// Every signal the expression reads must already have a bus of its declared
/// width; otherwise this fails with [`LowerError::UnboundSignal`].
pub fn lower_expr(
    b: &mut NetlistBuilder,
    buses: &[Vec<NetId>],
    expr: &TypedExpr,
) -> Result<Vec<NetId>, LowerError> {
    let width = expr.width;
    let lowered = match &expr.node {
        Node::Const(value) => b.constant(*value, width),
        Node::Signal(id) => match buses.get(id.as_raw() as usize) {
            Some(bus) if bus.len() == width as usize => bus.clone(),
            found => {
                return Err(LowerError::UnboundSignal {
                    signal: id.as_raw(),
                    width,
                    found: found.map_or(0, Vec::len),
                })
            }
        },
        Node::Slice { expr: inner, low } => {
            let value = lower_expr(b, buses, inner)?;
            let low = *low as usize;
            value[low..low + width as usize].to_vec()
        }
        Node::Concat(parts) => {
            let lowered = parts
                .iter()
                .map(|p| lower_expr(b, buses, p))
                .collect::<Result<Vec<_>, _>>()?;
            lowered.into_iter().rev().flatten().collect()
        }
        Node::Unary { op, operand } => {
            let value = lower_expr(b, buses, operand)?;
            match op {
                UnaryOp::Not => value.iter().map(|&n| b.not(n)).collect(),
                UnaryOp::Neg => {
                    let zero = b.constant(0, width);
                    subtract(b, &zero, &value).0
                }
                UnaryOp::ReduceAnd => vec![reduce(b, &value, NetlistBuilder::and)],
                UnaryOp::ReduceOr => vec![reduce(b, &value, NetlistBuilder::or)],
                UnaryOp::ReduceXor => vec![reduce(b, &value, NetlistBuilder::xor)],
                UnaryOp::LogicNot => {
                    let any = reduce(b, &value, NetlistBuilder::or);
                    vec![b.not(any)]
                }
            }
        }
        Node::Binary { op, lhs, rhs } => {
            let x = lower_expr(b, buses, lhs)?;
            let y = lower_expr(b, buses, rhs)?;
            let signed = TypedExpr::signed_compare(lhs, rhs);
            binary(b, *op, &x, &y, lhs.signed, signed)
        }
        Node::Mux {
            cond,
            when_true,
            when_false,
        } => {
            let c = lower_expr(b, buses, cond)?[0];
            let t = lower_expr(b, buses, when_true)?;
            let f = lower_expr(b, buses, when_false)?;
            mux_bus(b, c, &t, &f)
        }
        Node::Case {
            selector,
            arms,
            default,
        } => {
            let sel = lower_expr(b, buses, selector)?;
            let lowered = arms
                .iter()
                .map(|(value, arm)| lower_expr(b, buses, arm).map(|bus| (*value, bus)))
                .collect::<Result<Vec<_>, _>>()?;
            let mut current = lower_expr(b, buses, default)?;
            for (value, arm) in lowered.iter().rev() {
                let hit = equals_const(b, &sel, *value);
                current = mux_bus(b, hit, arm, &current);
            }
            current
        }
        Node::Resize(inner) => {
            let value = lower_expr(b, buses, inner)?;
            resize(&value, width, inner.signed)
        }
    };
    Ok(lowered)
}

fn binary(
    b: &mut NetlistBuilder,
    op: BinaryOp,
    x: &[NetId],
    y: &[NetId],
    lhs_signed: bool,
    signed: bool,
) -> Vec<NetId> {
    match op {
        BinaryOp::Add => add(b, x, y, NetId::ZERO).0,
        BinaryOp::Sub => subtract(b, x, y).0,
        BinaryOp::Mul => multiply(b, x, y),
        BinaryOp::Div => divide(b, x, y).0,
        BinaryOp::Rem => divide(b, x, y).1,
        BinaryOp::And => zip(b, x, y, NetlistBuilder::and),
        BinaryOp::Or => zip(b, x, y, NetlistBuilder::or),
        BinaryOp::Xor => zip(b, x, y, NetlistBuilder::xor),
        BinaryOp::Shl => shift_left(b, x, y),
        BinaryOp::Shr => shift_right(b, x, y, lhs_signed),
        BinaryOp::Eq => vec![equals(b, x, y)],
        BinaryOp::Ne => {
            let eq = equals(b, x, y);
            vec![b.not(eq)]
        }
        BinaryOp::Lt => vec![less_than(b, x, y, signed)],
        BinaryOp::Le => {
            let gt = less_than(b, y, x, signed);
            vec![b.not(gt)]
        }
        BinaryOp::Gt => vec![less_than(b, y, x, signed)],
        BinaryOp::Ge => {
            let lt = less_than(b, x, y, signed);
            vec![b.not(lt)]
        }
    }
}

fn zip(
    b: &mut NetlistBuilder,
    x: &[NetId],
    y: &[NetId],
    gate: fn(&mut NetlistBuilder, NetId, NetId) -> NetId,
) -> Vec<NetId> {
    x.iter().zip(y).map(|(&p, &q)| gate(b, p, q)).collect()
}

/// Folds `bits` with `gate` as a linear chain from bit 0 upwards.
pub fn reduce(
    b: &mut NetlistBuilder,
    bits: &[NetId],
    gate: fn(&mut NetlistBuilder, NetId, NetId) -> NetId,
) -> NetId {
    let mut iter = bits.iter().copied();
    let Some(first) = iter.next() else {
        return NetId::ZERO;
    };
    iter.fold(first, |acc, bit| gate(b, acc, bit))
}

/// Per-bit `cond ? t : f`.
pub fn mux_bus(b: &mut NetlistBuilder, cond: NetId, t: &[NetId], f: &[NetId]) -> Vec<NetId> {
    t.iter().zip(f).map(|(&t, &f)| b.mux(cond, t, f)).collect()
}

/// Truncates or extends `value` to `width` bits.
pub fn resize(value: &[NetId], width: u32, signed: bool) -> Vec<NetId> {
    let width = width as usize;
    if width <= value.len() {
        return value[..width].to_vec();
    }
    let fill = match value.last() {
        Some(&msb) if signed => msb,
        _ => NetId::ZERO,
    };
    let mut out = value.to_vec();
    out.resize(width, fill);
    out
}

/// Ripple-carry `x + y + carry_in`; returns the sum and the carry out.
pub fn add(
    b: &mut NetlistBuilder,
    x: &[NetId],
    y: &[NetId],
    carry_in: NetId,
) -> (Vec<NetId>, NetId) {
    let mut carry = carry_in;
    let mut sum = Vec::with_capacity(x.len());
    for (&p, &q) in x.iter().zip(y) {
        let half = b.xor(p, q);
        sum.push(b.xor(half, carry));
        let generate = b.and(p, q);
        let propagate = b.and(carry, half);
        carry = b.or(generate, propagate);
    }
    (sum, carry)
}

/// `x - y` as `x + !y + 1`; returns the difference and the carry out (1 when no borrow).
pub fn subtract(b: &mut NetlistBuilder, x: &[NetId], y: &[NetId]) -> (Vec<NetId>, NetId) {
    let inverted: Vec<NetId> = y.iter().map(|&n| b.not(n)).collect();
    add(b, x, &inverted, NetId::ONE)
}

/// Shift-and-add multiplier truncated to the operand width.
fn multiply(b: &mut NetlistBuilder, x: &[NetId], y: &[NetId]) -> Vec<NetId> {
    let width = x.len();
    let mut acc = vec![NetId::ZERO; width];
    for (i, &bit) in y.iter().enumerate() {
        if bit == NetId::ZERO {
            continue;
        }
        let partial: Vec<NetId> = (0..width)
            .map(|j| if j >= i { b.and(x[j - i], bit) } else { NetId::ZERO })
            .collect();
        acc = add(b, &acc, &partial, NetId::ZERO).0;
    }
    acc
}

/// Restoring division; a zero divisor yields zero quotient and remainder.
fn divide(b: &mut NetlistBuilder, x: &[NetId], y: &[NetId]) -> (Vec<NetId>, Vec<NetId>) {
    let width = x.len();
    let mut divisor = y.to_vec();
    divisor.push(NetId::ZERO);
    let mut remainder = vec![NetId::ZERO; width + 1];
    let mut quotient = vec![NetId::ZERO; width];
    for i in (0..width).rev() {
        remainder.pop();
        remainder.insert(0, x[i]);
        let (diff, fits) = subtract(b, &remainder, &divisor);
        quotient[i] = fits;
        remainder = mux_bus(b, fits, &diff, &remainder);
    }
    remainder.truncate(width);

    let nonzero = reduce(b, y, NetlistBuilder::or);
    let quotient = quotient.iter().map(|&n| b.and(n, nonzero)).collect();
    let remainder = remainder.iter().map(|&n| b.and(n, nonzero)).collect();
    (quotient, remainder)
}

/// Splits `amount` into barrel stages below `width` and an overflow flag for the rest.
fn shift_stages(b: &mut NetlistBuilder, amount: &[NetId], width: usize) -> (Vec<(usize, NetId)>, NetId) {
    let mut stages = Vec::new();
    let mut overflow = NetId::ZERO;
    for (k, &bit) in amount.iter().enumerate() {
        if k < usize::BITS as usize - 1 && (1usize << k) < width {
            stages.push((1usize << k, bit));
        } else {
            overflow = b.or(overflow, bit);
        }
    }
    (stages, overflow)
}

/// Barrel shifter; amounts at or beyond the width give zero.
fn shift_left(b: &mut NetlistBuilder, x: &[NetId], amount: &[NetId]) -> Vec<NetId> {
    let width = x.len();
    let (stages, overflow) = shift_stages(b, amount, width);
    let mut current = x.to_vec();
    for (distance, bit) in stages {
        let shifted: Vec<NetId> = (0..width)
            .map(|j| {
                if j >= distance {
                    current[j - distance]
                } else {
                    NetId::ZERO
                }
            })
            .collect();
        current = mux_bus(b, bit, &shifted, &current);
    }
    let keep = b.not(overflow);
    current.iter().map(|&n| b.and(n, keep)).collect()
}

/// Barrel shifter filling with zero, or with the sign bit when `arithmetic`.
fn shift_right(b: &mut NetlistBuilder, x: &[NetId], amount: &[NetId], arithmetic: bool) -> Vec<NetId> {
    let width = x.len();
    let fill = match x.last() {
        Some(&msb) if arithmetic => msb,
        _ => NetId::ZERO,
    };
    let (stages, overflow) = shift_stages(b, amount, width);
    let mut current = x.to_vec();
    for (distance, bit) in stages {
        let shifted: Vec<NetId> = (0..width)
            .map(|j| if j + distance < width { current[j + distance] } else { fill })
            .collect();
        current = mux_bus(b, bit, &shifted, &current);
    }
    current.iter().map(|&n| b.mux(overflow, fill, n)).collect()
}

/// `x == y`.
pub fn equals(b: &mut NetlistBuilder, x: &[NetId], y: &[NetId]) -> NetId {
    let diff = zip(b, x, y, NetlistBuilder::xor);
    let any = reduce(b, &diff, NetlistBuilder::or);
    b.not(any)
}

/// `x == value`, zero when `value` does not fit in `x`.
pub fn equals_const(b: &mut NetlistBuilder, x: &[NetId], value: u64) -> NetId {
    if x.len() < 64 && value >> x.len() != 0 {
        return NetId::ZERO;
    }
    let constant = b.constant(value, x.len() as u32);
    equals(b, x, &constant)
}

/// `x < y` from the borrow of `x - y`; two's complement flips both sign bits first.
pub fn less_than(b: &mut NetlistBuilder, x: &[NetId], y: &[NetId], signed: bool) -> NetId {
    let (x, y) = if signed {
        (flip_msb(b, x), flip_msb(b, y))
    } else {
        (x.to_vec(), y.to_vec())
    };
    let (_, no_borrow) = subtract(b, &x, &y);
    b.not(no_borrow)
}

fn flip_msb(b: &mut NetlistBuilder, x: &[NetId]) -> Vec<NetId> {
    let mut out = x.to_vec();
    if let Some(msb) = out.last_mut() {
        *msb = b.not(*msb);
    }
    out
}
