//! Arithmetic primitives.

use kestrel_ir::{Expr, Module, ModuleBuilder};

use crate::{check_width, PrimitiveError};

/// `result = a + b` or, with `sub` set, `a - b`.
///
/// Subtraction adds the complement of `b` with a carry in, so `cout` is the
/// carry out of the adder: set on unsigned overflow when adding, set when
/// no borrow occurred when subtracting. `overflow` flags signed overflow.
pub fn adder_subtractor(width: u32) -> Result<Module, PrimitiveError> {
    check_width("adder_subtractor", width, 63)?;
    let msb = width - 1;
    let mut m = ModuleBuilder::new("adder_subtractor");
    let a = Expr::sig(m.input("a", width));
    let b = Expr::sig(m.input("b", width));
    let sub = Expr::sig(m.input("sub", 1));
    let result = m.output("result", width);
    let cout = m.output("cout", 1);
    let overflow = m.output("overflow", 1);

    let operand = Expr::sig(m.node(
        "operand",
        width,
        Expr::mux(sub.clone(), b.clone().not(), b),
    ));
    let full = Expr::sig(m.node(
        "full",
        width + 1,
        a.clone()
            .resize(width + 1)
            .add(operand.clone().resize(width + 1))
            .add(sub.resize(width + 1)),
    ));
    m.assign(result, full.clone().slice(msb, 0));
    m.assign(cout, full.clone().bit(width));
    let same_sign = a.clone().bit(msb).xor(operand.bit(msb)).not();
    let flipped = full.bit(msb).xor(a.bit(msb));
    m.assign(overflow, same_sign.and(flipped));
    Ok(m.finish())
}

/// Unsigned `quotient` and `remainder`; both zero and `div_by_zero` set when `divisor` is zero.
pub fn divider(width: u32) -> Result<Module, PrimitiveError> {
    check_width("divider", width, 64)?;
    let mut m = ModuleBuilder::new("divider");
    let dividend = Expr::sig(m.input("dividend", width));
    let divisor = Expr::sig(m.input("divisor", width));
    let quotient = m.output("quotient", width);
    let remainder = m.output("remainder", width);
    let div_by_zero = m.output("div_by_zero", 1);
    m.assign(quotient, dividend.clone().div(divisor.clone()));
    m.assign(remainder, dividend.rem(divisor.clone()));
    m.assign(div_by_zero, divisor.eq(Expr::lit(0, width)));
    Ok(m.finish())
}
