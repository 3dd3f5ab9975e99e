//! Combinational expression trees.
//!
//! Expressions are untyped trees over [`SignalId`]s; widths and signedness
//! are inferred and checked when a module is lowered into a
//! [`CheckedModule`](crate::check::CheckedModule).

use serde::{Deserialize, Serialize};

use crate::ids::SignalId;

/// Single-operand operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Bitwise complement.
    Not,
    /// Two's-complement negation.
    Neg,
    /// AND of all bits, 1 bit wide.
    ReduceAnd,
    /// OR of all bits, 1 bit wide.
    ReduceOr,
    /// XOR of all bits, 1 bit wide.
    ReduceXor,
    /// 1 when the operand is zero, 1 bit wide.
    LogicNot,
}

impl UnaryOp {
    /// Returns `true` if the result is a single bit regardless of operand width.
    pub fn is_reduction(self) -> bool {
        !matches!(self, UnaryOp::Not | UnaryOp::Neg)
    }
}

/// Two-operand operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Unsigned division; zero divisor yields zero.
    Div,
    /// Unsigned remainder; zero divisor yields zero.
    Rem,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Left shift by an unsigned amount.
    Shl,
    /// Right shift; arithmetic when the left operand is signed.
    Shr,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl BinaryOp {
    /// Returns `true` for operators producing a 1-bit comparison result.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Returns `true` for shifts, whose right operand may have any width.
    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    /// Operator symbol used in diagnostics and generated code comments.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

/// One arm of a [`Expr::Case`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseArm {
    /// Selector value matched by this arm.
    pub value: u64,
    /// Result when the arm matches.
    pub expr: Expr,
}

/// A combinational expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    /// A constant.
    Literal {
        /// The value; must fit in `width` bits.
        value: u64,
        /// Width in bits.
        width: u32,
        /// Two's-complement interpretation.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        signed: bool,
    },
    /// The current value of a signal.
    Signal {
        /// The referenced signal.
        id: SignalId,
    },
    /// Bits `high..=low` of the operand.
    Slice {
        /// The sliced value.
        expr: Box<Expr>,
        /// Most significant bit, inclusive.
        high: u32,
        /// Least significant bit, inclusive.
        low: u32,
    },
    /// Parts packed most significant first.
    Concat {
        /// The parts, MSB first.
        parts: Vec<Expr>,
    },
    /// A unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `cond ? when_true : when_false` with a 1-bit condition.
    Mux {
        /// Select condition.
        cond: Box<Expr>,
        /// Result when `cond` is 1.
        when_true: Box<Expr>,
        /// Result when `cond` is 0.
        when_false: Box<Expr>,
    },
    /// First matching arm wins; `default` when none match.
    Case {
        /// The value compared against each arm.
        selector: Box<Expr>,
        /// Arms in priority order.
        arms: Vec<CaseArm>,
        /// Fallback result.
        default: Box<Expr>,
    },
    /// Truncation or extension to `width` bits.
    Resize {
        /// The resized value.
        expr: Box<Expr>,
        /// Target width.
        width: u32,
    },
    /// Reinterprets the operand as signed or unsigned without changing bits.
    Cast {
        /// The reinterpreted value.
        expr: Box<Expr>,
        /// New interpretation.
        signed: bool,
    },
}

impl Expr {
    /// An unsigned literal.
    pub fn lit(value: u64, width: u32) -> Self {
        Expr::Literal {
            value,
            width,
            signed: false,
        }
    }

    /// A reference to a signal.
    pub fn sig(id: SignalId) -> Self {
        Expr::Signal { id }
    }

    /// Packs `parts` most significant first.
    pub fn concat(parts: Vec<Expr>) -> Self {
        Expr::Concat { parts }
    }

    /// `cond ? when_true : when_false`.
    pub fn mux(cond: Expr, when_true: Expr, when_false: Expr) -> Self {
        Expr::Mux {
            cond: Box::new(cond),
            when_true: Box::new(when_true),
            when_false: Box::new(when_false),
        }
    }

    /// A case-select over `(value, result)` arms.
    pub fn case(selector: Expr, arms: Vec<(u64, Expr)>, default: Expr) -> Self {
        Expr::Case {
            selector: Box::new(selector),
            arms: arms
                .into_iter()
                .map(|(value, expr)| CaseArm { value, expr })
                .collect(),
            default: Box::new(default),
        }
    }

    /// Applies a binary operator.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Applies a unary operator.
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Bits `high..=low`.
    pub fn slice(self, high: u32, low: u32) -> Self {
        Expr::Slice {
            expr: Box::new(self),
            high,
            low,
        }
    }

    /// A single bit.
    pub fn bit(self, index: u32) -> Self {
        self.slice(index, index)
    }

    /// Truncates or extends to `width` bits.
    pub fn resize(self, width: u32) -> Self {
        Expr::Resize {
            expr: Box::new(self),
            width,
        }
    }

    /// Reinterprets as two's complement.
    pub fn as_signed(self) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            signed: true,
        }
    }

    /// Reinterprets as unsigned.
    pub fn as_unsigned(self) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            signed: false,
        }
    }

    /// Bitwise complement.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::unary(UnaryOp::Not, self)
    }

    /// OR of all bits.
    pub fn reduce_or(self) -> Self {
        Expr::unary(UnaryOp::ReduceOr, self)
    }

    /// AND of all bits.
    pub fn reduce_and(self) -> Self {
        Expr::unary(UnaryOp::ReduceAnd, self)
    }

    /// XOR of all bits.
    pub fn reduce_xor(self) -> Self {
        Expr::unary(UnaryOp::ReduceXor, self)
    }

    /// Calls `f` for every signal the expression reads, in tree order.
    pub fn for_each_signal(&self, f: &mut impl FnMut(SignalId)) {
        match self {
            Expr::Literal { .. } => {}
            Expr::Signal { id } => f(*id),
            Expr::Slice { expr, .. } | Expr::Resize { expr, .. } | Expr::Cast { expr, .. } => {
                expr.for_each_signal(f)
            }
            Expr::Concat { parts } => parts.iter().for_each(|p| p.for_each_signal(f)),
            Expr::Unary { operand, .. } => operand.for_each_signal(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.for_each_signal(f);
                rhs.for_each_signal(f);
            }
            Expr::Mux {
                cond,
                when_true,
                when_false,
            } => {
                cond.for_each_signal(f);
                when_true.for_each_signal(f);
                when_false.for_each_signal(f);
            }
            Expr::Case {
                selector,
                arms,
                default,
            } => {
                selector.for_each_signal(f);
                for arm in arms {
                    arm.expr.for_each_signal(f);
                }
                default.for_each_signal(f);
            }
        }
    }

    /// Returns the signals read, in tree order, with duplicates.
    pub fn signals(&self) -> Vec<SignalId> {
        let mut out = Vec::new();
        self.for_each_signal(&mut |id| out.push(id));
        out
    }

    /// Rewrites every signal reference through `f`.
    pub fn map_signals(&self, f: &impl Fn(SignalId) -> SignalId) -> Expr {
        let boxed = |e: &Expr| Box::new(e.map_signals(f));
        match self {
            Expr::Literal { .. } => self.clone(),
            Expr::Signal { id } => Expr::Signal { id: f(*id) },
            Expr::Slice { expr, high, low } => Expr::Slice {
                expr: boxed(expr),
                high: *high,
                low: *low,
            },
            Expr::Concat { parts } => Expr::Concat {
                parts: parts.iter().map(|p| p.map_signals(f)).collect(),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: boxed(operand),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: boxed(lhs),
                rhs: boxed(rhs),
            },
            Expr::Mux {
                cond,
                when_true,
                when_false,
            } => Expr::Mux {
                cond: boxed(cond),
                when_true: boxed(when_true),
                when_false: boxed(when_false),
            },
            Expr::Case {
                selector,
                arms,
                default,
            } => Expr::Case {
                selector: boxed(selector),
                arms: arms
                    .iter()
                    .map(|arm| CaseArm {
                        value: arm.value,
                        expr: arm.expr.map_signals(f),
                    })
                    .collect(),
                default: boxed(default),
            },
            Expr::Resize { expr, width } => Expr::Resize {
                expr: boxed(expr),
                width: *width,
            },
            Expr::Cast { expr, signed } => Expr::Cast {
                expr: boxed(expr),
                signed: *signed,
            },
        }
    }
}

macro_rules! binary_builders {
    ($($(#[$meta:meta])* $name:ident => $op:ident;)*) => {
        #[allow(clippy::should_implement_trait)]
        impl Expr {
            $(
                $(#[$meta])*
                pub fn $name(self, rhs: Expr) -> Expr {
                    Expr::binary(BinaryOp::$op, self, rhs)
                }
            )*
        }
    };
}

binary_builders! {
    /// Wrapping `self + rhs`.
    add => Add;
    /// Wrapping `self - rhs`.
    sub => Sub;
    /// Wrapping `self * rhs`.
    mul => Mul;
    /// `self / rhs`, zero on a zero divisor.
    div => Div;
    /// `self % rhs`, zero on a zero divisor.
    rem => Rem;
    /// Bitwise AND.
    and => And;
    /// Bitwise OR.
    or => Or;
    /// Bitwise XOR.
    xor => Xor;
    /// Left shift.
    shl => Shl;
    /// Right shift.
    shr => Shr;
    /// Equality.
    eq => Eq;
    /// Inequality.
    ne => Ne;
    /// Less than.
    lt => Lt;
    /// Less than or equal.
    le => Le;
    /// Greater than.
    gt => Gt;
    /// Greater than or equal.
    ge => Ge;
}
