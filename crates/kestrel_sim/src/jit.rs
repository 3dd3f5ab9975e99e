//! Cranelift code generation for settle and sample.
//!
//! Both functions take the signal buffer and a table of memory base
//! pointers; `sample` additionally takes the slot buffer. Every node is
//! lowered branch-free: muxes and cases become `select` chains, division and
//! out-of-range memory reads select a safe operand first.

use std::mem;

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use kestrel_common::bits;
use kestrel_config::BackendKind;
use kestrel_ir::{BinaryOp, CheckedModule, CombStep, Node, TypedExpr, UnaryOp};

use crate::error::SimError;
use crate::kernel::Evaluator;
use crate::plan::SimPlan;

type SettleFn = unsafe extern "C" fn(*mut u64, *const *const u64);
type SampleFn = unsafe extern "C" fn(*const u64, *const *const u64, *mut u64);

fn jit_error(err: impl std::fmt::Display) -> SimError {
    SimError::Jit {
        reason: err.to_string(),
    }
}

/// Evaluator running natively generated code.
pub struct JitEvaluator {
    module: Option<JITModule>,
    settle_fn: SettleFn,
    sample_fn: SampleFn,
    memory_table: Vec<*const u64>,
    signal_count: usize,
    slot_count: usize,
}

impl JitEvaluator {
    /// Compiles `module` and the slots of `plan`.
    pub fn new(module: &CheckedModule, plan: &SimPlan) -> Result<Self, SimError> {
        let mut flag_builder = settings::builder();
        flag_builder.set("opt_level", "speed").map_err(jit_error)?;
        flag_builder.set("is_pic", "false").map_err(jit_error)?;
        let isa = cranelift_native::builder()
            .map_err(jit_error)?
            .finish(settings::Flags::new(flag_builder))
            .map_err(jit_error)?;
        let mut jit = JITModule::new(JITBuilder::with_isa(
            isa,
            cranelift_module::default_libcall_names(),
        ));

        let settle_id = define(&mut jit, module, "kestrel_settle", 2, |b, frame| {
            for step in &module.comb {
                let (target, value) = match step {
                    CombStep::Assign { target, expr } => (*target, frame.emit(b, expr)),
                    CombStep::MemRead { memory, addr, data } => {
                        let addr = frame.emit(b, addr);
                        (*data, frame.read_memory(b, memory.as_raw() as usize, addr))
                    }
                };
                b.ins().store(
                    MemFlags::trusted(),
                    value,
                    frame.signals,
                    word_offset(target.as_raw() as usize),
                );
            }
        })?;
        let sample_id = define(&mut jit, module, "kestrel_sample", 3, |b, frame| {
            let Some(samples) = frame.samples else {
                return;
            };
            for (index, slot) in plan.slots.iter().enumerate() {
                let value = frame.emit(b, slot);
                b.ins()
                    .store(MemFlags::trusted(), value, samples, word_offset(index));
            }
        })?;
        jit.finalize_definitions().map_err(jit_error)?;

        // SAFETY: both ids were defined above with exactly these signatures.
        let (settle_fn, sample_fn) = unsafe {
            (
                mem::transmute::<*const u8, SettleFn>(jit.get_finalized_function(settle_id)),
                mem::transmute::<*const u8, SampleFn>(jit.get_finalized_function(sample_id)),
            )
        };
        tracing::debug!(
            module = %module.name,
            steps = module.comb.len(),
            slots = plan.slots.len(),
            "JIT compiled"
        );
        Ok(Self {
            module: Some(jit),
            settle_fn,
            sample_fn,
            memory_table: Vec::with_capacity(module.memories.len()),
            signal_count: module.signals.len(),
            slot_count: plan.slots.len(),
        })
    }

    fn bind(&mut self, memories: &[Vec<u64>]) {
        self.memory_table.clear();
        self.memory_table.extend(memories.iter().map(|m| m.as_ptr()));
    }
}

impl Evaluator for JitEvaluator {
    fn kind(&self) -> BackendKind {
        BackendKind::Jit
    }

    fn settle(&mut self, signals: &mut [u64], memories: &[Vec<u64>]) {
        assert_eq!(signals.len(), self.signal_count);
        self.bind(memories);
        // SAFETY: the code only touches signal indices of the module it was
        // built from, whose length is checked above, and reads memories
        // through in-range addresses.
        unsafe { (self.settle_fn)(signals.as_mut_ptr(), self.memory_table.as_ptr()) }
    }

    fn sample(&mut self, signals: &[u64], memories: &[Vec<u64>], samples: &mut [u64]) {
        assert_eq!(signals.len(), self.signal_count);
        assert_eq!(samples.len(), self.slot_count);
        self.bind(memories);
        // SAFETY: as for `settle`; slot indices are below `slot_count`.
        unsafe {
            (self.sample_fn)(
                signals.as_ptr(),
                self.memory_table.as_ptr(),
                samples.as_mut_ptr(),
            )
        }
    }
}

impl Drop for JitEvaluator {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: the function pointers die with `self`.
            unsafe { module.free_memory() };
        }
    }
}

fn word_offset(index: usize) -> i32 {
    (index * 8) as i32
}

/// Declares and defines one function taking `params` pointer arguments.
fn define(
    jit: &mut JITModule,
    module: &CheckedModule,
    name: &str,
    params: usize,
    body: impl FnOnce(&mut FunctionBuilder, &Frame),
) -> Result<FuncId, SimError> {
    let pointer = jit.target_config().pointer_type();
    let mut ctx = jit.make_context();
    let mut sig = jit.make_signature();
    for _ in 0..params {
        sig.params.push(AbiParam::new(pointer));
    }
    ctx.func.signature = sig;
    let id = jit
        .declare_function(name, Linkage::Export, &ctx.func.signature)
        .map_err(jit_error)?;

    let mut builder_ctx = FunctionBuilderContext::new();
    let mut b = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
    let entry = b.create_block();
    b.append_block_params_for_function_params(entry);
    b.switch_to_block(entry);
    b.seal_block(entry);
    let args = b.block_params(entry).to_vec();

    let memories = (0..module.memories.len())
        .map(|i| {
            b.ins().load(
                pointer,
                MemFlags::trusted(),
                args[1],
                (i * pointer.bytes() as usize) as i32,
            )
        })
        .collect();
    let frame = Frame {
        signals: args[0],
        samples: args.get(2).copied(),
        memories,
        depths: module.memories.values().map(|m| m.depth).collect(),
        pointer,
    };
    body(&mut b, &frame);
    b.ins().return_(&[]);
    b.finalize();

    jit.define_function(id, &mut ctx).map_err(jit_error)?;
    jit.clear_context(&mut ctx);
    Ok(id)
}

/// Function arguments visible to expression lowering.
struct Frame {
    signals: Value,
    samples: Option<Value>,
    memories: Vec<Value>,
    depths: Vec<u32>,
    pointer: Type,
}

impl Frame {
    fn emit(&self, b: &mut FunctionBuilder, expr: &TypedExpr) -> Value {
        let width = expr.width;
        match &expr.node {
            Node::Const(value) => b.ins().iconst(types::I64, *value as i64),
            Node::Signal(id) => b.ins().load(
                types::I64,
                MemFlags::trusted(),
                self.signals,
                word_offset(id.as_raw() as usize),
            ),
            Node::Slice { expr: inner, low } => {
                let value = self.emit(b, inner);
                let shifted = b.ins().ushr_imm(value, i64::from(*low));
                mask(b, shifted, width)
            }
            Node::Concat(parts) => {
                let mut acc = b.ins().iconst(types::I64, 0);
                let mut shift = 0;
                for part in parts.iter().rev() {
                    let value = self.emit(b, part);
                    let placed = if shift == 0 {
                        value
                    } else {
                        b.ins().ishl_imm(value, i64::from(shift))
                    };
                    acc = b.ins().bor(acc, placed);
                    shift += part.width;
                }
                acc
            }
            Node::Unary { op, operand } => {
                let value = self.emit(b, operand);
                match op {
                    UnaryOp::Not => {
                        let inverted = b.ins().bnot(value);
                        mask(b, inverted, width)
                    }
                    UnaryOp::Neg => {
                        let negated = b.ins().ineg(value);
                        mask(b, negated, width)
                    }
                    UnaryOp::ReduceAnd => {
                        let all = bits::width_mask(operand.width) as i64;
                        flag_imm(b, IntCC::Equal, value, all)
                    }
                    UnaryOp::ReduceOr => flag_imm(b, IntCC::NotEqual, value, 0),
                    UnaryOp::ReduceXor => {
                        let ones = b.ins().popcnt(value);
                        b.ins().band_imm(ones, 1)
                    }
                    UnaryOp::LogicNot => flag_imm(b, IntCC::Equal, value, 0),
                }
            }
            Node::Binary { op, lhs, rhs } => {
                let l = self.emit(b, lhs);
                let r = self.emit(b, rhs);
                binary(b, *op, l, r, lhs, rhs, width)
            }
            Node::Mux {
                cond,
                when_true,
                when_false,
            } => {
                let c = self.emit(b, cond);
                let t = self.emit(b, when_true);
                let f = self.emit(b, when_false);
                b.ins().select(c, t, f)
            }
            Node::Case {
                selector,
                arms,
                default,
            } => {
                let key = self.emit(b, selector);
                let mut result = self.emit(b, default);
                for (value, arm) in arms.iter().rev() {
                    let hit = b.ins().icmp_imm(IntCC::Equal, key, *value as i64);
                    let arm = self.emit(b, arm);
                    result = b.ins().select(hit, arm, result);
                }
                result
            }
            Node::Resize(inner) => {
                let value = self.emit(b, inner);
                if inner.signed && width > inner.width {
                    let extended = sign_extend(b, value, inner.width);
                    mask(b, extended, width)
                } else {
                    mask(b, value, width)
                }
            }
        }
    }

    fn read_memory(&self, b: &mut FunctionBuilder, memory: usize, addr: Value) -> Value {
        let zero = b.ins().iconst(types::I64, 0);
        let in_range = b.ins().icmp_imm(
            IntCC::UnsignedLessThan,
            addr,
            i64::from(self.depths[memory]),
        );
        let safe = b.ins().select(in_range, addr, zero);
        let mut offset = b.ins().ishl_imm(safe, 3);
        if self.pointer != types::I64 {
            offset = b.ins().ireduce(self.pointer, offset);
        }
        let address = b.ins().iadd(self.memories[memory], offset);
        let word = b.ins().load(types::I64, MemFlags::trusted(), address, 0);
        b.ins().select(in_range, word, zero)
    }
}

fn mask(b: &mut FunctionBuilder, value: Value, width: u32) -> Value {
    if width >= 64 {
        value
    } else {
        b.ins().band_imm(value, bits::width_mask(width) as i64)
    }
}

fn sign_extend(b: &mut FunctionBuilder, value: Value, width: u32) -> Value {
    if width >= 64 {
        return value;
    }
    let pad = i64::from(64 - width);
    let raised = b.ins().ishl_imm(value, pad);
    b.ins().sshr_imm(raised, pad)
}

fn flag(b: &mut FunctionBuilder, cc: IntCC, x: Value, y: Value) -> Value {
    let hit = b.ins().icmp(cc, x, y);
    b.ins().uextend(types::I64, hit)
}

fn flag_imm(b: &mut FunctionBuilder, cc: IntCC, x: Value, imm: i64) -> Value {
    let hit = b.ins().icmp_imm(cc, x, imm);
    b.ins().uextend(types::I64, hit)
}

fn binary(
    b: &mut FunctionBuilder,
    op: BinaryOp,
    l: Value,
    r: Value,
    lhs: &TypedExpr,
    rhs: &TypedExpr,
    width: u32,
) -> Value {
    let signed = TypedExpr::signed_compare(lhs, rhs);
    let (l_cmp, r_cmp) = if signed && op.is_comparison() {
        (sign_extend(b, l, lhs.width), sign_extend(b, r, rhs.width))
    } else {
        (l, r)
    };
    let less = if signed {
        IntCC::SignedLessThan
    } else {
        IntCC::UnsignedLessThan
    };
    match op {
        BinaryOp::Add => {
            let sum = b.ins().iadd(l, r);
            mask(b, sum, width)
        }
        BinaryOp::Sub => {
            let diff = b.ins().isub(l, r);
            mask(b, diff, width)
        }
        BinaryOp::Mul => {
            let product = b.ins().imul(l, r);
            mask(b, product, width)
        }
        BinaryOp::Div | BinaryOp::Rem => {
            let zero = b.ins().iconst(types::I64, 0);
            let one = b.ins().iconst(types::I64, 1);
            let by_zero = b.ins().icmp_imm(IntCC::Equal, r, 0);
            let divisor = b.ins().select(by_zero, one, r);
            let result = if op == BinaryOp::Div {
                b.ins().udiv(l, divisor)
            } else {
                b.ins().urem(l, divisor)
            };
            b.ins().select(by_zero, zero, result)
        }
        BinaryOp::And => b.ins().band(l, r),
        BinaryOp::Or => b.ins().bor(l, r),
        BinaryOp::Xor => b.ins().bxor(l, r),
        BinaryOp::Shl => {
            let zero = b.ins().iconst(types::I64, 0);
            let past = b.ins().icmp_imm(IntCC::UnsignedGreaterThanOrEqual, r, i64::from(width));
            let shifted = b.ins().ishl(l, r);
            let shifted = mask(b, shifted, width);
            b.ins().select(past, zero, shifted)
        }
        BinaryOp::Shr if lhs.signed => {
            let max = b.ins().iconst(types::I64, 63);
            let past = b.ins().icmp_imm(IntCC::UnsignedGreaterThan, r, 63);
            let amount = b.ins().select(past, max, r);
            let extended = sign_extend(b, l, width);
            let shifted = b.ins().sshr(extended, amount);
            mask(b, shifted, width)
        }
        BinaryOp::Shr => {
            let zero = b.ins().iconst(types::I64, 0);
            let past = b.ins().icmp_imm(IntCC::UnsignedGreaterThanOrEqual, r, i64::from(width));
            let shifted = b.ins().ushr(l, r);
            b.ins().select(past, zero, shifted)
        }
        BinaryOp::Eq => flag(b, IntCC::Equal, l, r),
        BinaryOp::Ne => flag(b, IntCC::NotEqual, l, r),
        BinaryOp::Lt => flag(b, less, l_cmp, r_cmp),
        BinaryOp::Gt => flag(b, less, r_cmp, l_cmp),
        BinaryOp::Le => {
            let gt = flag(b, less, r_cmp, l_cmp);
            b.ins().bxor_imm(gt, 1)
        }
        BinaryOp::Ge => {
            let lt = flag(b, less, l_cmp, r_cmp);
            b.ins().bxor_imm(lt, 1)
        }
    }
}
