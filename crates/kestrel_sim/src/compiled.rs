//! Ahead-of-time backend: generated Rust compiled into a shared library.
//!
//! The module is printed as a small Rust crate exporting `kestrel_settle`
//! and `kestrel_sample` with the same calling convention as the JIT. It is
//! compiled by `rustc` as a `cdylib`, stored in the [`BuildCache`] under a
//! key covering the source, the generator version, the compiler version and
//! the optimisation level, and loaded with `libloading`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use kestrel_cache::{BuildCache, CacheKey};
use kestrel_common::bits;
use kestrel_config::{BackendKind, CompiledConfig};
use kestrel_ir::{BinaryOp, CheckedModule, CombStep, Node, TypedExpr, UnaryOp};
use libloading::Library;

use crate::error::SimError;
use crate::kernel::Evaluator;
use crate::plan::SimPlan;

/// Bumped whenever generated code changes meaning; invalidates cached libraries.
pub const GENERATOR_VERSION: &str = "kestrel-compiled-1";

type SettleFn = unsafe extern "C" fn(*mut u64, *const *const u64);
type SampleFn = unsafe extern "C" fn(*const u64, *const *const u64, *mut u64);

/// Compiler invocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Compiler executable.
    pub rustc: String,
    /// `-C opt-level`.
    pub opt_level: u8,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::from_config(&CompiledConfig::default())
    }
}

impl CompileOptions {
    /// Takes the compiler settings from the `[compiled]` table.
    pub fn from_config(config: &CompiledConfig) -> Self {
        Self {
            rustc: config.rustc.clone(),
            opt_level: config.opt_level,
        }
    }
}

const PRELUDE: &str = r#"#![allow(warnings)]

#[inline(always)]
fn m(v: u64, w: u32) -> u64 {
    if w >= 64 { v } else { v & ((1u64 << w) - 1) }
}

#[inline(always)]
fn sx(v: u64, w: u32) -> i64 {
    if w >= 64 { v as i64 } else { ((v << (64 - w)) as i64) >> (64 - w) }
}

#[inline(always)]
fn shl(v: u64, a: u64, w: u32) -> u64 {
    if a >= w as u64 { 0 } else { m(v << a, w) }
}

#[inline(always)]
fn shr(v: u64, a: u64, w: u32, arith: bool) -> u64 {
    if arith {
        m((sx(v, w) >> a.min(63)) as u64, w)
    } else if a >= w as u64 {
        0
    } else {
        v >> a
    }
}

#[inline(always)]
fn dv(a: u64, b: u64) -> u64 {
    if b == 0 { 0 } else { a / b }
}

#[inline(always)]
fn rm(a: u64, b: u64) -> u64 {
    if b == 0 { 0 } else { a % b }
}

#[inline(always)]
unsafe fn rd(mem: *const u64, depth: u64, a: u64) -> u64 {
    if a < depth { *mem.add(a as usize) } else { 0 }
}
"#;

/// Prints the Rust source for `module` and the slots of `plan`.
pub fn generate_source(module: &CheckedModule, plan: &SimPlan) -> String {
    let signals = module.signals.len();
    let mut out = String::with_capacity(4096);
    let _ = writeln!(out, "// {} ({GENERATOR_VERSION})", module.name);
    out.push_str(PRELUDE);

    out.push_str(
        "\n#[no_mangle]\npub unsafe extern \"C\" fn kestrel_settle(sp: *mut u64, mems: *const *const u64) {\n",
    );
    let _ = writeln!(out, "    let s = std::slice::from_raw_parts_mut(sp, {signals});");
    memory_bindings(&mut out, module);
    for step in &module.comb {
        match step {
            CombStep::Assign { target, expr } => {
                let _ = writeln!(out, "    s[{}] = {};", target.as_raw(), rust_expr(expr));
            }
            CombStep::MemRead { memory, addr, data } => {
                let depth = module.memories[*memory].depth;
                let _ = writeln!(
                    out,
                    "    s[{}] = rd(mem{}, {depth}, {});",
                    data.as_raw(),
                    memory.as_raw(),
                    rust_expr(addr)
                );
            }
        }
    }
    out.push_str("}\n");

    out.push_str(
        "\n#[no_mangle]\npub unsafe extern \"C\" fn kestrel_sample(sp: *const u64, mems: *const *const u64, op: *mut u64) {\n",
    );
    let _ = writeln!(out, "    let s = std::slice::from_raw_parts(sp, {signals});");
    let _ = writeln!(
        out,
        "    let o = std::slice::from_raw_parts_mut(op, {});",
        plan.slots.len()
    );
    memory_bindings(&mut out, module);
    for (index, slot) in plan.slots.iter().enumerate() {
        let _ = writeln!(out, "    o[{index}] = {};", rust_expr(slot));
    }
    out.push_str("}\n");
    out
}

fn memory_bindings(out: &mut String, module: &CheckedModule) {
    for (id, _) in module.memories.iter() {
        let i = id.as_raw();
        let _ = writeln!(out, "    let mem{i} = *mems.add({i});");
    }
}

fn rust_expr(expr: &TypedExpr) -> String {
    let w = expr.width;
    match &expr.node {
        Node::Const(value) => format!("{value}u64"),
        Node::Signal(id) => format!("s[{}]", id.as_raw()),
        Node::Slice { expr: inner, low } => format!("m(({}) >> {low}, {w})", rust_expr(inner)),
        Node::Concat(parts) => {
            let mut iter = parts.iter();
            let mut acc = iter.next().map(rust_expr).unwrap_or_else(|| "0u64".to_string());
            for part in iter {
                acc = format!("((({acc}) << {}) | ({}))", part.width, rust_expr(part));
            }
            acc
        }
        Node::Unary { op, operand } => {
            let v = rust_expr(operand);
            match op {
                UnaryOp::Not => format!("m(!({v}), {w})"),
                UnaryOp::Neg => format!("m(({v}).wrapping_neg(), {w})"),
                UnaryOp::ReduceAnd => {
                    format!("(({v}) == {}u64) as u64", bits::width_mask(operand.width))
                }
                UnaryOp::ReduceOr => format!("(({v}) != 0) as u64"),
                UnaryOp::ReduceXor => format!("(({v}).count_ones() & 1) as u64"),
                UnaryOp::LogicNot => format!("(({v}) == 0) as u64"),
            }
        }
        Node::Binary { op, lhs, rhs } => {
            let l = rust_expr(lhs);
            let r = rust_expr(rhs);
            let signed = TypedExpr::signed_compare(lhs, rhs);
            let cmp = |sym: &str| {
                if signed {
                    format!("(sx({l}, {}) {sym} sx({r}, {})) as u64", lhs.width, rhs.width)
                } else {
                    format!("(({l}) {sym} ({r})) as u64")
                }
            };
            match op {
                BinaryOp::Add => format!("m(({l}).wrapping_add({r}), {w})"),
                BinaryOp::Sub => format!("m(({l}).wrapping_sub({r}), {w})"),
                BinaryOp::Mul => format!("m(({l}).wrapping_mul({r}), {w})"),
                BinaryOp::Div => format!("dv({l}, {r})"),
                BinaryOp::Rem => format!("rm({l}, {r})"),
                BinaryOp::And => format!("(({l}) & ({r}))"),
                BinaryOp::Or => format!("(({l}) | ({r}))"),
                BinaryOp::Xor => format!("(({l}) ^ ({r}))"),
                BinaryOp::Shl => format!("shl({l}, {r}, {w})"),
                BinaryOp::Shr => format!("shr({l}, {r}, {w}, {})", lhs.signed),
                BinaryOp::Eq => format!("(({l}) == ({r})) as u64"),
                BinaryOp::Ne => format!("(({l}) != ({r})) as u64"),
                BinaryOp::Lt => cmp("<"),
                BinaryOp::Le => cmp("<="),
                BinaryOp::Gt => cmp(">"),
                BinaryOp::Ge => cmp(">="),
            }
        }
        Node::Mux {
            cond,
            when_true,
            when_false,
        } => format!(
            "(if ({}) != 0 {{ {} }} else {{ {} }})",
            rust_expr(cond),
            rust_expr(when_true),
            rust_expr(when_false)
        ),
        Node::Case {
            selector,
            arms,
            default,
        } => {
            let mut text = format!("{{ let k = {}; ", rust_expr(selector));
            for (value, arm) in arms {
                let _ = write!(text, "if k == {value}u64 {{ {} }} else ", rust_expr(arm));
            }
            let _ = write!(text, "{{ {} }} }}", rust_expr(default));
            text
        }
        Node::Resize(inner) => {
            let v = rust_expr(inner);
            if inner.signed && w > inner.width {
                format!("m(sx({v}, {}) as u64, {w})", inner.width)
            } else {
                format!("m({v}, {w})")
            }
        }
    }
}

/// Evaluator calling into a compiled shared library.
pub struct CompiledEvaluator {
    settle_fn: SettleFn,
    sample_fn: SampleFn,
    memory_table: Vec<*const u64>,
    signal_count: usize,
    slot_count: usize,
    library_path: PathBuf,
    // Declared last: the function pointers above point into it.
    _library: Library,
}

impl CompiledEvaluator {
    /// Generates, compiles (or fetches from `cache`) and loads the library for `module`.
    ///
    /// A compiler that cannot be run yields [`SimError::BackendUnavailable`];
    /// a compiler that rejects the source yields [`SimError::Compile`].
    pub fn build(
        module: &CheckedModule,
        plan: &SimPlan,
        options: &CompileOptions,
        cache: &BuildCache,
    ) -> Result<Self, SimError> {
        let source = generate_source(module, plan);
        let version = rustc_version(&options.rustc)?;
        let key = CacheKey::for_source(source.as_bytes(), GENERATOR_VERSION)
            .with(&version)
            .with(&format!("opt-level={}", options.opt_level));

        let path = match cache.lookup_native(&key) {
            Some(path) => path,
            None => {
                let built = compile(&source, &key, options, cache.root())?;
                cache.store_native(&key, &built, GENERATOR_VERSION)?
            }
        };
        Self::load(module, plan, &path)
    }

    /// Loads an already-built library for `module`.
    pub fn load(module: &CheckedModule, plan: &SimPlan, path: &Path) -> Result<Self, SimError> {
        let load_error = |e: libloading::Error| SimError::Compile {
            reason: format!("{}: {e}", path.display()),
        };
        // SAFETY: the library was generated by `generate_source`, whose
        // initialisers have no side effects.
        let library = unsafe { Library::new(path) }.map_err(load_error)?;
        // SAFETY: the symbols are exported with exactly these signatures.
        let (settle_fn, sample_fn) = unsafe {
            let settle = library
                .get::<SettleFn>(b"kestrel_settle\0")
                .map_err(load_error)?;
            let sample = library
                .get::<SampleFn>(b"kestrel_sample\0")
                .map_err(load_error)?;
            (*settle, *sample)
        };
        tracing::info!(module = %module.name, path = %path.display(), "loaded compiled library");
        Ok(Self {
            settle_fn,
            sample_fn,
            memory_table: Vec::with_capacity(module.memories.len()),
            signal_count: module.signals.len(),
            slot_count: plan.slots.len(),
            library_path: path.to_path_buf(),
            _library: library,
        })
    }

    /// Where the loaded library lives.
    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    fn bind(&mut self, memories: &[Vec<u64>]) {
        self.memory_table.clear();
        self.memory_table.extend(memories.iter().map(|m| m.as_ptr()));
    }
}

impl Evaluator for CompiledEvaluator {
    fn kind(&self) -> BackendKind {
        BackendKind::Compiled
    }

    fn settle(&mut self, signals: &mut [u64], memories: &[Vec<u64>]) {
        assert_eq!(signals.len(), self.signal_count);
        self.bind(memories);
        // SAFETY: the library was generated for a buffer of `signal_count` words.
        unsafe { (self.settle_fn)(signals.as_mut_ptr(), self.memory_table.as_ptr()) }
    }

    fn sample(&mut self, signals: &[u64], memories: &[Vec<u64>], samples: &mut [u64]) {
        assert_eq!(signals.len(), self.signal_count);
        assert_eq!(samples.len(), self.slot_count);
        self.bind(memories);
        // SAFETY: as for `settle`, with `slot_count` output words.
        unsafe {
            (self.sample_fn)(
                signals.as_ptr(),
                self.memory_table.as_ptr(),
                samples.as_mut_ptr(),
            )
        }
    }
}

fn unavailable(reason: String) -> SimError {
    SimError::BackendUnavailable {
        backend: BackendKind::Compiled,
        reason,
    }
}

/// Identity of the compiler, folded into cache keys.
fn rustc_version(rustc: &str) -> Result<String, SimError> {
    let output = Command::new(rustc)
        .arg("--version")
        .output()
        .map_err(|e| unavailable(format!("cannot run '{rustc}': {e}")))?;
    if !output.status.success() {
        return Err(unavailable(format!(
            "'{rustc} --version' exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn compile(
    source: &str,
    key: &CacheKey,
    options: &CompileOptions,
    cache_root: &Path,
) -> Result<PathBuf, SimError> {
    let build_dir = cache_root.join("build");
    std::fs::create_dir_all(&build_dir)?;
    let src_path = build_dir.join(format!("{key}.rs"));
    let lib_path = build_dir.join(format!(
        "{key}-{}.{}",
        std::process::id(),
        std::env::consts::DLL_EXTENSION
    ));
    std::fs::write(&src_path, source)?;

    tracing::info!(%key, rustc = %options.rustc, "compiling generated simulator");
    let output = Command::new(&options.rustc)
        .arg("--crate-type=cdylib")
        .arg("--edition=2021")
        .args(["-C", &format!("opt-level={}", options.opt_level)])
        .args(["-C", "panic=abort"])
        .args(["-A", "warnings"])
        .arg("-o")
        .arg(&lib_path)
        .arg(&src_path)
        .output()
        .map_err(|e| unavailable(format!("cannot run '{}': {e}", options.rustc)))?;
    if !output.status.success() {
        return Err(SimError::Compile {
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(lib_path)
}
