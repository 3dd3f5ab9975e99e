//! Programmatic construction of modules and designs.
//!
//! ```
//! use kestrel_ir::{Expr, ModuleBuilder, Register};
//!
//! let mut b = ModuleBuilder::new("counter");
//! let clk = b.input("clk", 1);
//! let rst = b.input("rst", 1);
//! let q = b.output("q", 8);
//! b.register(
//!     Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, 8))).with_sync_reset(rst, 0),
//! );
//! let counter = b.finish();
//! assert_eq!(counter.registers.len(), 1);
//! ```

use crate::arena::Arena;
use crate::design::Design;
use crate::expr::Expr;
use crate::ids::{MemoryId, ModuleId, SignalId};
use crate::module::{
    Assign, Binding, Instance, Memory, MemoryPort, Module, ReadDuringWrite, Register, Reset,
    ResetKind,
};
use crate::signal::{Signal, SignalKind};

impl Register {
    /// A register with no reset or enable, starting at zero.
    pub fn new(target: SignalId, clock: SignalId, next: Expr) -> Self {
        Self {
            target,
            clock,
            reset: None,
            reset_value: 0,
            enable: None,
            next,
        }
    }

    /// Adds a synchronous active-high reset.
    pub fn with_sync_reset(self, signal: SignalId, value: u64) -> Self {
        self.with_reset(signal, ResetKind::Sync, value)
    }

    /// Adds an asynchronous active-high reset.
    pub fn with_async_reset(self, signal: SignalId, value: u64) -> Self {
        self.with_reset(signal, ResetKind::Async, value)
    }

    fn with_reset(mut self, signal: SignalId, kind: ResetKind, value: u64) -> Self {
        self.reset = Some(Reset { signal, kind });
        self.reset_value = value;
        self
    }

    /// Adds a clock enable.
    pub fn with_enable(mut self, enable: Expr) -> Self {
        self.enable = Some(enable);
        self
    }
}

/// Incrementally builds a [`Module`].
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Starts an empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: Module::new(name),
        }
    }

    fn signal(&mut self, name: &str, width: u32, kind: SignalKind) -> SignalId {
        self.module.signals.alloc(Signal::new(name, width, kind))
    }

    /// Declares an input port.
    pub fn input(&mut self, name: &str, width: u32) -> SignalId {
        self.signal(name, width, SignalKind::Input)
    }

    /// Declares an output port.
    pub fn output(&mut self, name: &str, width: u32) -> SignalId {
        self.signal(name, width, SignalKind::Output)
    }

    /// Declares an internal signal.
    pub fn wire(&mut self, name: &str, width: u32) -> SignalId {
        self.signal(name, width, SignalKind::Internal)
    }

    /// Marks a signal as two's complement.
    pub fn set_signed(&mut self, id: SignalId) -> &mut Self {
        self.module.signals[id].signed = true;
        self
    }

    /// Adds `target = expr`.
    pub fn assign(&mut self, target: SignalId, expr: Expr) -> &mut Self {
        self.module.assigns.push(Assign { target, expr });
        self
    }

    /// Declares an internal wire driven by `expr` and returns it.
    pub fn node(&mut self, name: &str, width: u32, expr: Expr) -> SignalId {
        let id = self.wire(name, width);
        self.assign(id, expr);
        id
    }

    /// Adds a register.
    pub fn register(&mut self, register: Register) -> &mut Self {
        self.module.registers.push(register);
        self
    }

    /// Declares a memory with no ports yet.
    pub fn memory(&mut self, name: &str, depth: u32, width: u32) -> MemoryId {
        self.module.memories.alloc(Memory {
            name: name.to_string(),
            depth,
            width,
            initial: Vec::new(),
            ports: Vec::new(),
        })
    }

    /// Sets a memory's start-up contents.
    pub fn memory_init(&mut self, memory: MemoryId, words: Vec<u64>) -> &mut Self {
        self.module.memories[memory].initial = words;
        self
    }

    /// Adds a combinational read port.
    pub fn async_read(&mut self, memory: MemoryId, addr: Expr, data: SignalId) -> &mut Self {
        self.module.memories[memory]
            .ports
            .push(MemoryPort::AsyncRead { addr, data });
        self
    }

    /// Adds a registered read port.
    pub fn sync_read(
        &mut self,
        memory: MemoryId,
        clock: SignalId,
        addr: Expr,
        data: SignalId,
        enable: Option<Expr>,
        read_during_write: ReadDuringWrite,
    ) -> &mut Self {
        self.module.memories[memory].ports.push(MemoryPort::SyncRead {
            clock,
            addr,
            data,
            enable,
            read_during_write,
        });
        self
    }

    /// Adds a clocked write port.
    pub fn write_port(
        &mut self,
        memory: MemoryId,
        clock: SignalId,
        addr: Expr,
        data: Expr,
        enable: Expr,
    ) -> &mut Self {
        self.module.memories[memory].ports.push(MemoryPort::Write {
            clock,
            addr,
            data,
            enable,
        });
        self
    }

    /// Instantiates `module`, binding child ports to parent signals by name.
    pub fn instance(
        &mut self,
        name: &str,
        module: ModuleId,
        bindings: &[(&str, SignalId)],
    ) -> &mut Self {
        self.module.instances.push(Instance {
            name: name.to_string(),
            module,
            bindings: bindings
                .iter()
                .map(|(port, signal)| Binding {
                    port: (*port).to_string(),
                    signal: *signal,
                })
                .collect(),
        });
        self
    }

    /// Read access to the module under construction.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Returns the finished module.
    pub fn finish(self) -> Module {
        self.module
    }
}

/// Collects modules into a [`Design`].
#[derive(Debug, Clone, Default)]
pub struct DesignBuilder {
    modules: Arena<ModuleId, Module>,
}

impl DesignBuilder {
    /// Starts an empty design.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module and returns its id for use in instances.
    pub fn add(&mut self, module: Module) -> ModuleId {
        self.modules.alloc(module)
    }

    /// Finishes the design with `top` as its root.
    pub fn finish(self, top: ModuleId) -> Design {
        Design {
            modules: self.modules,
            top,
        }
    }
}
