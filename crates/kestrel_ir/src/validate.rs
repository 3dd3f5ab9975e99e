//! Structural checks that do not need expression typing.

use std::collections::HashSet;

use kestrel_common::bits;

use crate::error::IrError;
use crate::expr::Expr;
use crate::ids::SignalId;
use crate::module::{MemoryPort, Module};
use crate::signal::SignalKind;

/// Verifies that every signal id used by `module` exists.
pub(crate) fn check_references(module: &Module) -> Result<(), IrError> {
    let check_id = |id: SignalId, context: &dyn Fn() -> String| {
        if module.signals.contains(id) {
            Ok(())
        } else {
            Err(IrError::DanglingSignal {
                module: module.name.clone(),
                context: context(),
                id: id.as_raw(),
            })
        }
    };
    let check_expr = |expr: &Expr, context: &dyn Fn() -> String| {
        let mut result = Ok(());
        expr.for_each_signal(&mut |id| {
            if result.is_ok() {
                result = check_id(id, context);
            }
        });
        result
    };

    for (i, assign) in module.assigns.iter().enumerate() {
        let ctx = || format!("assign #{i}");
        check_id(assign.target, &ctx)?;
        check_expr(&assign.expr, &ctx)?;
    }
    for (i, reg) in module.registers.iter().enumerate() {
        let ctx = || format!("register #{i}");
        check_id(reg.target, &ctx)?;
        check_id(reg.clock, &ctx)?;
        if let Some(reset) = reg.reset {
            check_id(reset.signal, &ctx)?;
        }
        if let Some(enable) = &reg.enable {
            check_expr(enable, &ctx)?;
        }
        check_expr(&reg.next, &ctx)?;
    }
    for mem in module.memories.values() {
        let ctx = || format!("memory '{}'", mem.name);
        for port in &mem.ports {
            match port {
                MemoryPort::AsyncRead { addr, data } => {
                    check_expr(addr, &ctx)?;
                    check_id(*data, &ctx)?;
                }
                MemoryPort::SyncRead {
                    clock,
                    addr,
                    data,
                    enable,
                    ..
                } => {
                    check_id(*clock, &ctx)?;
                    check_expr(addr, &ctx)?;
                    check_id(*data, &ctx)?;
                    if let Some(enable) = enable {
                        check_expr(enable, &ctx)?;
                    }
                }
                MemoryPort::Write {
                    clock,
                    addr,
                    data,
                    enable,
                } => {
                    check_id(*clock, &ctx)?;
                    check_expr(addr, &ctx)?;
                    check_expr(data, &ctx)?;
                    check_expr(enable, &ctx)?;
                }
            }
        }
    }
    for inst in &module.instances {
        for binding in &inst.bindings {
            check_id(binding.signal, &|| format!("instance '{}'", inst.name))?;
        }
    }
    Ok(())
}

/// Checks names, declared widths, memory shapes and driver uniqueness of a
/// flat module.
pub(crate) fn check_structure(module: &Module) -> Result<(), IrError> {
    let name = || module.name.clone();
    let mut seen: HashSet<&str> = HashSet::new();
    for sig in module.signals.values() {
        if !seen.insert(sig.name.as_str()) {
            return Err(IrError::DuplicateName {
                module: name(),
                name: sig.name.clone(),
            });
        }
        if bits::check_width(sig.width).is_err() {
            return Err(IrError::InvalidWidth {
                module: name(),
                name: sig.name.clone(),
                width: sig.width,
            });
        }
    }
    for mem in module.memories.values() {
        if !seen.insert(mem.name.as_str()) {
            return Err(IrError::DuplicateName {
                module: name(),
                name: mem.name.clone(),
            });
        }
        if bits::check_width(mem.width).is_err() {
            return Err(IrError::InvalidWidth {
                module: name(),
                name: mem.name.clone(),
                width: mem.width,
            });
        }
        let invalid = |reason: String| IrError::InvalidMemory {
            module: name(),
            memory: mem.name.clone(),
            reason,
        };
        if mem.depth == 0 {
            return Err(invalid("depth is zero".into()));
        }
        if mem.initial.len() > mem.depth as usize {
            return Err(invalid(format!(
                "{} initial words exceed depth {}",
                mem.initial.len(),
                mem.depth
            )));
        }
        if let Some((addr, word)) = mem
            .initial
            .iter()
            .enumerate()
            .find(|(_, w)| bits::mask(**w, mem.width) != **w)
        {
            return Err(invalid(format!(
                "initial word {addr} ({word:#x}) does not fit in {} bits",
                mem.width
            )));
        }
    }

    let mut drivers: HashSet<SignalId> = HashSet::new();
    let mut drive = |id: SignalId| -> Result<(), IrError> {
        let sig = &module.signals[id];
        if sig.kind == SignalKind::Input {
            return Err(IrError::DrivenInput {
                module: name(),
                signal: sig.name.clone(),
            });
        }
        if !drivers.insert(id) {
            return Err(IrError::MultipleDrivers {
                module: name(),
                signal: sig.name.clone(),
            });
        }
        Ok(())
    };
    for assign in &module.assigns {
        drive(assign.target)?;
    }
    for reg in &module.registers {
        drive(reg.target)?;
    }
    for mem in module.memories.values() {
        for port in &mem.ports {
            match port {
                MemoryPort::AsyncRead { data, .. } | MemoryPort::SyncRead { data, .. } => {
                    drive(*data)?
                }
                MemoryPort::Write { .. } => {}
            }
        }
    }
    Ok(())
}
