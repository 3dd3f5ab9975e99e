//! Hierarchy flattening.
//!
//! Every backend and the structural lowering operate on a single flat module.
//! [`flatten`] inlines each instance, prefixing child names with
//! `instance.` and turning port bindings into plain assignments: a child
//! input becomes `child.port = parent_signal`, a child output becomes
//! `parent_signal = child.port`.

use std::collections::{HashMap, HashSet};

use crate::error::IrError;
use crate::expr::Expr;
use crate::ids::{ModuleId, SignalId};
use crate::module::{Assign, Memory, MemoryPort, Module, Register};
use crate::signal::{Signal, SignalKind};
use crate::validate::check_references;
use crate::design::Design;

/// Inlines the design hierarchy below `design.top` into one module.
///
/// The result keeps the top module's name and port kinds; child ports become
/// internal signals. Fails on dangling ids, unknown ports, duplicate
/// flattened names, and cyclic instantiation.
pub fn flatten(design: &Design) -> Result<Module, IrError> {
    let top = design
        .modules
        .try_get(design.top)
        .ok_or(IrError::MissingTop(design.top.as_raw()))?;
    let mut flattener = Flattener {
        design,
        out: Module::new(top.name.clone()),
        names: HashSet::new(),
        stack: Vec::new(),
    };
    flattener.inline(design.top, "")?;
    tracing::debug!(
        module = %flattener.out.name,
        signals = flattener.out.signals.len(),
        "flattened design"
    );
    Ok(flattener.out)
}

struct Flattener<'a> {
    design: &'a Design,
    out: Module,
    names: HashSet<String>,
    stack: Vec<ModuleId>,
}

impl Flattener<'_> {
    /// Copies `id` into the output under `prefix` and returns the local-to-flat signal map.
    fn inline(&mut self, id: ModuleId, prefix: &str) -> Result<Vec<SignalId>, IrError> {
        if let Some(pos) = self.stack.iter().position(|m| *m == id) {
            let mut modules: Vec<String> = self.stack[pos..]
                .iter()
                .map(|m| self.design.modules[*m].name.clone())
                .collect();
            modules.push(self.design.modules[id].name.clone());
            return Err(IrError::InstanceCycle { modules });
        }
        self.stack.push(id);

        let design = self.design;
        let module = &design.modules[id];
        check_references(module)?;

        let mut map = Vec::with_capacity(module.signals.len());
        for sig in module.signals.values() {
            let name = format!("{prefix}{}", sig.name);
            self.claim(&module.name, &name)?;
            let kind = if prefix.is_empty() {
                sig.kind
            } else {
                SignalKind::Internal
            };
            map.push(self.out.signals.alloc(Signal {
                name,
                width: sig.width,
                kind,
                signed: sig.signed,
            }));
        }

        let remap = |e: &Expr| e.map_signals(&|s: SignalId| map[s.as_raw() as usize]);
        let at = |s: SignalId| map[s.as_raw() as usize];

        for assign in &module.assigns {
            self.out.assigns.push(Assign {
                target: at(assign.target),
                expr: remap(&assign.expr),
            });
        }
        for reg in &module.registers {
            self.out.registers.push(Register {
                target: at(reg.target),
                clock: at(reg.clock),
                reset: reg.reset.map(|mut r| {
                    r.signal = at(r.signal);
                    r
                }),
                reset_value: reg.reset_value,
                enable: reg.enable.as_ref().map(remap),
                next: remap(&reg.next),
            });
        }
        for mem in module.memories.values() {
            let name = format!("{prefix}{}", mem.name);
            self.claim(&module.name, &name)?;
            let ports = mem
                .ports
                .iter()
                .map(|port| match port {
                    MemoryPort::AsyncRead { addr, data } => MemoryPort::AsyncRead {
                        addr: remap(addr),
                        data: at(*data),
                    },
                    MemoryPort::SyncRead {
                        clock,
                        addr,
                        data,
                        enable,
                        read_during_write,
                    } => MemoryPort::SyncRead {
                        clock: at(*clock),
                        addr: remap(addr),
                        data: at(*data),
                        enable: enable.as_ref().map(remap),
                        read_during_write: *read_during_write,
                    },
                    MemoryPort::Write {
                        clock,
                        addr,
                        data,
                        enable,
                    } => MemoryPort::Write {
                        clock: at(*clock),
                        addr: remap(addr),
                        data: remap(data),
                        enable: remap(enable),
                    },
                })
                .collect();
            self.out.memories.alloc(Memory {
                name,
                depth: mem.depth,
                width: mem.width,
                initial: mem.initial.clone(),
                ports,
            });
        }

        for inst in &module.instances {
            let child = design
                .modules
                .try_get(inst.module)
                .ok_or_else(|| IrError::DanglingModule {
                    module: module.name.clone(),
                    instance: inst.name.clone(),
                    id: inst.module.as_raw(),
                })?;
            let child_ports: HashMap<&str, (SignalId, SignalKind)> = child
                .signals
                .iter()
                .filter(|(_, s)| s.kind.is_port())
                .map(|(id, s)| (s.name.as_str(), (id, s.kind)))
                .collect();
            let child_map = self.inline(inst.module, &format!("{prefix}{}.", inst.name))?;
            for binding in &inst.bindings {
                let (port, kind) =
                    child_ports
                        .get(binding.port.as_str())
                        .copied()
                        .ok_or_else(|| IrError::UnknownPort {
                            module: module.name.clone(),
                            instance: inst.name.clone(),
                            port: binding.port.clone(),
                        })?;
                let parent = at(binding.signal);
                let inner = child_map[port.as_raw() as usize];
                let assign = if kind == SignalKind::Input {
                    Assign {
                        target: inner,
                        expr: Expr::sig(parent),
                    }
                } else {
                    Assign {
                        target: parent,
                        expr: Expr::sig(inner),
                    }
                };
                self.out.assigns.push(assign);
            }
        }

        self.stack.pop();
        Ok(map)
    }

    fn claim(&mut self, module: &str, name: &str) -> Result<(), IrError> {
        if self.names.insert(name.to_string()) {
            Ok(())
        } else {
            Err(IrError::DuplicateName {
                module: module.to_string(),
                name: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{DesignBuilder, ModuleBuilder};

    fn inverter() -> Module {
        let mut b = ModuleBuilder::new("inv");
        let a = b.input("a", 4);
        let y = b.output("y", 4);
        b.assign(y, Expr::sig(a).not());
        b.finish()
    }

    #[test]
    fn single_module_is_unchanged() {
        let design = Design::single(inverter());
        let flat = flatten(&design).unwrap();
        assert_eq!(flat, inverter());
    }

    #[test]
    fn instances_become_prefixed_wires() {
        let mut d = DesignBuilder::new();
        let inv = d.add(inverter());
        let mut top = ModuleBuilder::new("top");
        let x = top.input("x", 4);
        let z = top.output("z", 4);
        let mid = top.wire("mid", 4);
        top.instance("u0", inv, &[("a", x), ("y", mid)]);
        top.instance("u1", inv, &[("a", mid), ("y", z)]);
        let top_id = d.add(top.finish());
        let flat = flatten(&d.finish(top_id)).unwrap();

        let u0a = flat.find_signal("u0.a").unwrap();
        assert_eq!(flat.signals[u0a].kind, SignalKind::Internal);
        assert!(flat.find_signal("u1.y").is_some());
        assert_eq!(flat.signals[flat.find_signal("z").unwrap()].kind, SignalKind::Output);
        // Two inverter bodies plus four port bindings.
        assert_eq!(flat.assigns.len(), 6);
        assert!(flat.instances.is_empty());
    }

    #[test]
    fn unknown_port_is_rejected() {
        let mut d = DesignBuilder::new();
        let inv = d.add(inverter());
        let mut top = ModuleBuilder::new("top");
        let x = top.input("x", 4);
        top.instance("u0", inv, &[("nope", x)]);
        let top_id = d.add(top.finish());
        let err = flatten(&d.finish(top_id)).unwrap_err();
        assert!(matches!(err, IrError::UnknownPort { ref port, .. } if port == "nope"));
    }

    #[test]
    fn cyclic_hierarchy_is_rejected() {
        let mut d = DesignBuilder::new();
        let mut a = ModuleBuilder::new("a");
        a.instance("self_ref", ModuleId::from_raw(0), &[]);
        let a_id = d.add(a.finish());
        let err = flatten(&d.finish(a_id)).unwrap_err();
        assert_eq!(
            err,
            IrError::InstanceCycle {
                modules: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn missing_top_is_rejected() {
        let design = Design {
            modules: Default::default(),
            top: ModuleId::from_raw(0),
        };
        assert_eq!(flatten(&design).unwrap_err(), IrError::MissingTop(0));
    }
}
