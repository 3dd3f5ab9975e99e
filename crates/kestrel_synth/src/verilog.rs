//! Structural Verilog export.
//!
//! The module and its ports keep their IR names, escaped when they are not
//! plain Verilog identifiers. Every net becomes `wire nN` (or `reg nN` for a
//! flip-flop output), every gate one primitive instance, and every flip-flop
//! one `always` process using non-blocking assignment.

use std::fmt;

use kestrel_ir::SignalKind;

use crate::netlist::{Bus, GateKind, NetId, Netlist};

const KEYWORDS: &[&str] = &[
    "always", "and", "assign", "automatic", "begin", "buf", "case", "casex", "casez", "default",
    "defparam", "disable", "edge", "else", "end", "endcase", "endfunction", "endgenerate",
    "endmodule", "endtask", "for", "forever", "function", "generate", "genvar", "if", "initial",
    "inout", "input", "integer", "localparam", "module", "nand", "negedge", "nor", "not", "or",
    "output", "parameter", "posedge", "real", "reg", "repeat", "signed", "supply0", "supply1",
    "task", "tri", "wait", "while", "wire", "xnor", "xor",
];

/// Renders `name` as a Verilog identifier, escaping it if necessary.
///
/// Escaped identifiers start with `\` and end with a space, which is part
/// of the returned string.
pub fn verilog_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !KEYWORDS.contains(&name);
    if plain {
        name.to_string()
    } else {
        format!("\\{name} ")
    }
}

/// Renders a netlist as a structural Verilog module.
pub fn to_verilog(netlist: &Netlist) -> String {
    Verilog(netlist).to_string()
}

/// Display adapter producing the Verilog text of a netlist.
pub struct Verilog<'a>(pub &'a Netlist);

fn is_port(bus: &Bus) -> bool {
    matches!(bus.kind, SignalKind::Input | SignalKind::Output)
}

/// A prefix no port name starts with.
fn unique_prefix(base: &str, ports: &[&Bus]) -> String {
    let mut prefix = base.to_string();
    while ports.iter().any(|p| p.name.starts_with(&prefix)) {
        prefix.push('_');
    }
    prefix
}

/// `name[i]`, or plain `name` for a one-bit port.
fn port_bit(bus: &Bus, bit: usize) -> String {
    let ident = verilog_ident(&bus.name);
    if bus.nets.len() == 1 {
        ident
    } else {
        format!("{ident}[{bit}]")
    }
}

struct Names {
    net: String,
    gate: String,
}

impl Names {
    fn net(&self, net: NetId) -> String {
        match net {
            NetId::ZERO => "1'b0".to_string(),
            NetId::ONE => "1'b1".to_string(),
            _ => format!("{}{}", self.net, net.as_raw()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Driver {
    Undriven,
    Port,
    Gate,
    Dff,
}

impl fmt::Display for Verilog<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let netlist = self.0;
        let ports: Vec<&Bus> = netlist.signals.iter().filter(|b| is_port(b)).collect();
        let names = Names {
            net: unique_prefix("n", &ports),
            gate: unique_prefix("g", &ports),
        };

        writeln!(f, "// Structural netlist of '{}'.", netlist.name)?;
        writeln!(f, "module {}(", verilog_ident(&netlist.name))?;
        for (i, port) in ports.iter().enumerate() {
            let direction = if port.kind == SignalKind::Input {
                "input"
            } else {
                "output"
            };
            let range = match port.nets.len() {
                1 => String::new(),
                n => format!("[{}:0] ", n - 1),
            };
            let sep = if i + 1 == ports.len() { "" } else { "," };
            writeln!(
                f,
                "    {direction} wire {range}{}{sep}",
                verilog_ident(&port.name)
            )?;
        }
        writeln!(f, ");")?;

        let mut drivers = vec![Driver::Undriven; netlist.net_count as usize];
        let mut port_sources: Vec<Option<String>> = vec![None; netlist.net_count as usize];
        for port in ports.iter().filter(|p| p.kind == SignalKind::Input) {
            for (bit, net) in port.nets.iter().enumerate() {
                if !net.is_const() && drivers[net.index()] == Driver::Undriven {
                    drivers[net.index()] = Driver::Port;
                    port_sources[net.index()] = Some(port_bit(port, bit));
                }
            }
        }
        for gate in &netlist.gates {
            drivers[gate.output.index()] = Driver::Gate;
        }
        for dff in &netlist.dffs {
            drivers[dff.q.index()] = Driver::Dff;
        }
        let init: Vec<Option<bool>> = {
            let mut init = vec![None; netlist.net_count as usize];
            for dff in &netlist.dffs {
                init[dff.q.index()] = Some(dff.init);
            }
            init
        };

        writeln!(f)?;
        for raw in 2..netlist.net_count {
            let net = NetId::from_raw(raw);
            let name = names.net(net);
            match drivers[net.index()] {
                Driver::Port => {
                    let source = port_sources[net.index()].as_deref().unwrap_or("1'b0");
                    writeln!(f, "    wire {name} = {source};")?;
                }
                Driver::Gate => writeln!(f, "    wire {name};")?,
                Driver::Dff => {
                    let value = u8::from(init[net.index()].unwrap_or(false));
                    writeln!(f, "    reg {name} = 1'b{value};")?;
                }
                Driver::Undriven => writeln!(f, "    wire {name} = 1'b0;")?,
            }
        }

        if !netlist.gates.is_empty() {
            writeln!(f)?;
        }
        for gate in &netlist.gates {
            let out = names.net(gate.output);
            let a = names.net(gate.inputs[0]);
            match gate.kind {
                GateKind::Not => {
                    writeln!(f, "    not {}{} ({out}, {a});", names.gate, gate.id)?;
                }
                kind => {
                    let b = names.net(gate.inputs[1]);
                    writeln!(
                        f,
                        "    {} {}{} ({out}, {a}, {b});",
                        kind.as_str(),
                        names.gate,
                        gate.id
                    )?;
                }
            }
        }

        if !netlist.dffs.is_empty() {
            writeln!(f)?;
        }
        for dff in &netlist.dffs {
            if dff.clock.is_const() || dff.reset == Some(NetId::ONE) {
                continue;
            }
            let q = names.net(dff.q);
            let d = names.net(dff.d);
            let clock = names.net(dff.clock);
            match dff.reset {
                Some(reset) if reset != NetId::ZERO => {
                    let reset = names.net(reset);
                    writeln!(
                        f,
                        "    always @(posedge {clock} or posedge {reset}) if ({reset}) {q} <= 1'b{}; else {q} <= {d};",
                        u8::from(dff.init)
                    )?;
                }
                _ => writeln!(f, "    always @(posedge {clock}) {q} <= {d};")?,
            }
        }

        let outputs: Vec<&&Bus> = ports
            .iter()
            .filter(|p| p.kind == SignalKind::Output)
            .collect();
        if !outputs.is_empty() {
            writeln!(f)?;
        }
        for port in outputs {
            for (bit, net) in port.nets.iter().enumerate() {
                writeln!(f, "    assign {} = {};", port_bit(port, bit), names.net(*net))?;
            }
        }
        writeln!(f, "endmodule")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::{lower, LowerOptions};
    use kestrel_ir::{CheckedModule, Expr, ModuleBuilder, Register};

    fn export(m: ModuleBuilder) -> String {
        let checked = CheckedModule::new(&m.finish()).unwrap();
        to_verilog(&lower(&checked, &LowerOptions::default()).unwrap())
    }

    #[test]
    fn plain_names_are_kept() {
        assert_eq!(verilog_ident("data_out"), "data_out");
        assert_eq!(verilog_ident("_x$1"), "_x$1");
    }

    #[test]
    fn odd_names_are_escaped() {
        assert_eq!(verilog_ident("u0.sum"), "\\u0.sum ");
        assert_eq!(verilog_ident("3state"), "\\3state ");
        assert_eq!(verilog_ident("reg"), "\\reg ");
    }

    #[test]
    fn adder_exports_ports_and_gates() {
        let mut m = ModuleBuilder::new("add2");
        let a = m.input("a", 2);
        let b = m.input("b", 2);
        let s = m.output("s", 2);
        m.assign(s, Expr::sig(a).add(Expr::sig(b)));
        let text = export(m);
        assert!(text.contains("module add2("));
        assert!(text.contains("    input wire [1:0] a,"));
        assert!(text.contains("    output wire [1:0] s\n);"));
        assert!(text.contains("    wire n2 = a[0];"));
        assert!(text.contains("    xor g0 (n6, n2, n4);"));
        assert!(text.contains("    assign s[0] = n6;"));
        assert!(text.trim_end().ends_with("endmodule"));
    }

    #[test]
    fn flip_flops_become_always_blocks() {
        let mut m = ModuleBuilder::new("toggle");
        let clk = m.input("clk", 1);
        let rst = m.input("rst", 1);
        let q = m.output("q", 1);
        m.register(Register::new(q, clk, Expr::sig(q).not()).with_async_reset(rst, 1));
        let text = export(m);
        assert!(text.contains("    reg n2 = 1'b1;"));
        assert!(text.contains("always @(posedge n3 or posedge n4) if (n4) n2 <= 1'b1; else n2 <= "));
        assert!(text.contains("    assign q = n2;"));
    }

    #[test]
    fn net_prefix_avoids_port_names() {
        let mut m = ModuleBuilder::new("top");
        let n = m.input("n1", 1);
        let y = m.output("y", 1);
        m.assign(y, Expr::sig(n).not());
        let text = export(m);
        assert!(text.contains("wire n_2 = n1;"));
        assert!(text.contains("not g0 (n_3, n_2);"));
    }

    #[test]
    fn escaped_module_name() {
        let m = {
            let mut m = ModuleBuilder::new("cpu.alu");
            let a = m.input("a", 1);
            let y = m.output("y", 1);
            m.assign(y, Expr::sig(a));
            m
        };
        assert!(export(m).contains("module \\cpu.alu ("));
    }
}
