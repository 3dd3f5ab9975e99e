//! Verilog testbench generation for the external simulator.
//!
//! The testbench instantiates the exported netlist, replays recorded vectors
//! in the same order the harness drives simulators, and prints one line per
//! cycle:
//!
//! ```text
//! @K <cycle> <name>=<decimal value> ...
//! ```

use std::fmt::Write as _;

use kestrel_ir::SignalKind;
use kestrel_synth::{verilog_ident, Bus, Netlist};

use crate::vectors::TestVector;

/// Marker that starts every result line.
pub const RESULT_MARKER: &str = "@K";

fn fresh(base: &str, taken: &[&Bus]) -> String {
    let mut name = base.to_string();
    while taken.iter().any(|b| b.name == name) {
        name.push('_');
    }
    name
}

fn range(bus: &Bus) -> String {
    match bus.nets.len() {
        1 => String::new(),
        n => format!("[{}:0] ", n - 1),
    }
}

/// Escapes a signal name for use inside a `$display` format string.
fn format_text(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => out.push_str("%%"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

/// Renders a testbench replaying `vectors` against `netlist`.
///
/// `clock` is toggled low then high each cycle when the netlist has an input
/// of that name. Only `observed` outputs the netlist actually has are printed.
pub fn generate(netlist: &Netlist, vectors: &[TestVector], clock: &str, observed: &[String]) -> String {
    let ports: Vec<&Bus> = netlist
        .signals
        .iter()
        .filter(|b| b.kind.is_port())
        .collect();
    let has_clock = ports
        .iter()
        .any(|b| b.kind == SignalKind::Input && b.name == clock);
    let printed: Vec<&Bus> = observed
        .iter()
        .filter_map(|name| ports.iter().copied().find(|b| &b.name == name))
        .collect();
    let tb_name = if netlist.name == "kestrel_tb" {
        "kestrel_tb_"
    } else {
        "kestrel_tb"
    };
    let instance = fresh("dut", &ports);

    let mut out = String::new();
    let _ = writeln!(out, "// Testbench for '{}': {} cycles.", netlist.name, vectors.len());
    let _ = writeln!(out, "`timescale 1ns/1ns");
    let _ = writeln!(out, "module {tb_name};");
    for port in &ports {
        let ident = verilog_ident(&port.name);
        if port.kind == SignalKind::Input {
            let _ = writeln!(out, "    reg {}{ident} = 0;", range(port));
        } else {
            let _ = writeln!(out, "    wire {}{ident};", range(port));
        }
    }
    let _ = writeln!(out, "    {} {instance} (", verilog_ident(&netlist.name));
    for (i, port) in ports.iter().enumerate() {
        let ident = verilog_ident(&port.name);
        let sep = if i + 1 == ports.len() { "" } else { "," };
        let _ = writeln!(out, "        .{ident}({ident}){sep}");
    }
    let _ = writeln!(out, "    );");

    let format: String = printed
        .iter()
        .map(|b| format!(" {}=%0d", format_text(&b.name)))
        .collect();
    let args: String = printed
        .iter()
        .map(|b| format!(", {}", verilog_ident(&b.name)))
        .collect();
    let clock_ident = verilog_ident(clock);

    let _ = writeln!(out, "    initial begin");
    let _ = writeln!(out, "        #1;");
    for vector in vectors {
        for (name, value) in &vector.inputs {
            if let Some(port) = ports
                .iter()
                .find(|b| b.kind == SignalKind::Input && &b.name == name)
            {
                let _ = writeln!(
                    out,
                    "        {} = {}'d{value};",
                    verilog_ident(name),
                    port.nets.len()
                );
            }
        }
        if has_clock {
            let _ = writeln!(out, "        {clock_ident} = 1'b0;");
        }
        let _ = writeln!(out, "        #1;");
        let _ = writeln!(
            out,
            "        $display(\"{RESULT_MARKER} {}{format}\"{args});",
            vector.cycle
        );
        if has_clock {
            let _ = writeln!(out, "        {clock_ident} = 1'b1;");
            let _ = writeln!(out, "        #1;");
        }
    }
    let _ = writeln!(out, "        $finish;");
    let _ = writeln!(out, "    end");
    let _ = writeln!(out, "endmodule");
    out
}
