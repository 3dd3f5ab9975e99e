//! Waveform dumps in IEEE 1364 Value Change Dump format.
//!
//! A [`VcdTracer`] samples chosen signals from any [`Simulator`] and writes
//! only the values that changed. Used as a [`CycleHook`] it records the
//! settled low phase of every cycle, one time unit per cycle.

use std::io::{self, Write};

use crate::error::SimError;
use crate::simulator::{CycleHook, Simulator};

struct Traced {
    name: String,
    code: String,
    width: u32,
    last: Option<u64>,
}

/// Writes a VCD trace of selected signals.
pub struct VcdTracer<W: Write> {
    writer: W,
    scope: String,
    signals: Vec<Traced>,
    header_written: bool,
    current_time: Option<u64>,
    hook_time: u64,
}

impl<W: Write> VcdTracer<W> {
    /// Creates a tracer whose signals live in scope `scope`.
    pub fn new(writer: W, scope: &str) -> Self {
        Self {
            writer,
            scope: scope.to_string(),
            signals: Vec::new(),
            header_written: false,
            current_time: None,
            hook_time: 0,
        }
    }

    /// Adds a signal; only allowed before the first sample.
    pub fn add_signal(&mut self, sim: &dyn Simulator, name: &str) -> Result<(), SimError> {
        if self.header_written {
            return Err(SimError::Io(io::Error::other(format!(
                "cannot trace '{name}' after the VCD header was written"
            ))));
        }
        let width = sim.signal_width(name)?;
        self.signals.push(Traced {
            name: name.to_string(),
            code: make_id_code(self.signals.len() as u32),
            width,
            last: None,
        });
        Ok(())
    }

    /// Adds every signal of `sim`.
    pub fn add_all(&mut self, sim: &dyn Simulator) -> Result<(), SimError> {
        for name in sim.signal_names() {
            self.add_signal(sim, &name)?;
        }
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), SimError> {
        writeln!(self.writer, "$version")?;
        writeln!(self.writer, "  Kestrel simulator")?;
        writeln!(self.writer, "$end")?;
        writeln!(self.writer, "$timescale")?;
        writeln!(self.writer, "  1ns")?;
        writeln!(self.writer, "$end")?;
        writeln!(self.writer, "$scope module {} $end", self.scope)?;
        for s in &self.signals {
            writeln!(self.writer, "$var wire {} {} {} $end", s.width, s.code, s.name)?;
        }
        writeln!(self.writer, "$upscope $end")?;
        writeln!(self.writer, "$enddefinitions $end")?;
        self.header_written = true;
        Ok(())
    }

    /// Records the current value of every traced signal at `time`.
    pub fn sample(&mut self, time: u64, sim: &dyn Simulator) -> Result<(), SimError> {
        if !self.header_written {
            self.write_header()?;
        }
        for i in 0..self.signals.len() {
            let value = sim.peek(&self.signals[i].name)?;
            if self.signals[i].last == Some(value) {
                continue;
            }
            if self.current_time != Some(time) {
                writeln!(self.writer, "#{time}")?;
                self.current_time = Some(time);
            }
            let signal = &mut self.signals[i];
            signal.last = Some(value);
            if signal.width == 1 {
                writeln!(self.writer, "{}{}", value & 1, signal.code)?;
            } else {
                writeln!(
                    self.writer,
                    "b{:0width$b} {}",
                    value,
                    signal.code,
                    width = signal.width as usize
                )?;
            }
        }
        Ok(())
    }

    /// Flushes and returns the writer.
    pub fn finish(mut self) -> Result<W, SimError> {
        if !self.header_written {
            self.write_header()?;
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> CycleHook for VcdTracer<W> {
    fn on_clock_low(&mut self, _cycle: u64, sim: &mut dyn Simulator) -> Result<(), SimError> {
        let time = self.hook_time;
        self.hook_time += 1;
        self.sample(time, sim)
    }
}

/// Identifier code for the `index`-th variable: printable ASCII from `!`.
fn make_id_code(index: u32) -> String {
    let mut code = String::new();
    let mut rest = index;
    loop {
        code.push((b'!' + (rest % 94) as u8) as char);
        rest /= 94;
        if rest == 0 {
            break;
        }
        rest -= 1;
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::interpreter;
    use crate::simulator::RunConfig;
    use kestrel_ir::{CheckedModule, Expr, ModuleBuilder, Register};
    use std::sync::Arc;

    fn counter() -> impl Simulator {
        let mut b = ModuleBuilder::new("counter");
        let clk = b.input("clk", 1);
        let q = b.output("q", 3);
        b.register(Register::new(q, clk, Expr::sig(q).add(Expr::lit(1, 3))));
        let checked = Arc::new(CheckedModule::new(&b.finish()).unwrap());
        interpreter(checked, RunConfig::default())
    }

    #[test]
    fn id_codes() {
        assert_eq!(make_id_code(0), "!");
        assert_eq!(make_id_code(93), "~");
        assert_eq!(make_id_code(94), "!!");
    }

    #[test]
    fn header_declares_variables() {
        let sim = counter();
        let mut vcd = VcdTracer::new(Vec::new(), "counter");
        vcd.add_all(&sim).unwrap();
        let text = String::from_utf8(vcd.finish().unwrap()).unwrap();
        assert!(text.contains("$scope module counter $end"));
        assert!(text.contains("$var wire 1 ! clk $end"));
        assert!(text.contains("$var wire 3 \" q $end"));
        assert!(text.contains("$enddefinitions $end"));
    }

    #[test]
    fn hook_records_only_changes() {
        let mut sim = counter();
        let mut vcd = VcdTracer::new(Vec::new(), "counter");
        vcd.add_signal(&sim, "q").unwrap();
        sim.run_cycles_with(3, &mut vcd).unwrap();
        let text = String::from_utf8(vcd.finish().unwrap()).unwrap();
        assert!(text.contains("#0\nb000 !\n"));
        assert!(text.contains("#1\nb001 !\n"));
        assert!(text.contains("#2\nb010 !\n"));
    }

    #[test]
    fn late_signal_is_rejected() {
        let sim = counter();
        let mut vcd = VcdTracer::new(Vec::new(), "counter");
        vcd.add_signal(&sim, "q").unwrap();
        vcd.sample(0, &sim).unwrap();
        assert!(vcd.add_signal(&sim, "clk").is_err());
    }

    #[test]
    fn unknown_signal_is_rejected() {
        let sim = counter();
        let mut vcd = VcdTracer::new(Vec::new(), "counter");
        assert!(matches!(
            vcd.add_signal(&sim, "nope"),
            Err(SimError::NoSuchSignal { .. })
        ));
    }
}
