//! Storage primitives: register files, RAMs, ROMs, a FIFO and a stack.
//!
//! All of them clock on `clk`. Write ports declared later win when two
//! ports write the same word on the same edge.

use kestrel_ir::{Expr, Module, ModuleBuilder, ReadDuringWrite, Register};

use crate::{addr_width, bits_for, check_width, error::invalid, PrimitiveError};

const MAX_DEPTH: u32 = 1 << 16;

fn check_depth(primitive: &'static str, depth: u32) -> Result<(), PrimitiveError> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(invalid(
            primitive,
            format!("depth {depth} is outside 1..={MAX_DEPTH}"),
        ));
    }
    Ok(())
}

/// How a RAM's read port returns data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// `dout` follows `addr` combinationally.
    Async,
    /// `dout` is registered on `clk`.
    Sync(ReadDuringWrite),
}

/// A register file with one write port and two combinational read ports.
///
/// Ports: `clk`, `we`, `waddr`, `wdata`, `raddr_a`, `raddr_b`, `rdata_a`,
/// `rdata_b`. With `zero_register` set, register 0 always reads as zero and
/// ignores writes.
pub fn register_file(count: u32, width: u32, zero_register: bool) -> Result<Module, PrimitiveError> {
    check_width("register_file", width, 64)?;
    check_depth("register_file", count)?;
    let aw = addr_width(count);
    let mut m = ModuleBuilder::new("register_file");
    let clk = m.input("clk", 1);
    let we = Expr::sig(m.input("we", 1));
    let waddr = Expr::sig(m.input("waddr", aw));
    let wdata = Expr::sig(m.input("wdata", width));
    let regs = m.memory("regs", count, width);

    let enable = if zero_register {
        we.and(waddr.clone().ne(Expr::lit(0, aw)))
    } else {
        we
    };
    m.write_port(regs, clk, waddr, wdata, enable);

    for port in ["a", "b"] {
        let raddr = m.input(&format!("raddr_{port}"), aw);
        let rdata = m.output(&format!("rdata_{port}"), width);
        if zero_register {
            let raw = m.wire(&format!("raw_{port}"), width);
            m.async_read(regs, Expr::sig(raddr), raw);
            let is_zero = Expr::sig(raddr).eq(Expr::lit(0, aw));
            m.assign(rdata, Expr::mux(is_zero, Expr::lit(0, width), Expr::sig(raw)));
        } else {
            m.async_read(regs, Expr::sig(raddr), rdata);
        }
    }
    Ok(m.finish())
}

/// A single-port RAM: `clk`, `we`, `addr`, `din`, `dout`.
pub fn ram(depth: u32, width: u32, mode: ReadMode) -> Result<Module, PrimitiveError> {
    check_width("ram", width, 64)?;
    check_depth("ram", depth)?;
    let aw = addr_width(depth);
    let mut m = ModuleBuilder::new("ram");
    let clk = m.input("clk", 1);
    let we = Expr::sig(m.input("we", 1));
    let addr = Expr::sig(m.input("addr", aw));
    let din = Expr::sig(m.input("din", width));
    let dout = m.output("dout", width);
    let mem = m.memory("mem", depth, width);
    m.write_port(mem, clk, addr.clone(), din, we);
    match mode {
        ReadMode::Async => m.async_read(mem, addr, dout),
        ReadMode::Sync(policy) => m.sync_read(mem, clk, addr, dout, None, policy),
    };
    Ok(m.finish())
}

/// A RAM with two independent ports `a` and `b`, each with `we_*`,
/// `addr_*`, `din_*` and a registered `dout_*`. Port `b` wins a write
/// collision.
pub fn dual_port_ram(
    depth: u32,
    width: u32,
    policy: ReadDuringWrite,
) -> Result<Module, PrimitiveError> {
    check_width("dual_port_ram", width, 64)?;
    check_depth("dual_port_ram", depth)?;
    let aw = addr_width(depth);
    let mut m = ModuleBuilder::new("dual_port_ram");
    let clk = m.input("clk", 1);
    let mem = m.memory("mem", depth, width);
    for port in ["a", "b"] {
        let we = Expr::sig(m.input(&format!("we_{port}"), 1));
        let addr = Expr::sig(m.input(&format!("addr_{port}"), aw));
        let din = Expr::sig(m.input(&format!("din_{port}"), width));
        let dout = m.output(&format!("dout_{port}"), width);
        m.write_port(mem, clk, addr.clone(), din, we);
        m.sync_read(mem, clk, addr, dout, None, policy);
    }
    Ok(m.finish())
}

/// A ROM holding `contents`: `addr` in, `data` out combinationally.
pub fn rom(contents: &[u64], width: u32) -> Result<Module, PrimitiveError> {
    check_width("rom", width, 64)?;
    let depth = u32::try_from(contents.len())
        .map_err(|_| invalid("rom", format!("{} words is too many", contents.len())))?;
    check_depth("rom", depth)?;
    let mut m = ModuleBuilder::new("rom");
    let addr = Expr::sig(m.input("addr", addr_width(depth)));
    let data = m.output("data", width);
    let mem = m.memory("mem", depth, width);
    m.memory_init(mem, contents.to_vec());
    m.async_read(mem, addr, data);
    Ok(m.finish())
}

/// A first-in first-out queue of `depth` words; `depth` must be a power of two.
///
/// Inputs `clk`, `rst` (synchronous), `push`, `pop`, `din`; outputs `dout`
/// (the oldest word, shown ahead of `pop`), `empty`, `full` and `count`.
/// A push while full or a pop while empty is ignored. Push and pop in the
/// same cycle both happen.
pub fn fifo(depth: u32, width: u32) -> Result<Module, PrimitiveError> {
    check_width("fifo", width, 64)?;
    check_depth("fifo", depth)?;
    if depth < 2 || !depth.is_power_of_two() {
        return Err(invalid("fifo", format!("depth {depth} is not a power of two of at least 2")));
    }
    let pw = depth.trailing_zeros();
    let cw = bits_for(u64::from(depth));
    let mut m = ModuleBuilder::new("fifo");
    let clk = m.input("clk", 1);
    let rst = m.input("rst", 1);
    let push = Expr::sig(m.input("push", 1));
    let pop = Expr::sig(m.input("pop", 1));
    let din = Expr::sig(m.input("din", width));
    let dout = m.output("dout", width);
    let empty = m.output("empty", 1);
    let full = m.output("full", 1);
    let count = m.output("count", cw);
    let wr_ptr = m.wire("wr_ptr", pw);
    let rd_ptr = m.wire("rd_ptr", pw);

    m.assign(empty, Expr::sig(count).eq(Expr::lit(0, cw)));
    m.assign(full, Expr::sig(count).eq(Expr::lit(u64::from(depth), cw)));
    let do_push = Expr::sig(m.node("do_push", 1, push.and(Expr::sig(full).not())));
    let do_pop = Expr::sig(m.node("do_pop", 1, pop.and(Expr::sig(empty).not())));

    for (ptr, step) in [(wr_ptr, &do_push), (rd_ptr, &do_pop)] {
        m.register(
            Register::new(ptr, clk, Expr::sig(ptr).add(Expr::lit(1, pw)))
                .with_enable(step.clone())
                .with_sync_reset(rst, 0),
        );
    }
    m.register(
        Register::new(
            count,
            clk,
            Expr::sig(count)
                .add(do_push.clone().resize(cw))
                .sub(do_pop.resize(cw)),
        )
        .with_sync_reset(rst, 0),
    );

    let buf = m.memory("buf", depth, width);
    m.write_port(buf, clk, Expr::sig(wr_ptr), din, do_push);
    m.async_read(buf, Expr::sig(rd_ptr), dout);
    Ok(m.finish())
}

/// A last-in first-out stack of `depth` words.
///
/// Inputs `clk`, `rst` (synchronous), `push`, `pop`, `din`; outputs `top`
/// (zero when empty), `empty`, `full` and `size`. Pushing and popping in
/// the same cycle leaves the stack unchanged.
pub fn stack(depth: u32, width: u32) -> Result<Module, PrimitiveError> {
    check_width("stack", width, 64)?;
    check_depth("stack", depth)?;
    let sw = bits_for(u64::from(depth));
    let mut m = ModuleBuilder::new("stack");
    let clk = m.input("clk", 1);
    let rst = m.input("rst", 1);
    let push = Expr::sig(m.input("push", 1));
    let pop = Expr::sig(m.input("pop", 1));
    let din = Expr::sig(m.input("din", width));
    let top = m.output("top", width);
    let empty = m.output("empty", 1);
    let full = m.output("full", 1);
    let size = m.output("size", sw);

    m.assign(empty, Expr::sig(size).eq(Expr::lit(0, sw)));
    m.assign(full, Expr::sig(size).eq(Expr::lit(u64::from(depth), sw)));
    let do_push = Expr::sig(m.node(
        "do_push",
        1,
        push.clone()
            .and(pop.clone().not())
            .and(Expr::sig(full).not()),
    ));
    let do_pop = Expr::sig(m.node(
        "do_pop",
        1,
        pop.and(push.not()).and(Expr::sig(empty).not()),
    ));
    let one = Expr::lit(1, sw);
    m.register(
        Register::new(
            size,
            clk,
            Expr::mux(
                do_push.clone(),
                Expr::sig(size).add(one.clone()),
                Expr::sig(size).sub(one.clone()),
            ),
        )
        .with_enable(do_push.clone().or(do_pop))
        .with_sync_reset(rst, 0),
    );

    // Below zero the address wraps past the last word and reads as zero.
    let words = m.memory("words", depth, width);
    m.write_port(words, clk, Expr::sig(size), din, do_push);
    m.async_read(words, Expr::sig(size).sub(one), top);
    Ok(m.finish())
}
