use crate::error::SimResult;
use crate::parse::hdl::{ChipDef, Port};
use crate::simulators::hdl::chip::{Chip, PinFn, PinMap, SeqState};

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Catalog entry for one built-in chip: its interface, evaluator, optional
/// clock functions and the shape of its private state.
pub struct BuiltinChip {
    pub def: ChipDef,
    pub eval: PinFn,
    pub tick: Option<PinFn>,
    pub tock: Option<PinFn>,
    state_shape: (usize, usize),
}

impl BuiltinChip {
    pub fn instantiate(&self) -> Chip {
        let (regs, pending) = self.state_shape;
        Chip::builtin(
            self.def.clone(),
            self.eval,
            self.tick,
            self.tock,
            SeqState::with_shape(regs, pending),
        )
    }

    pub fn is_clocked(&self) -> bool {
        self.tick.is_some()
    }
}

fn make_def(
    name: &str,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    clocked_pins: Vec<&str>,
) -> ChipDef {
    ChipDef {
        name: name.to_string(),
        inputs,
        outputs,
        is_builtin: true,
        clocked_pins: clocked_pins.into_iter().map(str::to_string).collect(),
        parts: Vec::new(),
    }
}

fn pin1(name: &str) -> Port {
    Port::new(name, 1)
}

fn pin16(name: &str) -> Port {
    Port::new(name, 16)
}

// =============================================================================
// Combinational gates
// =============================================================================

fn eval_nand(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", if a & b != 0 { 0 } else { 1 })
}

fn eval_not(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let input = pins.get("in")?;
    pins.set("out", if input != 0 { 0 } else { 1 })
}

fn eval_and(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a & b) & 1)
}

fn eval_or(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a | b) & 1)
}

fn eval_xor(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a ^ b) & 1)
}

fn eval_mux(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    let sel = pins.get("sel")?;
    pins.set("out", if sel != 0 { b } else { a })
}

fn eval_dmux(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let input = pins.get("in")?;
    let sel = pins.get("sel")?;
    pins.set("a", if sel != 0 { 0 } else { input })?;
    pins.set("b", if sel != 0 { input } else { 0 })
}

// =============================================================================
// 16-bit variants
// =============================================================================

fn eval_not16(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let input = pins.get("in")?;
    pins.set("out", !input & 0xFFFF)
}

fn eval_and16(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a & b) & 0xFFFF)
}

fn eval_or16(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a | b) & 0xFFFF)
}

fn eval_mux16(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    let sel = pins.get("sel")?;
    pins.set("out", if sel != 0 { b } else { a } & 0xFFFF)
}

// =============================================================================
// Multi-way
// =============================================================================

fn eval_or8way(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let input = pins.get("in")?;
    pins.set("out", if input & 0xFF != 0 { 1 } else { 0 })
}

fn eval_mux4way16(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let sel = pins.get("sel")? & 3;
    let value = match sel {
        0 => pins.get("a")?,
        1 => pins.get("b")?,
        2 => pins.get("c")?,
        _ => pins.get("d")?,
    };
    pins.set("out", value & 0xFFFF)
}

fn eval_mux8way16(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let sel = (pins.get("sel")? & 7) as usize;
    let value = pins.get(NAMES[sel])?;
    pins.set("out", value & 0xFFFF)
}

fn eval_dmux4way(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    const NAMES: [&str; 4] = ["a", "b", "c", "d"];
    let input = pins.get("in")?;
    let sel = (pins.get("sel")? & 3) as usize;
    for (i, name) in NAMES.iter().enumerate() {
        pins.set(name, if i == sel { input } else { 0 })?;
    }
    Ok(())
}

fn eval_dmux8way(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let input = pins.get("in")?;
    let sel = (pins.get("sel")? & 7) as usize;
    for (i, name) in NAMES.iter().enumerate() {
        pins.set(name, if i == sel { input } else { 0 })?;
    }
    Ok(())
}

// =============================================================================
// Arithmetic
// =============================================================================

fn eval_half_adder(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("sum", (a ^ b) & 1)?;
    pins.set("carry", (a & b) & 1)
}

fn eval_full_adder(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    let c = pins.get("c")?;
    let sum = a + b + c;
    pins.set("sum", sum & 1)?;
    pins.set("carry", (sum >> 1) & 1)
}

fn eval_add16(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a + b) & 0xFFFF)
}

fn eval_inc16(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let input = pins.get("in")?;
    pins.set("out", (input + 1) & 0xFFFF)
}

// =============================================================================
// ALU
// =============================================================================

fn eval_alu(pins: &mut PinMap, _: &mut SeqState) -> SimResult {
    let mut x = pins.get("x")?;
    let mut y = pins.get("y")?;

    if pins.get("zx")? != 0 {
        x = 0;
    }
    if pins.get("nx")? != 0 {
        x = !x & 0xFFFF;
    }
    if pins.get("zy")? != 0 {
        y = 0;
    }
    if pins.get("ny")? != 0 {
        y = !y & 0xFFFF;
    }

    let mut out = if pins.get("f")? != 0 {
        (x + y) & 0xFFFF
    } else {
        (x & y) & 0xFFFF
    };

    if pins.get("no")? != 0 {
        out = !out & 0xFFFF;
    }

    pins.set("out", out)?;
    pins.set("zr", if out == 0 { 1 } else { 0 })?;
    pins.set("ng", if (out as u16 as i16) < 0 { 1 } else { 0 })
}

// =============================================================================
// Sequential chips
// =============================================================================

fn eval_dff(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    pins.set("out", state.regs[0])
}

fn tick_dff(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    state.pending[0] = pins.get("in")? & 1;
    Ok(())
}

fn tock_dff(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    state.regs[0] = state.pending[0];
    pins.set("out", state.regs[0])
}

fn tick_bit(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    state.pending[0] = if pins.get("load")? != 0 {
        pins.get("in")? & 1
    } else {
        state.regs[0]
    };
    Ok(())
}

fn tick_register(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    state.pending[0] = if pins.get("load")? != 0 {
        pins.get("in")? & 0xFFFF
    } else {
        state.regs[0]
    };
    Ok(())
}

fn eval_ram(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    let mask = state.regs.len() as i64 - 1;
    let address = (pins.get("address")? & mask) as usize;
    pins.set("out", state.regs[address])
}

fn tick_ram(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    state.pending[0] = pins.get("load")?;
    state.pending[1] = pins.get("address")? & (state.regs.len() as i64 - 1);
    state.pending[2] = pins.get("in")? & 0xFFFF;
    Ok(())
}

fn tock_ram(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    if state.pending[0] != 0 {
        let address = state.pending[1] as usize;
        state.regs[address] = state.pending[2];
    }
    eval_ram(pins, state)
}

fn eval_pc(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    pins.set("out", state.regs[0])
}

/// Priority: reset > load > inc > hold.
fn tick_pc(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    state.pending[0] = if pins.get("reset")? != 0 {
        0
    } else if pins.get("load")? != 0 {
        pins.get("in")? & 0xFFFF
    } else if pins.get("inc")? != 0 {
        (state.regs[0] + 1) & 0xFFFF
    } else {
        state.regs[0]
    };
    Ok(())
}

fn tock_pc(pins: &mut PinMap, state: &mut SeqState) -> SimResult {
    state.regs[0] = state.pending[0];
    pins.set("out", state.regs[0])
}

// =============================================================================
// Registry
// =============================================================================

lazy_static! {
    /// The immutable built-in catalog, loaded once.
    pub static ref BUILTINS: HashMap<&'static str, BuiltinChip> = {
        let mut registry = HashMap::new();

        let mut comb = |name: &'static str, inputs: Vec<Port>, outputs: Vec<Port>, eval: PinFn| {
            registry.insert(
                name,
                BuiltinChip {
                    def: make_def(name, inputs, outputs, vec![]),
                    eval,
                    tick: None,
                    tock: None,
                    state_shape: (0, 0),
                },
            );
        };

        // primitive
        comb("Nand", vec![pin1("a"), pin1("b")], vec![pin1("out")], eval_nand);

        // basic gates
        comb("Not", vec![pin1("in")], vec![pin1("out")], eval_not);
        comb("And", vec![pin1("a"), pin1("b")], vec![pin1("out")], eval_and);
        comb("Or", vec![pin1("a"), pin1("b")], vec![pin1("out")], eval_or);
        comb("Xor", vec![pin1("a"), pin1("b")], vec![pin1("out")], eval_xor);
        comb(
            "Mux",
            vec![pin1("a"), pin1("b"), pin1("sel")],
            vec![pin1("out")],
            eval_mux,
        );
        comb(
            "DMux",
            vec![pin1("in"), pin1("sel")],
            vec![pin1("a"), pin1("b")],
            eval_dmux,
        );

        // 16-bit variants
        comb("Not16", vec![pin16("in")], vec![pin16("out")], eval_not16);
        comb("And16", vec![pin16("a"), pin16("b")], vec![pin16("out")], eval_and16);
        comb("Or16", vec![pin16("a"), pin16("b")], vec![pin16("out")], eval_or16);
        comb(
            "Mux16",
            vec![pin16("a"), pin16("b"), pin1("sel")],
            vec![pin16("out")],
            eval_mux16,
        );

        // multi-way
        comb("Or8Way", vec![Port::new("in", 8)], vec![pin1("out")], eval_or8way);
        comb(
            "Mux4Way16",
            vec![pin16("a"), pin16("b"), pin16("c"), pin16("d"), Port::new("sel", 2)],
            vec![pin16("out")],
            eval_mux4way16,
        );
        comb(
            "Mux8Way16",
            vec![
                pin16("a"), pin16("b"), pin16("c"), pin16("d"),
                pin16("e"), pin16("f"), pin16("g"), pin16("h"),
                Port::new("sel", 3),
            ],
            vec![pin16("out")],
            eval_mux8way16,
        );
        comb(
            "DMux4Way",
            vec![pin1("in"), Port::new("sel", 2)],
            vec![pin1("a"), pin1("b"), pin1("c"), pin1("d")],
            eval_dmux4way,
        );
        comb(
            "DMux8Way",
            vec![pin1("in"), Port::new("sel", 3)],
            vec![
                pin1("a"), pin1("b"), pin1("c"), pin1("d"),
                pin1("e"), pin1("f"), pin1("g"), pin1("h"),
            ],
            eval_dmux8way,
        );

        // arithmetic
        comb(
            "HalfAdder",
            vec![pin1("a"), pin1("b")],
            vec![pin1("sum"), pin1("carry")],
            eval_half_adder,
        );
        comb(
            "FullAdder",
            vec![pin1("a"), pin1("b"), pin1("c")],
            vec![pin1("sum"), pin1("carry")],
            eval_full_adder,
        );
        comb("Add16", vec![pin16("a"), pin16("b")], vec![pin16("out")], eval_add16);
        comb("Inc16", vec![pin16("in")], vec![pin16("out")], eval_inc16);

        // ALU
        comb(
            "ALU",
            vec![
                pin16("x"), pin16("y"),
                pin1("zx"), pin1("nx"), pin1("zy"), pin1("ny"),
                pin1("f"), pin1("no"),
            ],
            vec![pin16("out"), pin1("zr"), pin1("ng")],
            eval_alu,
        );

        let mut seq = |name: &'static str,
                       inputs: Vec<Port>,
                       outputs: Vec<Port>,
                       clocked: Vec<&str>,
                       eval: PinFn,
                       tick: PinFn,
                       tock: PinFn,
                       state_shape: (usize, usize)| {
            registry.insert(
                name,
                BuiltinChip {
                    def: make_def(name, inputs, outputs, clocked),
                    eval,
                    tick: Some(tick),
                    tock: Some(tock),
                    state_shape,
                },
            );
        };

        seq(
            "DFF",
            vec![pin1("in")],
            vec![pin1("out")],
            vec!["in"],
            eval_dff,
            tick_dff,
            tock_dff,
            (1, 1),
        );
        seq(
            "Bit",
            vec![pin1("in"), pin1("load")],
            vec![pin1("out")],
            vec!["in", "load"],
            eval_dff,
            tick_bit,
            tock_dff,
            (1, 1),
        );
        seq(
            "Register",
            vec![pin16("in"), pin1("load")],
            vec![pin16("out")],
            vec!["in", "load"],
            eval_dff,
            tick_register,
            tock_dff,
            (1, 1),
        );

        for (name, bits) in [
            ("RAM8", 3usize),
            ("RAM64", 6),
            ("RAM512", 9),
            ("RAM4K", 12),
            ("RAM16K", 14),
        ] {
            seq(
                name,
                vec![pin16("in"), pin1("load"), Port::new("address", bits as u8)],
                vec![pin16("out")],
                vec!["in", "load"],
                eval_ram,
                tick_ram,
                tock_ram,
                (1 << bits, 3),
            );
        }

        seq(
            "PC",
            vec![pin16("in"), pin1("load"), pin1("inc"), pin1("reset")],
            vec![pin16("out")],
            vec!["in", "load", "inc", "reset"],
            eval_pc,
            tick_pc,
            tock_pc,
            (1, 1),
        );

        registry
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(name: &str) -> Chip {
        BUILTINS.get(name).unwrap().instantiate()
    }

    #[test]
    fn test_nand_truth_table() {
        let mut chip = make("Nand");
        for (a, b, expected) in [(0, 0, 1), (0, 1, 1), (1, 0, 1), (1, 1, 0)] {
            chip.set_pin("a", a).unwrap();
            chip.set_pin("b", b).unwrap();
            chip.eval().unwrap();
            assert_eq!(expected, chip.get_pin("out").unwrap(), "Nand({}, {})", a, b);
        }
    }

    #[test]
    fn test_add16_wraps() {
        let mut chip = make("Add16");
        chip.set_pin("a", 0xFFFF).unwrap();
        chip.set_pin("b", 1).unwrap();
        chip.eval().unwrap();
        assert_eq!(0, chip.get_pin("out").unwrap());
    }

    #[test]
    fn test_inc16_wraps() {
        let mut chip = make("Inc16");
        chip.set_pin("in", 0xFFFF).unwrap();
        chip.eval().unwrap();
        assert_eq!(0, chip.get_pin("out").unwrap());
    }

    #[test]
    fn test_alu_minus_one_sets_ng() {
        let mut chip = make("ALU");
        // zx=1,nx=1 turn x into !0 = 0xFFFF; zy=1,ny=0 leave y at 0;
        // f=1 adds them
        chip.set_pin("x", 1234).unwrap();
        chip.set_pin("y", 4321).unwrap();
        chip.set_pin("zx", 1).unwrap();
        chip.set_pin("nx", 1).unwrap();
        chip.set_pin("zy", 1).unwrap();
        chip.set_pin("ny", 0).unwrap();
        chip.set_pin("f", 1).unwrap();
        chip.set_pin("no", 0).unwrap();
        chip.eval().unwrap();

        assert_eq!(0xFFFF, chip.get_pin("out").unwrap());
        assert_eq!(1, chip.get_pin("ng").unwrap());
        assert_eq!(0, chip.get_pin("zr").unwrap());
    }

    #[test]
    fn test_alu_zero_sets_zr() {
        let mut chip = make("ALU");
        chip.set_pin("zx", 1).unwrap();
        chip.set_pin("zy", 1).unwrap();
        chip.set_pin("f", 1).unwrap();
        chip.eval().unwrap();

        assert_eq!(0, chip.get_pin("out").unwrap());
        assert_eq!(1, chip.get_pin("zr").unwrap());
        assert_eq!(0, chip.get_pin("ng").unwrap());
    }

    #[test]
    fn test_dmux4way_sel_2_asserts_only_c() {
        let mut chip = make("DMux4Way");
        chip.set_pin("in", 1).unwrap();
        chip.set_pin("sel", 2).unwrap();
        chip.eval().unwrap();

        assert_eq!(0, chip.get_pin("a").unwrap());
        assert_eq!(0, chip.get_pin("b").unwrap());
        assert_eq!(1, chip.get_pin("c").unwrap());
        assert_eq!(0, chip.get_pin("d").unwrap());
    }

    #[test]
    fn test_dff_delays_by_one_cycle() {
        let mut chip = make("DFF");
        chip.set_pin("in", 1).unwrap();
        chip.eval().unwrap();
        // combinational eval must not move state
        assert_eq!(0, chip.get_pin("out").unwrap());

        chip.tick().unwrap();
        assert_eq!(0, chip.get_pin("out").unwrap());
        chip.tock().unwrap();
        assert_eq!(1, chip.get_pin("out").unwrap());

        chip.set_pin("in", 0).unwrap();
        chip.tick().unwrap();
        chip.tock().unwrap();
        assert_eq!(0, chip.get_pin("out").unwrap());
    }

    #[test]
    fn test_bit_holds_without_load() {
        let mut chip = make("Bit");
        chip.set_pin("in", 1).unwrap();
        chip.set_pin("load", 1).unwrap();
        chip.tick().unwrap();
        chip.tock().unwrap();
        assert_eq!(1, chip.get_pin("out").unwrap());

        chip.set_pin("in", 0).unwrap();
        chip.set_pin("load", 0).unwrap();
        chip.tick().unwrap();
        chip.tock().unwrap();
        assert_eq!(1, chip.get_pin("out").unwrap());
    }

    #[test]
    fn test_register_is_16_bit() {
        let mut chip = make("Register");
        chip.set_pin("in", 0x1234).unwrap();
        chip.set_pin("load", 1).unwrap();
        chip.tick().unwrap();
        chip.tock().unwrap();
        assert_eq!(0x1234, chip.get_pin("out").unwrap());
    }

    #[test]
    fn test_ram8_write_and_read() {
        let mut chip = make("RAM8");
        chip.set_pin("in", 77).unwrap();
        chip.set_pin("address", 3).unwrap();
        chip.set_pin("load", 1).unwrap();
        chip.tick().unwrap();
        chip.tock().unwrap();
        assert_eq!(77, chip.get_pin("out").unwrap());

        // combinational read at a different address
        chip.set_pin("load", 0).unwrap();
        chip.set_pin("address", 0).unwrap();
        chip.eval().unwrap();
        assert_eq!(0, chip.get_pin("out").unwrap());

        chip.set_pin("address", 3).unwrap();
        chip.eval().unwrap();
        assert_eq!(77, chip.get_pin("out").unwrap());
    }

    #[test]
    fn test_pc_priority_reset_load_inc() {
        let mut chip = make("PC");

        // inc from 0
        chip.set_pin("inc", 1).unwrap();
        chip.tick().unwrap();
        chip.tock().unwrap();
        assert_eq!(1, chip.get_pin("out").unwrap());

        // load wins over inc
        chip.set_pin("in", 100).unwrap();
        chip.set_pin("load", 1).unwrap();
        chip.tick().unwrap();
        chip.tock().unwrap();
        assert_eq!(100, chip.get_pin("out").unwrap());

        // reset wins over everything
        chip.set_pin("reset", 1).unwrap();
        chip.tick().unwrap();
        chip.tock().unwrap();
        assert_eq!(0, chip.get_pin("out").unwrap());

        // hold
        chip.set_pin("reset", 0).unwrap();
        chip.set_pin("load", 0).unwrap();
        chip.set_pin("inc", 0).unwrap();
        chip.tick().unwrap();
        chip.tock().unwrap();
        assert_eq!(0, chip.get_pin("out").unwrap());
    }

    #[test]
    fn test_sequential_out_after_tock_equals_sample_at_tick() {
        let mut chip = make("Register");
        chip.set_pin("in", 555).unwrap();
        chip.set_pin("load", 1).unwrap();
        chip.tick().unwrap();

        // changing the input after tick must not affect the committed value
        chip.set_pin("in", 999).unwrap();
        chip.tock().unwrap();
        assert_eq!(555, chip.get_pin("out").unwrap());
    }
}
