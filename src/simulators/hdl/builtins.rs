//! Built-in chip registry: the combinational gates and arithmetic chips of
//! projects 01-02 plus the clocked primitives of project 03.
//!
//! The registry is a process-wide read-only table, initialized once on first
//! use. Instantiation hands out fresh chip instances, so every part gets its
//! own sequential state.

use super::chip::{Chip, PinStore, SequentialState};
use crate::error::SimResult;
use crate::parse::hdl::{ChipDef, Port};
use lazy_static::lazy_static;
use std::collections::HashMap;

enum BuiltinKind {
    Combinational(fn(&mut PinStore) -> SimResult),
    Dff,
    Bit,
    Register,
    Ram(u8),
    Pc,
}

struct BuiltinSpec {
    def: ChipDef,
    kind: BuiltinKind,
}

fn pin1(name: &str) -> Port {
    Port::new(name, 1)
}

fn pin16(name: &str) -> Port {
    Port::new(name, 16)
}

fn make_def(name: &str, inputs: Vec<Port>, outputs: Vec<Port>) -> ChipDef {
    ChipDef {
        name: name.to_string(),
        inputs,
        outputs,
        parts: Vec::new(),
        is_builtin: true,
        clocked_pins: Vec::new(),
    }
}

fn make_clocked_def(
    name: &str,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    clocked: &[&str],
) -> ChipDef {
    let mut def = make_def(name, inputs, outputs);
    def.clocked_pins = clocked.iter().map(|s| s.to_string()).collect();
    def
}

// combinational evaluators

fn eval_nand(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", if a & b & 1 != 0 { 0 } else { 1 })
}

fn eval_not(pins: &mut PinStore) -> SimResult {
    let input = pins.get("in")?;
    pins.set("out", if input & 1 != 0 { 0 } else { 1 })
}

fn eval_and(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", a & b & 1)
}

fn eval_or(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a | b) & 1)
}

fn eval_xor(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a ^ b) & 1)
}

fn eval_mux(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    let sel = pins.get("sel")?;
    pins.set("out", if sel & 1 != 0 { b & 1 } else { a & 1 })
}

fn eval_dmux(pins: &mut PinStore) -> SimResult {
    let input = pins.get("in")?;
    let sel = pins.get("sel")?;
    pins.set("a", if sel & 1 != 0 { 0 } else { input & 1 })?;
    pins.set("b", if sel & 1 != 0 { input & 1 } else { 0 })
}

fn eval_not16(pins: &mut PinStore) -> SimResult {
    let input = pins.get("in")?;
    pins.set("out", !input & 0xFFFF)
}

fn eval_and16(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", a & b & 0xFFFF)
}

fn eval_or16(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a | b) & 0xFFFF)
}

fn eval_mux16(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    let sel = pins.get("sel")?;
    pins.set("out", if sel & 1 != 0 { b } else { a } & 0xFFFF)
}

fn eval_or8way(pins: &mut PinStore) -> SimResult {
    let input = pins.get("in")?;
    pins.set("out", if input & 0xFF != 0 { 1 } else { 0 })
}

fn eval_mux4way16(pins: &mut PinStore) -> SimResult {
    let sel = pins.get("sel")? & 3;
    let value = match sel {
        0 => pins.get("a")?,
        1 => pins.get("b")?,
        2 => pins.get("c")?,
        _ => pins.get("d")?,
    };
    pins.set("out", value & 0xFFFF)
}

fn eval_mux8way16(pins: &mut PinStore) -> SimResult {
    const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let sel = pins.get("sel")? as usize & 7;
    let value = pins.get(NAMES[sel])?;
    pins.set("out", value & 0xFFFF)
}

fn eval_dmux4way(pins: &mut PinStore) -> SimResult {
    const NAMES: [&str; 4] = ["a", "b", "c", "d"];
    let input = pins.get("in")? & 1;
    let sel = pins.get("sel")? as usize & 3;
    for (i, name) in NAMES.iter().enumerate() {
        pins.set(name, if i == sel { input } else { 0 })?;
    }
    Ok(())
}

fn eval_dmux8way(pins: &mut PinStore) -> SimResult {
    const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let input = pins.get("in")? & 1;
    let sel = pins.get("sel")? as usize & 7;
    for (i, name) in NAMES.iter().enumerate() {
        pins.set(name, if i == sel { input } else { 0 })?;
    }
    Ok(())
}

fn eval_half_adder(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")? & 1;
    let b = pins.get("b")? & 1;
    pins.set("sum", a ^ b)?;
    pins.set("carry", a & b)
}

fn eval_full_adder(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")? & 1;
    let b = pins.get("b")? & 1;
    let c = pins.get("c")? & 1;
    let s = a + b + c;
    pins.set("sum", s & 1)?;
    pins.set("carry", (s >> 1) & 1)
}

fn eval_add16(pins: &mut PinStore) -> SimResult {
    let a = pins.get("a")?;
    let b = pins.get("b")?;
    pins.set("out", (a + b) & 0xFFFF)
}

fn eval_inc16(pins: &mut PinStore) -> SimResult {
    let input = pins.get("in")?;
    pins.set("out", (input + 1) & 0xFFFF)
}

fn eval_alu(pins: &mut PinStore) -> SimResult {
    let mut x = pins.get("x")? & 0xFFFF;
    let mut y = pins.get("y")? & 0xFFFF;

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
        x & y
    };

    if pins.get("no")? != 0 {
        out = !out & 0xFFFF;
    }

    pins.set("out", out)?;
    pins.set("zr", if out == 0 { 1 } else { 0 })?;
    pins.set("ng", if out & 0x8000 != 0 { 1 } else { 0 })
}

lazy_static! {
    static ref REGISTRY: HashMap<&'static str, BuiltinSpec> = {
        let mut registry = HashMap::new();

        let mut comb = |name: &'static str,
                        inputs: Vec<Port>,
                        outputs: Vec<Port>,
                        f: fn(&mut PinStore) -> SimResult| {
            registry.insert(
                name,
                BuiltinSpec {
                    def: make_def(name, inputs, outputs),
                    kind: BuiltinKind::Combinational(f),
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
                pin16("a"),
                pin16("b"),
                pin16("c"),
                pin16("d"),
                pin16("e"),
                pin16("f"),
                pin16("g"),
                pin16("h"),
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
                pin1("a"),
                pin1("b"),
                pin1("c"),
                pin1("d"),
                pin1("e"),
                pin1("f"),
                pin1("g"),
                pin1("h"),
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

        comb(
            "ALU",
            vec![
                pin16("x"),
                pin16("y"),
                pin1("zx"),
                pin1("nx"),
                pin1("zy"),
                pin1("ny"),
                pin1("f"),
                pin1("no"),
            ],
            vec![pin16("out"), pin1("zr"), pin1("ng")],
            eval_alu,
        );

        // sequential
        registry.insert(
            "DFF",
            BuiltinSpec {
                def: make_clocked_def("DFF", vec![pin1("in")], vec![pin1("out")], &["in"]),
                kind: BuiltinKind::Dff,
            },
        );
        registry.insert(
            "Bit",
            BuiltinSpec {
                def: make_clocked_def(
                    "Bit",
                    vec![pin1("in"), pin1("load")],
                    vec![pin1("out")],
                    &["in", "load"],
                ),
                kind: BuiltinKind::Bit,
            },
        );
        registry.insert(
            "Register",
            BuiltinSpec {
                def: make_clocked_def(
                    "Register",
                    vec![pin16("in"), pin1("load")],
                    vec![pin16("out")],
                    &["in", "load"],
                ),
                kind: BuiltinKind::Register,
            },
        );

        for (name, bits) in [
            ("RAM8", 3u8),
            ("RAM64", 6),
            ("RAM512", 9),
            ("RAM4K", 12),
            ("RAM16K", 14),
        ] {
            registry.insert(
                name,
                BuiltinSpec {
                    def: make_clocked_def(
                        name,
                        vec![pin16("in"), pin1("load"), Port::new("address", bits)],
                        vec![pin16("out")],
                        &["in", "load", "address"],
                    ),
                    kind: BuiltinKind::Ram(bits),
                },
            );
        }

        registry.insert(
            "PC",
            BuiltinSpec {
                def: make_clocked_def(
                    "PC",
                    vec![pin16("in"), pin1("load"), pin1("inc"), pin1("reset")],
                    vec![pin16("out")],
                    &["in", "load", "inc", "reset"],
                ),
                kind: BuiltinKind::Pc,
            },
        );

        registry
    };
}

/// true if the name is a builtin chip
pub fn is_builtin(name: &str) -> bool {
    REGISTRY.contains_key(name)
}

/// Create a fresh instance of a builtin chip.
pub fn instantiate(name: &str) -> Option<Chip> {
    let spec = REGISTRY.get(name)?;
    let chip = match &spec.kind {
        BuiltinKind::Combinational(f) => Chip::combinational(spec.def.clone(), *f),
        BuiltinKind::Dff => Chip::sequential(spec.def.clone(), SequentialState::dff()),
        BuiltinKind::Bit => Chip::sequential(spec.def.clone(), SequentialState::bit()),
        BuiltinKind::Register => Chip::sequential(spec.def.clone(), SequentialState::register()),
        BuiltinKind::Ram(bits) => Chip::sequential(spec.def.clone(), SequentialState::ram(*bits)),
        BuiltinKind::Pc => Chip::sequential(spec.def.clone(), SequentialState::pc()),
    };
    Some(chip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_required_builtins_exist() {
        let names = [
            "Nand", "Not", "And", "Or", "Xor", "Mux", "DMux", "Not16", "And16", "Or16", "Mux16",
            "Or8Way", "Mux4Way16", "Mux8Way16", "DMux4Way", "DMux8Way", "HalfAdder", "FullAdder",
            "Add16", "Inc16", "ALU", "DFF", "Bit", "Register", "RAM8", "RAM64", "RAM512", "RAM4K",
            "RAM16K", "PC",
        ];
        for name in names {
            assert!(is_builtin(name), "missing builtin {}", name);
            assert!(instantiate(name).is_some());
        }
        assert!(!is_builtin("CPU"));
    }

    #[test]
    fn test_nand_truth_table() {
        let mut chip = instantiate("Nand").unwrap();
        for (a, b, out) in [(0, 0, 1), (0, 1, 1), (1, 0, 1), (1, 1, 0)] {
            chip.set_pin("a", a).unwrap();
            chip.set_pin("b", b).unwrap();
            chip.eval().unwrap();
            assert_eq!(Ok(out), chip.get_pin("out"));
        }
    }

    #[test]
    fn test_mux_and_dmux() {
        let mut mux = instantiate("Mux").unwrap();
        mux.set_pin("a", 1).unwrap();
        mux.set_pin("b", 0).unwrap();
        mux.set_pin("sel", 0).unwrap();
        mux.eval().unwrap();
        assert_eq!(Ok(1), mux.get_pin("out"));
        mux.set_pin("sel", 1).unwrap();
        mux.eval().unwrap();
        assert_eq!(Ok(0), mux.get_pin("out"));

        let mut dmux = instantiate("DMux").unwrap();
        dmux.set_pin("in", 1).unwrap();
        dmux.set_pin("sel", 1).unwrap();
        dmux.eval().unwrap();
        assert_eq!(Ok(0), dmux.get_pin("a"));
        assert_eq!(Ok(1), dmux.get_pin("b"));
    }

    #[test]
    fn test_mux8way16_selects_each_input() {
        let mut chip = instantiate("Mux8Way16").unwrap();
        const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];
        for (i, name) in NAMES.iter().enumerate() {
            chip.set_pin(name, (i as i64 + 1) * 100).unwrap();
        }
        for i in 0..8 {
            chip.set_pin("sel", i).unwrap();
            chip.eval().unwrap();
            assert_eq!(Ok((i + 1) * 100), chip.get_pin("out"));
        }
    }

    #[test]
    fn test_add16_wraps() {
        let mut chip = instantiate("Add16").unwrap();
        chip.set_pin("a", 0xFFFF).unwrap();
        chip.set_pin("b", 1).unwrap();
        chip.eval().unwrap();
        assert_eq!(Ok(0), chip.get_pin("out"));
    }

    #[test]
    fn test_alu_neg_one_and_zero() {
        let mut alu = instantiate("ALU").unwrap();
        alu.set_pin("x", 1234).unwrap();
        alu.set_pin("y", 4321).unwrap();

        // zx=1 nx=1 zy=1 ny=0 f=1 no=0 computes -1
        for (pin, val) in [("zx", 1), ("nx", 1), ("zy", 1), ("ny", 0), ("f", 1), ("no", 0)] {
            alu.set_pin(pin, val).unwrap();
        }
        alu.eval().unwrap();
        assert_eq!(Ok(0xFFFF), alu.get_pin("out"));
        assert_eq!(Ok(0), alu.get_pin("zr"));
        assert_eq!(Ok(1), alu.get_pin("ng"));

        // zx=1 nx=0 zy=1 ny=0 f=1 no=0 computes 0
        alu.set_pin("nx", 0).unwrap();
        alu.eval().unwrap();
        assert_eq!(Ok(0), alu.get_pin("out"));
        assert_eq!(Ok(1), alu.get_pin("zr"));
        assert_eq!(Ok(0), alu.get_pin("ng"));
    }

    #[test]
    fn test_alu_add_and_and() {
        let mut alu = instantiate("ALU").unwrap();
        for pin in ["zx", "nx", "zy", "ny", "no"] {
            alu.set_pin(pin, 0).unwrap();
        }
        alu.set_pin("x", 0b1100).unwrap();
        alu.set_pin("y", 0b1010).unwrap();

        alu.set_pin("f", 1).unwrap();
        alu.eval().unwrap();
        assert_eq!(Ok(0b10110), alu.get_pin("out"));

        alu.set_pin("f", 0).unwrap();
        alu.eval().unwrap();
        assert_eq!(Ok(0b1000), alu.get_pin("out"));
    }

    #[test]
    fn test_ram_sizes() {
        for (name, size) in [("RAM8", 8i64), ("RAM64", 64), ("RAM16K", 16384)] {
            let mut ram = instantiate(name).unwrap();
            ram.set_pin("address", size - 1).unwrap();
            ram.set_pin("in", 7).unwrap();
            ram.set_pin("load", 1).unwrap();
            ram.tick().unwrap();
            ram.tock().unwrap();
            assert_eq!(Ok(7), ram.get_pin("out"), "{}", name);
        }
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let mut first = instantiate("Register").unwrap();
        let second = instantiate("Register").unwrap();

        first.set_pin("in", 99).unwrap();
        first.set_pin("load", 1).unwrap();
        first.tick().unwrap();
        first.tock().unwrap();

        assert_eq!(Ok(99), first.get_pin("out"));
        assert_eq!(Ok(0), second.get_pin("out"));
    }
}
