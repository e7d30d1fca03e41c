pub mod builtins;
pub mod chip;
pub mod tst;

use crate::error::{SimError, SimResult};
use crate::parse::hdl::{ChipDef, HdlParser};
use crate::parse::tst::parse_script;
use crate::simulators::ExecState;
use builtins::BUILTINS;
use chip::{Chip, Resolve};
use tst::TstRunner;

use log::debug;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HdlStats {
    pub eval_count: u64,
    pub output_rows: u64,
}

impl HdlStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Orchestrates HDL simulation: chip definitions, instance construction
/// through the resolver chain (builtins, loaded definitions, search
/// paths), direct pin manipulation, and .tst script execution.
pub struct HdlEngine {
    chip_defs: HashMap<String, ChipDef>,
    chip: Option<Chip>,
    search_paths: Vec<PathBuf>,
    state: ExecState,
    stats: HdlStats,
    error_message: String,
    output_table: String,
}

impl Default for HdlEngine {
    fn default() -> Self {
        Self {
            chip_defs: HashMap::new(),
            chip: None,
            search_paths: Vec::new(),
            state: ExecState::Ready,
            stats: HdlStats::default(),
            error_message: String::new(),
            output_table: String::new(),
        }
    }
}

impl Resolve for HdlEngine {
    /// Resolution order: builtin catalog, already-loaded definitions, then
    /// .hdl files on the search paths (parsed and cached transitively).
    fn resolve(&mut self, name: &str) -> SimResult<Option<Chip>> {
        if let Some(builtin) = BUILTINS.get(name) {
            return Ok(Some(builtin.instantiate()));
        }

        if let Some(def) = self.chip_defs.get(name).cloned() {
            return Chip::composite(def, self).map(Some);
        }

        let paths: Vec<PathBuf> = self.search_paths.clone();
        for dir in paths {
            let path = dir.join(format!("{}.hdl", name));
            if path.exists() {
                let def = HdlParser::parse_file(&path)?;
                debug!("resolved chip '{}' from {}", def.name, path.display());
                self.chip_defs.insert(def.name.clone(), def.clone());
                return Chip::composite(def, self).map(Some);
            }
        }

        Ok(None)
    }
}

impl HdlEngine {
    // =========================================================================
    // Loading
    // =========================================================================

    pub fn load_hdl_string(&mut self, source: &str, name: &str) -> SimResult {
        let result = (|| {
            let def = HdlParser::parse_string(source, name)?;
            let chip_name = def.name.clone();
            self.chip_defs.insert(chip_name.clone(), def);
            let chip = self.resolve(&chip_name)?.ok_or_else(|| {
                SimError::runtime(format!("Could not load chip: '{}'", chip_name))
            })?;
            self.chip = Some(chip);
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.state = ExecState::Ready;
                self.error_message.clear();
                Ok(())
            }
            Err(e) => {
                self.set_error(&e);
                Err(e)
            }
        }
    }

    pub fn load_hdl_file(&mut self, path: impl Into<PathBuf>) -> SimResult {
        let path = path.into();
        let source = std::fs::read_to_string(&path).map_err(|e| {
            let err = SimError::file(path.to_string_lossy(), e.to_string());
            self.set_error(&err);
            err
        })?;
        self.load_hdl_string(&source, &path.to_string_lossy())
    }

    /// Register a chip definition without instantiating it.
    pub fn add_chip_def(&mut self, def: ChipDef) {
        self.chip_defs.insert(def.name.clone(), def);
    }

    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) {
        self.search_paths.push(dir.into());
    }

    pub fn reset(&mut self) {
        if let Some(chip) = &mut self.chip {
            chip.reset();
        }
        self.stats.reset();
        self.state = ExecState::Ready;
        self.error_message.clear();
        self.output_table.clear();
    }

    // =========================================================================
    // Direct chip manipulation
    // =========================================================================

    pub fn set_input(&mut self, pin: &str, value: i64) -> SimResult {
        let result = self
            .chip
            .as_mut()
            .ok_or_else(|| SimError::runtime("No chip loaded"))
            .and_then(|chip| chip.set_pin(pin, value));

        if let Err(e) = &result {
            self.set_error(e);
        }
        result
    }

    pub fn get_output(&self, pin: &str) -> SimResult<i64> {
        self.chip
            .as_ref()
            .ok_or_else(|| SimError::runtime("No chip loaded"))
            .and_then(|chip| chip.get_pin(pin))
    }

    pub fn eval(&mut self) -> SimResult {
        let result = self
            .chip
            .as_mut()
            .ok_or_else(|| SimError::runtime("No chip loaded"))
            .and_then(|chip| chip.eval());

        match &result {
            Ok(()) => self.stats.eval_count += 1,
            Err(e) => self.set_error(e),
        }
        result
    }

    pub fn tick(&mut self) -> SimResult {
        let result = self
            .chip
            .as_mut()
            .ok_or_else(|| SimError::runtime("No chip loaded"))
            .and_then(|chip| chip.tick());
        if let Err(e) = &result {
            self.set_error(e);
        }
        result
    }

    pub fn tock(&mut self) -> SimResult {
        let result = self
            .chip
            .as_mut()
            .ok_or_else(|| SimError::runtime("No chip loaded"))
            .and_then(|chip| chip.tock());
        if let Err(e) = &result {
            self.set_error(e);
        }
        result
    }

    pub fn chip(&self) -> Option<&Chip> {
        self.chip.as_ref()
    }

    // =========================================================================
    // Test script execution
    // =========================================================================

    /// Parse and run a .tst script, optionally comparing output rows
    /// against .cmp data. The final state is HALTED on success, ERROR on
    /// any parse, runtime, or comparison failure.
    pub fn run_test_string(&mut self, tst: &str, cmp: &str, name: &str) -> ExecState {
        self.state = ExecState::Running;
        self.error_message.clear();
        self.output_table.clear();

        let commands = match parse_script(tst, name) {
            Ok(commands) => commands,
            Err(e) => {
                self.set_error(&e);
                return self.state;
            }
        };

        let mut runner = TstRunner::default();
        if !cmp.is_empty() {
            runner.set_compare_data(cmp);
        }

        let run_result = runner.run(&commands, self);
        self.output_table = runner.output().to_string();
        self.stats.output_rows += runner.output_rows() as u64;

        // the script owns the loaded chip afterwards
        if let Some(chip) = runner.take_chip() {
            self.chip = Some(chip);
        }

        if let Err(e) = run_result {
            self.set_error(&e);
            return self.state;
        }
        if let Some(e) = runner.comparison_error() {
            self.set_error(e);
            return self.state;
        }

        self.state = ExecState::Halted;
        self.state
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn get_state(&self) -> ExecState {
        self.state
    }

    pub fn get_stats(&self) -> &HdlStats {
        &self.stats
    }

    pub fn get_error_message(&self) -> &str {
        &self.error_message
    }

    pub fn get_output_table(&self) -> &str {
        &self.output_table
    }

    fn set_error(&mut self, e: &SimError) {
        self.state = ExecState::Error;
        self.error_message = e.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XOR_HDL: &str = "
        CHIP Xor {
            IN a, b;
            OUT out;

            PARTS:
            Not(in=a, out=nota);
            Not(in=b, out=notb);
            And(a=a, b=notb, out=w1);
            And(a=nota, b=b, out=w2);
            Or(a=w1, b=w2, out=out);
        }";

    #[test]
    fn test_xor_from_parts() {
        let mut engine = HdlEngine::default();
        engine.load_hdl_string(XOR_HDL, "Xor.hdl").unwrap();

        for (a, b, expected) in [(0, 0, 0), (0, 1, 1), (1, 0, 1), (1, 1, 0)] {
            engine.set_input("a", a).unwrap();
            engine.set_input("b", b).unwrap();
            engine.eval().unwrap();
            assert_eq!(expected, engine.get_output("out").unwrap(), "Xor({}, {})", a, b);
        }
    }

    #[test]
    fn test_eval_is_idempotent_for_combinational_chips() {
        let mut engine = HdlEngine::default();
        engine.load_hdl_string(XOR_HDL, "Xor.hdl").unwrap();

        engine.set_input("a", 1).unwrap();
        engine.set_input("b", 0).unwrap();
        engine.eval().unwrap();
        let first = engine.get_output("out").unwrap();
        engine.eval().unwrap();
        assert_eq!(first, engine.get_output("out").unwrap());
    }

    #[test]
    fn test_parts_evaluate_in_dependency_order_not_source_order() {
        // the Or consuming w1/w2 comes first in source order, but the
        // topological order must still produce correct outputs
        let src = "
            CHIP Xor2 {
                IN a, b;
                OUT out;

                PARTS:
                Or(a=w1, b=w2, out=out);
                And(a=a, b=notb, out=w1);
                And(a=nota, b=b, out=w2);
                Not(in=a, out=nota);
                Not(in=b, out=notb);
            }";

        let mut engine = HdlEngine::default();
        engine.load_hdl_string(src, "Xor2.hdl").unwrap();

        engine.set_input("a", 0).unwrap();
        engine.set_input("b", 1).unwrap();
        engine.eval().unwrap();
        assert_eq!(1, engine.get_output("out").unwrap());
    }

    #[test]
    fn test_nested_user_defined_chips() {
        let mut engine = HdlEngine::default();
        engine
            .load_hdl_string(XOR_HDL, "Xor.hdl")
            .unwrap();

        // HalfAdder built from the user-defined Xor plus builtin And
        let half_adder = "
            CHIP MyHalfAdder {
                IN a, b;
                OUT sum, carry;

                PARTS:
                Xor(a=a, b=b, out=sum);
                And(a=a, b=b, out=carry);
            }";
        engine.load_hdl_string(half_adder, "MyHalfAdder.hdl").unwrap();

        engine.set_input("a", 1).unwrap();
        engine.set_input("b", 1).unwrap();
        engine.eval().unwrap();
        assert_eq!(0, engine.get_output("sum").unwrap());
        assert_eq!(1, engine.get_output("carry").unwrap());
    }

    #[test]
    fn test_true_false_constants_on_wide_pins() {
        let src = "
            CHIP AllOnes {
                IN in[16];
                OUT out[16];

                PARTS:
                And16(a=in, b=true, out=out);
            }";

        let mut engine = HdlEngine::default();
        engine.load_hdl_string(src, "AllOnes.hdl").unwrap();

        engine.set_input("in", 0xABCD).unwrap();
        engine.eval().unwrap();
        assert_eq!(0xABCD, engine.get_output("out").unwrap());
    }

    #[test]
    fn test_unknown_sub_chip_cites_source_line() {
        let src = "
            CHIP Broken {
                IN a;
                OUT out;

                PARTS:
                NoSuchGate(in=a, out=out);
            }";

        let mut engine = HdlEngine::default();
        let result = engine.load_hdl_string(src, "Broken.hdl");
        match result {
            Err(SimError::Runtime { message, .. }) => {
                assert!(message.contains("NoSuchGate"));
                assert!(message.contains("line 7"));
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
        assert_eq!(ExecState::Error, engine.get_state());
    }

    #[test]
    fn test_unknown_pin_is_runtime_error() {
        let mut engine = HdlEngine::default();
        engine.load_hdl_string(XOR_HDL, "Xor.hdl").unwrap();
        let result = engine.set_input("nosuchpin", 1);
        match result {
            Err(SimError::Runtime { message, .. }) => {
                assert!(message.contains("nosuchpin"));
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_run_and_script_with_comparison() {
        let tst = "
            load And,
            output-list a%B3.1.3 b%B3.1.3 out%B3.1.3;
            set a 0, set b 0, eval, output;
            set a 0, set b 1, eval, output;
            set a 1, set b 0, eval, output;
            set a 1, set b 1, eval, output;";

        let cmp = "\
|   a   |   b   |  out  |
|   0   |   0   |   0   |
|   0   |   1   |   0   |
|   1   |   0   |   0   |
|   1   |   1   |   1   |
";

        let mut engine = HdlEngine::default();
        assert_eq!(ExecState::Halted, engine.run_test_string(tst, cmp, "And.tst"));
        assert!(engine.get_error_message().is_empty());

        // a tampered row turns into a logic error
        let broken = cmp.replace("|   1   |   1   |   1   |", "|   1   |   1   |   0   |");
        let mut engine = HdlEngine::default();
        assert_eq!(ExecState::Error, engine.run_test_string(tst, &broken, "And.tst"));
        assert!(engine.get_error_message().contains("Logic Error"));
    }

    #[test]
    fn test_counter_with_sequential_parts() {
        // a PC wired straight through, clocked from the script
        let tst = "
            load PC,
            output-list time%S1.4.1 out%D1.6.1;
            set inc 1, tick, output; tock, output;
            tick, output; tock, output;";

        let mut engine = HdlEngine::default();
        assert_eq!(ExecState::Halted, engine.run_test_string(tst, "", "PC.tst"));

        let lines: Vec<&str> = engine.get_output_table().lines().collect();
        assert_eq!("|   0+ |      0 |", lines[1]);
        assert_eq!("|    1 |      1 |", lines[2]);
        assert_eq!("|   1+ |      1 |", lines[3]);
        assert_eq!("|    2 |      2 |", lines[4]);
    }
}
