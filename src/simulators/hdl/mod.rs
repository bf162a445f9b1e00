//! The HDL simulation engine: chip loading and resolution, direct pin
//! manipulation and test-script execution.

pub mod builtins;
pub mod chip;
pub mod tester;

use crate::error::{SimError, SimResult};
use crate::parse::hdl::{parse_hdl_file, parse_hdl_string, ChipDef};
use crate::simulators::ExecState;
use chip::{Chip, ChipResolver};
use std::collections::HashMap;
use std::path::PathBuf;
use tester::TstRunner;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HdlStats {
    pub eval_count: u64,
}

impl HdlStats {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Resolves chip names through the builtin registry, the cache of parsed
/// definitions and the `.hdl` search path, caching what it finds on disk.
struct Resolver<'a> {
    chip_defs: &'a mut HashMap<String, ChipDef>,
    search_paths: &'a [PathBuf],
}

impl ChipResolver for Resolver<'_> {
    fn resolve(&mut self, name: &str) -> SimResult<Chip> {
        // 1. builtins
        if let Some(chip) = builtins::instantiate(name) {
            return Ok(chip);
        }

        // 2. previously parsed definitions
        if let Some(def) = self.chip_defs.get(name).cloned() {
            return Chip::composite(def, self);
        }

        // 3. search path
        for dir in self.search_paths {
            let hdl_path = dir.join(format!("{}.hdl", name));
            if hdl_path.exists() {
                let path_str = hdl_path.to_string_lossy().to_string();
                let def = parse_hdl_file(&path_str)?;
                self.chip_defs.insert(def.name.clone(), def.clone());
                return Chip::composite(def, self);
            }
        }

        Err(SimError::runtime(format!("Could not load chip: '{}'", name)))
    }
}

/// The HDL engine.
///
/// ```
/// use hack_emu::simulators::hdl::HdlEngine;
///
/// let mut engine = HdlEngine::default();
/// engine.load_hdl_string(
///     "CHIP Buf { IN in; OUT out; PARTS: Or(a=in, b=in, out=out); }",
///     "Buf.hdl",
/// );
/// engine.set_input("in", 1);
/// engine.eval();
/// assert_eq!(1, engine.get_output("out"));
/// ```
#[derive(Default)]
pub struct HdlEngine {
    chip_defs: HashMap<String, ChipDef>,
    search_paths: Vec<PathBuf>,
    chip: Option<Chip>,
    runner: TstRunner,

    state: ExecState,
    stats: HdlStats,
    error_message: String,
}

impl HdlEngine {
    // loading

    pub fn load_hdl_file(&mut self, path: &str) {
        match parse_hdl_file(path) {
            Ok(def) => self.install_def(def),
            Err(e) => self.set_error(e.to_string()),
        }
    }

    pub fn load_hdl_string(&mut self, source: &str, name: &str) {
        match parse_hdl_string(source, name) {
            Ok(def) => self.install_def(def),
            Err(e) => self.set_error(e.to_string()),
        }
    }

    fn install_def(&mut self, def: ChipDef) {
        let chip_name = def.name.clone();
        self.chip_defs.insert(chip_name.clone(), def);

        match self.resolve_chip(&chip_name) {
            Ok(chip) => {
                self.chip = Some(chip);
                self.state = ExecState::Ready;
                self.error_message.clear();
            }
            Err(e) => self.set_error(e.to_string()),
        }
    }

    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) {
        self.search_paths.push(dir.into());
    }

    pub fn reset(&mut self) {
        if let Some(chip) = &mut self.chip {
            chip.reset();
        }
        self.runner.reset();
        self.stats.reset();
        self.state = ExecState::Ready;
        self.error_message.clear();
    }

    /// Resolve a chip name to a fresh instance (builtin, cached definition
    /// or `<dir>/<name>.hdl` on the search path).
    pub fn resolve_chip(&mut self, name: &str) -> SimResult<Chip> {
        Resolver {
            chip_defs: &mut self.chip_defs,
            search_paths: &self.search_paths,
        }
        .resolve(name)
    }

    // direct chip manipulation

    pub fn set_input(&mut self, pin: &str, value: i64) {
        let result = match &mut self.chip {
            Some(chip) => chip.set_pin(pin, value),
            None => Err(SimError::runtime("No chip loaded")),
        };
        if let Err(e) = result {
            self.set_error(e.to_string());
        }
    }

    pub fn get_output(&self, pin: &str) -> i64 {
        self.chip
            .as_ref()
            .and_then(|chip| chip.get_pin(pin).ok())
            .unwrap_or(0)
    }

    pub fn eval(&mut self) {
        let result = match &mut self.chip {
            Some(chip) => chip.eval(),
            None => Err(SimError::runtime("No chip loaded")),
        };
        match result {
            Ok(()) => self.stats.eval_count += 1,
            Err(e) => self.set_error(e.to_string()),
        }
    }

    pub fn tick(&mut self) {
        let result = match &mut self.chip {
            Some(chip) => chip.tick(),
            None => Err(SimError::runtime("No chip loaded")),
        };
        if let Err(e) = result {
            self.set_error(e.to_string());
        }
    }

    pub fn tock(&mut self) {
        let result = match &mut self.chip {
            Some(chip) => chip.tock(),
            None => Err(SimError::runtime("No chip loaded")),
        };
        if let Err(e) = result {
            self.set_error(e.to_string());
        }
    }

    pub fn chip(&self) -> Option<&Chip> {
        self.chip.as_ref()
    }

    // test script execution

    /// Parse and run a whole test script. A comparison mismatch ends the run
    /// in `Error` with the diff as the message.
    pub fn run_test_string(&mut self, tst: &str, cmp: &str, name: &str) -> ExecState {
        self.state = ExecState::Running;
        self.error_message.clear();

        if let Err(e) = self.runner.parse(tst, name) {
            self.set_error(e.to_string());
            return self.state;
        }
        if !cmp.is_empty() {
            self.runner.set_compare_data(cmp);
        }

        let mut resolver = Resolver {
            chip_defs: &mut self.chip_defs,
            search_paths: &self.search_paths,
        };
        if let Err(e) = self.runner.run_all(&mut resolver) {
            self.set_error(e.to_string());
            return self.state;
        }

        let diff = self.runner.comparison_error().map(str::to_string);
        if let Some(message) = diff {
            self.set_error(SimError::logic(message).to_string());
            return self.state;
        }

        self.state = ExecState::Halted;
        self.state
    }

    /// Execute one test-script command.
    pub fn step_test(&mut self) -> ExecState {
        if self.state == ExecState::Error {
            return self.state;
        }

        let mut resolver = Resolver {
            chip_defs: &mut self.chip_defs,
            search_paths: &self.search_paths,
        };
        match self.runner.step(&mut resolver) {
            Ok(more) => {
                if !more {
                    self.state = ExecState::Halted;
                }
            }
            Err(e) => {
                self.set_error(e.to_string());
                return self.state;
            }
        }

        let diff = self.runner.comparison_error().map(str::to_string);
        if let Some(message) = diff {
            self.set_error(SimError::logic(message).to_string());
        }

        self.state
    }

    /// Load a test script without running it (for step_test driving).
    pub fn load_test_string(&mut self, tst: &str, cmp: &str, name: &str) -> SimResult {
        self.runner.parse(tst, name)?;
        if !cmp.is_empty() {
            self.runner.set_compare_data(cmp);
        }
        self.state = ExecState::Ready;
        Ok(())
    }

    pub fn output_table(&self) -> &str {
        self.runner.output()
    }

    pub fn has_comparison_error(&self) -> bool {
        self.runner.has_comparison_error()
    }

    // state

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn stats(&self) -> &HdlStats {
        &self.stats
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    fn set_error(&mut self, message: String) {
        log::warn!("hdl engine error: {}", message);
        self.state = ExecState::Error;
        self.error_message = message;
    }
}
