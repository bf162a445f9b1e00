//! Source-level debugging of Jack programs: a wrapper around the VM engine
//! that maps Jack lines onto VM command indices through the source map.

pub mod inspect;

use crate::definitions::{Address, LineNumber, Word, THIS};
use crate::error::SimResult;
use crate::parse::smap::{JackVarKind, SourceEntry, SourceMap};
use crate::simulators::vm::command::Segment;
use crate::simulators::vm::VmEngine;
use crate::simulators::{ExecState, PauseReason};
use inspect::{InspectedArray, InspectedObject, ObjectInspector};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default, Clone)]
pub struct JackStats {
    pub total_vm_instructions: u64,
    /// VM instructions attributed to the function that was executing when
    /// they retired
    pub function_instruction_counts: HashMap<String, u64>,
}

impl JackStats {
    fn reset(&mut self) {
        self.total_vm_instructions = 0;
        self.function_instruction_counts.clear();
    }
}

/// One frame of the Jack-level call stack view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JackCallFrame {
    pub function_name: String,
    pub jack_file: String,
    pub jack_line: LineNumber,
    pub vm_command_index: usize,
}

/// A variable resolved through the current function's symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JackVariableValue {
    pub name: String,
    pub type_name: String,
    pub kind: JackVarKind,
    pub index: u16,
    pub raw_value: Word,
    pub signed_value: i16,
}

/// The Jack debugger.
///
/// Breakpoints are keyed by `(file, line)`; stepping moves by Jack source
/// line rather than by VM command.
#[derive(Default)]
pub struct JackDebugger {
    engine: VmEngine,
    source_map: SourceMap,
    jack_breakpoints: BTreeSet<(String, LineNumber)>,
    pause_reason: PauseReason,
    stats: JackStats,
}

impl JackDebugger {
    // program loading

    pub fn load(&mut self, vm_source: &str, smap_source: &str, name: &str) -> SimResult {
        self.engine.load_string(vm_source, name)?;
        self.source_map
            .load_string(smap_source, &format!("{}.smap", name))?;
        self.pause_reason = PauseReason::None;
        self.stats.reset();
        Ok(())
    }

    pub fn load_files(&mut self, vm_path: &str, smap_path: &str) -> SimResult {
        self.engine.load_file(vm_path)?;
        self.source_map.load_file(smap_path)?;
        self.pause_reason = PauseReason::None;
        self.stats.reset();
        Ok(())
    }

    /// Load VM code only (debugging without a source map).
    pub fn load_vm(&mut self, vm_source: &str, name: &str) -> SimResult {
        self.engine.load_string(vm_source, name)?;
        self.pause_reason = PauseReason::None;
        self.stats.reset();
        Ok(())
    }

    pub fn load_source_map(&mut self, smap_source: &str, name: &str) -> SimResult {
        self.source_map.load_string(smap_source, name)
    }

    pub fn set_entry_point(&mut self, function_name: impl Into<String>) {
        self.engine.set_entry_point(function_name);
    }

    pub fn reset(&mut self) {
        self.engine.reset();
        self.pause_reason = PauseReason::None;
        self.stats.reset();
        self.sync_breakpoints();
    }

    // execution control

    /// Step to the next Jack source line.
    ///
    /// Runs VM commands until the mapped `(file, line)` changes. When neither
    /// the position before nor after has a mapping, takes exactly one VM step.
    pub fn step(&mut self) -> ExecState {
        if self.is_finished() {
            return self.engine.state();
        }

        let before = self.current_location();
        let instr_before = self.engine.stats().instructions_executed;

        loop {
            let state = self.engine.step();
            if state == ExecState::Halted || state == ExecState::Error {
                self.update_stats(instr_before);
                return state;
            }

            let after = self.current_location();
            if let Some(after) = &after {
                if before.as_ref() != Some(after) {
                    break;
                }
            }

            // the mapping disappeared: stop at the boundary instead of
            // running through the whole unmapped region
            if after.is_none() && before.is_some() {
                break;
            }

            if before.is_none() && after.is_none() {
                break;
            }
        }

        self.update_stats(instr_before);
        self.pause_reason = PauseReason::StepComplete;
        self.engine.state()
    }

    /// Like [step], but function calls made by the current line run to
    /// completion instead of being stepped into.
    pub fn step_over(&mut self) -> ExecState {
        if self.is_finished() {
            return self.engine.state();
        }

        let initial_depth = self.engine.memory().call_stack().len();
        let before = self.current_location();
        let instr_before = self.engine.stats().instructions_executed;

        loop {
            let state = self.engine.step();
            if state == ExecState::Halted || state == ExecState::Error {
                self.update_stats(instr_before);
                return state;
            }

            // inside a call made from the current line: keep running
            if self.engine.memory().call_stack().len() > initial_depth {
                continue;
            }

            let after = self.current_location();
            if let Some(after) = &after {
                if before.as_ref() != Some(after) {
                    break;
                }
            }

            // the mapping disappeared: stop at the boundary instead of
            // running through the whole unmapped region
            if after.is_none() && before.is_some() {
                break;
            }

            if before.is_none() && after.is_none() {
                break;
            }
        }

        self.update_stats(instr_before);
        self.pause_reason = PauseReason::StepComplete;
        self.engine.state()
    }

    /// Run until the current function returns, surfacing at the next mapped
    /// line in the caller.
    pub fn step_out(&mut self) -> ExecState {
        if self.is_finished() {
            return self.engine.state();
        }

        let initial_depth = self.engine.memory().call_stack().len();
        let instr_before = self.engine.stats().instructions_executed;

        loop {
            let state = self.engine.step();
            if state == ExecState::Halted || state == ExecState::Error {
                self.update_stats(instr_before);
                return state;
            }

            if self.engine.memory().call_stack().len() < initial_depth
                && self.current_location().is_some()
            {
                break;
            }
        }

        self.update_stats(instr_before);
        self.pause_reason = PauseReason::FunctionExit;
        self.engine.state()
    }

    /// Run until a breakpoint, halt or error. The VM breakpoint set is
    /// rebuilt from the Jack set on every entry.
    pub fn run(&mut self) -> ExecState {
        if self.is_finished() {
            return self.engine.state();
        }

        self.sync_breakpoints();
        let instr_before = self.engine.stats().instructions_executed;

        let state = self.engine.run();
        self.update_stats(instr_before);

        if state == ExecState::Paused {
            self.pause_reason = self.engine.pause_reason();
        }
        state
    }

    pub fn run_for(&mut self, max_instructions: u64) -> ExecState {
        if self.is_finished() {
            return self.engine.state();
        }

        self.sync_breakpoints();
        let instr_before = self.engine.stats().instructions_executed;

        let state = self.engine.run_for(max_instructions);
        self.update_stats(instr_before);

        if state == ExecState::Paused {
            self.pause_reason = self.engine.pause_reason();
        }
        state
    }

    pub fn pause(&mut self) {
        self.engine.pause();
    }

    // state inspection

    pub fn state(&self) -> ExecState {
        self.engine.state()
    }

    pub fn pause_reason(&self) -> PauseReason {
        self.pause_reason
    }

    pub fn engine(&self) -> &VmEngine {
        &self.engine
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    /// The source entry of the VM command about to execute.
    pub fn current_source(&self) -> Option<&SourceEntry> {
        self.source_map.get_entry_for_vm(self.engine.pc())
    }

    pub fn current_function(&self) -> &str {
        self.engine.current_function()
    }

    /// The call stack with Jack locations resolved for each return address.
    pub fn jack_call_stack(&self) -> Vec<JackCallFrame> {
        self.engine
            .memory()
            .call_stack()
            .iter()
            .map(|frame| {
                let entry = self.source_map.get_entry_for_vm(frame.return_address);
                JackCallFrame {
                    function_name: frame.function_name.clone(),
                    jack_file: entry.map(|e| e.jack_file.clone()).unwrap_or_default(),
                    jack_line: entry.map(|e| e.jack_line).unwrap_or(0),
                    vm_command_index: frame.return_address,
                }
            })
            .collect()
    }

    // breakpoints

    /// Arm a breakpoint on a Jack line. Every VM command the line maps to
    /// becomes a VM breakpoint. Returns false if the line is unmapped.
    pub fn add_breakpoint(&mut self, file: &str, line: LineNumber) -> bool {
        let indices = self.source_map.get_all_vm_indices_for_line(file, line);
        if indices.is_empty() {
            return false;
        }

        self.jack_breakpoints.insert((file.to_string(), line));
        for index in indices {
            self.engine.add_breakpoint(index);
        }
        true
    }

    pub fn remove_breakpoint(&mut self, file: &str, line: LineNumber) -> bool {
        if !self.jack_breakpoints.remove(&(file.to_string(), line)) {
            return false;
        }

        for index in self.source_map.get_all_vm_indices_for_line(file, line) {
            self.engine.remove_breakpoint(index);
        }
        true
    }

    pub fn clear_breakpoints(&mut self) {
        self.jack_breakpoints.clear();
        self.engine.clear_breakpoints();
    }

    pub fn has_breakpoint(&self, file: &str, line: LineNumber) -> bool {
        self.jack_breakpoints.contains(&(file.to_string(), line))
    }

    pub fn breakpoints(&self) -> Vec<(String, LineNumber)> {
        self.jack_breakpoints.iter().cloned().collect()
    }

    // variable inspection

    /// Resolve a variable by name in the current function's scope, searching
    /// locals, then arguments, fields and statics.
    pub fn get_variable(&self, name: &str) -> Option<JackVariableValue> {
        let symbols = self
            .source_map
            .get_function_symbols(self.engine.current_function())?;

        symbols
            .locals
            .iter()
            .chain(symbols.arguments.iter())
            .chain(symbols.fields.iter())
            .chain(symbols.statics.iter())
            .find(|var| var.name == name)
            .and_then(|var| self.read_variable(var, &symbols.class_name))
    }

    /// Every variable visible in the current function, in declaration order
    /// per kind.
    pub fn get_all_variables(&self) -> Vec<JackVariableValue> {
        let symbols = match self
            .source_map
            .get_function_symbols(self.engine.current_function())
        {
            Some(symbols) => symbols,
            None => return Vec::new(),
        };

        symbols
            .locals
            .iter()
            .chain(symbols.arguments.iter())
            .chain(symbols.fields.iter())
            .chain(symbols.statics.iter())
            .filter_map(|var| self.read_variable(var, &symbols.class_name))
            .collect()
    }

    /// Evaluate a debugger expression: an integer literal (optional leading
    /// `-`) or a variable name.
    pub fn evaluate(&self, expr: &str) -> Option<i16> {
        if let Ok(value) = expr.parse::<i16>() {
            return Some(value);
        }
        self.get_variable(expr).map(|v| v.signed_value)
    }

    fn read_variable(
        &self,
        var: &crate::parse::smap::JackVariable,
        class_name: &str,
    ) -> Option<JackVariableValue> {
        let memory = self.engine.memory();
        let raw = match var.kind {
            JackVarKind::Local => memory.read_segment(Segment::Local, var.index, "").ok()?,
            JackVarKind::Argument => memory.read_segment(Segment::Argument, var.index, "").ok()?,
            JackVarKind::Field => {
                let this_addr = memory.read_ram(THIS).ok()? as Address;
                memory.read_ram(this_addr + var.index as Address).ok()?
            }
            JackVarKind::Static => memory
                .read_segment(Segment::Static, var.index, class_name)
                .ok()?,
        };

        Some(JackVariableValue {
            name: var.name.clone(),
            type_name: var.type_name.clone(),
            kind: var.kind,
            index: var.index,
            raw_value: raw,
            signed_value: raw as i16,
        })
    }

    // object inspection

    pub fn inspect_object(&self, address: Address, class_name: &str) -> SimResult<InspectedObject> {
        ObjectInspector::new(self.engine.memory(), &self.source_map)
            .inspect_object(address, class_name)
    }

    pub fn inspect_this(&self) -> SimResult<InspectedObject> {
        ObjectInspector::new(self.engine.memory(), &self.source_map)
            .inspect_this(self.engine.current_function())
    }

    pub fn inspect_array(&self, address: Address, length: usize) -> SimResult<InspectedArray> {
        ObjectInspector::new(self.engine.memory(), &self.source_map).inspect_array(address, length)
    }

    // statistics

    pub fn stats(&self) -> &JackStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    // helpers

    fn is_finished(&self) -> bool {
        matches!(self.engine.state(), ExecState::Halted | ExecState::Error)
    }

    fn current_location(&self) -> Option<(String, LineNumber)> {
        self.current_source()
            .map(|e| (e.jack_file.clone(), e.jack_line))
    }

    fn sync_breakpoints(&mut self) {
        self.engine.clear_breakpoints();
        let indices: Vec<usize> = self
            .jack_breakpoints
            .iter()
            .flat_map(|(file, line)| self.source_map.get_all_vm_indices_for_line(file, *line))
            .collect();
        for index in indices {
            self.engine.add_breakpoint(index);
        }
    }

    fn update_stats(&mut self, instructions_before: u64) {
        let executed = self.engine.stats().instructions_executed - instructions_before;
        self.stats.total_vm_instructions += executed;

        let function = self.engine.current_function();
        if !function.is_empty() {
            *self
                .stats
                .function_instruction_counts
                .entry(function.to_string())
                .or_insert(0) += executed;
        }
    }
}
