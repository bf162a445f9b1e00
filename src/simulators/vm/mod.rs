//! The stack VM interpreter: a single dispatch loop over the nine command
//! kinds, with call-frame discipline on the flat RAM and the stepping and
//! breakpoint machinery the Jack debugger builds on.

pub mod calls;
pub mod command;
pub mod memory;

use crate::definitions::Word;
use crate::error::{SimError, SimResult};
use crate::parse::bytecode::{Parser, VmProgram};
use crate::parse::file_basename;
use crate::simulators::{ExecState, PauseReason};
use command::{ArithmeticOp, Segment, VmCommand};
use memory::VmMemory;
use std::collections::HashSet;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    pub instructions_executed: u64,
    pub push_count: u64,
    pub pop_count: u64,
    pub arithmetic_count: u64,
    pub call_count: u64,
    pub return_count: u64,
}

impl VmStats {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The VM execution engine.
///
/// ```
/// use hack_emu::simulators::vm::VmEngine;
///
/// let mut vm = VmEngine::default();
/// vm.load_string("push constant 7\npush constant 8\nadd\n", "Main.vm").unwrap();
/// vm.run();
/// assert_eq!(vec![15], vm.memory().get_stack_contents());
/// ```
#[derive(Default)]
pub struct VmEngine {
    pc: usize,
    program: VmProgram,
    memory: VmMemory,

    state: ExecState,
    pause_reason: PauseReason,
    pause_requested: bool,
    // commands retired since the last run/step entry; the breakpoint check
    // is skipped while this is 0 so a resume at a breakpoint index does not
    // immediately re-trigger
    ticks_since_resume: u64,
    entry_point: Option<String>,

    stats: VmStats,
    breakpoints: HashSet<usize>,

    error_message: String,
    error_location: usize,
}

impl VmEngine {
    // program loading

    pub fn load_file(&mut self, file_path: &str) -> SimResult {
        let mut parser = Parser::default();
        parser.parse_file(file_path)?;
        self.load(parser.into_program());
        Ok(())
    }

    pub fn load_string(&mut self, source: &str, file_name: &str) -> SimResult {
        let mut parser = Parser::default();
        parser.parse_string(source, file_name)?;
        self.load(parser.into_program());
        Ok(())
    }

    pub fn load_directory(&mut self, directory_path: &str) -> SimResult {
        let mut parser = Parser::default();
        parser.parse_directory(directory_path)?;
        self.load(parser.into_program());
        Ok(())
    }

    pub fn load(&mut self, program: VmProgram) {
        self.program = program;
        self.state = ExecState::Ready;
        self.pc = 0;
        self.stats.reset();
    }

    /// Override the bootstrap entry. By default execution starts at
    /// `Sys.init` if present, then `Main.main`, then command 0.
    pub fn set_entry_point(&mut self, function_name: impl Into<String>) {
        self.entry_point = Some(function_name.into());
    }

    pub fn reset(&mut self) {
        self.memory.reset();
        self.pc = 0;
        self.state = ExecState::Ready;
        self.pause_reason = PauseReason::None;
        self.pause_requested = false;
        self.ticks_since_resume = 0;
        self.stats.reset();
        self.error_message.clear();
        self.error_location = 0;
    }

    // execution control

    pub fn run(&mut self) -> ExecState {
        if self.state == ExecState::Ready {
            self.initialize_execution();
        }

        if self.state != ExecState::Paused && self.state != ExecState::Running {
            return self.state;
        }

        self.state = ExecState::Running;
        self.pause_reason = PauseReason::None;
        self.pause_requested = false;
        self.ticks_since_resume = 0;

        while self.state == ExecState::Running {
            if !self.execute_command() {
                break;
            }
        }

        self.state
    }

    pub fn run_for(&mut self, max_instructions: u64) -> ExecState {
        if self.state == ExecState::Ready {
            self.initialize_execution();
        }

        if self.state != ExecState::Paused && self.state != ExecState::Running {
            return self.state;
        }

        self.state = ExecState::Running;
        self.pause_reason = PauseReason::None;
        self.pause_requested = false;
        self.ticks_since_resume = 0;

        let mut count = 0;
        while self.state == ExecState::Running && count < max_instructions {
            if !self.execute_command() {
                break;
            }
            count += 1;
        }

        if self.state == ExecState::Running {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::UserRequest;
        }

        self.state
    }

    pub fn step(&mut self) -> ExecState {
        if self.state == ExecState::Ready {
            self.initialize_execution();
        }

        if self.state != ExecState::Paused && self.state != ExecState::Running {
            return self.state;
        }

        self.state = ExecState::Running;
        self.pause_reason = PauseReason::None;
        self.ticks_since_resume = 0;

        self.execute_command();

        if self.state == ExecState::Running {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::StepComplete;
        }

        self.state
    }

    /// Run until the call stack is strictly shallower than it is now.
    pub fn step_out(&mut self) -> ExecState {
        if self.state == ExecState::Ready {
            self.initialize_execution();
        }

        if self.state != ExecState::Paused && self.state != ExecState::Running {
            return self.state;
        }

        let target_depth = self.memory.call_stack().len().saturating_sub(1);

        self.state = ExecState::Running;
        self.pause_reason = PauseReason::None;
        self.pause_requested = false;
        self.ticks_since_resume = 0;

        while self.state == ExecState::Running {
            if !self.execute_command() {
                break;
            }
            if self.memory.call_stack().len() <= target_depth {
                self.state = ExecState::Paused;
                self.pause_reason = PauseReason::FunctionExit;
                break;
            }
        }

        self.state
    }

    /// Execute the current command; if it called into a function, keep
    /// running until control returns to the current depth.
    pub fn step_over(&mut self) -> ExecState {
        if self.state == ExecState::Ready {
            self.initialize_execution();
        }

        if self.state != ExecState::Paused && self.state != ExecState::Running {
            return self.state;
        }

        let current_depth = self.memory.call_stack().len();

        self.state = ExecState::Running;
        self.pause_reason = PauseReason::None;
        self.pause_requested = false;
        self.ticks_since_resume = 0;

        if !self.execute_command() {
            return self.state;
        }

        while self.state == ExecState::Running && self.memory.call_stack().len() > current_depth {
            if !self.execute_command() {
                break;
            }
        }

        if self.state == ExecState::Running {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::StepComplete;
        }

        self.state
    }

    /// Request a pause; polled at the top of each command.
    pub fn pause(&mut self) {
        self.pause_requested = true;
    }

    pub fn is_running(&self) -> bool {
        self.state == ExecState::Running
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn pause_reason(&self) -> PauseReason {
        self.pause_reason
    }

    // state inspection

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn program(&self) -> &VmProgram {
        &self.program
    }

    pub fn command(&self, index: usize) -> Option<&VmCommand> {
        self.program.commands.get(index)
    }

    pub fn memory(&self) -> &VmMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut VmMemory {
        &mut self.memory
    }

    pub fn current_function(&self) -> &str {
        self.memory.current_function()
    }

    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn error_location(&self) -> usize {
        self.error_location
    }

    pub fn get_segment(&self, segment: Segment, index: u16) -> SimResult<Word> {
        // statics need an owning file; resolve through the current command
        let file = match self.command(self.pc) {
            Some(VmCommand::Push { file_name, .. }) | Some(VmCommand::Pop { file_name, .. }) => {
                file_name.as_str()
            }
            _ => "",
        };
        self.memory.read_segment(segment, index, file)
    }

    // breakpoints

    pub fn add_breakpoint(&mut self, command_index: usize) {
        self.breakpoints.insert(command_index);
    }

    /// Resolve `function + offset` to a command index and set a breakpoint
    /// there. Unknown functions are ignored.
    pub fn add_function_breakpoint(&mut self, function_name: &str, offset: usize) {
        if let Some(entry) = self.program.function_entry_points.get(function_name) {
            self.breakpoints.insert(entry + offset);
        }
    }

    pub fn remove_breakpoint(&mut self, command_index: usize) {
        self.breakpoints.remove(&command_index);
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn has_breakpoint(&self, command_index: usize) -> bool {
        self.breakpoints.contains(&command_index)
    }

    pub fn breakpoints(&self) -> Vec<usize> {
        let mut result: Vec<_> = self.breakpoints.iter().copied().collect();
        result.sort_unstable();
        result
    }

    // execution helpers

    fn initialize_execution(&mut self) {
        self.memory.reset();

        let entry = match &self.entry_point {
            Some(name) => Some(name.clone()),
            None => {
                if self.program.function_entry_points.contains_key("Sys.init") {
                    Some("Sys.init".to_string())
                } else if self.program.function_entry_points.contains_key("Main.main") {
                    Some("Main.main".to_string())
                } else {
                    None
                }
            }
        };

        if let Some(entry) = entry {
            match self.program.function_entry_points.get(&entry) {
                Some(&entry_pc) => {
                    self.pc = entry_pc;

                    let num_locals = match self.program.commands.get(entry_pc) {
                        Some(VmCommand::Function { num_locals, .. }) => *num_locals,
                        _ => 0,
                    };

                    // bootstrap frame with return address 0, so a top-level
                    // return halts the engine
                    if let Err(err) = self.memory.bootstrap_frame(&entry, num_locals) {
                        self.set_error(err.to_string());
                        return;
                    }
                    log::debug!("bootstrapping at {} (command {})", entry, entry_pc);
                }
                None => {
                    self.set_error(format!("Entry point function '{}' not found", entry));
                    return;
                }
            }
        } else {
            // no entry function; start from the first command without a frame
            self.pc = 0;
        }

        // pre-allocate static bases for every loaded file
        let files: Vec<String> = self
            .program
            .source_files
            .iter()
            .map(|f| file_basename(f).to_string())
            .collect();
        for file in files {
            if let Err(err) = self.memory.static_base(&file) {
                self.set_error(err.to_string());
                return;
            }
        }

        self.state = ExecState::Paused;
        self.pause_reason = PauseReason::None;
    }

    /// Execute one command. Returns true to continue the run loop.
    fn execute_command(&mut self) -> bool {
        if self.pc >= self.program.commands.len() {
            self.state = ExecState::Halted;
            return false;
        }

        if self.pause_requested {
            self.pause_requested = false;
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::UserRequest;
            return false;
        }

        // skip the check on the very first command so that resuming at a
        // breakpoint does not immediately re-trigger it
        if self.ticks_since_resume > 0 && self.breakpoints.contains(&self.pc) {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::Breakpoint;
            return false;
        }

        if let Err(err) = self.dispatch() {
            self.error_message = err.to_string();
            self.error_location = self.pc;
            self.state = ExecState::Error;
            return false;
        }

        self.stats.instructions_executed += 1;
        self.ticks_since_resume += 1;
        true
    }

    fn dispatch(&mut self) -> SimResult {
        let command = self.program.commands[self.pc].clone();

        match command {
            VmCommand::Arithmetic { op, .. } => self.execute_arithmetic(op)?,
            VmCommand::Push {
                segment,
                index,
                ref file_name,
                ..
            } => {
                self.stats.push_count += 1;
                let value = self.memory.read_segment(segment, index, file_name)?;
                self.memory.push(value)?;
                self.pc += 1;
            }
            VmCommand::Pop {
                segment,
                index,
                ref file_name,
                ..
            } => {
                self.stats.pop_count += 1;
                let value = self.memory.pop()?;
                self.memory.write_segment(segment, index, value, file_name)?;
                self.pc += 1;
            }
            VmCommand::Label { .. } => {
                self.pc += 1;
            }
            VmCommand::Goto { ref label, .. } => {
                self.pc = self.lookup_label(label)?;
            }
            VmCommand::IfGoto { ref label, .. } => {
                let condition = self.memory.pop()?;
                if condition != 0 {
                    self.pc = self.lookup_label(label)?;
                } else {
                    self.pc += 1;
                }
            }
            VmCommand::Function { .. } => {
                // locals were zeroed by the matching call or bootstrap
                self.pc += 1;
            }
            VmCommand::Call {
                ref function,
                num_args,
                ..
            } => {
                self.stats.call_count += 1;
                let function_pc = self.lookup_function(function)?;

                let num_locals = match self.program.commands.get(function_pc) {
                    Some(VmCommand::Function { num_locals, .. }) => *num_locals,
                    _ => 0,
                };

                self.memory
                    .push_frame(self.pc + 1, function, num_args, num_locals)?;
                self.pc = function_pc;
            }
            VmCommand::Return { .. } => {
                self.stats.return_count += 1;
                let return_value = self.memory.pop()?;
                let return_address = self.memory.pop_frame(return_value)?;

                // return address 0 is the bootstrap frame: halt
                if return_address == 0 {
                    self.state = ExecState::Halted;
                } else {
                    self.pc = return_address;
                }
            }
        }

        Ok(())
    }

    fn execute_arithmetic(&mut self, op: ArithmeticOp) -> SimResult {
        use ArithmeticOp::*;
        self.stats.arithmetic_count += 1;

        const TRUE: Word = 0xFFFF;
        const FALSE: Word = 0;

        match op {
            Add | Sub | Eq | Gt | Lt | And | Or => {
                let y = self.memory.pop()?;
                let x = self.memory.pop()?;
                let result = match op {
                    Add => x.wrapping_add(y),
                    Sub => x.wrapping_sub(y),
                    And => x & y,
                    Or => x | y,
                    Eq => {
                        if x == y {
                            TRUE
                        } else {
                            FALSE
                        }
                    }
                    Gt => {
                        if (x as i16) > (y as i16) {
                            TRUE
                        } else {
                            FALSE
                        }
                    }
                    Lt => {
                        if (x as i16) < (y as i16) {
                            TRUE
                        } else {
                            FALSE
                        }
                    }
                    _ => unreachable!(),
                };
                self.memory.push(result)?;
            }
            Neg => {
                let y = self.memory.pop()?;
                self.memory.push((y as i16).wrapping_neg() as Word)?;
            }
            Not => {
                let y = self.memory.pop()?;
                self.memory.push(!y)?;
            }
        }

        self.pc += 1;
        Ok(())
    }

    fn lookup_label(&self, label: &str) -> SimResult<usize> {
        // labels are stored scoped: functionName$labelName
        let current = self.memory.current_function();
        if !current.is_empty() {
            let scoped = format!("{}${}", current, label);
            if let Some(&pos) = self.program.label_positions.get(&scoped) {
                return Ok(pos);
            }
        }

        // fall back to the raw name for programs without function scoping
        if let Some(&pos) = self.program.label_positions.get(label) {
            return Ok(pos);
        }

        Err(SimError::runtime(format!(
            "Undefined label: '{}'. Make sure the label is defined in the current \
             function with 'label {}'.",
            label, label
        )))
    }

    fn lookup_function(&self, function_name: &str) -> SimResult<usize> {
        self.program
            .function_entry_points
            .get(function_name)
            .copied()
            .ok_or_else(|| {
                SimError::runtime(format!(
                    "Undefined function: '{}'. Make sure the function is defined with \
                     'function {} <nLocals>' and the .vm file containing it has been loaded.",
                    function_name, function_name
                ))
            })
    }

    fn set_error(&mut self, message: String) {
        self.error_message = message;
        self.error_location = self.pc;
        self.state = ExecState::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(source: &str) -> VmEngine {
        let mut vm = VmEngine::default();
        vm.load_string(source, "Main.vm").unwrap();
        vm
    }

    #[test]
    fn test_arithmetic_composition() {
        let mut vm = engine_with("push constant 7\npush constant 8\nadd\n");
        assert_eq!(ExecState::Halted, vm.run());
        assert_eq!(vec![15], vm.memory().get_stack_contents());
    }

    #[test]
    fn test_truth_convention() {
        let mut vm = engine_with(
            "push constant 3\npush constant 3\neq\npush constant 1\npush constant 2\ngt\n",
        );
        vm.run();
        assert_eq!(vec![0xFFFF, 0], vm.memory().get_stack_contents());
    }

    #[test]
    fn test_comparisons_are_signed() {
        // -1 < 1
        let mut vm = engine_with("push constant 0\npush constant 1\nsub\npush constant 1\nlt\n");
        vm.run();
        assert_eq!(vec![0xFFFF], vm.memory().get_stack_contents());
    }

    #[test]
    fn test_neg_and_not() {
        let mut vm = engine_with("push constant 5\nneg\npush constant 0\nnot\n");
        vm.run();
        assert_eq!(
            vec![(-5i16) as Word, 0xFFFF],
            vm.memory().get_stack_contents()
        );
    }

    #[test]
    fn test_basic_loop_sums_to_ten() {
        // sum 1..=4 with a loop counter in local 0 needs a frame, so wrap in
        // a bootstrapped function
        let src = r#"
            function Main.main 2
            push constant 0
            pop local 0
            push constant 4
            pop local 1
            label LOOP
            push local 1
            if-goto BODY
            goto END
            label BODY
            push local 0
            push local 1
            add
            pop local 0
            push local 1
            push constant 1
            sub
            pop local 1
            goto LOOP
            label END
            push local 0
            return
        "#;
        let mut vm = engine_with(src);
        assert_eq!(ExecState::Halted, vm.run());
        assert_eq!(vec![10], vm.memory().get_stack_contents());
    }

    #[test]
    fn test_nested_call_and_return() {
        let src = r#"
            function Sys.init 0
            push constant 10
            call Math.double 1
            return
            function Math.double 0
            push argument 0
            push argument 0
            add
            return
        "#;
        let mut vm = engine_with(src);
        assert_eq!(ExecState::Halted, vm.run());
        assert_eq!(Ok(20), vm.memory().peek());
    }

    #[test]
    fn test_call_restores_caller_segments() {
        let src = r#"
            function Sys.init 2
            push constant 11
            pop local 0
            push constant 5
            call Math.inc 1
            pop local 1
            push local 0
            push local 1
            add
            return
            function Math.inc 0
            push argument 0
            push constant 1
            add
            return
        "#;
        let mut vm = engine_with(src);
        assert_eq!(ExecState::Halted, vm.run());
        // 11 + (5 + 1)
        assert_eq!(Ok(17), vm.memory().peek());
    }

    #[test]
    fn test_fibonacci_recursion() {
        let src = r#"
            function Sys.init 0
            push constant 7
            call Main.fibonacci 1
            return
            function Main.fibonacci 0
            push argument 0
            push constant 2
            lt
            if-goto IF_TRUE
            goto IF_FALSE
            label IF_TRUE
            push argument 0
            return
            label IF_FALSE
            push argument 0
            push constant 2
            sub
            call Main.fibonacci 1
            push argument 0
            push constant 1
            sub
            call Main.fibonacci 1
            add
            return
        "#;
        let mut vm = engine_with(src);
        assert_eq!(ExecState::Halted, vm.run());
        assert_eq!(Ok(13), vm.memory().peek());
    }

    #[test]
    fn test_label_scoping_at_runtime() {
        // both functions have END labels; each goto must stay local
        let src = r#"
            function Sys.init 0
            push constant 1
            call Main.f 1
            goto END
            label END
            push constant 42
            return
            function Main.f 0
            goto END
            label END
            push constant 7
            return
        "#;
        let mut vm = engine_with(src);
        assert_eq!(ExecState::Halted, vm.run());
        assert_eq!(Ok(42), vm.memory().peek());
    }

    #[test]
    fn test_undefined_label_is_runtime_error() {
        let mut vm = engine_with("function Sys.init 0\ngoto NOWHERE\nreturn\n");
        assert_eq!(ExecState::Error, vm.run());
        assert!(vm.error_message().contains("Undefined label: 'NOWHERE'"));
    }

    #[test]
    fn test_undefined_function_is_runtime_error() {
        let mut vm = engine_with("function Sys.init 0\ncall No.where 0\nreturn\n");
        assert_eq!(ExecState::Error, vm.run());
        assert!(vm.error_message().contains("Undefined function: 'No.where'"));
    }

    #[test]
    fn test_return_without_frame_is_runtime_error() {
        // no Sys.init / Main.main: starts at command 0 with no frame
        let mut vm = engine_with("push constant 1\nreturn\n");
        assert_eq!(ExecState::Error, vm.run());
        assert!(vm.error_message().contains("no function is active"));
    }

    #[test]
    fn test_explicit_entry_point() {
        let src = r#"
            function Main.main 0
            push constant 1
            return
            function Test.run 0
            push constant 99
            return
        "#;
        let mut vm = VmEngine::default();
        vm.load_string(src, "Main.vm").unwrap();
        vm.set_entry_point("Test.run");
        assert_eq!(ExecState::Halted, vm.run());
        assert_eq!(Ok(99), vm.memory().peek());
    }

    #[test]
    fn test_missing_entry_point_is_error() {
        let mut vm = engine_with("push constant 1\n");
        vm.set_entry_point("No.such");
        assert_eq!(ExecState::Error, vm.run());
        assert!(vm.error_message().contains("No.such"));
    }

    #[test]
    fn test_step_pauses_each_command() {
        let mut vm = engine_with("push constant 1\npush constant 2\nadd\n");
        assert_eq!(ExecState::Paused, vm.step());
        assert_eq!(PauseReason::StepComplete, vm.pause_reason());
        assert_eq!(1, vm.pc());
        vm.step();
        vm.step();
        assert_eq!(ExecState::Halted, vm.step());
    }

    #[test]
    fn test_step_over_skips_calls() {
        let src = r#"
            function Sys.init 0
            push constant 10
            call Math.double 1
            return
            function Math.double 0
            push argument 0
            push argument 0
            add
            return
        "#;
        let mut vm = engine_with(src);
        vm.step(); // function Sys.init
        vm.step(); // push constant 10
        assert_eq!(2, vm.pc());

        // step over the call: control returns to the same depth, at return
        vm.step_over();
        assert_eq!(ExecState::Paused, vm.state());
        assert_eq!(3, vm.pc());
        assert_eq!(Ok(20), vm.memory().peek());
        assert_eq!(1, vm.memory().call_stack().len());
    }

    #[test]
    fn test_step_out_pauses_on_function_exit() {
        let src = r#"
            function Sys.init 0
            push constant 10
            call Math.double 1
            return
            function Math.double 0
            push argument 0
            push argument 0
            add
            return
        "#;
        let mut vm = engine_with(src);
        vm.step(); // function
        vm.step(); // push
        vm.step(); // call
        assert_eq!(2, vm.memory().call_stack().len());

        vm.step_out();
        assert_eq!(ExecState::Paused, vm.state());
        assert_eq!(PauseReason::FunctionExit, vm.pause_reason());
        assert_eq!(1, vm.memory().call_stack().len());
    }

    #[test]
    fn test_breakpoints_and_function_breakpoints() {
        let src = r#"
            function Sys.init 0
            push constant 1
            push constant 2
            add
            return
        "#;
        let mut vm = engine_with(src);
        vm.add_function_breakpoint("Sys.init", 2);
        assert_eq!(ExecState::Paused, vm.run());
        assert_eq!(PauseReason::Breakpoint, vm.pause_reason());
        assert_eq!(2, vm.pc());

        // resume past the breakpoint
        assert_eq!(ExecState::Halted, vm.run());
    }

    #[test]
    fn test_statics_are_shared_within_a_file() {
        let mut parser = Parser::default();
        parser
            .parse_string(
                "function Sys.init 0\npush constant 42\npop static 3\npush static 3\nreturn\n",
                "Sys.vm",
            )
            .unwrap();
        let mut vm = VmEngine::default();
        vm.load(parser.into_program());
        assert_eq!(ExecState::Halted, vm.run());
        assert_eq!(Ok(42), vm.memory().peek());
    }

    #[test]
    fn test_reset_allows_rerun() {
        let mut vm = engine_with("push constant 7\npush constant 8\nadd\n");
        vm.run();
        assert_eq!(ExecState::Halted, vm.state());

        vm.reset();
        assert_eq!(ExecState::Ready, vm.state());
        vm.run();
        assert_eq!(vec![15], vm.memory().get_stack_contents());
    }
}
