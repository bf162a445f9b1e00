//! The Hack CPU execution engine: fetch-decode-execute over the ROM, with
//! stepping, breakpoints and execution statistics.

pub mod command;
pub mod memory;

use crate::definitions::{Address, Word};
use crate::error::{SimError, SimResult};
use crate::simulators::{ExecState, PauseReason};
use command::{
    compute_alu, decode_instruction, decode_instruction_checked, disassemble_word, should_jump,
    Computation, DecodedInstruction, JumpCondition,
};
use memory::CpuMemory;
use std::collections::HashSet;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuStats {
    pub instructions_executed: u64,
    pub a_instruction_count: u64,
    pub c_instruction_count: u64,
    /// jumps actually taken
    pub jump_count: u64,
    /// M reads (a-bit set)
    pub memory_reads: u64,
    /// M writes (d3 dest bit)
    pub memory_writes: u64,
}

impl CpuStats {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The Hack CPU.
///
/// ```
/// use hack_emu::simulators::cpu::CpuEngine;
///
/// let mut cpu = CpuEngine::default();
/// cpu.load_string("0000000000000101\n1110110000100000\n", "jump.hack").unwrap();
/// cpu.run_for(100);
/// ```
pub struct CpuEngine {
    a_register: Word,
    d_register: Word,
    pc: Address,

    memory: CpuMemory,

    state: ExecState,
    pause_reason: PauseReason,
    pause_requested: bool,
    // instructions retired since the last run/step entry; the breakpoint
    // check is skipped while this is 0 so a resume at a breakpoint address
    // does not immediately re-trigger
    ticks_since_resume: u64,

    stats: CpuStats,
    breakpoints: HashSet<Address>,

    error_message: String,
    error_location: Address,
}

impl Default for CpuEngine {
    fn default() -> Self {
        Self {
            a_register: 0,
            d_register: 0,
            pc: 0,
            memory: CpuMemory::default(),
            state: ExecState::Ready,
            pause_reason: PauseReason::None,
            pause_requested: false,
            ticks_since_resume: 0,
            stats: CpuStats::default(),
            breakpoints: HashSet::new(),
            error_message: String::new(),
            error_location: 0,
        }
    }
}

impl CpuEngine {
    // program loading

    pub fn load_file(&mut self, file_path: &str) -> SimResult {
        self.memory.load_rom_file(file_path)?;
        self.validate_rom()?;
        self.after_load();
        Ok(())
    }

    pub fn load_string(&mut self, hack_text: &str, file_name: &str) -> SimResult {
        self.memory.load_rom_string(hack_text, file_name)?;
        self.validate_rom()?;
        self.after_load();
        Ok(())
    }

    pub fn load(&mut self, instructions: &[Word]) -> SimResult {
        self.memory.load_rom(instructions)?;
        self.validate_rom()?;
        self.after_load();
        Ok(())
    }

    fn validate_rom(&self) -> SimResult {
        for addr in 0..self.memory.rom_size() {
            decode_instruction_checked(self.memory.rom()[addr])?;
        }
        Ok(())
    }

    fn after_load(&mut self) {
        self.state = ExecState::Ready;
        self.pc = 0;
        self.a_register = 0;
        self.d_register = 0;
        self.stats.reset();
    }

    pub fn reset(&mut self) {
        self.memory.reset_ram();
        self.a_register = 0;
        self.d_register = 0;
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
        if self.state == ExecState::Ready || self.state == ExecState::Paused {
            self.state = ExecState::Running;
            self.pause_reason = PauseReason::None;
            self.pause_requested = false;
            self.ticks_since_resume = 0;

            while self.state == ExecState::Running {
                if !self.execute_instruction() {
                    break;
                }
            }
        }

        self.state
    }

    pub fn run_for(&mut self, max_instructions: u64) -> ExecState {
        if self.state == ExecState::Ready || self.state == ExecState::Paused {
            self.state = ExecState::Running;
            self.pause_reason = PauseReason::None;
            self.pause_requested = false;
            self.ticks_since_resume = 0;

            let mut count = 0;
            while self.state == ExecState::Running && count < max_instructions {
                if !self.execute_instruction() {
                    break;
                }
                count += 1;
            }

            if self.state == ExecState::Running {
                self.state = ExecState::Paused;
                self.pause_reason = PauseReason::UserRequest;
            }
        }

        self.state
    }

    pub fn step(&mut self) -> ExecState {
        if self.state == ExecState::Ready || self.state == ExecState::Paused {
            self.state = ExecState::Running;
            self.pause_reason = PauseReason::None;
            self.ticks_since_resume = 0;

            self.execute_instruction();

            if self.state == ExecState::Running {
                self.state = ExecState::Paused;
                self.pause_reason = PauseReason::StepComplete;
            }
        }

        self.state
    }

    /// Request a pause; polled at the top of each tick, so a host thread may
    /// stop a running loop cooperatively.
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

    // register and memory inspection

    pub fn a(&self) -> Word {
        self.a_register
    }

    pub fn d(&self) -> Word {
        self.d_register
    }

    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn read_ram(&self, address: Address) -> SimResult<Word> {
        self.memory.read_ram(address)
    }

    pub fn write_ram(&mut self, address: Address, value: Word) -> SimResult {
        self.memory.write_ram(address, value)
    }

    pub fn read_rom(&self, address: Address) -> SimResult<Word> {
        self.memory.read_rom(address)
    }

    pub fn rom_size(&self) -> usize {
        self.memory.rom_size()
    }

    pub fn memory(&self) -> &CpuMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut CpuMemory {
        &mut self.memory
    }

    // breakpoints

    pub fn add_breakpoint(&mut self, rom_address: Address) {
        self.breakpoints.insert(rom_address);
    }

    pub fn remove_breakpoint(&mut self, rom_address: Address) {
        self.breakpoints.remove(&rom_address);
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn has_breakpoint(&self, rom_address: Address) -> bool {
        self.breakpoints.contains(&rom_address)
    }

    pub fn breakpoints(&self) -> Vec<Address> {
        let mut result: Vec<_> = self.breakpoints.iter().copied().collect();
        result.sort_unstable();
        result
    }

    // disassembly

    pub fn current_instruction(&self) -> DecodedInstruction {
        if self.pc >= self.memory.rom_size() {
            return DecodedInstruction::A(0);
        }
        decode_instruction(self.memory.rom()[self.pc])
    }

    pub fn disassemble(&self, rom_address: Address) -> SimResult<String> {
        Ok(disassemble_word(self.memory.read_rom(rom_address)?))
    }

    pub fn disassemble_range(&self, start: Address, end: Address) -> Vec<String> {
        (start..end.min(self.memory.rom_size()))
            .map(|addr| disassemble_word(self.memory.rom()[addr]))
            .collect()
    }

    // statistics and error

    pub fn stats(&self) -> &CpuStats {
        &self.stats
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn error_location(&self) -> Address {
        self.error_location
    }

    // execution core

    /// Execute one instruction. Returns true to continue the run loop.
    fn execute_instruction(&mut self) -> bool {
        // halt: PC past the loaded program
        if self.pc >= self.memory.rom_size() {
            self.state = ExecState::Halted;
            return false;
        }

        if self.pause_requested {
            self.pause_requested = false;
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::UserRequest;
            return false;
        }

        // skip the check on the very first instruction so that resuming at a
        // breakpoint address does not immediately re-trigger it
        if self.ticks_since_resume > 0 && self.breakpoints.contains(&self.pc) {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::Breakpoint;
            return false;
        }

        if let Err(err) = self.tick() {
            self.error_message = err.to_string();
            self.error_location = self.pc;
            self.state = ExecState::Error;
            return false;
        }

        self.stats.instructions_executed += 1;
        self.ticks_since_resume += 1;

        if self.pc >= self.memory.rom_size() {
            self.state = ExecState::Halted;
            return false;
        }

        true
    }

    fn tick(&mut self) -> SimResult {
        let raw = self.memory.rom()[self.pc];

        if raw & 0x8000 == 0 {
            self.a_register = raw & 0x7FFF;
            self.pc += 1;
            self.stats.a_instruction_count += 1;
            return Ok(());
        }

        // C-instruction: 111accccccdddjjj
        let comp_bits = ((raw >> 6) & 0x7F) as u8;
        let dest_bits = ((raw >> 3) & 0x7) as u8;
        let jump_bits = (raw & 0x7) as u8;

        let am_val = if comp_bits & 0x40 != 0 {
            // a-bit set: use M = RAM[A]
            self.stats.memory_reads += 1;
            self.memory.read_ram(self.a_register as Address)?
        } else {
            self.a_register
        };

        let comp = Computation::from_bits(comp_bits).ok_or_else(|| {
            SimError::runtime(format!(
                "Invalid ALU computation code at ROM[{}]. The instruction may be corrupted.",
                self.pc
            ))
        })?;
        let alu_output = compute_alu(comp, self.d_register, am_val);

        // capture A before the A-dest write so M writes target the original
        let original_a = self.a_register;

        if dest_bits & 0x4 != 0 {
            self.a_register = alu_output;
        }
        if dest_bits & 0x2 != 0 {
            self.d_register = alu_output;
        }
        if dest_bits & 0x1 != 0 {
            self.memory.write_ram(original_a as Address, alu_output)?;
            self.stats.memory_writes += 1;
        }

        if should_jump(JumpCondition::from_bits(jump_bits), alu_output) {
            self.pc = self.a_register as Address;
            self.stats.jump_count += 1;
        } else {
            self.pc += 1;
        }

        self.stats.c_instruction_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Max(R0, R1) -> R2, hand-assembled from the classic project 4 program:
    //   @0, D=M, @1, D=D-M, @10, D;JGT, @1, D=M, @12, 0;JMP,
    //   @0, D=M, @2, M=D, @14, 0;JMP
    const MAX_PROGRAM: &str = "\
0000000000000000
1111110000010000
0000000000000001
1111010011010000
0000000000001010
1110001100000001
0000000000000001
1111110000010000
0000000000001100
1110101010000111
0000000000000000
1111110000010000
0000000000000010
1110001100001000
0000000000001110
1110101010000111
";

    #[test]
    fn test_max_program() {
        let mut cpu = CpuEngine::default();
        cpu.load_string(MAX_PROGRAM, "Max.hack").unwrap();

        cpu.write_ram(0, 10).unwrap();
        cpu.write_ram(1, 20).unwrap();
        cpu.run_for(100);
        assert_eq!(Ok(20), cpu.read_ram(2));

        cpu.reset();
        cpu.write_ram(0, 30).unwrap();
        cpu.write_ram(1, 5).unwrap();
        cpu.run_for(100);
        assert_eq!(Ok(30), cpu.read_ram(2));
    }

    #[test]
    fn test_a_instruction_loads_value() {
        let mut cpu = CpuEngine::default();
        cpu.load(&[42]).unwrap();
        cpu.step();
        assert_eq!(42, cpu.a());
        // one instruction, then halted at end of program
        assert_eq!(ExecState::Halted, cpu.state());
    }

    #[test]
    fn test_m_write_uses_original_a() {
        // @5 / AM=A+1: A becomes 6, but the M write must go to RAM[5]
        let program = [5, 0b1110110111101000];
        let mut cpu = CpuEngine::default();
        cpu.load(&program).unwrap();
        cpu.run();

        assert_eq!(6, cpu.a());
        assert_eq!(Ok(6), cpu.read_ram(5));
        assert_eq!(Ok(0), cpu.read_ram(6));
    }

    #[test]
    fn test_halts_past_end_of_program() {
        let mut cpu = CpuEngine::default();
        cpu.load(&[1, 2, 3]).unwrap();
        assert_eq!(ExecState::Halted, cpu.run());
        assert_eq!(3, cpu.stats().instructions_executed);
    }

    #[test]
    fn test_run_for_pauses_with_user_request() {
        // @0 / 0;JMP: infinite loop
        let program = [0, 0b1110101010000111];
        let mut cpu = CpuEngine::default();
        cpu.load(&program).unwrap();

        assert_eq!(ExecState::Paused, cpu.run_for(10));
        assert_eq!(PauseReason::UserRequest, cpu.pause_reason());
        assert_eq!(10, cpu.stats().instructions_executed);
    }

    #[test]
    fn test_step_pauses_with_step_complete() {
        let mut cpu = CpuEngine::default();
        cpu.load(&[1, 2, 3]).unwrap();
        assert_eq!(ExecState::Paused, cpu.step());
        assert_eq!(PauseReason::StepComplete, cpu.pause_reason());
        assert_eq!(1, cpu.pc());
    }

    #[test]
    fn test_breakpoint_pauses_and_does_not_retrigger() {
        // @0 / 0;JMP: tight loop between addresses 0 and 1
        let program = [0, 0b1110101010000111];
        let mut cpu = CpuEngine::default();
        cpu.load(&program).unwrap();
        cpu.add_breakpoint(1);

        assert_eq!(ExecState::Paused, cpu.run_for(1000));
        assert_eq!(PauseReason::Breakpoint, cpu.pause_reason());
        assert_eq!(1, cpu.pc());

        // resuming executes the instruction at the breakpoint address instead
        // of pausing again immediately
        cpu.step();
        assert_eq!(0, cpu.pc());
    }

    #[test]
    fn test_out_of_bounds_m_access_sets_error_state() {
        // @32767 / A=A+1 / D=M reads RAM[32768]
        let program = [32767, 0b1110110111100000, 0b1111110000010000];
        let mut cpu = CpuEngine::default();
        cpu.load(&program).unwrap();

        assert_eq!(ExecState::Error, cpu.run());
        assert!(cpu.error_message().contains("32768"));
        assert_eq!(2, cpu.error_location());
    }

    #[test]
    fn test_load_rejects_invalid_alu_code() {
        // comp bits 1111111 with a valid C prefix
        let program = [0b1111111111000000];
        let mut cpu = CpuEngine::default();
        assert!(cpu.load(&program).is_err());
    }

    #[test]
    fn test_stats_counters() {
        // @1 / D=A / @100 / D=D+A
        let program = [
            1,
            0b1110110000010000,
            100,
            0b1110000010010000,
        ];
        let mut cpu = CpuEngine::default();
        cpu.load(&program).unwrap();
        cpu.run();

        assert_eq!(4, cpu.stats().instructions_executed);
        assert_eq!(2, cpu.stats().a_instruction_count);
        assert_eq!(2, cpu.stats().c_instruction_count);
        assert_eq!(0, cpu.stats().jump_count);
        assert_eq!(101, cpu.d());
    }

    #[test]
    fn test_disassemble_range() {
        let mut cpu = CpuEngine::default();
        cpu.load(&[42, 0b1110001100001000]).unwrap();
        assert_eq!(vec!["@42", "M=D"], cpu.disassemble_range(0, 10));
    }
}
