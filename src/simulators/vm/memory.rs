//! The VM's flat RAM with the stack, the eight segment views and the call
//! frame discipline.
//!
//! RAM layout:
//!   0-15        SP, LCL, ARG, THIS, THAT, temp 0-7, R13-R15
//!   16-255      statics, allocated in 16-word stripes per file
//!   256-2047    stack
//!   2048-16383  heap
//!   16384-24575 screen
//!   24576       keyboard

use super::calls::CallFrame;
use super::command::Segment;
use crate::definitions::{
    Address, Word, ARG, KEYBOARD, LCL, RAM_SIZE, SCREEN_BASE, SCREEN_HEIGHT, SCREEN_SIZE,
    SCREEN_WIDTH, SP, STACK_BASE, STACK_MAX, STATIC_BASE, TEMP_BASE, TEMP_SIZE, THAT, THIS,
};
use crate::error::{SimError, SimResult};
use std::collections::HashMap;

const STATIC_STRIPE: usize = 16;

pub struct VmMemory {
    ram: Box<[Word; RAM_SIZE]>,
    call_stack: Vec<CallFrame>,
    static_bases: HashMap<String, Address>,
    next_static_address: Address,
    screen_dirty: bool,
}

impl Default for VmMemory {
    fn default() -> Self {
        let mut mem = Self {
            ram: Box::new([0; RAM_SIZE]),
            call_stack: Vec::new(),
            static_bases: HashMap::new(),
            next_static_address: STATIC_BASE,
            screen_dirty: false,
        };
        mem.ram[SP] = STACK_BASE as Word;
        mem
    }
}

impl VmMemory {
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.ram[SP] = STACK_BASE as Word;
        self.call_stack.clear();
        self.static_bases.clear();
        self.next_static_address = STATIC_BASE;
        self.screen_dirty = false;
    }

    // stack operations

    pub fn push(&mut self, value: Word) -> SimResult {
        let sp = self.ram[SP] as Address;

        if sp > STACK_MAX {
            return Err(SimError::runtime(format!(
                "Stack overflow! SP = {}. The stack has exceeded its maximum size ({}). \
                 This usually means infinite recursion or too many nested function calls.",
                sp, STACK_MAX
            )));
        }

        self.ram[sp] = value;
        self.ram[SP] = (sp + 1) as Word;
        Ok(())
    }

    pub fn pop(&mut self) -> SimResult<Word> {
        let sp = self.ram[SP] as Address;

        if sp <= STACK_BASE {
            return Err(SimError::runtime(
                "Stack underflow! Attempted to pop from empty stack. \
                 This usually means there's a pop without a matching push, \
                 or a function returned without pushing a return value.",
            ));
        }

        self.ram[SP] = (sp - 1) as Word;
        Ok(self.ram[sp - 1])
    }

    pub fn peek(&self) -> SimResult<Word> {
        let sp = self.ram[SP] as Address;
        if sp <= STACK_BASE {
            return Err(SimError::runtime("Cannot peek at empty stack"));
        }
        Ok(self.ram[sp - 1])
    }

    pub fn stack_size(&self) -> usize {
        (self.ram[SP] as Address).saturating_sub(STACK_BASE)
    }

    // segment access

    pub fn read_segment(&self, segment: Segment, index: u16, file_name: &str) -> SimResult<Word> {
        if segment == Segment::Constant {
            return Ok(index);
        }

        let addr = self.calculate_address(segment, index, file_name)?;
        self.read_ram(addr)
    }

    pub fn write_segment(
        &mut self,
        segment: Segment,
        index: u16,
        value: Word,
        file_name: &str,
    ) -> SimResult {
        if segment == Segment::Constant {
            return Err(SimError::runtime(
                "Cannot write to constant segment. \
                 Constants are read-only values, not memory locations.",
            ));
        }

        let addr = self.calculate_address(segment, index, file_name)?;
        self.write_ram(addr, value)
    }

    fn calculate_address(&self, segment: Segment, index: u16, file_name: &str) -> SimResult<Address> {
        let index = index as Address;
        match segment {
            Segment::Local => Ok(self.ram[LCL] as Address + index),
            Segment::Argument => Ok(self.ram[ARG] as Address + index),
            Segment::This => Ok(self.ram[THIS] as Address + index),
            Segment::That => Ok(self.ram[THAT] as Address + index),
            Segment::Temp => {
                if index >= TEMP_SIZE {
                    return Err(SimError::runtime(format!(
                        "Temp segment index out of bounds: {}. Valid range is 0-7.",
                        index
                    )));
                }
                Ok(TEMP_BASE + index)
            }
            Segment::Pointer => {
                if index > 1 {
                    return Err(SimError::runtime(format!(
                        "Pointer segment index out of bounds: {}. \
                         Valid range is 0-1 (0=THIS, 1=THAT).",
                        index
                    )));
                }
                Ok(THIS + index)
            }
            Segment::Static => {
                let base = self.static_bases.get(file_name).ok_or_else(|| {
                    SimError::runtime(format!(
                        "Static segment for file '{}' not initialized",
                        file_name
                    ))
                })?;
                Ok(base + index)
            }
            Segment::Constant => Err(SimError::internal(
                "calculate_address called for constant segment",
            )),
        }
    }

    /// Look up or allocate the static stripe for a file. Every file gets a
    /// fixed 16-word stripe inside [16, 256), packed in first-use order.
    pub fn static_base(&mut self, file_name: &str) -> SimResult<Address> {
        if let Some(base) = self.static_bases.get(file_name) {
            return Ok(*base);
        }

        let base = self.next_static_address;
        if base >= STACK_BASE {
            return Err(SimError::runtime(
                "Out of static variable space! Too many static variables across all files.",
            ));
        }

        self.static_bases.insert(file_name.to_string(), base);
        self.next_static_address += STATIC_STRIPE;
        Ok(base)
    }

    // direct RAM access

    pub fn read_ram(&self, address: Address) -> SimResult<Word> {
        self.ram.get(address).copied().ok_or_else(|| {
            SimError::runtime(format!(
                "Memory access out of bounds: {}. Valid range is 0-32767.",
                address
            ))
        })
    }

    pub fn write_ram(&mut self, address: Address, value: Word) -> SimResult {
        let cell = self.ram.get_mut(address).ok_or_else(|| {
            SimError::runtime(format!(
                "Memory write out of bounds: {}. Valid range is 0-32767.",
                address
            ))
        })?;
        *cell = value;

        if (SCREEN_BASE..SCREEN_BASE + SCREEN_SIZE).contains(&address) {
            self.screen_dirty = true;
        }
        Ok(())
    }

    // function call support

    /// Push a call frame onto the RAM stack.
    ///
    /// The caller has already pushed the arguments. The frame is
    /// [return address, saved LCL, saved ARG, saved THIS, saved THAT],
    /// then ARG and LCL are repointed and the locals are zeroed.
    pub fn push_frame(
        &mut self,
        return_address: usize,
        function_name: &str,
        num_args: u16,
        num_locals: u16,
    ) -> SimResult {
        let frame = CallFrame {
            return_address,
            function_name: function_name.to_string(),
            num_args,
            num_locals,
            saved_lcl: self.ram[LCL],
            saved_arg: self.ram[ARG],
            saved_this: self.ram[THIS],
            saved_that: self.ram[THAT],
        };

        self.push(return_address as Word)?;
        self.push(frame.saved_lcl)?;
        self.push(frame.saved_arg)?;
        self.push(frame.saved_this)?;
        self.push(frame.saved_that)?;

        let sp = self.ram[SP];
        self.ram[ARG] = sp - num_args as Word - 5;
        self.ram[LCL] = sp;

        for _ in 0..num_locals {
            self.push(0)?;
        }

        self.call_stack.push(frame);
        Ok(())
    }

    /// Pop the top call frame, restoring the caller's pointers and placing
    /// the return value where the caller expects it. Returns the saved return
    /// address (0 means halt).
    pub fn pop_frame(&mut self, return_value: Word) -> SimResult<usize> {
        if self.call_stack.is_empty() {
            return Err(SimError::runtime(
                "Attempted to return but no function is active. \
                 This usually means a 'return' without a matching 'call'.",
            ));
        }
        self.call_stack.pop();

        let frame_ptr = self.ram[LCL] as Address;
        if frame_ptr < 5 || frame_ptr >= RAM_SIZE {
            return Err(SimError::runtime(format!(
                "Corrupt call frame: LCL = {}",
                frame_ptr
            )));
        }

        // read the return address before any writes: when num_args == 0 the
        // slot at frame-5 overlaps with ARG[0], which is about to be
        // overwritten by the return value
        let ret_addr = self.ram[frame_ptr - 5] as usize;
        let arg_addr = self.ram[ARG] as Address;

        self.ram[THAT] = self.ram[frame_ptr - 1];
        self.ram[THIS] = self.ram[frame_ptr - 2];
        self.ram[ARG] = self.ram[frame_ptr - 3];
        self.ram[LCL] = self.ram[frame_ptr - 4];

        self.write_ram(arg_addr, return_value)?;
        self.ram[SP] = (arg_addr + 1) as Word;

        Ok(ret_addr)
    }

    pub fn call_stack(&self) -> &[CallFrame] {
        &self.call_stack
    }

    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.call_stack.last()
    }

    pub fn current_function(&self) -> &str {
        self.call_stack
            .last()
            .map(|f| f.function_name.as_str())
            .unwrap_or("")
    }

    /// Push the bootstrap frame directly (no arguments on the stack yet).
    pub fn bootstrap_frame(&mut self, function_name: &str, num_locals: u16) -> SimResult {
        self.push_frame(0, function_name, 0, num_locals)
    }

    // I/O access

    pub fn display(&self) -> &[Word] {
        &self.ram[SCREEN_BASE..SCREEN_BASE + SCREEN_SIZE]
    }

    pub fn screen_dirty(&self) -> bool {
        self.screen_dirty
    }

    pub fn clear_screen_dirty(&mut self) {
        self.screen_dirty = false;
    }

    pub fn get_keyboard(&self) -> Word {
        self.ram[KEYBOARD]
    }

    pub fn set_keyboard(&mut self, key_code: Word) {
        self.ram[KEYBOARD] = key_code;
    }

    pub fn get_pixel(&self, x: i32, y: i32) -> bool {
        if x < 0 || x >= SCREEN_WIDTH as i32 || y < 0 || y >= SCREEN_HEIGHT as i32 {
            return false;
        }

        let word_offset = (y as usize * 32) + (x as usize / 16);
        let bit_offset = x as usize % 16;
        (self.ram[SCREEN_BASE + word_offset] >> bit_offset) & 1 == 1
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, on: bool) {
        if x < 0 || x >= SCREEN_WIDTH as i32 || y < 0 || y >= SCREEN_HEIGHT as i32 {
            return;
        }

        let word_offset = (y as usize * 32) + (x as usize / 16);
        let bit_offset = x as usize % 16;

        let addr = SCREEN_BASE + word_offset;
        if on {
            self.ram[addr] |= 1 << bit_offset;
        } else {
            self.ram[addr] &= !(1 << bit_offset);
        }
        self.screen_dirty = true;
    }

    // debugging support

    pub fn get_stack_contents(&self) -> Vec<Word> {
        let sp = self.ram[SP] as Address;
        self.ram[STACK_BASE..sp.min(RAM_SIZE)].to_vec()
    }

    pub fn get_segment_contents(&self, segment: Segment, count: usize) -> Vec<Word> {
        let base = match segment {
            Segment::Local => self.ram[LCL] as Address,
            Segment::Argument => self.ram[ARG] as Address,
            Segment::This => self.ram[THIS] as Address,
            Segment::That => self.ram[THAT] as Address,
            Segment::Temp => TEMP_BASE,
            Segment::Static => STATIC_BASE,
            Segment::Pointer => THIS,
            Segment::Constant => return Vec::new(),
        };

        (0..count)
            .map_while(|i| self.ram.get(base + i).copied())
            .collect()
    }

    pub fn dump_state(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "=== VM Memory State ===");
        let _ = writeln!(out, "SP   = {:>5}", self.ram[SP]);
        let _ = writeln!(out, "LCL  = {:>5}", self.ram[LCL]);
        let _ = writeln!(out, "ARG  = {:>5}", self.ram[ARG]);
        let _ = writeln!(out, "THIS = {:>5}", self.ram[THIS]);
        let _ = writeln!(out, "THAT = {:>5}", self.ram[THAT]);

        let _ = writeln!(out, "\n=== Stack ===");
        let stack = self.get_stack_contents();
        if stack.is_empty() {
            let _ = writeln!(out, "(empty)");
        } else {
            for (i, value) in stack.iter().enumerate() {
                let _ = writeln!(out, "[{:>3}] {}", i, value);
            }
        }

        let _ = writeln!(out, "\n=== Call Stack ===");
        if self.call_stack.is_empty() {
            let _ = writeln!(out, "(empty)");
        } else {
            for (i, frame) in self.call_stack.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "[{}] {} (args={}, locals={})",
                    i, frame.function_name, frame.num_args, frame.num_locals
                );
            }
        }

        out
    }
}
