//! Harvard memory for the CPU engine: 32K instruction ROM and 32K data RAM
//! with the memory-mapped screen and keyboard.

use crate::definitions::{
    Address, Word, KEYBOARD, RAM_SIZE, ROM_SIZE, SCREEN_BASE, SCREEN_HEIGHT, SCREEN_SIZE,
    SCREEN_WIDTH,
};
use crate::error::{SimError, SimResult};
use crate::parse::hack::parse_hack_string;

pub struct CpuMemory {
    rom: Box<[Word; ROM_SIZE]>,
    ram: Box<[Word; RAM_SIZE]>,
    program_size: usize,
    screen_dirty: bool,
}

impl Default for CpuMemory {
    fn default() -> Self {
        Self {
            rom: Box::new([0; ROM_SIZE]),
            ram: Box::new([0; RAM_SIZE]),
            program_size: 0,
            screen_dirty: false,
        }
    }
}

impl CpuMemory {
    pub fn reset(&mut self) {
        self.rom.fill(0);
        self.ram.fill(0);
        self.program_size = 0;
        self.screen_dirty = false;
    }

    /// Clear RAM and I/O state but keep the loaded program.
    pub fn reset_ram(&mut self) {
        self.ram.fill(0);
        self.screen_dirty = false;
    }

    pub fn load_rom_file(&mut self, path: &str) -> SimResult {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SimError::file(path, format!("Could not open .hack file: {}", e)))?;
        self.load_rom_string(&content, path)
    }

    pub fn load_rom_string(&mut self, hack_text: &str, file_name: &str) -> SimResult {
        let instructions = parse_hack_string(hack_text, file_name)?;
        self.load_rom(&instructions)
    }

    pub fn load_rom(&mut self, instructions: &[Word]) -> SimResult {
        if instructions.len() > ROM_SIZE {
            return Err(SimError::runtime(format!(
                "Program too large! ROM can hold at most {} instructions, got {}.",
                ROM_SIZE,
                instructions.len()
            )));
        }

        self.rom.fill(0);
        self.rom[..instructions.len()].copy_from_slice(instructions);
        self.program_size = instructions.len();
        Ok(())
    }

    pub fn rom_size(&self) -> usize {
        self.program_size
    }

    pub fn read_rom(&self, address: Address) -> SimResult<Word> {
        self.rom.get(address).copied().ok_or_else(|| {
            SimError::runtime(format!(
                "ROM access out of bounds: address {}. Valid range is 0-{}.",
                address,
                ROM_SIZE - 1
            ))
        })
    }

    /// Unchecked ROM slice for the fetch hot loop. The engine guards the PC
    /// against `rom_size` before indexing.
    #[inline]
    pub fn rom(&self) -> &[Word; ROM_SIZE] {
        &self.rom
    }

    pub fn read_ram(&self, address: Address) -> SimResult<Word> {
        self.ram.get(address).copied().ok_or_else(|| {
            SimError::runtime(format!(
                "Cannot read RAM at address {}. Valid range is 0-32767 (32K). \
                 The A register may contain an out-of-bounds value.",
                address
            ))
        })
    }

    pub fn write_ram(&mut self, address: Address, value: Word) -> SimResult {
        let cell = self.ram.get_mut(address).ok_or_else(|| {
            SimError::runtime(format!(
                "Cannot write to RAM at address {}. Valid range is 0-32767 (32K). \
                 The A register may contain an out-of-bounds value.",
                address
            ))
        })?;
        *cell = value;

        if (SCREEN_BASE..SCREEN_BASE + SCREEN_SIZE).contains(&address) {
            self.screen_dirty = true;
        }
        Ok(())
    }

    // I/O

    pub fn screen_buffer(&self) -> &[Word] {
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

    /// Read a pixel. Bit 0 of each word is the leftmost pixel of that word.
    /// Out-of-range coordinates read as off.
    pub fn get_pixel(&self, x: i32, y: i32) -> bool {
        if x < 0 || x >= SCREEN_WIDTH as i32 || y < 0 || y >= SCREEN_HEIGHT as i32 {
            return false;
        }

        let word_offset = (y as usize * 32) + (x as usize / 16);
        let bit_offset = x as usize % 16;

        (self.ram[SCREEN_BASE + word_offset] >> bit_offset) & 1 == 1
    }

    /// Write a pixel; out-of-range coordinates are silently ignored.
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

    /// Human-readable dump of registers, top of stack and I/O state.
    pub fn dump_state(&self) -> String {
        use std::fmt::Write;

        const REG_NAMES: [&str; 16] = [
            "SP", "LCL", "ARG", "THIS", "THAT", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12",
            "R13", "R14", "R15",
        ];

        let mut out = String::new();
        let _ = writeln!(out, "=== CPU Memory State ===");
        let _ = writeln!(out, "ROM: {} instructions loaded", self.program_size);
        let _ = writeln!(out, "\n--- Registers (RAM 0-15) ---");
        for (i, name) in REG_NAMES.iter().enumerate() {
            let _ = writeln!(out, "{:>4} = {:>6}", name, self.ram[i]);
        }

        let sp = self.ram[0] as usize;
        if sp > 256 && sp < RAM_SIZE {
            let _ = writeln!(out, "\n--- Stack (top 5) ---");
            for addr in (256..sp).rev().take(5) {
                let _ = writeln!(out, "[{}] = {}", addr, self.ram[addr]);
            }
        }

        let _ = writeln!(
            out,
            "\nScreen dirty: {}",
            if self.screen_dirty { "yes" } else { "no" }
        );
        let _ = writeln!(out, "Keyboard: {}", self.ram[KEYBOARD]);
        out
    }
}
