use crate::definitions::*;
use crate::error::{SimError, SimResult};

use log::debug;
use std::fs;
use std::path::Path;

/// Hardware-level memory of the Hack computer: 32K instruction ROM, 32K
/// data RAM with the memory-mapped screen and keyboard. There are no
/// segment abstractions at this level.
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

    // =========================================================================
    // ROM loading
    // =========================================================================

    /// Load a .hack file: one 16-character binary string per line.
    pub fn load_rom_file(&mut self, path: impl AsRef<Path>) -> SimResult {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| SimError::file(path.to_string_lossy(), e.to_string()))?;
        self.load_rom_string(&text)
    }

    pub fn load_rom_string(&mut self, hack_text: &str) -> SimResult {
        self.rom.fill(0);
        self.program_size = 0;

        for (i, raw_line) in hack_text.lines().enumerate() {
            let line_number = i + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            if self.program_size >= ROM_SIZE {
                return Err(SimError::parse(
                    "<rom>",
                    line_number,
                    format!(
                        "Program too large! ROM can hold at most {} instructions.",
                        ROM_SIZE
                    ),
                ));
            }

            self.rom[self.program_size] = parse_binary_line(line, line_number)?;
            self.program_size += 1;
        }

        self.screen_dirty = false;
        debug!("loaded {} instructions into rom", self.program_size);
        Ok(())
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
        self.screen_dirty = false;
        Ok(())
    }

    pub fn read_rom(&self, address: Address) -> SimResult<Word> {
        if address >= ROM_SIZE {
            return Err(SimError::runtime(format!(
                "ROM access out of bounds: address {}. Valid range is 0-{}.",
                address,
                ROM_SIZE - 1
            )));
        }
        Ok(self.rom[address])
    }

    pub fn program_size(&self) -> usize {
        self.program_size
    }

    // =========================================================================
    // RAM
    // =========================================================================

    pub fn read_ram(&self, address: Address) -> SimResult<Word> {
        if address >= RAM_SIZE {
            return Err(SimError::runtime(format!(
                "Cannot read RAM at address {}. Valid range is 0-32767 (32K). \
                 The A register may contain an out-of-bounds value.",
                address
            )));
        }
        Ok(self.ram[address])
    }

    pub fn write_ram(&mut self, address: Address, value: Word) -> SimResult {
        if address >= RAM_SIZE {
            return Err(SimError::runtime(format!(
                "Cannot write to RAM at address {}. Valid range is 0-32767 (32K). \
                 The A register may contain an out-of-bounds value.",
                address
            )));
        }

        self.ram[address] = value;

        if (SCREEN_BASE..SCREEN_BASE + SCREEN_SIZE).contains(&address) {
            self.screen_dirty = true;
        }
        Ok(())
    }

    // =========================================================================
    // I/O
    // =========================================================================

    pub fn get_pixel(&self, x: i32, y: i32) -> bool {
        if !(0..512).contains(&x) || !(0..256).contains(&y) {
            return false;
        }

        let word_offset = (y as Address) * 32 + (x as Address) / 16;
        let bit_offset = x as u32 % 16;
        (self.ram[SCREEN_BASE + word_offset] >> bit_offset) & 1 != 0
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, on: bool) {
        if !(0..512).contains(&x) || !(0..256).contains(&y) {
            return;
        }

        let word_offset = (y as Address) * 32 + (x as Address) / 16;
        let bit_offset = x as u32 % 16;
        let addr = SCREEN_BASE + word_offset;
        if on {
            self.ram[addr] |= 1 << bit_offset;
        } else {
            self.ram[addr] &= !(1 << bit_offset);
        }
        self.screen_dirty = true;
    }

    pub fn screen_buffer(&self) -> &[Word] {
        &self.ram[SCREEN_BASE..SCREEN_BASE + SCREEN_SIZE]
    }

    pub fn keyboard(&self) -> Word {
        self.ram[KBD]
    }

    pub fn set_keyboard(&mut self, key_code: Word) {
        self.ram[KBD] = key_code;
    }

    pub fn screen_dirty(&self) -> bool {
        self.screen_dirty
    }

    pub fn clear_screen_dirty(&mut self) {
        self.screen_dirty = false;
    }

    // =========================================================================
    // Debugging
    // =========================================================================

    pub fn dump_state(&self) -> String {
        use std::fmt::Write as _;

        const REG_NAMES: [&str; 16] = [
            "SP", "LCL", "ARG", "THIS", "THAT", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12",
            "R13", "R14", "R15",
        ];

        let mut out = String::new();
        let _ = writeln!(out, "=== CPU Memory State ===");
        let _ = writeln!(out, "ROM: {} instructions loaded", self.program_size);

        let _ = writeln!(out, "\n--- Registers (RAM 0-15) ---");
        for (i, name) in REG_NAMES.iter().enumerate() {
            let _ = writeln!(out, "{:>4} = {:6}", name, self.ram[i]);
        }

        let sp = self.ram[SP] as Address;
        if sp > STACK_BASE {
            let _ = writeln!(out, "\n--- Stack (top 5) ---");
            for addr in (STACK_BASE..sp).rev().take(5) {
                let _ = writeln!(out, "[{}] = {}", addr, self.ram[addr]);
            }
        }

        let _ = writeln!(
            out,
            "\nScreen dirty: {}",
            if self.screen_dirty { "yes" } else { "no" }
        );
        let _ = writeln!(out, "Keyboard: {}", self.ram[KBD]);
        out
    }
}

fn parse_binary_line(line: &str, line_number: usize) -> SimResult<Word> {
    if line.len() != 16 {
        return Err(SimError::parse(
            "<rom>",
            line_number,
            format!(
                "Expected 16-bit binary instruction (16 characters of '0' and '1'), \
                 got {} characters: \"{}\"",
                line.len(),
                line
            ),
        ));
    }

    let mut result: Word = 0;
    for (i, c) in line.chars().enumerate() {
        match c {
            // bit 0 of the string is the most significant bit of the word
            '1' => result |= 1 << (15 - i),
            '0' => {}
            _ => {
                return Err(SimError::parse(
                    "<rom>",
                    line_number,
                    format!(
                        "Invalid character '{}' at position {}. \
                         Only '0' and '1' are allowed in .hack files.",
                        c,
                        i + 1
                    ),
                ));
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_rom_string() {
        let mut memory = CpuMemory::default();
        memory
            .load_rom_string("0000000000000101\n1110110000010000\n")
            .unwrap();

        assert_eq!(2, memory.program_size());
        assert_eq!(5, memory.read_rom(0).unwrap());
        assert_eq!(0b1110_1100_0001_0000, memory.read_rom(1).unwrap());
    }

    #[test]
    fn test_load_tolerates_blank_lines_and_trailing_whitespace() {
        let mut memory = CpuMemory::default();
        memory
            .load_rom_string("0000000000000001\r\n\n   \n0000000000000010  \n")
            .unwrap();

        assert_eq!(2, memory.program_size());
        assert_eq!(1, memory.read_rom(0).unwrap());
        assert_eq!(2, memory.read_rom(1).unwrap());
    }

    #[test]
    fn test_load_rejects_bad_characters_with_position() {
        let mut memory = CpuMemory::default();
        let result = memory.load_rom_string("0000000000000001\n0000000200000000\n");
        match result {
            Err(SimError::Parse { line, message, .. }) => {
                assert_eq!(2, line);
                assert!(message.contains("'2'"));
                assert!(message.contains("position 8"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_wrong_length_lines() {
        let mut memory = CpuMemory::default();
        let result = memory.load_rom_string("0101\n");
        assert!(matches!(result, Err(SimError::Parse { line: 1, .. })));
    }

    #[test]
    fn test_screen_writes_raise_dirty_flag() {
        let mut memory = CpuMemory::default();
        assert!(!memory.screen_dirty());

        memory.write_ram(1000, 1).unwrap();
        assert!(!memory.screen_dirty());

        memory.write_ram(SCREEN_BASE, 1).unwrap();
        assert!(memory.screen_dirty());

        memory.clear_screen_dirty();
        memory.write_ram(SCREEN_BASE + SCREEN_SIZE - 1, 1).unwrap();
        assert!(memory.screen_dirty());

        // one past the screen is the keyboard, not the screen
        memory.clear_screen_dirty();
        memory.write_ram(KBD, 1).unwrap();
        assert!(!memory.screen_dirty());
    }

    #[test]
    fn test_load_resets_dirty_flag() {
        let mut memory = CpuMemory::default();
        memory.write_ram(SCREEN_BASE, 1).unwrap();
        assert!(memory.screen_dirty());

        memory.load_rom_string("0000000000000000\n").unwrap();
        assert!(!memory.screen_dirty());
    }

    #[test]
    fn test_ram_bounds() {
        let mut memory = CpuMemory::default();
        assert!(memory.read_ram(RAM_SIZE).is_err());
        assert!(memory.write_ram(RAM_SIZE, 0).is_err());
        assert!(memory.read_ram(RAM_SIZE - 1).is_ok());
    }

    #[test]
    fn test_pixel_mapping() {
        let mut memory = CpuMemory::default();
        // pixel (x, y) is bit x%16 of word 16384 + 32*y + x/16
        memory.set_pixel(16, 1, true);
        assert_eq!(1, memory.read_ram(SCREEN_BASE + 33).unwrap());
        assert!(memory.get_pixel(16, 1));

        // out-of-range coordinates are silently ignored
        memory.set_pixel(700, 0, true);
        memory.set_pixel(0, -3, true);
    }
}
