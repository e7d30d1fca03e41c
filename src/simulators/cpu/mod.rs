pub mod instruction;
pub mod memory;

use crate::definitions::{Address, Word};
use crate::error::SimError;
use crate::simulators::{ExecState, PauseReason};
use instruction::{Computation, Instruction, JumpCondition};
use memory::CpuMemory;

use log::debug;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

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
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The Hack CPU: fetch-decode-execute over ROM with the A, D and PC
/// registers. The hot loop extracts instruction bits inline; the decoded
/// [`Instruction`] form is for inspection and disassembly only.
pub struct CpuEngine {
    a_register: Word,
    d_register: Word,
    pc: Address,
    memory: CpuMemory,
    state: ExecState,
    pause_reason: PauseReason,
    pause_requested: AtomicBool,
    stats: CpuStats,
    breakpoints: HashSet<Address>,
    error_message: String,
    error_location: Address,
    since_resume: u64,
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
            pause_requested: AtomicBool::new(false),
            stats: CpuStats::default(),
            breakpoints: HashSet::new(),
            error_message: String::new(),
            error_location: 0,
            since_resume: 0,
        }
    }
}

impl CpuEngine {
    // =========================================================================
    // Loading
    // =========================================================================

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), SimError> {
        self.memory.load_rom_file(path)?;
        self.after_load();
        Ok(())
    }

    pub fn load_string(&mut self, hack_text: &str) -> Result<(), SimError> {
        self.memory.load_rom_string(hack_text)?;
        self.after_load();
        Ok(())
    }

    pub fn load(&mut self, instructions: &[Word]) -> Result<(), SimError> {
        self.memory.load_rom(instructions)?;
        self.after_load();
        Ok(())
    }

    fn after_load(&mut self) {
        self.a_register = 0;
        self.d_register = 0;
        self.pc = 0;
        self.state = ExecState::Ready;
        self.pause_reason = PauseReason::None;
        self.stats.reset();
        self.error_message.clear();
        self.error_location = 0;
        debug!("cpu ready, {} instructions", self.memory.program_size());
    }

    pub fn reset(&mut self) {
        self.memory.reset();
        self.a_register = 0;
        self.d_register = 0;
        self.pc = 0;
        self.state = ExecState::Ready;
        self.pause_reason = PauseReason::None;
        self.pause_requested.store(false, Ordering::Relaxed);
        self.stats.reset();
        self.error_message.clear();
        self.error_location = 0;
        self.since_resume = 0;
    }

    // =========================================================================
    // Execution control
    // =========================================================================

    pub fn run(&mut self) -> ExecState {
        if !self.enter_running() {
            return self.state;
        }

        while self.state == ExecState::Running {
            if !self.execute_instruction() {
                break;
            }
        }

        self.state
    }

    pub fn run_for(&mut self, max_instructions: u64) -> ExecState {
        if !self.enter_running() {
            return self.state;
        }

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

        self.state
    }

    pub fn step(&mut self) -> ExecState {
        if !self.enter_running() {
            return self.state;
        }

        self.execute_instruction();

        if self.state == ExecState::Running {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::StepComplete;
        }

        self.state
    }

    /// Request a cooperative pause; honored at the next instruction boundary.
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::Relaxed);
    }

    fn enter_running(&mut self) -> bool {
        if self.state != ExecState::Ready && self.state != ExecState::Paused {
            return false;
        }
        self.state = ExecState::Running;
        self.pause_reason = PauseReason::None;
        self.since_resume = 0;
        true
    }

    // =========================================================================
    // Execution core
    // =========================================================================

    fn execute_instruction(&mut self) -> bool {
        if self.pc >= self.memory.program_size() {
            self.state = ExecState::Halted;
            return false;
        }

        if self.pause_requested.swap(false, Ordering::Relaxed) {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::UserRequest;
            return false;
        }

        // skip the breakpoint check on the first instruction after a resume
        // so we don't re-trip on the address we're paused at
        if self.since_resume > 0 && self.breakpoints.contains(&self.pc) {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::Breakpoint;
            return false;
        }

        let raw = match self.memory.read_rom(self.pc) {
            Ok(word) => word,
            Err(e) => {
                self.record_error(e);
                return false;
            }
        };

        if raw & 0x8000 == 0 {
            // ---- A-instruction ----
            self.a_register = raw & 0x7FFF;
            self.pc += 1;
            self.stats.a_instruction_count += 1;
        } else {
            // ---- C-instruction: 111accccccdddjjj ----
            let comp_bits = ((raw >> 6) & 0x7F) as u8;
            let dest_bits = ((raw >> 3) & 0x7) as u8;
            let jump_bits = (raw & 0x7) as u8;

            let am_val = if comp_bits & 0x40 != 0 {
                // a-bit set: operand is M = RAM[A]
                self.stats.memory_reads += 1;
                match self.memory.read_ram(self.a_register as Address) {
                    Ok(value) => value,
                    Err(e) => {
                        self.record_error(e);
                        return false;
                    }
                }
            } else {
                self.a_register
            };

            let alu_output = match compute_alu(comp_bits, self.d_register, am_val) {
                Some(value) => value,
                None => {
                    self.record_error(SimError::runtime_at(
                        self.pc,
                        format!(
                            "Invalid ALU computation code at ROM[{}]. \
                             The instruction may be corrupted.",
                            self.pc
                        ),
                    ));
                    return false;
                }
            };

            // the M store goes to RAM[A] as it was before this instruction
            let original_a = self.a_register;

            if dest_bits & 0b100 != 0 {
                self.a_register = alu_output;
            }
            if dest_bits & 0b010 != 0 {
                self.d_register = alu_output;
            }
            if dest_bits & 0b001 != 0 {
                if let Err(e) = self.memory.write_ram(original_a as Address, alu_output) {
                    self.record_error(e);
                    return false;
                }
                self.stats.memory_writes += 1;
            }

            if JumpCondition::from_bits(jump_bits).taken(alu_output) {
                self.pc = self.a_register as Address;
                self.stats.jump_count += 1;
            } else {
                self.pc += 1;
            }

            self.stats.c_instruction_count += 1;
        }

        self.stats.instructions_executed += 1;
        self.since_resume += 1;

        if self.pc >= self.memory.program_size() {
            self.state = ExecState::Halted;
            return false;
        }

        true
    }

    fn record_error(&mut self, e: SimError) {
        self.error_message = e.to_string();
        self.error_location = e.location().unwrap_or(self.pc);
        self.state = ExecState::Error;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn get_a(&self) -> Word {
        self.a_register
    }

    pub fn get_d(&self) -> Word {
        self.d_register
    }

    pub fn get_pc(&self) -> Address {
        self.pc
    }

    pub fn get_state(&self) -> ExecState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ExecState::Running
    }

    pub fn get_pause_reason(&self) -> PauseReason {
        self.pause_reason
    }

    pub fn get_stats(&self) -> &CpuStats {
        &self.stats
    }

    pub fn get_error_message(&self) -> &str {
        &self.error_message
    }

    pub fn get_error_location(&self) -> Address {
        self.error_location
    }

    pub fn read_ram(&self, address: Address) -> Result<Word, SimError> {
        self.memory.read_ram(address)
    }

    pub fn write_ram(&mut self, address: Address, value: Word) -> Result<(), SimError> {
        self.memory.write_ram(address, value)
    }

    pub fn read_rom(&self, address: Address) -> Result<Word, SimError> {
        self.memory.read_rom(address)
    }

    pub fn rom_size(&self) -> usize {
        self.memory.program_size()
    }

    pub fn memory(&self) -> &CpuMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut CpuMemory {
        &mut self.memory
    }

    /// Decoded form of the instruction at the PC; `@0` once past the program.
    pub fn get_current_instruction(&self) -> Instruction {
        if self.pc >= self.memory.program_size() {
            return Instruction::A(0);
        }
        instruction::decode(self.rom_word(self.pc)).unwrap_or(Instruction::A(0))
    }

    pub fn disassemble(&self, rom_address: Address) -> String {
        instruction::disassemble(self.rom_word(rom_address))
    }

    pub fn disassemble_range(&self, start: Address, end: Address) -> Vec<String> {
        (start..end.min(self.memory.program_size()))
            .map(|addr| self.disassemble(addr))
            .collect()
    }

    fn rom_word(&self, address: Address) -> Word {
        self.memory.read_rom(address).unwrap_or(0)
    }

    // =========================================================================
    // Breakpoints
    // =========================================================================

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

    pub fn get_breakpoints(&self) -> Vec<Address> {
        let mut list: Vec<Address> = self.breakpoints.iter().copied().collect();
        list.sort_unstable();
        list
    }
}

/// Evaluate one of the 28 ALU computations. Operands are reinterpreted as
/// signed 16-bit so the sign-dependent results come out right.
fn compute_alu(comp_bits: u8, d_val: Word, am_val: Word) -> Option<Word> {
    use Computation::*;

    let d = d_val as i16;
    let am = am_val as i16;

    let result = match Computation::from_bits(comp_bits)? {
        Zero => 0,
        One => 1,
        NegOne => -1,
        D => d,
        A | M => am,
        NotD => !d,
        NotA | NotM => !am,
        NegD => d.wrapping_neg(),
        NegA | NegM => am.wrapping_neg(),
        DPlus1 => d.wrapping_add(1),
        APlus1 | MPlus1 => am.wrapping_add(1),
        DMinus1 => d.wrapping_sub(1),
        AMinus1 | MMinus1 => am.wrapping_sub(1),
        DPlusA | DPlusM => d.wrapping_add(am),
        DMinusA | DMinusM => d.wrapping_sub(am),
        AMinusD | MMinusD => am.wrapping_sub(d),
        DAndA | DAndM => d & am,
        DOrA | DOrM => d | am,
    };

    Some(result as Word)
}
