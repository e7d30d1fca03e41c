use crate::definitions::*;
use crate::error::{SimError, SimResult};
use crate::simulators::vm::calls::CallFrame;
use crate::simulators::vm::command::Segment;

use std::collections::HashMap;
use std::fmt::Write as _;

/// The VM view of the simulated RAM: the stack, the eight segments and the
/// call frames. The raw layout is observable by VM programs, so every
/// mutation here also keeps the shadow call stack in step.
pub struct VmMemory {
    ram: Box<[Word; RAM_SIZE]>,
    call_stack: Vec<CallFrame>,
    static_bases: HashMap<String, Address>,
    next_static: Address,
}

impl Default for VmMemory {
    fn default() -> Self {
        let mut memory = Self {
            ram: Box::new([0; RAM_SIZE]),
            call_stack: Vec::new(),
            static_bases: HashMap::new(),
            next_static: STATIC_BASE,
        };
        memory.reset();
        memory
    }
}

impl VmMemory {
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.ram[SP] = STACK_BASE as Word;
        self.call_stack.clear();
        self.static_bases.clear();
        self.next_static = STATIC_BASE;
    }

    // =========================================================================
    // Stack operations
    // =========================================================================

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

    pub fn sp(&self) -> Word {
        self.ram[SP]
    }

    // =========================================================================
    // Segment access
    // =========================================================================

    pub fn read_segment(&self, segment: Segment, index: u16, file: &str) -> SimResult<Word> {
        if segment == Segment::Constant {
            return Ok(index);
        }
        let addr = self.segment_address(segment, index, file)?;
        Ok(self.ram[addr])
    }

    pub fn write_segment(
        &mut self,
        segment: Segment,
        index: u16,
        value: Word,
        file: &str,
    ) -> SimResult {
        if segment == Segment::Constant {
            return Err(SimError::runtime(
                "Cannot write to constant segment. \
                 Constants are read-only values, not memory locations.",
            ));
        }
        let addr = self.segment_address(segment, index, file)?;
        self.ram[addr] = value;
        Ok(())
    }

    fn segment_address(&self, segment: Segment, index: u16, file: &str) -> SimResult<Address> {
        let index = index as Address;
        let addr = match segment {
            Segment::Local => self.ram[LCL] as Address + index,
            Segment::Argument => self.ram[ARG] as Address + index,
            Segment::This => self.ram[THIS] as Address + index,
            Segment::That => self.ram[THAT] as Address + index,
            Segment::Temp => {
                if index >= TEMP_SIZE {
                    return Err(SimError::runtime(format!(
                        "Temp segment index out of bounds: {}. Valid range is 0-7.",
                        index
                    )));
                }
                TEMP_BASE + index
            }
            Segment::Pointer => {
                if index > 1 {
                    return Err(SimError::runtime(format!(
                        "Pointer segment index out of bounds: {}. \
                         Valid range is 0-1 (0=THIS, 1=THAT).",
                        index
                    )));
                }
                THIS + index
            }
            Segment::Static => {
                let base = self.static_bases.get(file).ok_or_else(|| {
                    SimError::runtime(format!(
                        "Static segment for file '{}' not initialized",
                        file
                    ))
                })?;
                base + index
            }
            Segment::Constant => {
                return Err(SimError::runtime("constant segment has no address"));
            }
        };

        if addr >= RAM_SIZE {
            return Err(SimError::runtime(format!(
                "Memory access out of bounds: {}. Valid range is 0-32767.",
                addr
            )));
        }
        Ok(addr)
    }

    /// Look up or allocate the static base for a source file.
    ///
    /// Each file gets a fixed stride of 16 words, handed out in first-query
    /// order starting at 16.
    pub fn static_base(&mut self, file: &str) -> SimResult<Address> {
        if let Some(base) = self.static_bases.get(file) {
            return Ok(*base);
        }

        let base = self.next_static;
        if base >= STACK_BASE {
            return Err(SimError::runtime(
                "Out of static variable space! Too many static variables across all files.",
            ));
        }

        self.static_bases.insert(file.to_string(), base);
        self.next_static += STATIC_STRIDE;
        Ok(base)
    }

    // =========================================================================
    // Direct RAM access
    // =========================================================================

    pub fn read_ram(&self, address: Address) -> SimResult<Word> {
        if address >= RAM_SIZE {
            return Err(SimError::runtime(format!(
                "Memory access out of bounds: {}. Valid range is 0-32767.",
                address
            )));
        }
        Ok(self.ram[address])
    }

    pub fn write_ram(&mut self, address: Address, value: Word) -> SimResult {
        if address >= RAM_SIZE {
            return Err(SimError::runtime(format!(
                "Memory write out of bounds: {}. Valid range is 0-32767.",
                address
            )));
        }
        self.ram[address] = value;
        Ok(())
    }

    // =========================================================================
    // Call frames
    // =========================================================================

    /// Enter a function: save the caller's pointers on the RAM stack, set up
    /// ARG and LCL, zero the locals, and mirror the frame on the shadow stack.
    ///
    /// The caller (or the bootstrap) has already pushed the arguments.
    pub fn push_frame(
        &mut self,
        return_address: usize,
        function_name: &str,
        n_args: u16,
        n_locals: u16,
    ) -> SimResult {
        let frame = CallFrame {
            return_address,
            function_name: function_name.to_string(),
            n_args,
            n_locals,
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
        if (n_args as Address + 5) > sp as Address {
            return Err(SimError::runtime(format!(
                "Call to '{}' expects {} arguments but the stack does not hold that many values",
                function_name, n_args
            )));
        }
        self.ram[ARG] = sp - n_args - 5;
        self.ram[LCL] = sp;

        for _ in 0..n_locals {
            self.push(0)?;
        }

        self.call_stack.push(frame);
        Ok(())
    }

    /// Leave the current function and return the saved return address.
    pub fn pop_frame(&mut self, return_value: Word) -> SimResult<usize> {
        if self.call_stack.is_empty() {
            return Err(SimError::runtime(
                "Attempted to return but no function is active. \
                 This usually means a 'return' without a matching 'call'.",
            ));
        }

        let frame_ptr = self.ram[LCL] as Address;
        if frame_ptr < 5 || frame_ptr >= RAM_SIZE {
            return Err(SimError::runtime(format!(
                "Corrupt call frame: LCL = {}",
                frame_ptr
            )));
        }

        // The return address must be read before the return value is
        // written: with zero arguments, ARG[0] aliases frame_ptr - 5.
        let ret_addr = self.ram[frame_ptr - 5] as usize;
        let arg_addr = self.ram[ARG] as Address;
        if arg_addr >= RAM_SIZE {
            return Err(SimError::runtime(format!(
                "Corrupt call frame: ARG = {}",
                arg_addr
            )));
        }

        self.ram[THAT] = self.ram[frame_ptr - 1];
        self.ram[THIS] = self.ram[frame_ptr - 2];
        self.ram[ARG] = self.ram[frame_ptr - 3];
        self.ram[LCL] = self.ram[frame_ptr - 4];

        self.ram[arg_addr] = return_value;
        self.ram[SP] = (arg_addr + 1) as Word;

        self.call_stack.pop();
        Ok(ret_addr)
    }

    pub fn call_stack(&self) -> &[CallFrame] {
        &self.call_stack
    }

    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.call_stack.last()
    }

    pub fn current_function(&self) -> Option<&str> {
        self.call_stack.last().map(|f| f.function_name.as_str())
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

    // =========================================================================
    // Debugging
    // =========================================================================

    pub fn stack_contents(&self) -> Vec<Word> {
        let sp = self.ram[SP] as Address;
        self.ram[STACK_BASE..sp.max(STACK_BASE)].to_vec()
    }

    pub fn segment_contents(&self, segment: Segment, count: usize) -> Vec<Word> {
        let base = match segment {
            Segment::Local => self.ram[LCL] as Address,
            Segment::Argument => self.ram[ARG] as Address,
            Segment::This => self.ram[THIS] as Address,
            Segment::That => self.ram[THAT] as Address,
            Segment::Temp => TEMP_BASE,
            Segment::Pointer => THIS,
            Segment::Static => STATIC_BASE,
            Segment::Constant => return Vec::new(),
        };

        (0..count)
            .map_while(|i| self.ram.get(base + i).copied())
            .collect()
    }

    pub fn dump_state(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "=== VM Memory State ===");
        let _ = writeln!(out, "SP   = {:5}", self.ram[SP]);
        let _ = writeln!(out, "LCL  = {:5}", self.ram[LCL]);
        let _ = writeln!(out, "ARG  = {:5}", self.ram[ARG]);
        let _ = writeln!(out, "THIS = {:5}", self.ram[THIS]);
        let _ = writeln!(out, "THAT = {:5}", self.ram[THAT]);

        let _ = writeln!(out, "\n=== Stack ===");
        let stack = self.stack_contents();
        if stack.is_empty() {
            let _ = writeln!(out, "(empty)");
        } else {
            for (i, value) in stack.iter().enumerate() {
                let _ = writeln!(out, "[{:3}] {}", i, value);
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
                    i, frame.function_name, frame.n_args, frame.n_locals
                );
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_round_trip() {
        let mut memory = VmMemory::default();
        memory.push(42).unwrap();
        memory.push(7).unwrap();

        assert_eq!(7, memory.peek().unwrap());
        assert_eq!(7, memory.pop().unwrap());
        assert_eq!(42, memory.pop().unwrap());
        assert_eq!(STACK_BASE as Word, memory.sp());
    }

    #[test]
    fn test_stack_underflow() {
        let mut memory = VmMemory::default();
        assert!(matches!(memory.pop(), Err(SimError::Runtime { .. })));
    }

    #[test]
    fn test_stack_overflow() {
        let mut memory = VmMemory::default();
        for _ in STACK_BASE..=STACK_MAX {
            memory.push(0).unwrap();
        }
        assert!(matches!(memory.push(0), Err(SimError::Runtime { .. })));
    }

    #[test]
    fn test_segment_addressing() {
        let mut memory = VmMemory::default();
        memory.write_ram(LCL, 300).unwrap();
        memory.write_ram(THIS, 3000).unwrap();

        memory.write_segment(Segment::Local, 2, 11, "").unwrap();
        assert_eq!(11, memory.read_ram(302).unwrap());

        memory.write_segment(Segment::Temp, 6, 22, "").unwrap();
        assert_eq!(22, memory.read_ram(TEMP_BASE + 6).unwrap());

        // pointer 0 aliases THIS
        memory.write_segment(Segment::Pointer, 0, 2048, "").unwrap();
        assert_eq!(2048, memory.read_ram(THIS).unwrap());

        assert_eq!(17, memory.read_segment(Segment::Constant, 17, "").unwrap());
        assert!(memory.write_segment(Segment::Constant, 0, 1, "").is_err());
    }

    #[test]
    fn test_static_bases_advance_by_stride() {
        let mut memory = VmMemory::default();
        assert_eq!(16, memory.static_base("Main").unwrap());
        assert_eq!(32, memory.static_base("Math").unwrap());
        // repeated query is stable
        assert_eq!(16, memory.static_base("Main").unwrap());

        memory.write_segment(Segment::Static, 1, 99, "Math").unwrap();
        assert_eq!(99, memory.read_ram(33).unwrap());
    }

    #[test]
    fn test_static_cursor_exhaustion() {
        let mut memory = VmMemory::default();
        for i in 0..15 {
            memory.static_base(&format!("File{}", i)).unwrap();
        }
        assert!(memory.static_base("OneTooMany").is_err());
    }

    #[test]
    fn test_push_frame_layout() {
        let mut memory = VmMemory::default();
        memory.push(7).unwrap(); // two args at 256/257
        memory.push(8).unwrap();

        memory.push_frame(12, "Math.add", 2, 1).unwrap();

        // [retAddr][savedLCL][savedARG][savedTHIS][savedTHAT] then one local
        assert_eq!(12, memory.read_ram(258).unwrap());
        assert_eq!(256, memory.read_ram(ARG).unwrap() as usize);
        assert_eq!(263, memory.read_ram(LCL).unwrap() as usize);
        assert_eq!(264, memory.sp() as usize);
        assert_eq!(0, memory.read_ram(263).unwrap()); // zeroed local
        assert_eq!(1, memory.call_stack().len());
    }

    #[test]
    fn test_balanced_call_return_restores_pointers() {
        let mut memory = VmMemory::default();
        memory.write_ram(LCL, 1000).unwrap();
        memory.write_ram(ARG, 1100).unwrap();
        memory.write_ram(THIS, 3000).unwrap();
        memory.write_ram(THAT, 3010).unwrap();

        memory.push(5).unwrap(); // one argument
        let sp_before = memory.sp();

        memory.push_frame(99, "F.g", 1, 0).unwrap();
        let ret = memory.pop_frame(123).unwrap();

        assert_eq!(99, ret);
        assert_eq!(1000, memory.read_ram(LCL).unwrap());
        assert_eq!(1100, memory.read_ram(ARG).unwrap());
        assert_eq!(3000, memory.read_ram(THIS).unwrap());
        assert_eq!(3010, memory.read_ram(THAT).unwrap());
        // the argument slot was replaced with the return value
        assert_eq!(sp_before, memory.sp());
        assert_eq!(123, memory.peek().unwrap());
        assert!(memory.call_stack().is_empty());
    }

    #[test]
    fn test_return_with_zero_args_saves_ret_before_overwrite() {
        let mut memory = VmMemory::default();

        // with n_args == 0, ARG points at the return-address slot itself
        memory.push_frame(42, "F.noargs", 0, 0).unwrap();
        let ret = memory.pop_frame(7).unwrap();

        assert_eq!(42, ret);
        assert_eq!(7, memory.peek().unwrap());
    }

    #[test]
    fn test_pop_frame_on_empty_call_stack() {
        let mut memory = VmMemory::default();
        assert!(matches!(
            memory.pop_frame(0),
            Err(SimError::Runtime { .. })
        ));
    }

    #[test]
    fn test_pixel_access() {
        let mut memory = VmMemory::default();
        memory.set_pixel(17, 3, true);
        // bit 1 of word SCREEN_BASE + 3*32 + 1
        assert_eq!(0b10, memory.read_ram(SCREEN_BASE + 97).unwrap());
        assert!(memory.get_pixel(17, 3));

        memory.set_pixel(17, 3, false);
        assert!(!memory.get_pixel(17, 3));

        // out of range is silently ignored
        memory.set_pixel(512, 0, true);
        memory.set_pixel(-1, 0, true);
        assert!(!memory.get_pixel(512, 0));
    }
}
