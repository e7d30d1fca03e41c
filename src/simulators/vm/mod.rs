pub mod calls;
pub mod command;
pub mod memory;

use crate::definitions::Word;
use crate::error::SimError;
use crate::simulators::{ExecState, PauseReason};
use calls::CallFrame;
use command::{ArithmeticOp, Segment, VmCommand, VmProgram};
use memory::VmMemory;

use log::debug;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    pub instructions_executed: u64,
    pub arithmetic_count: u64,
    pub push_count: u64,
    pub pop_count: u64,
    pub call_count: u64,
    pub return_count: u64,
}

impl VmStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The stack-machine interpreter over a parsed [`VmProgram`].
///
/// The engine owns its memory; the host drives it through run/step calls
/// and inspects state in between. The pause flag is the only field another
/// execution context may touch.
pub struct VmEngine {
    // immutable after load; shared into the dispatch loop by reference count
    program: Arc<VmProgram>,
    memory: VmMemory,
    pc: usize,
    state: ExecState,
    pause_reason: PauseReason,
    pause_requested: AtomicBool,
    stats: VmStats,
    entry_point: Option<String>,
    breakpoints: HashSet<usize>,
    error_message: String,
    error_location: usize,
    // commands executed since the last resume, for the breakpoint
    // no-retrigger rule
    since_resume: u64,
}

impl Default for VmEngine {
    fn default() -> Self {
        Self {
            program: Arc::new(VmProgram::default()),
            memory: VmMemory::default(),
            pc: 0,
            state: ExecState::Ready,
            pause_reason: PauseReason::None,
            pause_requested: AtomicBool::new(false),
            stats: VmStats::default(),
            entry_point: None,
            breakpoints: HashSet::new(),
            error_message: String::new(),
            error_location: 0,
            since_resume: 0,
        }
    }
}

impl VmEngine {
    // =========================================================================
    // Loading
    // =========================================================================

    pub fn load_string(&mut self, source: &str, file_name: &str) -> Result<(), SimError> {
        use crate::parse::bytecode::{Parser, SourceFile};
        let program = Parser::new(vec![SourceFile::new(file_name, source)]).parse()?;
        self.load(program);
        Ok(())
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let program = crate::parse::bytecode::parse_file(path)?;
        self.load(program);
        Ok(())
    }

    pub fn load_directory(&mut self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let program = crate::parse::bytecode::parse_directory(path)?;
        self.load(program);
        Ok(())
    }

    pub fn load(&mut self, program: VmProgram) {
        debug!("loaded vm program with {} commands", program.commands.len());
        self.program = Arc::new(program);
        self.reset();
    }

    pub fn set_entry_point(&mut self, function_name: impl Into<String>) {
        self.entry_point = Some(function_name.into());
    }

    /// Rewind all mutable state. The loaded program and the breakpoint set
    /// survive a reset.
    pub fn reset(&mut self) {
        self.memory.reset();
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
            if !self.execute_command() {
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
        if !self.enter_running() {
            return self.state;
        }

        self.execute_command();

        if self.state == ExecState::Running {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::StepComplete;
        }

        self.state
    }

    /// Run until the call depth returns to its value at entry and the PC has
    /// left the starting command.
    pub fn step_over(&mut self) -> ExecState {
        if !self.enter_running() {
            return self.state;
        }

        let initial_depth = self.memory.call_stack().len();
        let initial_pc = self.pc;

        loop {
            if !self.execute_command() {
                break;
            }
            if self.memory.call_stack().len() <= initial_depth && self.pc != initial_pc {
                break;
            }
        }

        if self.state == ExecState::Running {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::StepComplete;
        }

        self.state
    }

    /// Run until the call depth decreases below its value at entry.
    pub fn step_out(&mut self) -> ExecState {
        if !self.enter_running() {
            return self.state;
        }

        let initial_depth = self.memory.call_stack().len();

        while self.state == ExecState::Running {
            if !self.execute_command() {
                break;
            }
            if self.memory.call_stack().len() < initial_depth {
                self.state = ExecState::Paused;
                self.pause_reason = PauseReason::FunctionExit;
                break;
            }
        }

        self.state
    }

    /// Request a cooperative pause. May be called from another thread; the
    /// flag is consumed at the next command boundary.
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::Relaxed);
    }

    fn enter_running(&mut self) -> bool {
        if self.state == ExecState::Ready {
            self.initialize_execution();
        }
        if self.state != ExecState::Paused && self.state != ExecState::Running {
            return false;
        }

        self.state = ExecState::Running;
        self.pause_reason = PauseReason::None;
        self.since_resume = 0;
        true
    }

    /// Select the entry point and set up the bootstrap frame.
    fn initialize_execution(&mut self) {
        self.memory.reset();

        let entry = match &self.entry_point {
            Some(name) => Some(name.clone()),
            None if self.program.functions.contains_key("Sys.init") => {
                Some("Sys.init".to_string())
            }
            None if self.program.functions.contains_key("Main.main") => {
                Some("Main.main".to_string())
            }
            None => None,
        };

        if let Some(entry) = entry {
            let Some(&entry_pc) = self.program.functions.get(&entry) else {
                self.set_error(format!("Entry point function '{}' not found", entry));
                return;
            };

            self.pc = entry_pc;
            let n_locals = self.function_locals(entry_pc);

            // return address 0 signals halt when the entry function returns
            if let Err(e) = self.memory.push_frame(0, &entry, 0, n_locals) {
                self.record_error(e);
                return;
            }
            debug!("bootstrapped entry function '{}' at {}", entry, entry_pc);
        } else {
            self.pc = 0;
        }

        // allocate every file's static range up front, in load order
        let files: Vec<String> = self.program.source_files.clone();
        for file in &files {
            if let Err(e) = self.memory.static_base(file) {
                self.record_error(e);
                return;
            }
        }

        self.state = ExecState::Paused;
        self.pause_reason = PauseReason::None;
    }

    fn function_locals(&self, function_pc: usize) -> u16 {
        match self.program.commands.get(function_pc) {
            Some(VmCommand::Function { n_locals, .. }) => *n_locals,
            _ => 0,
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn execute_command(&mut self) -> bool {
        if self.pc >= self.program.commands.len() {
            self.state = ExecState::Halted;
            return false;
        }

        if self.pause_requested.swap(false, Ordering::Relaxed) {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::UserRequest;
            return false;
        }

        // never re-trip on the command we just resumed from
        if self.since_resume > 0 && self.breakpoints.contains(&self.pc) {
            self.state = ExecState::Paused;
            self.pause_reason = PauseReason::Breakpoint;
            return false;
        }

        let program = Arc::clone(&self.program);
        let result = match &program.commands[self.pc] {
            VmCommand::Arithmetic { op, .. } => self.execute_arithmetic(*op),
            VmCommand::Push {
                segment,
                index,
                file,
                ..
            } => self.execute_push(*segment, *index, file),
            VmCommand::Pop {
                segment,
                index,
                file,
                ..
            } => self.execute_pop(*segment, *index, file),
            VmCommand::Label { .. } | VmCommand::Function { .. } => {
                self.pc += 1;
                Ok(())
            }
            VmCommand::Goto { label, .. } => self.execute_goto(label),
            VmCommand::IfGoto { label, .. } => self.execute_if_goto(label),
            VmCommand::Call { name, n_args, .. } => self.execute_call(name, *n_args),
            VmCommand::Return { .. } => self.execute_return(),
        };

        if let Err(e) = result {
            self.record_error(e);
            return false;
        }

        self.stats.instructions_executed += 1;
        self.since_resume += 1;
        true
    }

    fn execute_arithmetic(&mut self, op: ArithmeticOp) -> Result<(), SimError> {
        self.stats.arithmetic_count += 1;

        use ArithmeticOp::*;
        match op {
            Neg => {
                let y = self.memory.pop()?;
                self.memory.push((y as i16).wrapping_neg() as Word)?;
            }
            Not => {
                let y = self.memory.pop()?;
                self.memory.push(!y)?;
            }
            _ => {
                let y = self.memory.pop()?;
                let x = self.memory.pop()?;
                let result = match op {
                    Add => (x as i16).wrapping_add(y as i16) as Word,
                    Sub => (x as i16).wrapping_sub(y as i16) as Word,
                    And => x & y,
                    Or => x | y,
                    Eq => bool_word(x == y),
                    Gt => bool_word((x as i16) > (y as i16)),
                    Lt => bool_word((x as i16) < (y as i16)),
                    Neg | Not => unreachable!(),
                };
                self.memory.push(result)?;
            }
        }

        self.pc += 1;
        Ok(())
    }

    fn execute_push(&mut self, segment: Segment, index: u16, file: &str) -> Result<(), SimError> {
        self.stats.push_count += 1;
        let value = self.memory.read_segment(segment, index, file)?;
        self.memory.push(value)?;
        self.pc += 1;
        Ok(())
    }

    fn execute_pop(&mut self, segment: Segment, index: u16, file: &str) -> Result<(), SimError> {
        self.stats.pop_count += 1;
        let value = self.memory.pop()?;
        self.memory.write_segment(segment, index, value, file)?;
        self.pc += 1;
        Ok(())
    }

    fn execute_goto(&mut self, label: &str) -> Result<(), SimError> {
        self.pc = self.lookup_label(label)?;
        Ok(())
    }

    fn execute_if_goto(&mut self, label: &str) -> Result<(), SimError> {
        let condition = self.memory.pop()?;
        if condition != 0 {
            self.pc = self.lookup_label(label)?;
        } else {
            self.pc += 1;
        }
        Ok(())
    }

    fn execute_call(&mut self, name: &str, n_args: u16) -> Result<(), SimError> {
        self.stats.call_count += 1;

        let target = self.lookup_function(name)?;
        let n_locals = self.function_locals(target);
        self.memory.push_frame(self.pc + 1, name, n_args, n_locals)?;
        self.pc = target;
        Ok(())
    }

    fn execute_return(&mut self) -> Result<(), SimError> {
        self.stats.return_count += 1;

        let return_value = self.memory.pop()?;
        let return_address = self.memory.pop_frame(return_value)?;

        // return address 0 means we just left the bootstrap frame
        if return_address == 0 {
            self.state = ExecState::Halted;
            return Ok(());
        }

        self.pc = return_address;
        Ok(())
    }

    fn lookup_label(&self, label: &str) -> Result<usize, SimError> {
        if let Some(function) = self.memory.current_function() {
            let scoped = format!("{}${}", function, label);
            if let Some(&target) = self.program.labels.get(&scoped) {
                return Ok(target);
            }
        }

        if let Some(&target) = self.program.labels.get(label) {
            return Ok(target);
        }

        Err(SimError::runtime_at(
            self.pc,
            format!(
                "Undefined label: '{0}'. Make sure the label is defined \
                 in the current function with 'label {0}'.",
                label
            ),
        ))
    }

    fn lookup_function(&self, name: &str) -> Result<usize, SimError> {
        self.program.functions.get(name).copied().ok_or_else(|| {
            SimError::runtime_at(
                self.pc,
                format!(
                    "Undefined function: '{0}'. Make sure the function is defined with \
                     'function {0} <nLocals>' and the .vm file containing it has been loaded.",
                    name
                ),
            )
        })
    }

    fn record_error(&mut self, e: SimError) {
        self.error_message = e.to_string();
        self.error_location = e.location().unwrap_or(self.pc);
        self.state = ExecState::Error;
    }

    fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = message.into();
        self.error_location = self.pc;
        self.state = ExecState::Error;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn get_state(&self) -> ExecState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ExecState::Running
    }

    pub fn get_pause_reason(&self) -> PauseReason {
        self.pause_reason
    }

    pub fn get_pc(&self) -> usize {
        self.pc
    }

    pub fn get_command(&self, index: usize) -> Option<&VmCommand> {
        self.program.commands.get(index)
    }

    pub fn get_current_command(&self) -> Option<&VmCommand> {
        self.get_command(self.pc)
    }

    pub fn command_count(&self) -> usize {
        self.program.commands.len()
    }

    pub fn current_function(&self) -> Option<&str> {
        self.memory.current_function()
    }

    pub fn call_stack(&self) -> &[CallFrame] {
        self.memory.call_stack()
    }

    pub fn get_stats(&self) -> &VmStats {
        &self.stats
    }

    pub fn get_stack(&self) -> Vec<Word> {
        self.memory.stack_contents()
    }

    pub fn get_sp(&self) -> Word {
        self.memory.sp()
    }

    pub fn get_segment(&self, segment: Segment, index: u16, file: &str) -> Result<Word, SimError> {
        self.memory.read_segment(segment, index, file)
    }

    pub fn read_ram(&self, address: usize) -> Result<Word, SimError> {
        self.memory.read_ram(address)
    }

    pub fn write_ram(&mut self, address: usize, value: Word) -> Result<(), SimError> {
        self.memory.write_ram(address, value)
    }

    pub fn memory(&self) -> &VmMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut VmMemory {
        &mut self.memory
    }

    pub fn get_error_message(&self) -> &str {
        &self.error_message
    }

    pub fn get_error_location(&self) -> usize {
        self.error_location
    }

    // =========================================================================
    // Breakpoints
    // =========================================================================

    pub fn add_breakpoint(&mut self, command_index: usize) {
        self.breakpoints.insert(command_index);
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

    pub fn get_breakpoints(&self) -> Vec<usize> {
        let mut list: Vec<usize> = self.breakpoints.iter().copied().collect();
        list.sort_unstable();
        list
    }
}

fn bool_word(b: bool) -> Word {
    if b {
        crate::definitions::TRUE
    } else {
        crate::definitions::FALSE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_for(source: &str) -> VmEngine {
        let mut engine = VmEngine::default();
        engine.load_string(source, "Main.vm").unwrap();
        engine
    }

    #[test]
    fn test_math_add_via_bootstrap() {
        let src = "
            function Sys.init 0
            push constant 7
            push constant 8
            call Math.add 2
            return
            function Math.add 0
            push argument 0
            push argument 1
            add
            return";

        let mut engine = engine_for(src);
        assert_eq!(ExecState::Halted, engine.run());
        assert_eq!(15, engine.memory().peek().unwrap());
    }

    #[test]
    fn test_comparisons_are_signed_and_push_true_words() {
        let src = "
            function Main.main 0
            push constant 1
            neg
            push constant 1
            lt
            return";

        let mut engine = engine_for(src);
        assert_eq!(ExecState::Halted, engine.run());
        // -1 < 1 is true, and true is 0xFFFF
        assert_eq!(0xFFFF, engine.memory().peek().unwrap());
    }

    #[test]
    fn test_arithmetic_wraps_modulo_two_pow_16() {
        let src = "
            function Main.main 0
            push constant 32767
            push constant 1
            add
            return";

        let mut engine = engine_for(src);
        assert_eq!(ExecState::Halted, engine.run());
        assert_eq!(0x8000, engine.memory().peek().unwrap());
    }

    #[test]
    fn test_label_scoping_and_branching() {
        let src = "
            function Main.main 0
            push constant 0
            pop local 0
            label LOOP
            push local 0
            push constant 10
            lt
            not
            if-goto END
            push local 0
            push constant 1
            add
            pop local 0
            goto LOOP
            label END
            push local 0
            return";

        // locals live above the frame, so Main.main needs one
        let src = src.replacen("function Main.main 0", "function Main.main 1", 1);
        let mut engine = engine_for(&src);
        assert_eq!(ExecState::Halted, engine.run());
        assert_eq!(10, engine.memory().peek().unwrap());
    }

    #[test]
    fn test_entry_point_priority() {
        let src = "
            function Main.main 0
            push constant 1
            return
            function Sys.init 0
            push constant 2
            return";

        let mut engine = engine_for(src);
        engine.run();
        // Sys.init wins over Main.main
        assert_eq!(2, engine.memory().peek().unwrap());

        let mut engine = engine_for(src);
        engine.set_entry_point("Main.main");
        engine.run();
        assert_eq!(1, engine.memory().peek().unwrap());
    }

    #[test]
    fn test_missing_entry_point_is_an_error() {
        let mut engine = engine_for("push constant 1");
        engine.set_entry_point("No.such");
        assert_eq!(ExecState::Error, engine.step());
        assert!(engine.get_error_message().contains("No.such"));
    }

    #[test]
    fn test_no_entry_function_starts_at_zero() {
        let mut engine = engine_for("push constant 3\npush constant 4\nadd");
        assert_eq!(ExecState::Halted, engine.run());
        assert_eq!(7, engine.memory().peek().unwrap());
        assert!(engine.call_stack().is_empty());
    }

    #[test]
    fn test_undefined_function_error_cites_name() {
        let src = "
            function Main.main 0
            call Does.notExist 0
            return";

        let mut engine = engine_for(src);
        assert_eq!(ExecState::Error, engine.run());
        assert!(engine.get_error_message().contains("Does.notExist"));
    }

    #[test]
    fn test_undefined_label_error_cites_name() {
        let src = "
            function Main.main 0
            goto NOWHERE";

        let mut engine = engine_for(src);
        assert_eq!(ExecState::Error, engine.run());
        assert!(engine.get_error_message().contains("NOWHERE"));
        assert!(engine.get_error_message().contains("label NOWHERE"));
    }

    #[test]
    fn test_breakpoint_pauses_before_execution_and_resumes() {
        let src = "
            function Main.main 0
            push constant 1
            push constant 2
            add
            return";

        let mut engine = engine_for(src);
        engine.add_breakpoint(3); // the add
        assert_eq!(ExecState::Paused, engine.run());
        assert_eq!(PauseReason::Breakpoint, engine.get_pause_reason());
        assert_eq!(3, engine.get_pc());
        // the add has not executed yet
        assert_eq!(2, engine.memory().peek().unwrap());

        // resuming must not immediately re-trip the same breakpoint
        assert_eq!(ExecState::Halted, engine.run());
        assert_eq!(3, engine.memory().peek().unwrap());
    }

    #[test]
    fn test_run_for_pauses_with_user_request() {
        let src = "
            function Main.main 0
            label SPIN
            goto SPIN";

        let mut engine = engine_for(src);
        assert_eq!(ExecState::Paused, engine.run_for(100));
        assert_eq!(PauseReason::UserRequest, engine.get_pause_reason());
        assert_eq!(100, engine.get_stats().instructions_executed);
    }

    #[test]
    fn test_step_pauses_after_exactly_one_command() {
        let src = "
            function Main.main 0
            push constant 1
            push constant 2
            return";

        let mut engine = engine_for(src);
        assert_eq!(ExecState::Paused, engine.step()); // function (no-op)
        assert_eq!(PauseReason::StepComplete, engine.get_pause_reason());
        assert_eq!(1, engine.get_stats().instructions_executed);
        engine.step();
        assert_eq!(1, engine.memory().peek().unwrap());
    }

    #[test]
    fn test_step_over_skips_calls() {
        let src = "
            function Sys.init 0
            push constant 5
            call Math.double 1
            return
            function Math.double 0
            push argument 0
            push argument 0
            add
            return";

        let mut engine = engine_for(src);
        engine.step(); // function Sys.init
        engine.step(); // push constant 5
        assert_eq!(2, engine.get_pc());

        // step over the call: lands after the call with the result on top
        engine.step_over();
        assert_eq!(3, engine.get_pc());
        assert_eq!(10, engine.memory().peek().unwrap());
        assert_eq!(1, engine.call_stack().len());
    }

    #[test]
    fn test_step_out_runs_to_caller() {
        let src = "
            function Sys.init 0
            push constant 5
            call Math.double 1
            return
            function Math.double 0
            push argument 0
            push argument 0
            add
            return";

        let mut engine = engine_for(src);
        for _ in 0..3 {
            engine.step(); // function, push, call
        }
        assert_eq!(2, engine.call_stack().len());

        assert_eq!(ExecState::Paused, engine.step_out());
        assert_eq!(PauseReason::FunctionExit, engine.get_pause_reason());
        assert_eq!(1, engine.call_stack().len());
        assert_eq!(3, engine.get_pc());
    }

    #[test]
    fn test_pause_flag_is_consumed_at_command_boundary() {
        let src = "
            function Main.main 0
            label SPIN
            goto SPIN";

        let mut engine = engine_for(src);
        engine.run_for(10);
        engine.pause();
        assert_eq!(ExecState::Paused, engine.run());
        assert_eq!(PauseReason::UserRequest, engine.get_pause_reason());
    }

    #[test]
    fn test_error_state_is_sticky_until_reset() {
        let src = "
            function Main.main 0
            pop temp 0";

        let mut engine = engine_for(src);
        assert_eq!(ExecState::Error, engine.run());
        let pc_at_error = engine.get_error_location();

        // further calls do nothing
        assert_eq!(ExecState::Error, engine.run());
        assert_eq!(ExecState::Error, engine.step());
        assert_eq!(pc_at_error, engine.get_error_location());

        engine.reset();
        assert_eq!(ExecState::Ready, engine.get_state());
        assert!(engine.get_error_message().is_empty());
    }

    #[test]
    fn test_statics_isolated_per_file() {
        use crate::parse::bytecode::{Parser, SourceFile};

        let a = "
            function A.set 0
            push constant 11
            pop static 0
            push constant 0
            return";
        let b = "
            function B.set 0
            push constant 22
            pop static 0
            push constant 0
            return";
        let sys = "
            function Sys.init 0
            call A.set 0
            pop temp 0
            call B.set 0
            pop temp 0
            return";

        let program = Parser::new(vec![
            SourceFile::new("A.vm", a),
            SourceFile::new("B.vm", b),
            SourceFile::new("Sys.vm", sys),
        ])
        .parse()
        .unwrap();

        let mut engine = VmEngine::default();
        engine.load(program);
        assert_eq!(ExecState::Halted, engine.run());

        // A.vm gets base 16, B.vm gets base 32 (load order)
        assert_eq!(11, engine.read_ram(16).unwrap());
        assert_eq!(22, engine.read_ram(32).unwrap());
    }

    #[test]
    fn test_balanced_call_return_restores_outer_frame() {
        let src = "
            function Sys.init 0
            push constant 1
            push constant 2
            call Math.add 2
            return
            function Math.add 0
            push argument 0
            push argument 1
            add
            return";

        let mut engine = engine_for(src);
        // after the bootstrap frame: five saved words above the stack base
        engine.step();
        assert_eq!(261, engine.read_ram(1).unwrap());
        assert_eq!(256, engine.read_ram(2).unwrap());

        engine.run();
        assert_eq!(ExecState::Halted, engine.get_state());
        // the nested call restored the outer pointers before the bootstrap
        // frame itself was popped
        assert_eq!(3, engine.memory().peek().unwrap());
    }
}
