pub mod inspect;
pub mod source_map;

use crate::definitions::{Address, Word, THIS};
use crate::error::SimResult;
use crate::simulators::vm::command::Segment;
use crate::simulators::vm::VmEngine;
use crate::simulators::{ExecState, PauseReason};
use inspect::{InspectedArray, InspectedObject, ObjectInspector};
use source_map::{FunctionSymbols, JackVarKind, JackVariable, SourceEntry, SourceMap};

use log::debug;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JackPauseReason {
    None,
    StepComplete,
    Breakpoint,
    UserRequest,
    FunctionExit,
}

#[derive(Debug, Default, Clone)]
pub struct JackStats {
    pub total_vm_instructions: u64,
    pub function_instruction_counts: HashMap<String, u64>,
}

impl JackStats {
    pub fn reset(&mut self) {
        self.total_vm_instructions = 0;
        self.function_instruction_counts.clear();
    }
}

/// A resolved variable value: declaration info plus both views of the word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JackVariableValue {
    pub name: String,
    pub type_name: String,
    pub kind: JackVarKind,
    pub index: u16,
    pub raw_value: Word,
    pub signed_value: i16,
}

/// One projected frame of the Jack call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JackCallFrame {
    pub function_name: String,
    pub return_vm_index: usize,
    /// source position of the return address, when mapped
    pub jack_file: Option<String>,
    pub jack_line: Option<usize>,
}

/// Source-level debugger over the VM engine: steps by Jack line instead of
/// VM command, translates line breakpoints, and resolves variables through
/// the source map's symbol tables.
///
/// The debugger owns its engine; all engine access goes through it.
pub struct JackDebugger {
    engine: VmEngine,
    source_map: SourceMap,
    pause_reason: JackPauseReason,
    stats: JackStats,
    breakpoints: BTreeSet<(String, usize)>,
}

impl Default for JackDebugger {
    fn default() -> Self {
        Self {
            engine: VmEngine::default(),
            source_map: SourceMap::default(),
            pause_reason: JackPauseReason::None,
            stats: JackStats::default(),
            breakpoints: BTreeSet::new(),
        }
    }
}

impl JackDebugger {
    // =========================================================================
    // Loading
    // =========================================================================

    pub fn load(&mut self, vm_source: &str, smap_source: &str, name: &str) -> SimResult {
        self.engine.load_string(vm_source, name)?;
        self.source_map
            .load_string(smap_source, &format!("{}.smap", name))?;
        self.check_map_bounds(&format!("{}.smap", name))?;
        self.pause_reason = JackPauseReason::None;
        self.stats.reset();
        Ok(())
    }

    pub fn load_files(
        &mut self,
        vm_path: impl AsRef<std::path::Path>,
        smap_path: impl AsRef<std::path::Path>,
    ) -> SimResult {
        self.engine.load_file(vm_path)?;
        let smap_name = smap_path.as_ref().to_string_lossy().to_string();
        self.source_map.load_file(smap_path)?;
        self.check_map_bounds(&smap_name)?;
        self.pause_reason = JackPauseReason::None;
        self.stats.reset();
        Ok(())
    }

    /// Every MAP entry must point inside the loaded program.
    fn check_map_bounds(&self, smap_name: &str) -> SimResult {
        let command_count = self.engine.command_count();
        for entry in self.source_map.entries() {
            if entry.vm_index >= command_count {
                return Err(crate::error::SimError::parse(
                    smap_name,
                    0,
                    format!(
                        "MAP entry {}:{} points at vm index {} but the program \
                         only has {} commands",
                        entry.jack_file, entry.jack_line, entry.vm_index, command_count
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn set_entry_point(&mut self, function_name: impl Into<String>) {
        self.engine.set_entry_point(function_name);
    }

    pub fn reset(&mut self) {
        self.engine.reset();
        self.pause_reason = JackPauseReason::None;
        self.stats.reset();
        self.sync_breakpoints();
    }

    // =========================================================================
    // Execution control
    // =========================================================================

    /// Execute VM commands until the current command maps to a different
    /// Jack (file, line). When neither the starting nor the next command is
    /// mapped, exactly one VM step is taken, which lets the user walk
    /// through unmapped prologue and epilogue code.
    pub fn step(&mut self) -> ExecState {
        if self.is_finished() {
            return self.engine.get_state();
        }
        self.ensure_initialized();

        let start = self.current_position();
        let before = self.engine.get_stats().instructions_executed;

        loop {
            let state = self.engine.step();
            if state == ExecState::Halted || state == ExecState::Error {
                self.update_stats(before);
                return state;
            }

            let here = self.current_position();
            if let Some(here) = &here {
                if start.as_ref() != Some(here) {
                    break;
                }
            }
            if start.is_none() && here.is_none() {
                break;
            }
        }

        self.update_stats(before);
        self.pause_reason = JackPauseReason::StepComplete;
        self.engine.get_state()
    }

    /// Like step, but a growing call depth suppresses the line check, so
    /// called functions run to completion.
    pub fn step_over(&mut self) -> ExecState {
        if self.is_finished() {
            return self.engine.get_state();
        }
        self.ensure_initialized();

        let initial_depth = self.engine.call_stack().len();
        let start = self.current_position();
        let before = self.engine.get_stats().instructions_executed;

        loop {
            let state = self.engine.step();
            if state == ExecState::Halted || state == ExecState::Error {
                self.update_stats(before);
                return state;
            }

            if self.engine.call_stack().len() > initial_depth {
                continue;
            }

            let here = self.current_position();
            if let Some(here) = &here {
                if start.as_ref() != Some(here) {
                    break;
                }
            }
            if start.is_none() && here.is_none() {
                break;
            }
        }

        self.update_stats(before);
        self.pause_reason = JackPauseReason::StepComplete;
        self.engine.get_state()
    }

    /// Run until the call depth drops below its starting value, then stop
    /// at the first mapped command in the caller.
    pub fn step_out(&mut self) -> ExecState {
        if self.is_finished() {
            return self.engine.get_state();
        }
        self.ensure_initialized();

        let initial_depth = self.engine.call_stack().len();
        let before = self.engine.get_stats().instructions_executed;

        loop {
            let state = self.engine.step();
            if state == ExecState::Halted || state == ExecState::Error {
                self.update_stats(before);
                return state;
            }

            if self.engine.call_stack().len() < initial_depth
                && self.current_position().is_some()
            {
                break;
            }
        }

        self.update_stats(before);
        self.pause_reason = JackPauseReason::FunctionExit;
        self.engine.get_state()
    }

    pub fn run(&mut self) -> ExecState {
        if self.is_finished() {
            return self.engine.get_state();
        }

        self.sync_breakpoints();
        let before = self.engine.get_stats().instructions_executed;
        let state = self.engine.run();
        self.update_stats(before);
        self.translate_pause_reason(state);
        state
    }

    pub fn run_for(&mut self, max_instructions: u64) -> ExecState {
        if self.is_finished() {
            return self.engine.get_state();
        }

        self.sync_breakpoints();
        let before = self.engine.get_stats().instructions_executed;
        let state = self.engine.run_for(max_instructions);
        self.update_stats(before);
        self.translate_pause_reason(state);
        state
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    fn is_finished(&self) -> bool {
        matches!(
            self.engine.get_state(),
            ExecState::Halted | ExecState::Error
        )
    }

    /// Sampling call depth or source position only makes sense once the
    /// entry frame exists; a zero-length run forces the bootstrap.
    fn ensure_initialized(&mut self) {
        if self.engine.get_state() == ExecState::Ready {
            self.engine.run_for(0);
        }
    }

    fn translate_pause_reason(&mut self, state: ExecState) {
        if state != ExecState::Paused {
            return;
        }
        self.pause_reason = match self.engine.get_pause_reason() {
            PauseReason::Breakpoint => JackPauseReason::Breakpoint,
            PauseReason::UserRequest => JackPauseReason::UserRequest,
            PauseReason::FunctionExit => JackPauseReason::FunctionExit,
            _ => JackPauseReason::StepComplete,
        };
    }

    fn update_stats(&mut self, instructions_before: u64) {
        let executed = self.engine.get_stats().instructions_executed - instructions_before;
        self.stats.total_vm_instructions += executed;

        if let Some(function) = self.engine.current_function() {
            *self
                .stats
                .function_instruction_counts
                .entry(function.to_string())
                .or_insert(0) += executed;
        }
    }

    // =========================================================================
    // State inspection
    // =========================================================================

    pub fn get_state(&self) -> ExecState {
        self.engine.get_state()
    }

    pub fn get_pause_reason(&self) -> JackPauseReason {
        self.pause_reason
    }

    pub fn get_stats(&self) -> &JackStats {
        &self.stats
    }

    pub fn engine(&self) -> &VmEngine {
        &self.engine
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    /// Source entry of the command at the VM program counter, if mapped.
    pub fn current_source(&self) -> Option<&SourceEntry> {
        self.source_map.entry_for_vm(self.engine.get_pc())
    }

    fn current_position(&self) -> Option<(String, usize)> {
        self.current_source()
            .map(|e| (e.jack_file.clone(), e.jack_line))
    }

    pub fn current_function(&self) -> Option<&str> {
        self.engine.current_function()
    }

    /// Project the VM shadow call stack onto Jack source positions.
    pub fn call_stack(&self) -> Vec<JackCallFrame> {
        self.engine
            .call_stack()
            .iter()
            .map(|frame| {
                let entry = self.source_map.entry_for_vm(frame.return_address);
                JackCallFrame {
                    function_name: frame.function_name.clone(),
                    return_vm_index: frame.return_address,
                    jack_file: entry.map(|e| e.jack_file.clone()),
                    jack_line: entry.map(|e| e.jack_line),
                }
            })
            .collect()
    }

    // =========================================================================
    // Breakpoints
    // =========================================================================

    /// Set a breakpoint on a Jack source line. Returns false without
    /// recording anything when the line has no mapping. Every VM command
    /// mapped from the line is registered, so the run pauses at the line
    /// no matter which mapped command is reached first.
    pub fn add_breakpoint(&mut self, file: &str, line: usize) -> bool {
        if self.source_map.vm_index_for_line(file, line).is_none() {
            return false;
        }

        self.breakpoints.insert((file.to_string(), line));
        for vm_index in self.source_map.all_vm_indices_for_line(file, line) {
            self.engine.add_breakpoint(vm_index);
        }
        debug!("jack breakpoint at {}:{}", file, line);
        true
    }

    pub fn remove_breakpoint(&mut self, file: &str, line: usize) -> bool {
        if !self.breakpoints.remove(&(file.to_string(), line)) {
            return false;
        }
        for vm_index in self.source_map.all_vm_indices_for_line(file, line) {
            self.engine.remove_breakpoint(vm_index);
        }
        true
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
        self.engine.clear_breakpoints();
    }

    pub fn get_breakpoints(&self) -> Vec<(String, usize)> {
        self.breakpoints.iter().cloned().collect()
    }

    pub fn has_breakpoint(&self, file: &str, line: usize) -> bool {
        self.breakpoints.contains(&(file.to_string(), line))
    }

    /// Reinstall the VM-level translation of every Jack breakpoint. Used on
    /// reset and before run/run_for.
    pub fn sync_breakpoints(&mut self) {
        self.engine.clear_breakpoints();
        let breakpoints: Vec<(String, usize)> = self.breakpoints.iter().cloned().collect();
        for (file, line) in breakpoints {
            for vm_index in self.source_map.all_vm_indices_for_line(&file, line) {
                self.engine.add_breakpoint(vm_index);
            }
        }
    }

    // =========================================================================
    // Variable inspection
    // =========================================================================

    /// Resolve a variable by name in the current function, searching
    /// locals, then arguments, fields, and statics.
    pub fn get_variable(&self, name: &str) -> Option<JackVariableValue> {
        let symbols = self.current_symbols()?;

        let found = symbols
            .locals
            .iter()
            .chain(symbols.arguments.iter())
            .chain(symbols.fields.iter())
            .chain(symbols.statics.iter())
            .find(|var| var.name == name)?;

        self.read_variable(found, &symbols.class_name)
    }

    pub fn get_all_variables(&self) -> Vec<JackVariableValue> {
        let Some(symbols) = self.current_symbols() else {
            return Vec::new();
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

    fn current_symbols(&self) -> Option<&FunctionSymbols> {
        let function = self.engine.current_function()?;
        self.source_map.function_symbols(function)
    }

    fn read_variable(&self, var: &JackVariable, class_name: &str) -> Option<JackVariableValue> {
        let raw = match var.kind {
            JackVarKind::Local => self
                .engine
                .get_segment(Segment::Local, var.index, "")
                .ok()?,
            JackVarKind::Argument => self
                .engine
                .get_segment(Segment::Argument, var.index, "")
                .ok()?,
            JackVarKind::Field => {
                let this_addr = self.engine.read_ram(THIS).ok()? as Address;
                self.engine.read_ram(this_addr + var.index as Address).ok()?
            }
            // Jack classes map one to one onto .vm files, so the class name
            // selects the static range
            JackVarKind::Static => self
                .engine
                .get_segment(Segment::Static, var.index, class_name)
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

    /// Evaluate a debugger expression: an integer literal (possibly
    /// negative) or a single variable name. Anything else is absent.
    pub fn evaluate(&self, expr: &str) -> Option<i16> {
        let expr = expr.trim();
        if let Ok(value) = expr.parse::<i16>() {
            return Some(value);
        }
        self.get_variable(expr).map(|v| v.signed_value)
    }

    // =========================================================================
    // Heap inspection
    // =========================================================================

    pub fn inspect_object(&self, address: Address, class_name: &str) -> SimResult<InspectedObject> {
        ObjectInspector::new(self.engine.memory(), &self.source_map)
            .inspect_object(address, class_name)
    }

    pub fn inspect_this(&self) -> SimResult<InspectedObject> {
        let function = self.engine.current_function().unwrap_or("");
        ObjectInspector::new(self.engine.memory(), &self.source_map).inspect_this(function)
    }

    pub fn inspect_array(&self, address: Address, length: usize) -> SimResult<InspectedArray> {
        ObjectInspector::new(self.engine.memory(), &self.source_map).inspect_array(address, length)
    }
}
