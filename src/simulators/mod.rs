pub mod cpu;
pub mod hdl;
pub mod jack;
pub mod vm;

/// Run state shared by the CPU and VM engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// Program loaded, ready to run
    Ready,
    /// Currently executing
    Running,
    /// Paused (breakpoint, step, or user request)
    Paused,
    /// PC past the end of the program
    Halted,
    /// A runtime error occurred; reset() is the only way out
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    None,
    StepComplete,
    Breakpoint,
    UserRequest,
    FunctionExit,
}
