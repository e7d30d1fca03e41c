/// The per-call record mirrored off the RAM stack.
///
/// The RAM layout stays observable by VM programs; this shadow copy exists
/// so debugger queries don't have to walk raw memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    /// Command index to resume at; 0 marks the bootstrap frame.
    pub return_address: usize,
    pub function_name: String,
    pub n_args: u16,
    pub n_locals: u16,
    pub saved_lcl: u16,
    pub saved_arg: u16,
    pub saved_this: u16,
    pub saved_that: u16,
}
