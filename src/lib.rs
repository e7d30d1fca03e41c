//! Simulator and source-level debugger core for the Hack computer
//! platform: the 16-bit Harvard CPU, HDL chip simulation with a two-phase
//! clock, the stack-based VM, and a Jack source-level debugger layered on
//! top of the VM engine.
//!
//! The crate is a pure library. Hosts drive the engines through their
//! run/step operations and read state back between calls; nothing here
//! spawns threads, blocks on I/O, or writes to a global sink.

pub mod definitions;
pub mod error;
pub mod parse;
pub mod simulators;

pub use error::{ErrorCategory, SimError, SimResult};
pub use simulators::cpu::CpuEngine;
pub use simulators::hdl::HdlEngine;
pub use simulators::jack::JackDebugger;
pub use simulators::vm::VmEngine;
pub use simulators::{ExecState, PauseReason};
