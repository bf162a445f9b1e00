//! Emulator suite for the Hack computing stack.
//!
//! Four interlocking engines share a 16-bit data model and a common
//! lifecycle (load, run/step, pause, halt):
//!
//! - [simulators::hdl::HdlEngine] evaluates chips described in HDL, with a
//!   built-in library of gates and clocked primitives and a test-script
//!   runner.
//! - [simulators::cpu::CpuEngine] executes `.hack` machine code against a
//!   Harvard memory with a memory-mapped screen and keyboard.
//! - [simulators::vm::VmEngine] interprets stack VM programs with full
//!   call-frame discipline on a flat RAM.
//! - [simulators::jack::JackDebugger] layers source-level debugging of Jack
//!   programs over the VM engine via a `.smap` source map.

pub mod definitions;
pub mod error;
pub mod keyboard;
pub mod parse;
pub mod simulators;

pub use error::{ErrorCategory, SimError, SimResult};
pub use simulators::{ExecState, PauseReason};
