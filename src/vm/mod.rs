//! Host-VM collaborator surface
//!
//! The target virtual machine owns the opcode set, the assembly syntax, the
//! register file size, and the assembler that turns emitted text lines into
//! bytes. The compiler treats all of these as a fixed contract.
//!
//! Register 0 is reserved by the VM as the return-value register; the
//! compiler's pool only hands out registers `1..DEFAULT_REGISTER_COUNT`.

pub mod assembler;
pub mod opcode;

pub use assembler::{AssembledProgram, Assembler};
pub use opcode::Opcode;

/// Size of the VM register file
pub const DEFAULT_REGISTER_COUNT: usize = 32;

/// The VM's dedicated return-value register
pub const RESULT_REGISTER: u8 = 0;
