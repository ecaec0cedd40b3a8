//! # sim65
//!
//! An instruction-set simulator for the MOS 6502, aimed at running and
//! checking small programs rather than emulating a whole machine.
//!
//! Every byte of the address space carries state flags, so the simulator can
//! report reads of memory that was never declared or never written, writes to
//! ROM and jumps into data. Memory-mapped callbacks let the host implement
//! I/O or replace subroutines with native code.
//!
//! ## Features
//!
//! - Documented NMOS instruction set with cycle counts and page-cross penalties
//! - Decimal mode arithmetic
//! - Per-byte memory state tracking and configurable error severity
//! - Read, write and execute callbacks
//! - Status flag validity tracking
//! - Execution trace, per-address profile and prometheus counters
//! - Label files, disassembly and machine snapshots
//!
//! ## Example
//!
//! ```rust
//! use sim65::{CallbackKind, Sim, SimError};
//!
//! let mut sim = Sim::new();
//! sim.memory_mut().add_ram(0, 0x10000, true);
//!
//! // LDA #$05 ; STA $10 ; JSR $E000 ; RTS
//! sim.memory_mut()
//!     .add_data_ram(0x0600, &[0xA9, 0x05, 0x85, 0x10, 0x20, 0x00, 0xE0, 0x60]);
//!
//! // Output routine at $E000 replaced by native code
//! sim.add_callback(0xE000, 1, CallbackKind::Exec, |sim, _, _| {
//!     println!("A = {:02X}", sim.regs.a);
//!     Ok(0)
//! });
//!
//! sim.call(0x0600).unwrap();
//! assert_eq!(sim.memory().get_byte(0x10), Some(0x05));
//! assert_eq!(SimError::CallRet.code(), -9);
//! ```

pub mod addressing;
pub mod alu;
pub mod config;
pub mod cpu;
pub mod disasm;
pub mod error;
pub mod labels;
pub mod memory;
pub mod metrics;
pub mod opcodes;
pub mod profile;
pub mod registers;
pub mod snapshots;

pub use config::SimConfig;
pub use cpu::{Sim, CALL_SENTINEL};
pub use disasm::InsnInfo;
pub use error::{ErrorLevel, Fault, SimError};
pub use memory::{Access, CallbackKind, MemState, Memory, MemoryFill};
pub use profile::Profile;
pub use registers::Registers;
pub use snapshots::MachineSnapshot;
