//! Cycle-counted interpreter for the NES CPU, the 6502 core of the Ricoh
//! 2A03. Decimal mode is stored but never alters arithmetic, matching the
//! hardware. The interpreter owns only the register file; memory is borrowed
//! for the duration of each call through the [`Mem`] trait, so the host keeps
//! full control of the bus (RAM mirroring, mapped registers, cartridge).

pub mod cpu;
pub mod mem;
pub mod opcodes;
pub mod trace;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate bitflags;

pub use cpu::{AddressingMode, CpuFlags, CPU};
pub use mem::Mem;
pub use trace::trace;
