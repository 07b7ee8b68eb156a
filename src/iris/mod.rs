//! The `iris` 16-bit RISC core: a 32-bit instruction packet, 256 16-bit
//! general-purpose registers, 16 one-bit predicate registers, and four
//! fixed-size memory units (code, data, stack, predicate bank).

pub mod asm;
pub mod codec;
pub mod interp;
