#![forbid(unsafe_code)]

//! Interpreters and assemblers for a family of retro-style virtual
//! machines: `iris` (16-bit RISC) and `cisc0` (variable-length 16-bit
//! CISC). Each core exposes a codec, an interpreter and a two-pass
//! assembler behind a small facade; see [`iris`] and [`cisc0`].

pub mod bits;
pub mod cisc0;
pub mod error;
pub mod io;
pub mod iris;
pub mod object;
