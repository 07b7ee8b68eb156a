//! The I/O device table shared by both cores' `SystemCall`/`io-read`/
//! `io-write` operations.
//!
//! The device table is owned by the core instance: handlers are
//! installed in [`Devices::initialize`] and dropped in
//! [`Devices::shutdown`]. Terminal, RNG and secondary-storage I/O are
//! external collaborators here, consumed only through this narrow
//! interface. getc/putc are backed by `queues::Queue` rather than
//! reading/writing real stdio directly, so a core can run headless
//! against pre-seeded input; the `sim` binary drains/fills these
//! queues against real stdio each cycle.

use queues::{IsQueue, Queue};

use crate::error::Fault;

/// Built-in device indices.
pub const DEV_TERMINATE: u16 = 0;
pub const DEV_GETC: u16 = 1;
pub const DEV_PUTC: u16 = 2;
pub const DEV_SEED_RANDOM: u16 = 3;
pub const DEV_NEXT_RANDOM: u16 = 4;
pub const DEV_SKIP_RANDOM: u16 = 5;
pub const DEV_STORAGE0_READ: u16 = 6;
pub const DEV_STORAGE0_WRITE: u16 = 7;
pub const DEV_STORAGE1_READ: u16 = 8;
pub const DEV_STORAGE1_WRITE: u16 = 9;

const STORAGE_BANK_SIZE: usize = 1 << 16;

/// The outcome of dispatching one device call: the new contents of the
/// caller's value register (cisc0's value register, or iris's
/// destination register for `io-read`), plus whether it requested that
/// the core halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceOutcome {
    pub value: u32,
    pub terminate: bool,
}

/// A minimal xorshift PRNG. Deterministic given a seed, which is all
/// "seed-random"/"next-random"/"skip-random" require — there is no
/// requirement to match any particular host RNG.
#[derive(Debug, Clone, Copy)]
struct Xorshift32(u32);

impl Xorshift32 {
    fn next(&mut self) -> u32 {
        let mut x = if self.0 == 0 { 0x9E37_79B9 } else { self.0 };
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

/// Owns the built-in device table for one VM instance. Not `Clone`:
/// every VM instance owns its devices exclusively.
#[derive(Debug)]
pub struct Devices {
    stdin: Queue<u8>,
    stdout: Vec<u8>,
    rng: Xorshift32,
    storage: [Vec<u8>; 2],
    installed: bool,
}

impl Default for Devices {
    fn default() -> Self {
        Self {
            stdin: Queue::new(),
            stdout: Vec::new(),
            rng: Xorshift32(0),
            storage: [vec![0u8; STORAGE_BANK_SIZE], vec![0u8; STORAGE_BANK_SIZE]],
            installed: false,
        }
    }
}

impl Devices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the built-in handlers and seeds the predicate-bank-
    /// adjacent device state. Idempotent: calling twice in a row leaves
    /// the same state as calling once.
    pub fn initialize(&mut self) {
        *self = Self {
            installed: true,
            ..Self::default()
        };
    }

    /// Releases the installed handlers. After `shutdown`, dispatching a
    /// built-in index behaves as an unregistered index (fatal via the
    /// default handler) until `initialize` runs again.
    pub fn shutdown(&mut self) {
        self.installed = false;
    }

    /// Feed bytes into the device's virtual stdin, for tests and for the
    /// `sim` binary's real-stdin bridge.
    pub fn push_stdin(&mut self, byte: u8) {
        let _ = self.stdin.add(byte);
    }

    /// Drain everything written to the virtual stdout so far.
    pub fn take_stdout(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stdout)
    }

    /// Dispatch one syscall by index with the caller's current value-
    /// register contents. Returns [`Fault::UndefinedSyscall`] for any
    /// index with no handler, including the built-ins while
    /// uninitialized/shut down.
    pub fn dispatch(&mut self, index: u16, value: u32) -> Result<DeviceOutcome, Fault> {
        if !self.installed {
            return Err(Fault::UndefinedSyscall(index).log());
        }
        match index {
            DEV_TERMINATE => Ok(DeviceOutcome {
                value,
                terminate: true,
            }),
            DEV_GETC => {
                let byte = self.stdin.remove().unwrap_or(0) as u32;
                Ok(DeviceOutcome {
                    value: byte,
                    terminate: false,
                })
            }
            DEV_PUTC => {
                self.stdout.push((value & 0xFF) as u8);
                Ok(DeviceOutcome {
                    value,
                    terminate: false,
                })
            }
            DEV_SEED_RANDOM => {
                self.rng = Xorshift32(value);
                Ok(DeviceOutcome {
                    value,
                    terminate: false,
                })
            }
            DEV_NEXT_RANDOM => {
                let next = self.rng.next();
                Ok(DeviceOutcome {
                    value: next,
                    terminate: false,
                })
            }
            DEV_SKIP_RANDOM => {
                self.rng.next();
                Ok(DeviceOutcome {
                    value,
                    terminate: false,
                })
            }
            DEV_STORAGE0_READ | DEV_STORAGE1_READ => {
                let bank = usize::from(index == DEV_STORAGE1_READ);
                let addr = (value as usize) % STORAGE_BANK_SIZE;
                Ok(DeviceOutcome {
                    value: self.storage[bank][addr] as u32,
                    terminate: false,
                })
            }
            DEV_STORAGE0_WRITE | DEV_STORAGE1_WRITE => {
                let bank = usize::from(index == DEV_STORAGE1_WRITE);
                let addr = (value as usize) % STORAGE_BANK_SIZE;
                self.storage[bank][addr] = (value & 0xFF) as u8;
                Ok(DeviceOutcome {
                    value,
                    terminate: false,
                })
            }
            other => Err(Fault::UndefinedSyscall(other).log()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_requests_halt() {
        let mut devices = Devices::new();
        devices.initialize();
        let outcome = devices.dispatch(DEV_TERMINATE, 0).unwrap();
        assert!(outcome.terminate);
    }

    #[test]
    fn getc_putc_roundtrip_through_queue() {
        let mut devices = Devices::new();
        devices.initialize();
        devices.push_stdin(b'A');
        let outcome = devices.dispatch(DEV_GETC, 0).unwrap();
        assert_eq!(outcome.value, b'A' as u32);
        devices.dispatch(DEV_PUTC, outcome.value).unwrap();
        assert_eq!(devices.take_stdout(), vec![b'A']);
    }

    #[test]
    fn random_is_deterministic_given_a_seed() {
        let mut a = Devices::new();
        a.initialize();
        a.dispatch(DEV_SEED_RANDOM, 42).unwrap();
        let mut b = Devices::new();
        b.initialize();
        b.dispatch(DEV_SEED_RANDOM, 42).unwrap();
        let first = a.dispatch(DEV_NEXT_RANDOM, 0).unwrap().value;
        let second = b.dispatch(DEV_NEXT_RANDOM, 0).unwrap().value;
        assert_eq!(first, second);
    }

    #[test]
    fn unregistered_index_is_fatal() {
        let mut devices = Devices::new();
        devices.initialize();
        assert!(matches!(
            devices.dispatch(42, 0),
            Err(Fault::UndefinedSyscall(42))
        ));
    }

    #[test]
    fn uninitialized_devices_reject_built_ins_too() {
        let mut devices = Devices::new();
        assert!(matches!(
            devices.dispatch(DEV_TERMINATE, 0),
            Err(Fault::UndefinedSyscall(DEV_TERMINATE))
        ));
    }
}
