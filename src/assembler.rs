//! Reassembles protocol units from a byte stream that may arrive in arbitrary
//! fragments.
//!
//! The assembler always knows exactly how many bytes the next unit has. Bytes
//! are accumulated until that count is reached, then the unit is handed out by
//! [`Assembler::take`]. Update frames loop on their own; every other unit
//! leaves the assembler waiting for the session logic to say what comes next
//! through [`Assembler::expect`] or [`Assembler::expect_update`].

use crate::consts::LOGIN_HEADER_SIZE;
use crate::wire::{de32, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 4-byte login block length.
    LoginLength,
    Login,
    /// `1 + local data size`: command byte followed by local controller data.
    Update,
    /// 4-byte length (or inline argument) for a pending command.
    CommandLength(Command),
    CommandPayload(Command),
}

/// A fully received unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    LoginLength(u32),
    Login(Vec<u8>),
    /// Plain input frame; the command byte is already stripped.
    Input(Vec<u8>),
    /// Update frame carried a command byte. The assembler has already moved on
    /// to the command's length field.
    CommandStart(Command),
    CommandLength(Command, u32),
    CommandPayload(Command, Vec<u8>),
}

#[derive(Debug)]
pub struct Assembler {
    phase: Phase,
    buf: Vec<u8>,
    has: usize,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            phase: Phase::LoginLength,
            buf: vec![0; 4],
            has: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Total size of the unit currently being assembled.
    pub fn expected(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.has
    }

    /// Starts a new unit of `len` bytes, discarding anything partial.
    pub fn expect(&mut self, phase: Phase, len: usize) {
        self.phase = phase;
        self.buf.clear();
        self.buf.resize(len, 0);
        self.has = 0;
    }

    pub fn expect_update(&mut self, local_data_size: usize) {
        self.expect(Phase::Update, local_data_size + 1);
    }

    /// The part of the unit still to be filled, for reading straight from a socket.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.has..]
    }

    /// Records `n` bytes written into [`Assembler::spare_mut`].
    pub fn advance(&mut self, n: usize) {
        self.has = (self.has + n).min(self.buf.len());
    }

    /// Copies as much of `bytes` as the current unit still needs and returns
    /// how many were consumed. Feeding an empty slice changes nothing.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.buf[self.has..self.has + n].copy_from_slice(&bytes[..n]);
        self.has += n;
        n
    }

    pub fn is_complete(&self) -> bool {
        !self.buf.is_empty() && self.has == self.buf.len()
    }

    /// Hands out the finished unit, if there is one.
    pub fn take(&mut self) -> Option<Unit> {
        if !self.is_complete() {
            return None;
        }
        let unit = match self.phase {
            Phase::LoginLength => Unit::LoginLength(de32(&self.buf)),
            Phase::Login => Unit::Login(std::mem::take(&mut self.buf)),
            Phase::Update => {
                self.has = 0;
                if self.buf[0] != 0 {
                    let cmd = Command::from(self.buf[0]);
                    self.expect(Phase::CommandLength(cmd), 4);
                    return Some(Unit::CommandStart(cmd));
                }
                return Some(Unit::Input(self.buf[1..].to_vec()));
            }
            Phase::CommandLength(cmd) => Unit::CommandLength(cmd, de32(&self.buf)),
            Phase::CommandPayload(cmd) => Unit::CommandPayload(cmd, std::mem::take(&mut self.buf)),
        };
        self.buf.clear();
        self.has = 0;
        Some(unit)
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a declared login length is acceptable.
pub fn login_len_ok(len: u32, max: usize) -> bool {
    (LOGIN_HEADER_SIZE..=max).contains(&(len as usize))
}
