use std::fmt::Display;
use std::net::SocketAddr;

use crate::assembler::{Assembler, Unit};
use crate::consts::MAX_TOTAL_CONTROLLERS_DATA_SIZE;
use crate::game::ControllerLayout;
use crate::sendq::SendQueue;
use crate::transceiver::Transceiver;
use crate::wire::{command_header, Command, CommandClass};

/// One client socket and everything the server knows about it.
///
/// A connection whose stream has been dropped is dead but still occupies its
/// slot until the server loop reaps it, which is when it leaves its game.
pub struct Connection<T: Transceiver> {
    pub id: usize,
    pub addr: SocketAddr,
    stream: Option<T>,
    pub nickname: String,
    pub protocol_version: u8,
    pub local_players: u8,
    pub layout: ControllerLayout,
    /// Index into the game table once logged in.
    pub game: Option<usize>,
    /// Member slot within that game.
    pub slot: usize,
    /// Ownership changes sent but not yet acknowledged.
    pub pending: u32,
    pub local_data_size: usize,
    local_buffer: Vec<u8>,
    pub assembler: Assembler,
    pub sendq: SendQueue,
    pub connected_at: u64,
    pub last_receive: u64,
    pub disconnect_reason: Option<String>,
}

/// Result of trying to complete one unit from the socket.
#[derive(Debug)]
pub enum ReadOutcome {
    Unit(Unit),
    WouldBlock,
    Closed,
}

impl<T: Transceiver> Connection<T> {
    pub fn new(
        id: usize,
        stream: T,
        addr: SocketAddr,
        now: u64,
        min_sendq: usize,
        max_sendq: usize,
    ) -> Self {
        Self {
            id,
            addr,
            stream: Some(stream),
            nickname: String::new(),
            protocol_version: 0,
            local_players: 0,
            layout: ControllerLayout::new(&[], &[]),
            game: None,
            slot: 0,
            pending: 0,
            local_data_size: 0,
            local_buffer: vec![0; MAX_TOTAL_CONTROLLERS_DATA_SIZE],
            assembler: Assembler::new(),
            sendq: SendQueue::new(min_sendq, max_sendq),
            connected_at: now,
            last_receive: now,
            disconnect_reason: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Closes the socket and records why. Idempotent; the first reason wins.
    pub fn disconnect(&mut self, reason: impl Display) {
        if self.stream.take().is_none() {
            return;
        }
        let reason = reason.to_string();
        match self.game {
            Some(game) => log::info!(
                "client {} <{}> disconnected from game {game} for reason <{reason}>",
                self.id,
                self.nickname
            ),
            None => log::info!(
                "unassigned client {} disconnected for reason <{reason}>",
                self.id
            ),
        }
        self.disconnect_reason = Some(reason);
    }

    /// Pulls bytes until the current unit is complete or the socket runs dry.
    pub fn read_unit(&mut self, now: u64) -> ReadOutcome {
        loop {
            if let Some(unit) = self.assembler.take() {
                return ReadOutcome::Unit(unit);
            }
            let Some(stream) = self.stream.as_mut() else {
                return ReadOutcome::Closed;
            };
            if self.assembler.remaining() == 0 {
                return ReadOutcome::WouldBlock;
            }
            match stream.recv(self.assembler.spare_mut()) {
                Ok(None) => return ReadOutcome::WouldBlock,
                Ok(Some(0)) => {
                    self.disconnect("Client gracefully closed connection.");
                    return ReadOutcome::Closed;
                }
                Ok(Some(n)) => {
                    self.last_receive = now;
                    self.assembler.advance(n);
                }
                Err(e) => {
                    self.disconnect(format!("recv() failed: {e}"));
                    return ReadOutcome::Closed;
                }
            }
        }
    }

    /// Queues raw bytes. A queue overflow or write error kills the connection.
    pub fn send_raw(&mut self, data: &[u8]) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if let Err(e) = self.sendq.send(stream, data) {
            log::warn!("client {}: {e}", self.id);
            self.disconnect(e);
        }
    }

    pub fn send_command(&mut self, cmd: Command, data: Option<&[u8]>, len: u32) {
        self.send_raw(&command_header(self.layout.total_size, cmd, len));
        if let (CommandClass::Payload, Some(data)) = (cmd.class(), data) {
            self.send_raw(data);
        }
    }

    /// Server message; an empty nickname marks it as coming from the server.
    pub fn send_text(&mut self, text: impl Display) {
        let text = text.to_string();
        let mut payload = Vec::with_capacity(4 + text.len());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(text.as_bytes());
        self.send_command(Command::Text, Some(&payload), payload.len() as u32);
    }

    /// Tells the client why before hanging up. Anything held back by a cork
    /// goes out with it.
    pub fn reject(&mut self, reason: impl Display) {
        let reason = reason.to_string();
        self.uncork();
        self.send_text(&reason);
        self.disconnect(reason);
    }

    pub fn cork(&mut self) {
        self.sendq.cork();
    }

    pub fn uncork(&mut self) {
        self.sendq.uncork();
    }

    pub fn local_input(&self) -> &[u8] {
        &self.local_buffer[..self.local_data_size]
    }

    /// Stores the latest input frame. Ignored while an ownership change is
    /// unacknowledged, since the frame may be sized for the old layout.
    pub fn set_local_input(&mut self, data: &[u8]) {
        if self.pending > 0 {
            return;
        }
        let n = data.len().min(self.local_data_size);
        self.local_buffer[..n].copy_from_slice(&data[..n]);
    }

    pub fn clear_local_input(&mut self) {
        self.local_buffer[..self.local_data_size].fill(0);
    }
}
