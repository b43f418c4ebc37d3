use std::time::Duration;

use crate::assembler::{login_len_ok, Phase, Unit};
use crate::config::ServerConfig;
use crate::connection::{Connection, ReadOutcome};
use crate::consts::{
    MAX_ECHO_SIZE, MAX_LOGIN_SIZE, MAX_QUIT_MESSAGE_SIZE, MAX_SLEEP_US, MEDIA_CHANGE_SIZE,
};
use crate::error::{LoginError, NetplayError};
use crate::game::{ControllerLayout, Game};
use crate::reassign::Reassign;
use crate::session::SessionDirectory;
use crate::socket::NetplayListener;
use crate::time::secs_to_us;
use crate::transceiver::Listener;
use crate::wire::{Command, CommandClass, LoginData};

pub type Result<T> = std::result::Result<T, NetplayError>;

pub type ClientIndex = usize;
pub type GameIndex = usize;

/// The netplay server.
///
/// Everything happens on the calling thread inside [`Server::update`], which
/// never blocks. Call it in a loop and sleep for [`Server::sleep_duration`]
/// between calls.
///
/// # Example
/// ```no_run
/// use netplay::{Clock, Server, ServerConfig};
///
/// let cfg = ServerConfig::new(4046, 50, 5);
/// let mut server = Server::bind(cfg).unwrap();
/// let clock = Clock::new();
/// loop {
///     server.update(clock.now_us());
///     std::thread::sleep(server.sleep_duration(clock.now_us()));
/// }
/// ```
pub struct Server<L: Listener> {
    cfg: ServerConfig,
    listener: L,
    directory: SessionDirectory<L::Stream>,
}

impl Server<NetplayListener> {
    /// Listens on the configured port over TCP.
    pub fn bind(cfg: ServerConfig) -> Result<Self> {
        let listener = NetplayListener::bind(cfg.port).map_err(|e| {
            log::error!("{e}");
            NetplayError::NoListeners
        })?;
        Ok(Self::with_listener(cfg, listener))
    }
}

impl<L: Listener> Server<L> {
    pub fn with_listener(cfg: ServerConfig, listener: L) -> Self {
        let directory = SessionDirectory::new(cfg.max_clients);
        Self {
            cfg,
            listener,
            directory,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    pub fn client(&self, idx: ClientIndex) -> Option<&Connection<L::Stream>> {
        self.directory.clients.get(idx)
    }

    pub fn iter_clients(&self) -> impl Iterator<Item = (ClientIndex, &Connection<L::Stream>)> {
        self.directory.clients.iter()
    }

    pub fn game(&self, idx: GameIndex) -> Option<&Game> {
        self.directory.games.get(idx)
    }

    pub fn iter_games(&self) -> impl Iterator<Item = (GameIndex, &Game)> {
        self.directory.games.iter()
    }

    /// One pass of the server loop at time `now` (microseconds).
    pub fn update(&mut self, now: u64) {
        self.reap_disconnected();
        self.accept(now);
        self.service_unassigned(now);
        for game_idx in self.directory.games.indices() {
            self.service_game(game_idx, now);
        }
    }

    /// How long the caller may sleep before the next game is due.
    pub fn sleep_duration(&self, now: u64) -> Duration {
        let wait = self
            .directory
            .games
            .iter()
            .map(|(_, game)| game.next_tick().saturating_sub(now))
            .min()
            .unwrap_or(MAX_SLEEP_US)
            .min(MAX_SLEEP_US);
        Duration::from_micros(wait)
    }

    /// Closes every connection; they are reaped on the next update.
    pub fn disconnect_all(&mut self, reason: &str) {
        log::debug!("server disconnecting all clients");
        for (_, conn) in self.directory.clients.iter_mut() {
            conn.disconnect(reason);
        }
    }

    fn reap_disconnected(&mut self) {
        let dead = self
            .directory
            .clients
            .iter()
            .filter(|(_, conn)| !conn.is_connected())
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        for idx in dead {
            self.directory.leave(idx);
            self.directory.clients.remove(idx);
            log::trace!("client slot {idx} freed");
        }
    }

    fn accept(&mut self, now: u64) {
        while self.directory.clients.first_free().is_some() {
            let (stream, addr) = match self.listener.accept() {
                Ok(Some(accepted)) => accepted,
                Ok(None) => return,
                Err(e) => {
                    log::warn!("accept() failed: {e}");
                    return;
                }
            };
            let Some(idx) = self.directory.clients.first_free() else {
                return;
            };
            let conn = Connection::new(
                idx,
                stream,
                addr,
                now,
                self.cfg.min_sendq_size,
                self.cfg.max_sendq_size,
            );
            if self.directory.clients.insert(conn).is_ok() {
                log::info!(
                    "client {idx} connecting from {} ({}/{} slots used)",
                    addr.ip(),
                    self.directory.clients.len(),
                    self.directory.clients.capacity()
                );
            }
        }
    }

    fn service_unassigned(&mut self, now: u64) {
        let deadline = secs_to_us(self.cfg.connect_timeout);
        let unassigned = self
            .directory
            .clients
            .iter()
            .filter(|(_, conn)| conn.game.is_none() && conn.is_connected())
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        for idx in unassigned {
            let conn = &mut self.directory.clients[idx];
            if now.saturating_sub(conn.connected_at) > deadline {
                conn.disconnect("Connect timeout met.");
            } else {
                self.drain(idx, now);
            }
        }
    }

    fn service_game(&mut self, game_idx: GameIndex, now: u64) {
        let game = &mut self.directory.games[game_idx];
        if game.zombie {
            self.directory.games.remove(game_idx);
            log::info!("game {game_idx} destroyed");
            return;
        }
        if game.next_tick() > now {
            return;
        }
        game.last_time += game.interval_us();

        let idle_limit = secs_to_us(self.cfg.idle_timeout);
        for (_, member) in self.directory.games[game_idx].member_slots() {
            self.drain(member, now);
            let conn = &mut self.directory.clients[member];
            if conn.is_connected() && now.saturating_sub(conn.last_receive) > idle_limit {
                conn.disconnect("Idle timeout met.");
            }
        }

        let game = &mut self.directory.games[game_idx];
        game.clear_merge();
        for (slot, member) in game.member_slots() {
            let conn = &self.directory.clients[member];
            if conn.is_connected() && conn.pending == 0 {
                game.merge_input(slot, conn.local_input());
            }
        }

        let frame = game.frame().to_vec();
        for (_, member) in game.member_slots() {
            let conn = &mut self.directory.clients[member];
            conn.uncork();
            conn.send_raw(&frame);
            conn.cork();
        }
    }

    /// Reads and handles units until the socket has nothing more to give.
    fn drain(&mut self, idx: ClientIndex, now: u64) {
        loop {
            let conn = &mut self.directory.clients[idx];
            let ReadOutcome::Unit(unit) = conn.read_unit(now) else {
                return;
            };
            self.handle_unit(idx, unit, now);
        }
    }

    fn handle_unit(&mut self, idx: ClientIndex, unit: Unit, now: u64) {
        let conn = &mut self.directory.clients[idx];
        match unit {
            Unit::LoginLength(len) => {
                if login_len_ok(len, MAX_LOGIN_SIZE) {
                    conn.assembler.expect(Phase::Login, len as usize);
                } else {
                    conn.disconnect(LoginError::Length(len));
                }
            }
            Unit::Login(block) => self.login(idx, &block, now),
            Unit::Input(data) => conn.set_local_input(&data),
            Unit::CommandStart(cmd) => log::trace!("client {idx} sent {cmd:?}"),
            Unit::CommandLength(cmd, len) => self.process_command(idx, cmd, len),
            Unit::CommandPayload(cmd, data) => self.process_payload(idx, cmd, &data),
        }
    }

    fn login(&mut self, idx: ClientIndex, block: &[u8], now: u64) {
        let conn = &mut self.directory.clients[idx];
        let login = match LoginData::parse(block) {
            Ok(login) => login,
            Err(e) => return conn.disconnect(format!("Malformed login: {e}")),
        };
        conn.protocol_version = login.header.protocol_version;
        conn.local_players = login.header.local_players;
        // the layout is what outbound framing is sized by, so these errors
        // cannot be reported to the client
        conn.layout = match ControllerLayout::from_login(&login.header) {
            Ok(layout) => layout,
            Err(e) => return conn.disconnect(e),
        };
        if let Some(password) = self.cfg.password {
            if password != login.header.password {
                return conn.reject(LoginError::Password);
            }
        }
        if let Err(e) = self.directory.join(idx, &login, now) {
            self.directory.clients[idx].reject(e);
        }
    }

    fn process_command(&mut self, idx: ClientIndex, cmd: Command, len: u32) {
        let conn = &mut self.directory.clients[idx];
        let Some(game_idx) = conn.game else {
            return conn.disconnect("Command before login.");
        };
        log::trace!("client {idx} command {cmd:?} len {len}");

        match cmd.class() {
            CommandClass::Payload => {
                let max = self.cfg.max_command_payload;
                if len as usize > max {
                    return conn.reject(format!(
                        "Tried to exceed maximum command payload by {} bytes!",
                        len as usize - max
                    ));
                }
                match cmd {
                    Command::Integrity => self.directory.broadcast(game_idx, cmd, None, 0),
                    _ if !accepts_payload(cmd) => return conn.reject(unknown_command(cmd)),
                    Command::SetMedia if len as usize != MEDIA_CHANGE_SIZE => {
                        return conn.reject("SET_MEDIA command length is wrong.");
                    }
                    Command::Quit if len == 0 => return conn.disconnect(quit_reason(&[])),
                    _ if len > 0 => {
                        return conn
                            .assembler
                            .expect(Phase::CommandPayload(cmd), len as usize);
                    }
                    _ => {}
                }
            }
            CommandClass::Emulator => self.directory.broadcast(game_idx, cmd, None, 0),
            CommandClass::Inline => match cmd {
                Command::SetFps => {
                    if self.directory.games[game_idx].set_fps(len) {
                        log::debug!(
                            "game {game_idx} fps set to {:.3}",
                            len as f64 / (1 << 24) as f64
                        );
                    } else {
                        conn.send_text("FPS out of range(range is from 1 to 130).");
                    }
                }
                Command::Nop => {}
                Command::CtrlChangeAck => self.directory.acknowledge_change(idx, len),
                Command::CtrlrTake
                | Command::CtrlrDrop
                | Command::CtrlrDupe
                | Command::CtrlrSwap => {
                    if let Some(op) = Reassign::from_command(cmd, len) {
                        self.directory.reassign(idx, op);
                    }
                }
                Command::RequestList => self.directory.send_roster(idx),
                _ => return conn.reject(unknown_command(cmd)),
            },
        }
        self.resume_updates(idx);
    }

    fn process_payload(&mut self, idx: ClientIndex, cmd: Command, data: &[u8]) {
        let conn = &mut self.directory.clients[idx];
        let Some(game_idx) = conn.game else {
            return conn.disconnect("Command before login.");
        };
        match cmd {
            Command::IntegrityRes => {
                log::info!("client {idx} integrity: {}", hex(data));
            }
            Command::Echo => {
                let data = &data[..data.len().min(MAX_ECHO_SIZE)];
                conn.send_command(cmd, Some(data), data.len() as u32);
            }
            Command::SetNick => self.directory.change_nickname(idx, data),
            Command::Text => self.directory.broadcast_text(idx, data),
            Command::SetMedia | Command::LoadState => {
                self.directory
                    .broadcast(game_idx, cmd, Some(data), data.len() as u32);
            }
            Command::Quit => return conn.disconnect(quit_reason(data)),
            _ => return conn.reject(unknown_command(cmd)),
        }
        self.resume_updates(idx);
    }

    /// Back to waiting for input frames, sized by the client's current mask.
    fn resume_updates(&mut self, idx: ClientIndex) {
        let conn = &mut self.directory.clients[idx];
        if conn.is_connected() {
            let size = conn.local_data_size;
            conn.assembler.expect_update(size);
        }
    }
}

/// Payload commands a client may send. Everything else in 0x80..=0xFF is
/// server to client only.
fn accepts_payload(cmd: Command) -> bool {
    matches!(
        cmd,
        Command::LoadState
            | Command::Text
            | Command::Echo
            | Command::Integrity
            | Command::IntegrityRes
            | Command::SetNick
            | Command::SetMedia
            | Command::Quit
    )
}

fn unknown_command(cmd: Command) -> String {
    format!("Unknown command: 0x{:02x}", cmd.byte())
}

fn quit_reason(data: &[u8]) -> String {
    if data.is_empty() {
        return "Quit".to_owned();
    }
    let data = &data[..data.len().min(MAX_QUIT_MESSAGE_SIZE)];
    let data = data.split(|&b| b == 0).next().unwrap_or_default();
    let text: Vec<u8> = data
        .iter()
        .map(|&b| if b < 0x20 { b' ' } else { b })
        .collect();
    format!("Quit: {}", String::from_utf8_lossy(&text))
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}
