//! The client and game tables, and how clients come to be in a game.

use rand::distributions::Uniform;
use rand::Rng;

use crate::connection::Connection;
use crate::consts::{MAX_NICK_LEN, RANDOM_NICK_LEN};
use crate::error::JoinError;
use crate::free_list::FreeList;
use crate::game::Game;
use crate::transceiver::Transceiver;
use crate::wire::{emulator_id_str, encode_player_info, Command, LoginData};

/// Both process-wide arenas. Allocated once at startup with one game slot per
/// client slot, so a login can always find a game to create.
pub struct SessionDirectory<T: Transceiver> {
    pub clients: FreeList<Connection<T>>,
    pub games: FreeList<Game>,
}

impl<T: Transceiver> SessionDirectory<T> {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: FreeList::new(max_clients),
            games: FreeList::new(max_clients),
        }
    }

    /// Places a logged-in client into the game named by its login, creating
    /// the game if there is none yet. On error nothing has changed and the
    /// caller is expected to reject the client with the error text.
    ///
    /// The client's layout and protocol version must already be set.
    pub fn join(&mut self, client: usize, login: &LoginData, now: u64) -> Result<(), JoinError> {
        let conn = &self.clients[client];
        let found = self
            .games
            .iter()
            .find(|(_, game)| game.id == login.header.game_id)
            .map(|(index, _)| index);

        let (game_idx, created) = match found {
            Some(index) => {
                self.games[index].check_compatible(
                    conn.protocol_version,
                    &login.emulator_id,
                    &conn.layout,
                )?;
                if self.games[index].free_slot().is_none() {
                    return Err(JoinError::GameFull);
                }
                (index, false)
            }
            None => {
                let game = Game::new(
                    login.header.game_id,
                    conn.protocol_version,
                    login.emulator_id,
                    conn.layout.clone(),
                    now,
                );
                let index = self.games.insert(game).map_err(|_| JoinError::NoGameSlot)?;
                log::info!("game {index} added");
                (index, true)
            }
        };

        if !created {
            if let Some((_, first)) = self.games[game_idx].member_slots().first().copied() {
                self.clients[first].send_command(Command::RequestState, None, 0);
            }
        }

        let game = &mut self.games[game_idx];
        let Some(slot) = game.free_slot() else {
            return Err(JoinError::GameFull);
        };
        let local_players = self.clients[client].local_players as usize;
        let mask = game.seat(slot, client, local_players);
        let data_size = game.layout.data_size(mask);

        let nickname = self.unique_nickname(game_idx, client, &login.nickname);
        let conn = &mut self.clients[client];
        conn.game = Some(game_idx);
        conn.slot = slot;
        conn.pending = 0;
        conn.nickname = nickname;
        conn.local_data_size = data_size;
        conn.clear_local_input();
        conn.assembler.expect_update(data_size);
        log::info!(
            "client(protocol {}) {client} assigned to game {game_idx} as player mask {mask:#010x} <{}> - EmuID={}",
            conn.protocol_version,
            conn.nickname,
            emulator_id_str(&login.emulator_id),
        );

        self.send_roster(client);
        for (_, other) in self.games[game_idx].member_slots() {
            if other != client {
                self.announce(other, client, Command::PlayerJoined, mask);
            }
        }
        Ok(())
    }

    /// Takes a reaped client out of its game and tells whoever is left.
    pub fn leave(&mut self, client: usize) {
        let Some(game_idx) = self.clients[client].game.take() else {
            return;
        };
        let slot = self.clients[client].slot;
        let game = &mut self.games[game_idx];
        let mask = game.unseat(slot);
        if game.zombie {
            log::debug!("game {game_idx} has no members left");
        }
        for (_, other) in self.games[game_idx].member_slots() {
            self.announce(other, client, Command::PlayerLeft, mask);
        }
    }

    /// Sends `to` one record per member of its game, itself as "you joined".
    pub fn send_roster(&mut self, to: usize) {
        let Some(game_idx) = self.clients[to].game else {
            return;
        };
        for (slot, member) in self.games[game_idx].member_slots() {
            let cmd = if member == to {
                Command::YouJoined
            } else {
                Command::PlayerJoined
            };
            let mask = self.games[game_idx].ownership[slot];
            self.announce(to, member, cmd, mask);
        }
    }

    fn announce(&mut self, to: usize, about: usize, cmd: Command, mask: u32) {
        let info = encode_player_info(
            self.clients[to].protocol_version,
            mask,
            &self.clients[about].nickname,
        );
        self.clients[to].send_command(cmd, Some(&info), info.len() as u32);
    }

    /// Sends one command to every connected member of a game.
    pub fn broadcast(&mut self, game_idx: usize, cmd: Command, data: Option<&[u8]>, len: u32) {
        for (_, member) in self.games[game_idx].member_slots() {
            self.clients[member].send_command(cmd, data, len);
        }
    }

    /// Chat from `from`, prefixed with its nickname.
    pub fn broadcast_text(&mut self, from: usize, text: &[u8]) {
        let Some(game_idx) = self.clients[from].game else {
            return;
        };
        let nick = self.clients[from].nickname.as_bytes();
        let mut payload = Vec::with_capacity(4 + nick.len() + text.len());
        payload.extend_from_slice(&(nick.len() as u32).to_le_bytes());
        payload.extend_from_slice(nick);
        payload.extend_from_slice(text);
        self.broadcast(game_idx, Command::Text, Some(&payload), payload.len() as u32);
    }

    /// Handles a nickname change and tells the game `old\nnew\0`.
    pub fn change_nickname(&mut self, client: usize, raw: &[u8]) {
        let Some(game_idx) = self.clients[client].game else {
            return;
        };
        let new = self.unique_nickname(game_idx, client, raw);
        let old = std::mem::replace(&mut self.clients[client].nickname, new.clone());
        log::debug!("client {client} changed nickname <{old}> -> <{new}>");
        let payload = format!("{old}\n{new}\0");
        self.broadcast(
            game_idx,
            Command::NickChanged,
            Some(payload.as_bytes()),
            payload.len() as u32,
        );
    }

    fn nickname_taken(&self, game_idx: usize, except: usize, nick: &str) -> bool {
        self.games[game_idx]
            .member_slots()
            .into_iter()
            .filter(|&(_, member)| member != except)
            .any(|(_, member)| self.clients[member].nickname.eq_ignore_ascii_case(nick))
    }

    fn unique_nickname(&self, game_idx: usize, client: usize, raw: &[u8]) -> String {
        let mut nick = clean_nickname(raw);
        if nick.is_empty() || self.nickname_taken(game_idx, client, &nick) {
            let mut rng = rand::thread_rng();
            loop {
                nick = random_nickname(&mut rng);
                if !self.nickname_taken(game_idx, client, &nick) {
                    break;
                }
            }
        }
        nick
    }
}

/// Truncates to the maximum length and cuts at the first reserved or control
/// byte.
pub fn clean_nickname(raw: &[u8]) -> String {
    let raw = &raw[..raw.len().min(MAX_NICK_LEN)];
    let end = raw
        .iter()
        .position(|&b| b == b'<' || b == b'>' || b == b'*' || b < 0x20)
        .unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

pub fn random_nickname(rng: &mut impl Rng) -> String {
    rng.sample_iter(Uniform::new_inclusive(b'a', b'z'))
        .take(RANDOM_NICK_LEN)
        .map(char::from)
        .collect()
}
