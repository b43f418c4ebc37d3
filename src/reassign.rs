//! Controller ownership changes requested mid-game.
//!
//! Every operation mutates the per-slot masks of a [`Game`] and returns the
//! slots whose mask was touched. Each of those has to be sent its new mask
//! and must acknowledge it before its input frames are trusted again, because
//! the size of its frames follows its mask.

use crate::connection::Connection;
use crate::error::ReassignError;
use crate::game::Game;
use crate::session::SessionDirectory;
use crate::transceiver::Transceiver;
use crate::wire::{encode_player_info, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reassign {
    /// Claim controllers, removing them from everyone else.
    Take(u32),
    /// Give up controllers the requester holds.
    Drop(u32),
    /// Claim controllers while others keep them too.
    Dupe(u32),
    /// Exchange two controllers between whoever holds exactly one of them.
    Swap(u8, u8),
}

impl Reassign {
    /// Decodes a reassignment command from its inline argument.
    pub fn from_command(cmd: Command, len: u32) -> Option<Self> {
        match cmd {
            Command::CtrlrTake => Some(Self::Take(len)),
            Command::CtrlrDrop => Some(Self::Drop(len)),
            Command::CtrlrDupe => Some(Self::Dupe(len)),
            Command::CtrlrSwap => Some(Self::Swap(len as u8, (len >> 8) as u8)),
            _ => None,
        }
    }

    /// Public notice sent to the whole game afterward.
    pub fn notice(self) -> Command {
        match self {
            Self::Take(_) => Command::CtrlrTakeNotif,
            Self::Drop(_) => Command::CtrlrDropNotif,
            Self::Dupe(_) => Command::CtrlrDupeNotif,
            Self::Swap(..) => Command::CtrlrSwapNotif,
        }
    }
}

/// Applies `op` on behalf of member `slot`. On error the game is untouched.
pub fn apply(game: &mut Game, slot: usize, op: Reassign) -> Result<Vec<usize>, ReassignError> {
    let changed = match op {
        Reassign::Take(mask) => take(game, slot, mask, true)?,
        Reassign::Dupe(mask) => take(game, slot, mask, false)?,
        Reassign::Drop(mask) => drop(game, slot, mask)?,
        Reassign::Swap(a, b) => swap(game, a, b)?,
    };
    game.recalc_in_use();
    Ok(changed)
}

fn check_mask(game: &Game, mask: u32) -> Result<(), ReassignError> {
    if mask & !game.layout.all_mask() != 0 {
        return Err(ReassignError::NonexistentController);
    }
    Ok(())
}

fn take(
    game: &mut Game,
    slot: usize,
    mask: u32,
    exclusive: bool,
) -> Result<Vec<usize>, ReassignError> {
    check_mask(game, mask)?;
    game.ownership[slot] |= mask;
    let mut changed = vec![slot];
    if exclusive {
        for (other, _) in game.member_slots() {
            if other != slot && game.ownership[other] & mask != 0 {
                game.ownership[other] &= !mask;
                changed.push(other);
            }
        }
    }
    Ok(changed)
}

fn drop(game: &mut Game, slot: usize, mask: u32) -> Result<Vec<usize>, ReassignError> {
    check_mask(game, mask)?;
    if game.ownership[slot] & mask != mask {
        return Err(ReassignError::NotOwned);
    }
    game.ownership[slot] &= !mask;
    Ok(vec![slot])
}

fn swap(game: &mut Game, a: u8, b: u8) -> Result<Vec<usize>, ReassignError> {
    let count = game.layout.count();
    if a as usize >= count || b as usize >= count {
        return Err(ReassignError::NonexistentController);
    }
    let (bit_a, bit_b) = (1u32 << a, 1u32 << b);
    let mut changed = vec![];
    for (slot, _) in game.member_slots() {
        let mask = game.ownership[slot];
        if (mask & bit_a != 0) != (mask & bit_b != 0) {
            game.ownership[slot] = mask ^ (bit_a | bit_b);
            changed.push(slot);
        }
    }
    if changed.is_empty() {
        return Err(ReassignError::NoneAffected);
    }
    Ok(changed)
}

/// Handles a client's acknowledgement of an ownership change.
///
/// While further changes are still outstanding, `acked_mask` (the mask the
/// client says it now sends for) sizes its frames; once none are left, its
/// current mask does and any stale input is cleared.
pub fn acknowledge<T: Transceiver>(conn: &mut Connection<T>, game: &Game, acked_mask: u32) {
    if conn.pending > 0 {
        conn.pending -= 1;
    } else {
        log::warn!("client {} acknowledged a change that was never sent", conn.id);
    }
    let mask = if conn.pending > 0 {
        acked_mask
    } else {
        game.ownership[conn.slot]
    };
    conn.local_data_size = game.layout.data_size(mask);
    if conn.pending == 0 {
        conn.clear_local_input();
    }
}

impl<T: Transceiver> SessionDirectory<T> {
    /// Runs a reassignment for `client`, tells every affected member its new
    /// mask, then tells the whole game what happened.
    pub fn reassign(&mut self, client: usize, op: Reassign) {
        let Some(game_idx) = self.clients[client].game else {
            return;
        };
        let slot = self.clients[client].slot;
        let changed = match apply(&mut self.games[game_idx], slot, op) {
            Ok(changed) => changed,
            Err(e) if e.is_fatal() => return self.clients[client].reject(e),
            Err(e) => return self.clients[client].send_text(e),
        };
        log::debug!("client {client} {op:?} changed slots {changed:?}");

        let game = &self.games[game_idx];
        for s in changed {
            let (Some(member), mask) = (game.members[s], game.ownership[s]) else {
                continue;
            };
            let conn = &mut self.clients[member];
            conn.pending += 1;
            conn.send_command(Command::CtrlChange, None, mask);
        }

        match op {
            Reassign::Swap(a, b) => {
                self.broadcast(game_idx, op.notice(), None, a as u32 | (b as u32) << 8)
            }
            Reassign::Take(mask) | Reassign::Drop(mask) | Reassign::Dupe(mask) => {
                let conn = &self.clients[client];
                let mut payload = mask.to_le_bytes().to_vec();
                payload.extend(encode_player_info(
                    conn.protocol_version,
                    self.games[game_idx].ownership[slot],
                    &conn.nickname,
                ));
                self.broadcast(game_idx, op.notice(), Some(&payload), payload.len() as u32);
            }
        }
    }

    pub fn acknowledge_change(&mut self, client: usize, acked_mask: u32) {
        let Some(game_idx) = self.clients[client].game else {
            return;
        };
        acknowledge(&mut self.clients[client], &self.games[game_idx], acked_mask);
    }
}
