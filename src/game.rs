use crate::consts::{
    EMULATOR_ID_SIZE, FPS_SCALE, GAME_ID_SIZE, MAX_CLIENTS_PER_GAME, MAX_CONTROLLERS_LEGACY,
    MAX_CONTROLLERS_PER_GAME, MAX_FPS, MAX_TOTAL_CONTROLLERS_DATA_SIZE, MIN_FPS,
    MIN_TOTAL_CONTROLLERS_DATA_SIZE,
};
use crate::error::{JoinError, LoginError};
use crate::wire::{emulator_id_str, LoginHeader};

pub type GameId = [u8; GAME_ID_SIZE];

/// Controllers of an emulated system and where each one's data sits in the
/// merged frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerLayout {
    pub types: Vec<u8>,
    pub sizes: Vec<u8>,
    pub offsets: Vec<usize>,
    /// Never below 4, so a command length always fits in an outbound header.
    pub total_size: usize,
}

impl ControllerLayout {
    pub fn new(types: &[u8], sizes: &[u8]) -> Self {
        let mut offsets = Vec::with_capacity(sizes.len());
        let mut total = 0;
        for &size in sizes {
            offsets.push(total);
            total += size as usize;
        }
        Self {
            types: types.to_vec(),
            sizes: sizes.to_vec(),
            offsets,
            total_size: total.max(MIN_TOTAL_CONTROLLERS_DATA_SIZE),
        }
    }

    pub fn from_login(header: &LoginHeader) -> Result<Self, LoginError> {
        let count = header.total_controllers as usize;
        if header.protocol_version < 3 && count > MAX_CONTROLLERS_LEGACY {
            return Err(LoginError::TooManyControllersForProtocol(count));
        }
        if count > MAX_CONTROLLERS_PER_GAME {
            return Err(LoginError::TooManyControllers(count));
        }
        if header.protocol_version == 0 {
            return Err(LoginError::ProtocolZero);
        }
        let layout = if header.protocol_version < 2 {
            Self::new(&vec![1; count], &vec![1; count])
        } else {
            Self::new(
                &header.controller_type[..count],
                &header.controller_data_size[..count],
            )
        };
        if layout.total_size > MAX_TOTAL_CONTROLLERS_DATA_SIZE {
            return Err(LoginError::DataSizeExceeded);
        }
        Ok(layout)
    }

    pub fn count(&self) -> usize {
        self.types.len()
    }

    /// Every controller bit this layout has.
    pub fn all_mask(&self) -> u32 {
        ((1u64 << self.count()) - 1) as u32
    }

    /// Bytes a client driving `mask` sends per frame (command byte excluded).
    pub fn data_size(&self, mask: u32) -> usize {
        self.sizes
            .iter()
            .enumerate()
            .filter(|&(c, _)| mask & (1 << c) != 0)
            .map(|(_, &size)| size as usize)
            .sum()
    }
}

#[derive(Debug)]
pub struct Game {
    pub id: GameId,
    pub protocol_version: u8,
    pub emulator_id: [u8; EMULATOR_ID_SIZE],
    pub layout: ControllerLayout,
    /// Client table index of the connection in each member slot.
    pub members: [Option<usize>; MAX_CLIENTS_PER_GAME],
    /// Controllers each member slot drives.
    pub ownership: [u32; MAX_CLIENTS_PER_GAME],
    /// Union of `ownership`; kept in sync by [`Game::recalc_in_use`].
    pub in_use: u32,
    /// 8.24 fixed point.
    pub fps: u32,
    pub last_time: u64,
    pub zombie: bool,
    merge: Vec<u8>,
}

impl Game {
    pub fn new(
        id: GameId,
        protocol_version: u8,
        emulator_id: [u8; EMULATOR_ID_SIZE],
        layout: ControllerLayout,
        now: u64,
    ) -> Self {
        let merge = vec![0; layout.total_size + 1];
        Self {
            id,
            protocol_version,
            emulator_id,
            layout,
            members: [None; MAX_CLIENTS_PER_GAME],
            ownership: [0; MAX_CLIENTS_PER_GAME],
            in_use: 0,
            fps: crate::consts::DEFAULT_FPS,
            last_time: now,
            zombie: false,
            merge,
        }
    }

    /// A joining client has to match the game exactly; nothing is coerced.
    pub fn check_compatible(
        &self,
        protocol_version: u8,
        emulator_id: &[u8; EMULATOR_ID_SIZE],
        layout: &ControllerLayout,
    ) -> Result<(), JoinError> {
        if self.protocol_version != protocol_version {
            return Err(JoinError::ProtocolVersion {
                game: self.protocol_version,
                you: protocol_version,
            });
        }
        if &self.emulator_id != emulator_id {
            return Err(JoinError::EmulatorId {
                game: emulator_id_str(&self.emulator_id),
                you: emulator_id_str(emulator_id),
            });
        }
        if self.layout.count() != layout.count() {
            return Err(JoinError::ControllerCount {
                game: self.layout.count(),
                you: layout.count(),
            });
        }
        for index in 0..layout.count() {
            if self.layout.types[index] != layout.types[index] {
                return Err(JoinError::ControllerType {
                    index: index + 1,
                    game: self.layout.types[index],
                    you: layout.types[index],
                });
            }
            if self.layout.sizes[index] != layout.sizes[index] {
                return Err(JoinError::ControllerDataSize {
                    index: index + 1,
                    game: self.layout.sizes[index],
                    you: layout.sizes[index],
                });
            }
        }
        if self.layout.total_size != layout.total_size {
            return Err(JoinError::TotalDataSize {
                game: self.layout.total_size,
                you: layout.total_size,
            });
        }
        Ok(())
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.members.iter().position(Option::is_none)
    }

    pub fn member_count(&self) -> usize {
        self.members.iter().flatten().count()
    }

    /// `(slot, client index)` of every member, in slot order.
    pub fn member_slots(&self) -> Vec<(usize, usize)> {
        self.members
            .iter()
            .enumerate()
            .filter_map(|(slot, m)| m.map(|client| (slot, client)))
            .collect()
    }

    pub fn slot_of(&self, client: usize) -> Option<usize> {
        self.members.iter().position(|m| *m == Some(client))
    }

    pub fn recalc_in_use(&mut self) {
        self.in_use = self.ownership.iter().fold(0, |acc, mask| acc | mask);
    }

    /// Seats `client` in `slot` and hands it up to `count` unclaimed
    /// controllers, lowest index first.
    pub fn seat(&mut self, slot: usize, client: usize, count: usize) -> u32 {
        self.members[slot] = Some(client);
        let mut mask = 0;
        let mut wanted = count;
        for c in 0..self.layout.count() {
            if wanted == 0 {
                break;
            }
            if self.in_use & (1 << c) == 0 {
                mask |= 1 << c;
                wanted -= 1;
            }
        }
        self.ownership[slot] = mask;
        self.recalc_in_use();
        self.zombie = false;
        mask
    }

    /// Empties `slot`. Returns the controllers it held. A game left without
    /// members becomes a zombie.
    pub fn unseat(&mut self, slot: usize) -> u32 {
        let mask = self.ownership[slot];
        self.members[slot] = None;
        self.ownership[slot] = 0;
        self.recalc_in_use();
        if self.member_count() == 0 {
            self.zombie = true;
        }
        mask
    }

    pub fn set_fps(&mut self, fps: u32) -> bool {
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return false;
        }
        self.fps = fps;
        true
    }

    pub fn interval_us(&self) -> u64 {
        FPS_SCALE * 1_000_000 / self.fps.max(1) as u64
    }

    pub fn next_tick(&self) -> u64 {
        self.last_time + self.interval_us()
    }

    /// Zeroes the merge buffer, command byte included.
    pub fn clear_merge(&mut self) {
        self.merge.fill(0);
    }

    /// ORs one member's local controller data into the merge buffer at the
    /// offsets of the controllers `slot` owns.
    pub fn merge_input(&mut self, slot: usize, local: &[u8]) {
        let mask = self.ownership[slot];
        let mut local = local.iter();
        for c in 0..self.layout.count() {
            if mask & (1 << c) == 0 {
                continue;
            }
            let offset = self.layout.offsets[c];
            for k in 0..self.layout.sizes[c] as usize {
                let Some(byte) = local.next() else {
                    return;
                };
                self.merge[offset + k] |= *byte;
            }
        }
    }

    /// The outbound input frame: merged data followed by a zero command byte.
    pub fn frame(&self) -> &[u8] {
        &self.merge
    }
}
