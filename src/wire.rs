//! Byte-level layout of the netplay protocol.
//!
//! All integers are little-endian. After login, a client sends frames of
//! `1 + local data size` bytes whose first byte is a command (0 for plain input).
//! A nonzero command is followed by a 4-byte length, and commands `>= 0x80`
//! are followed by that many payload bytes. For `0x40..=0x7F` the length field
//! itself carries the argument. The server answers with frames of
//! `total data size + 1` bytes where the *last* byte is the command.

use std::io;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::consts::{
    EMULATOR_ID_SIZE, GAME_ID_SIZE, LOGIN_HEADER_SIZE, MAX_CONTROLLERS_PER_GAME,
    PASSWORD_DIGEST_SIZE,
};

pub fn en32(buf: &mut [u8], value: u32) {
    LittleEndian::write_u32(&mut buf[..4], value);
}

pub fn de32(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(&buf[..4])
}

macro_rules! commands {
    ($($name:ident = $byte:literal,)*) => {
        /// Every command byte the server knows by name. Bytes below 0x40 are
        /// opaque emulator commands and pass through as [`Command::Emulator`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Command {
            Emulator(u8),
            $($name,)*
            Unknown(u8),
        }

        impl From<u8> for Command {
            fn from(byte: u8) -> Self {
                match byte {
                    0x00..=0x3F => Command::Emulator(byte),
                    $($byte => Command::$name,)*
                    _ => Command::Unknown(byte),
                }
            }
        }

        impl From<Command> for u8 {
            fn from(cmd: Command) -> u8 {
                match cmd {
                    Command::Emulator(byte) | Command::Unknown(byte) => byte,
                    $(Command::$name => $byte,)*
                }
            }
        }
    };
}

commands! {
    SetFps = 0x40,
    Nop = 0x41,
    CtrlChange = 0x43,
    CtrlChangeAck = 0x44,
    CtrlrSwapNotif = 0x68,
    CtrlrTake = 0x70,
    CtrlrDrop = 0x71,
    CtrlrDupe = 0x72,
    CtrlrSwap = 0x78,
    RequestList = 0x7F,
    LoadState = 0x80,
    RequestState = 0x81,
    Text = 0x90,
    ServerText = 0x93,
    Echo = 0x94,
    Integrity = 0x95,
    IntegrityRes = 0x96,
    SetNick = 0x98,
    PlayerJoined = 0xA0,
    PlayerLeft = 0xA1,
    YouJoined = 0xB0,
    YouLeft = 0xB1,
    NickChanged = 0xB8,
    List = 0xC0,
    SetMedia = 0xD0,
    CtrlrTakeNotif = 0xF0,
    CtrlrDropNotif = 0xF1,
    CtrlrDupeNotif = 0xF2,
    Quit = 0xFF,
}

impl Command {
    pub fn byte(self) -> u8 {
        self.into()
    }
    pub fn class(self) -> CommandClass {
        CommandClass::of(self.byte())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// 0x00..=0x3F: forwarded verbatim to the whole game, no payload.
    Emulator,
    /// 0x40..=0x7F: no payload, the length field is the argument.
    Inline,
    /// 0x80..=0xFF: the length field counts the payload that follows.
    Payload,
}

impl CommandClass {
    pub fn of(byte: u8) -> Self {
        match byte {
            0x00..=0x3F => CommandClass::Emulator,
            0x40..=0x7F => CommandClass::Inline,
            _ => CommandClass::Payload,
        }
    }
}

/// Server→client command header. `total_data_size` is the game's merged
/// controller data size; the argument rides in the first four bytes and the
/// command in the last one.
pub fn command_header(total_data_size: usize, cmd: Command, len: u32) -> Vec<u8> {
    let mut header = vec![0u8; total_data_size + 1];
    en32(&mut header, len);
    header[total_data_size] = cmd.byte();
    header
}

/// Who a player is and which controllers they drive, as carried by the
/// joined/left/notify messages.
pub fn encode_player_info(protocol_version: u8, mask: u32, nickname: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + nickname.len());
    if protocol_version >= 3 {
        out.extend_from_slice(&mask.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
    } else {
        out.push(mask as u8);
        out.push(0);
    }
    out.extend_from_slice(nickname.as_bytes());
    out
}

/// The fixed 97-byte head of a login block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginHeader {
    pub game_id: [u8; GAME_ID_SIZE],
    pub password: [u8; PASSWORD_DIGEST_SIZE],
    pub protocol_version: u8,
    pub total_controllers: u8,
    pub emulator_id_len: u32,
    pub controller_data_size: [u8; MAX_CONTROLLERS_PER_GAME],
    pub controller_type: [u8; MAX_CONTROLLERS_PER_GAME],
    pub local_players: u8,
}

impl LoginHeader {
    pub fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_all(&self.game_id)?;
        writer.write_all(&self.password)?;
        writer.write_u8(self.protocol_version)?;
        writer.write_u8(self.total_controllers)?;
        writer.write_all(&[0; 2])?;
        writer.write_u32::<LittleEndian>(self.emulator_id_len)?;
        writer.write_all(&[0; 8])?;
        writer.write_all(&self.controller_data_size)?;
        writer.write_all(&[0; 16])?;
        writer.write_all(&self.controller_type)?;
        writer.write_u8(self.local_players)?;
        Ok(())
    }

    pub fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let mut game_id = [0; GAME_ID_SIZE];
        reader.read_exact(&mut game_id)?;
        let mut password = [0; PASSWORD_DIGEST_SIZE];
        reader.read_exact(&mut password)?;
        let protocol_version = reader.read_u8()?;
        let total_controllers = reader.read_u8()?;
        let mut padding = [0; 16];
        reader.read_exact(&mut padding[..2])?;
        let emulator_id_len = reader.read_u32::<LittleEndian>()?;
        reader.read_exact(&mut padding[..8])?;
        let mut controller_data_size = [0; MAX_CONTROLLERS_PER_GAME];
        reader.read_exact(&mut controller_data_size)?;
        reader.read_exact(&mut padding)?;
        let mut controller_type = [0; MAX_CONTROLLERS_PER_GAME];
        reader.read_exact(&mut controller_type)?;
        let local_players = reader.read_u8()?;
        Ok(Self {
            game_id,
            password,
            protocol_version,
            total_controllers,
            emulator_id_len,
            controller_data_size,
            controller_type,
            local_players,
        })
    }
}

/// A complete login block: header, nickname, and emulator identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginData {
    pub header: LoginHeader,
    pub nickname: Vec<u8>,
    pub emulator_id: [u8; EMULATOR_ID_SIZE],
}

impl LoginData {
    /// `block` must be at least [`LOGIN_HEADER_SIZE`] bytes; the assembler
    /// enforces that before handing it over.
    pub fn parse(block: &[u8]) -> Result<Self, io::Error> {
        let header = LoginHeader::read_from(&mut io::Cursor::new(block))?;
        let tail = &block[LOGIN_HEADER_SIZE..];
        let emu_len = header.emulator_id_len as usize;
        let nickname_len = if emu_len < tail.len() {
            tail.len() - emu_len
        } else {
            0
        };

        let mut emulator_id = [0u8; EMULATOR_ID_SIZE];
        if header.protocol_version == 3
            && (1..=EMULATOR_ID_SIZE).contains(&emu_len)
            && nickname_len + emu_len <= tail.len()
        {
            let raw = &tail[nickname_len..nickname_len + emu_len];
            let raw = raw.split(|&b| b == 0).next().unwrap_or_default();
            emulator_id[..raw.len()].copy_from_slice(raw);
            for b in emulator_id.iter_mut() {
                if (0x01..0x20).contains(b) {
                    *b = 0x20;
                }
            }
        }

        Ok(Self {
            header,
            nickname: tail[..nickname_len].to_vec(),
            emulator_id,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LOGIN_HEADER_SIZE + self.nickname.len() + 64);
        // writing into a Vec cannot fail
        let _ = self.header.write_to(&mut out);
        out.extend_from_slice(&self.nickname);
        let emu_len = self.header.emulator_id_len as usize;
        out.extend_from_slice(&self.emulator_id[..emu_len.min(EMULATOR_ID_SIZE)]);
        out
    }
}

/// Printable form of a zero-padded emulator identity.
pub fn emulator_id_str(id: &[u8; EMULATOR_ID_SIZE]) -> String {
    let end = id.iter().position(|&b| b == 0).unwrap_or(id.len());
    String::from_utf8_lossy(&id[..end]).into_owned()
}
