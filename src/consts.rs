pub const MAX_NICK_LEN: usize = 150;
pub const MAX_CLIENTS_PER_GAME: usize = 32;
pub const MAX_CONTROLLERS_PER_GAME: usize = 16;
pub const MAX_CONTROLLERS_LEGACY: usize = 8; // protocol < 3
pub const MAX_TOTAL_CONTROLLERS_DATA_SIZE: usize = 512;
/// Smallest total controller data size; the outbound header must fit a 4-byte length.
pub const MIN_TOTAL_CONTROLLERS_DATA_SIZE: usize = 4;

pub const GAME_ID_SIZE: usize = 16;
pub const PASSWORD_DIGEST_SIZE: usize = 16;
pub const EMULATOR_ID_SIZE: usize = 64;
pub const LOGIN_HEADER_SIZE: usize = GAME_ID_SIZE + PASSWORD_DIGEST_SIZE + 64 + 1;
pub const MAX_LOGIN_SIZE: usize = LOGIN_HEADER_SIZE + MAX_NICK_LEN + 8192;
pub const MEDIA_CHANGE_SIZE: usize = 16;
pub const MAX_ECHO_SIZE: usize = 256;
pub const MAX_QUIT_MESSAGE_SIZE: usize = 1024;
pub const RANDOM_NICK_LEN: usize = 8;

/// Frames per second are 8.24 fixed point.
pub const FPS_SCALE: u64 = 65536 * 256;
pub const DEFAULT_FPS: u32 = 1008307711; // NES NTSC
pub const MIN_FPS: u32 = 1 << 24;
pub const MAX_FPS: u32 = 130 << 24;

pub const MAX_SLEEP_US: u64 = 25_000;

pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_MIN_SENDQ_SIZE: usize = 262_144;
pub const DEFAULT_MAX_SENDQ_SIZE: usize = 8_388_608;
pub const DEFAULT_MAX_COMMAND_PAYLOAD: usize = 5 * 1024 * 1024;

pub(crate) const SERVER_SOCKET_SEND_BUF_SIZE: usize = 262_144;
pub(crate) const LISTEN_BACKLOG: i32 = 16;
