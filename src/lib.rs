mod assembler;
mod consts;
mod error;
mod free_list;
mod reassign;
mod sendq;
mod session;
mod socket;
mod time;
mod transceiver;

#[cfg(test)]
mod simulator;

pub mod config;
pub mod connection;
pub mod game;
pub mod server;
pub mod wire;

pub use assembler::{Assembler, Phase, Unit};
pub use config::{password_digest, ServerConfig};
pub use consts::{
    DEFAULT_FPS, DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_MAX_COMMAND_PAYLOAD,
    DEFAULT_MAX_SENDQ_SIZE, DEFAULT_MIN_SENDQ_SIZE, MAX_CLIENTS_PER_GAME,
    MAX_CONTROLLERS_PER_GAME, MAX_NICK_LEN, MAX_TOTAL_CONTROLLERS_DATA_SIZE,
};
pub use error::{ConfigError, JoinError, LoginError, NetplayError, ReassignError, SendError};
pub use reassign::Reassign;
pub use sendq::SendQueue;
pub use server::{ClientIndex, GameIndex, Server};
pub use socket::{NetplayListener, NetplayStream};
pub use time::Clock;
pub use transceiver::{Listener, Transceiver};
