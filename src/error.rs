use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetplayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Socket(#[from] crate::socket::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not bind any listening socket")]
    NoListeners,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown directive in configuration file: {0}")]
    UnknownDirective(String),
    #[error("invalid value for `{key}`: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("incomplete configuration file, missing `{0}`")]
    Missing(&'static str),
}

/// Failure to queue outbound bytes. Either one is fatal to the connection.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Exceeded MaxSendQSize by {0} bytes")]
    Overflow(usize),
    #[error("send() failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Login block rejections. The message is what the client gets told.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LoginError {
    #[error("Login len({0}) out of range.")]
    Length(u32),
    #[error("Protocol 0 not supported.")]
    ProtocolZero,
    #[error("That number of controllers({0}) isn't supported with that protocol version.")]
    TooManyControllersForProtocol(usize),
    #[error("That number of controllers({0}) isn't supported.")]
    TooManyControllers(usize),
    #[error("Exceeded MaxTotalControllersDataSize")]
    DataSizeExceeded,
    #[error("Invalid server password.")]
    Password,
}

/// Reasons a login cannot be placed into a game.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum JoinError {
    #[error("Protocol version mismatch.  Game: {game}, You: {you}")]
    ProtocolVersion { game: u8, you: u8 },
    #[error("Emulator (version) mismatch.  Game: {game}, You: {you}")]
    EmulatorId { game: String, you: String },
    #[error("Number of controllers mismatch.  Game: {game}, You: {you}")]
    ControllerCount { game: usize, you: usize },
    #[error("Controller type mismatch for controller {index}.  Game: {game}, You: {you}")]
    ControllerType { index: usize, game: u8, you: u8 },
    #[error("Controller data size mismatch for controller {index}.  Game: {game}, You: {you}")]
    ControllerDataSize { index: usize, game: u8, you: u8 },
    #[error("Controllers total data size mismatch.  Game: {game}, You: {you}")]
    TotalDataSize { game: usize, you: usize },
    #[error("Sorry, game is full.")]
    GameFull,
    #[error("No game slots available.")]
    NoGameSlot,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReassignError {
    /// Fatal: the request names controllers the game does not have.
    #[error("Nonexistent controller(s) specified.")]
    NonexistentController,
    #[error("Controller(s) you don't have control of specified.")]
    NotOwned,
    #[error("No client had any of the controller(s) you specified.")]
    NoneAffected,
}

impl ReassignError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NonexistentController)
    }
}
