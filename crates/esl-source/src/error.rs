use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication rejected: {0}")]
    AuthFailed(String),

    #[error("Command '{command}' rejected: {reply}")]
    CommandFailed { command: String, reply: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed before a complete frame was read")]
    UnexpectedEof,

    #[error("Disconnected by server: {0}")]
    Disconnected(String),
}
