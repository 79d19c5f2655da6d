use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn {command}: {source}")]
    Spawn { command: String, #[source] source: std::io::Error },

    #[error("server {0} is already running")]
    AlreadyRunning(String),

    #[error("server {0} is not running")]
    NotRunning(String),

    #[error("child for {0} did not expose a piped stdin/stdout/stderr handle")]
    MissingPipes(String),
}
