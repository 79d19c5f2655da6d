use thiserror::Error;

/// Errors surfaced by [`crate::Manager`]'s public operations.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("could not read server.json for platform {platform}: {source}")]
    Definition {
        platform: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server.json for platform {platform} is not valid JSON: {source}")]
    BadDefinition {
        platform: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unrecognized server type '{0}' in server.json")]
    UnrecognizedServerType(String),

    #[error("could not resolve a sandbox directory for {base_key}: {source}")]
    Sandbox {
        base_key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("base_key {0} is already running")]
    DuplicateBaseKey(String),

    #[error("no server registered for base_key {0}")]
    UnknownServer(String),

    #[error("could not read instructions.txt for platform {platform}: {source}")]
    Instructions {
        platform: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read profile.zip for platform {platform}: {source}")]
    Profile {
        platform: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Supervisor(#[from] polyglot_supervisor::SupervisorError),

    #[error(transparent)]
    Config(#[from] polyglot_core::error::ConfigError),
}
