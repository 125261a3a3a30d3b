//! Centralized error types for service-bootstrap
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use thiserror::Error;

/// Exit code for configuration errors (invalid values, unreadable file)
pub const EXIT_CONFIG_ERROR: i32 = 3;

/// Exit code for a failed schema migration
pub const EXIT_MIGRATION_FAILED: i32 = 4;

/// Exit code for a failed dispatch of the service process
pub const EXIT_DISPATCH_FAILED: i32 = 5;

/// Exit code when the service executable cannot be found (shell convention)
pub const EXIT_EXECUTABLE_NOT_FOUND: i32 = 127;

/// Top-level error type for a bootstrap run
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Interrupted by signal {signal}")]
    Interrupted { signal: i32 },
}

impl BootstrapError {
    /// Process exit code an operator (or the orchestration platform) sees
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Config(_) => EXIT_CONFIG_ERROR,
            BootstrapError::Migration(_) => EXIT_MIGRATION_FAILED,
            BootstrapError::Dispatch(DispatchError::ExecutableNotFound { .. }) => {
                EXIT_EXECUTABLE_NOT_FOUND
            }
            BootstrapError::Dispatch(_) => EXIT_DISPATCH_FAILED,
            BootstrapError::Interrupted { signal } => 128 + signal,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Required configuration missing: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
}

/// Migration errors
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Failed to start migration command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration command `{command}` exited with status {code}")]
    Failed { command: String, code: i32 },

    #[error("Migration command `{command}` was terminated by a signal")]
    Terminated { command: String },
}

/// Service dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Executable not found: {program}")]
    ExecutableNotFound { program: String },

    #[error("Failed to replace process with `{program}`: {source}")]
    Exec {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("Signal handling failed: {0}")]
    Signal(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let config = BootstrapError::from(ConfigError::MissingField {
            field: "service.command".to_string(),
        });
        assert_eq!(config.exit_code(), EXIT_CONFIG_ERROR);

        let migration = BootstrapError::from(MigrationError::Failed {
            command: "alembic upgrade head".to_string(),
            code: 1,
        });
        assert_eq!(migration.exit_code(), EXIT_MIGRATION_FAILED);

        let not_found = BootstrapError::from(DispatchError::ExecutableNotFound {
            program: "uvicorn".to_string(),
        });
        assert_eq!(not_found.exit_code(), EXIT_EXECUTABLE_NOT_FOUND);

        let spawn = BootstrapError::from(DispatchError::Spawn {
            program: "python".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        assert_eq!(spawn.exit_code(), EXIT_DISPATCH_FAILED);

        let interrupted = BootstrapError::Interrupted {
            signal: libc::SIGTERM,
        };
        assert_eq!(interrupted.exit_code(), 143);
    }

    #[test]
    fn test_migration_error_message_names_command() {
        let err = MigrationError::Failed {
            command: "alembic upgrade head".to_string(),
            code: 2,
        };
        assert_eq!(
            err.to_string(),
            "Migration command `alembic upgrade head` exited with status 2"
        );
    }
}
