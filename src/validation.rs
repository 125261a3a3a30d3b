//! Validation utilities for bootstrap configuration
//!
//! Every value is checked before the first stage runs, so a bad config never
//! gets as far as probing the database.

use crate::error::ConfigError;

/// Validate configuration numeric values are within reasonable bounds
///
/// # Arguments
/// * `value` - The value to validate
/// * `field_name` - Description of the field for error messages
/// * `min` - Minimum allowed value
/// * `max` - Maximum allowed value
pub fn validate_numeric_range(
    value: u64,
    field_name: &str,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::InvalidValue {
            field: field_name.to_string(),
            value: format!("{} (must be between {} and {})", value, min, max),
        });
    }
    Ok(())
}

/// Validate that a required string value is present and not whitespace-only
pub fn validate_not_blank(value: &str, field_name: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: field_name.to_string(),
        });
    }
    Ok(())
}

/// Validate an argv-style command: at least one element, and a usable program
pub fn validate_command(argv: &[String], field_name: &str) -> Result<(), ConfigError> {
    let Some(program) = argv.first() else {
        return Err(ConfigError::MissingField {
            field: field_name.to_string(),
        });
    };

    if program.trim().is_empty() || program != program.trim() {
        return Err(ConfigError::InvalidValue {
            field: field_name.to_string(),
            value: format!("{:?} (program must be non-empty without surrounding whitespace)", program),
        });
    }

    Ok(())
}

/// Validate a `host:port` socket address string
pub fn validate_host_port(address: &str, field_name: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        field: field_name.to_string(),
        value: address.to_string(),
    };

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.trim().is_empty() {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_numeric_range() {
        assert!(validate_numeric_range(5, "retry", 1, 10).is_ok());
        assert!(validate_numeric_range(1, "retry", 1, 10).is_ok());
        assert!(validate_numeric_range(10, "retry", 1, 10).is_ok());

        assert!(validate_numeric_range(0, "retry", 1, 10).is_err());
        assert!(validate_numeric_range(11, "retry", 1, 10).is_err());
    }

    #[test]
    fn test_validate_not_blank() {
        assert!(validate_not_blank("db", "host").is_ok());
        assert!(validate_not_blank("", "host").is_err());
        assert!(validate_not_blank("   ", "host").is_err());
    }

    #[test]
    fn test_validate_command() {
        let ok = vec!["alembic".to_string(), "upgrade".to_string(), "head".to_string()];
        assert!(validate_command(&ok, "migration.command").is_ok());

        assert!(validate_command(&[], "migration.command").is_err());
        assert!(validate_command(&["".to_string()], "migration.command").is_err());
        assert!(validate_command(&[" python".to_string()], "service.command").is_err());
    }

    #[test]
    fn test_validate_host_port() {
        assert!(validate_host_port("kafka:9092", "kafka").is_ok());
        assert!(validate_host_port("10.0.0.1:29092", "kafka").is_ok());

        assert!(validate_host_port("kafka", "kafka").is_err());
        assert!(validate_host_port(":9092", "kafka").is_err());
        assert!(validate_host_port("kafka:0", "kafka").is_err());
        assert!(validate_host_port("kafka:port", "kafka").is_err());
    }
}
