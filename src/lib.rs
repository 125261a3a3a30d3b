//! Service bootstrap
//!
//! Container entrypoint for a database-backed service:
//! - waits until PostgreSQL (and optionally Kafka) accepts connections
//! - applies schema migrations exactly once
//! - starts the service, replacing the process in production or under a
//!   restart-on-change supervisor in development
//!
//! Stages run strictly in order; a failed migration aborts before the
//! service is started.

pub mod config;
pub mod error;
pub mod launcher;
pub mod migration;
pub mod orchestrator;
pub mod readiness;
pub mod signals;
pub mod supervisor;
pub mod tools;
pub mod validation;

#[cfg(test)]
mod test_support;
