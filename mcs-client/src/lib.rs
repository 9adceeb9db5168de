//! # mcs-client
//!
//! Push-notification client for the MCS persistent-connection protocol.
//!
//! This crate provides:
//! - A sans-IO session state machine (login, heartbeat, ack/dedup, backoff)
//! - An async driver owning the TLS connection and timers
//! - Device checkin and push-token registration over HTTPS

pub mod checkin;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod registrar;
pub mod session;
pub mod stream;
pub mod tls;

pub use checkin::CheckinClient;
pub use config::{ClientConfig, ConfigError, TlsClientConfig};
pub use connection::{McsClient, McsHandle};
pub use error::ClientError;
pub use event::{AppDataEntry, DisconnectReason, McsEvent, Notification};
pub use registrar::{AppInfo, RegisterOptions, RegisterResult, Registrar};
pub use session::{Action, Session, SessionState};

pub use mcs_storage::{CredentialStore, Credentials, FileStore, MemoryStore, PersistentIdStore};
