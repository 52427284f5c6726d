//! Command sessions to switches.
//!
//! The walker only needs three things from a switch: open a session, run a
//! command and get its text back, close the session. This module defines that
//! contract ([`SessionProvider`] and [`Session`]) and ships two providers:
//!
//! - [`SshSessionProvider`] - interactive SSH shell driven by a
//!   [`DeviceHandler`] prompt state machine
//! - [`ReplayProvider`] - offline sessions replayed from a JSONL recording
//!
//! Calls are awaited one after another; a session never runs two commands at
//! once and a provider never has two sessions in flight for one search.

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use async_trait::async_trait;
use log::{debug, trace, warn};

use russh::{ChannelMsg, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::config;
use crate::device::{DeviceHandler, IGNORE_START_LINE};
use crate::error::ConnectError;

pub use client::SshSession;
pub use manager::SshSessionProvider;
pub use recording::{
    NormalizeOptions, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
    SessionReplayer,
};
pub use replay::{ReplayProvider, ReplaySession};
pub use security::{ConnectionSecurityOptions, HostKeyPolicy, SecurityLevel};

/// Login credentials for every switch of one search.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Secret for `enable`; when set, commands run in privileged mode.
    pub enable_password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            enable_password: None,
        }
    }

    pub fn with_enable_password(mut self, enable_password: impl Into<String>) -> Self {
        self.enable_password = Some(enable_password.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "enable_password",
                &self.enable_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// The output result of a command execution.
#[derive(Debug, Clone)]
pub struct Output {
    /// False when an error line was seen or a mode change failed.
    pub success: bool,
    /// Command output without the echoed command and trailing prompt.
    pub content: String,
    pub all: String,
    /// Prompt captured by the internal state machine after command execution.
    pub prompt: Option<String>,
}

/// An open command session to one switch.
#[async_trait]
pub trait Session: Send {
    /// Hostname reported by the switch, if known.
    fn hostname(&self) -> Option<String>;

    /// Runs one command and returns its raw output text.
    async fn run(&mut self, command: &str) -> Result<String, ConnectError>;

    /// Releases the connection. Calling it more than once is a no-op.
    async fn close(&mut self) -> Result<(), ConnectError>;
}

/// Opens authenticated sessions to switches.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: Session;

    /// Fails with a [`ConnectError`] when the host is unreachable or rejects
    /// the credentials.
    async fn open(
        &self,
        host: IpAddr,
        credentials: &Credentials,
    ) -> Result<Self::Session, ConnectError>;
}

/// `user@host:port` label used in logs and recordings.
pub(crate) fn device_addr(user: &str, host: IpAddr, port: u16) -> String {
    format!("{user}@{}", SocketAddr::new(host, port))
}

/// Host part of a `user@host:port` label.
pub(crate) fn device_host(device_addr: &str) -> Option<IpAddr> {
    let addr = device_addr
        .rsplit_once('@')
        .map(|(_, addr)| addr)
        .unwrap_or(device_addr);
    addr.parse::<SocketAddr>()
        .map(|socket| socket.ip())
        .or_else(|_| addr.parse::<IpAddr>())
        .ok()
}

mod client;
mod manager;
mod recording;
mod replay;
mod security;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_addr_roundtrips_host() {
        let v4: IpAddr = "10.0.0.1".parse().expect("v4");
        let v6: IpAddr = "fe80::1".parse().expect("v6");

        assert_eq!(device_addr("admin", v4, 22), "admin@10.0.0.1:22");
        assert_eq!(device_host(&device_addr("admin", v4, 22)), Some(v4));
        assert_eq!(device_host(&device_addr("admin", v6, 2222)), Some(v6));
        assert_eq!(device_host("10.0.0.9"), Some("10.0.0.9".parse().expect("ip")));
        assert_eq!(device_host("admin@switch:22"), None);
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials::new("admin", "hunter2").with_enable_password("s3cret");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret"));
    }
}
