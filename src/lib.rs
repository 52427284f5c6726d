//! # swlocate - Switch Port Locator
//!
//! `swlocate` finds the physical switch port a device is plugged into. Starting
//! from a seed switch it resolves the target's MAC address from the ARP table,
//! finds the port that MAC was learned on, and follows CDP neighbors hop by hop
//! until it reaches a port with no further switch behind it.
//!
//! ## Features
//!
//! - **Hop-by-hop walk**: ARP -> MAC table -> CDP neighbor on every switch
//! - **Cycle guard**: a neighbor pointing back into the walked path aborts the search
//! - **Prompt state machine**: automatic prompt, pagination and enable-mode handling
//! - **Record & replay**: capture SSH sessions as JSONL and replay them offline
//! - **Maximum Compatibility**: SSH algorithm profiles down to legacy devices
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swlocate::session::{Credentials, SshSessionProvider};
//! use swlocate::walker::{LocateOptions, Walker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = SshSessionProvider::new("cisco")?;
//!     let walker = Walker::new(provider, LocateOptions::default());
//!
//!     let credentials = Credentials::new("admin", "password");
//!     let result = walker
//!         .locate("10.0.0.1".parse()?, "192.168.1.50".parse()?, &credentials)
//!         .await;
//!
//!     for line in result.trace() {
//!         println!("{line}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`walker::Walker`] - Drives the hop-by-hop search
//! - [`parser`] - Turns `show` command output into typed records
//! - [`path::PathRecorder`] - Accumulates hops and renders the trace
//! - [`session::SessionProvider`] - Opens command sessions (SSH or replay)
//! - [`device::DeviceHandler`] - Prompt state machine for interactive shells
//! - [`error::ConnectError`] - Error types for sessions, templates and replay

pub mod config;
pub mod device;
pub mod error;
pub mod parser;
pub mod path;
pub mod session;
pub mod templates;
pub mod walker;
