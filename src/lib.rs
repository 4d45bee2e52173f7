//! # gponctl - Telnet automation for GPON OLTs and access switches
//!
//! `gponctl` drives the CLIs of ZTE C300/C600 OLTs and Huawei, Cisco and Ruijie
//! switches over Telnet. It keeps one logged-in session per device in a pool,
//! keeps idle sessions alive, turns high-level actions into dialect-specific
//! command sequences and parses the text the devices answer with.
//!
//! ## Features
//!
//! - **Connection Pooling**: one cached session per host, recreated once it dies
//! - **Dialect Profiles**: login conversations, prompts and command templates per family
//! - **Pager Handling**: `--More--` style prompts are answered while reading
//! - **Provisioning**: locate, allocate and configure a new ONU in one call
//! - **Async/Await**: built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gponctl::config::{Inventory, PoolOptions};
//! use gponctl::olt::Olt;
//! use gponctl::session::{ConnectionPool, Credentials};
//! use gponctl::templates::DialectProfile;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let profile = Arc::new(DialectProfile::builtin()?);
//!     let pool = ConnectionPool::new(profile, PoolOptions::default());
//!
//!     let inventory = Inventory::builtin();
//!     let (_, site) = inventory.resolve_olt("KAUMAN")?;
//!     let credentials = Credentials::new("zte", "secret");
//!
//!     let session = pool.get(&site.ip, &credentials, site.family()).await?;
//!     let olt = Olt::new(session)?;
//!     for onu in olt.unconfigured_onus().await? {
//!         println!("{} on {}/{}", onu.sn, onu.pon_slot, onu.pon_port);
//!     }
//!
//!     pool.close_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::ConnectionPool`] - host-keyed pool of logged-in sessions
//! - [`session::DeviceSession`] - one Telnet connection, one command at a time
//! - [`templates::DialectProfile`] - command templates per family and action
//! - [`olt::Olt`] and [`switch::Switch`] - typed device operations
//! - [`provision::apply_configuration`] - the ONU provisioning workflow
//! - [`error::ConnectError`] - error type with a closed [`error::ErrorKind`]

pub mod config;
pub mod device;
pub mod error;
pub mod olt;
pub mod parse;
pub mod provision;
pub mod session;
pub mod switch;
pub mod templates;
