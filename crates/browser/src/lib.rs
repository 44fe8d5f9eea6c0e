//! Browser Remote Debugging - Rust Implementation
//!
//! A client for the Chrome DevTools Protocol: one WebSocket per debuggable
//! target, any number of sessions multiplexed over it, and a thin client for
//! the `/json/*` HTTP endpoints that hand out those targets.
//!
//! # Architecture
//!
//! 1. **Target owns the socket**: one reader task, one dispatcher task
//! 2. **Calls are addressed by name**: `session.call("Page.navigate", params)`,
//!    no per-method bindings
//! 3. **Every wait is bounded**: shutdown and timeouts are always observed
//! 4. **No reconnect**: a lost socket ends the target, make a new one

pub mod cdp;
pub mod config;
pub mod directory;
pub mod error;

pub use cdp::{CDPSession, ConnectionState, Domain, Member, Target, TargetDescriptor};
pub use config::{ConnectionConfig, DirectoryConfig};
pub use directory::Browser;
pub use error::{CDPError, Result};
