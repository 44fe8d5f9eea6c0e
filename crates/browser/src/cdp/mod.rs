//! CDP (Chrome DevTools Protocol) Client Implementation
//!
//! Core principle: Single WebSocket per target, multiplexed sessions.
//! One reader, one dispatcher, callers wait on their own one-shot slot.

pub mod lifecycle;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod target;
pub mod transport;

pub use lifecycle::{ConnectionState, ShutdownSignal};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse, TargetDescriptor, VersionInfo};
pub use registry::SessionRegistry;
pub use session::{CDPSession, Domain, EventHandler, Member, MethodCall};
pub use target::Target;
pub use transport::{Transport, WebSocketTransport};
