//! The forwarder process.
//!
//! One forwarder serves one proxy device. It runs as its own OS process so
//! that a crash or a kill affects exactly one device.
//!
//! # Start-up
//!
//! ```text
//! devproxy forkproxy <lpid> <listen> <cpid> <connect> -1
//!   │  bind <listen>, dup fd, exec /proc/self/exe
//!   ▼
//! devproxy forkproxy <lpid> <listen> <cpid> <connect> <fd>
//!   │  rebuild listener from <fd>
//!   ▼
//! accept loop ──► dial <connect> ──► copy both ways
//! ```
//!
//! The daemon side never talks to a forwarder; it only spawns and signals it.

pub mod address;
pub mod bootstrap;
pub mod error;
pub mod invocation;
pub mod relay;

pub use address::{Address, BoundListener, Listener, Scheme, Stream};
pub use bootstrap::{run, BootstrapState};
pub use error::{AddressError, BootstrapError, ForwarderResult};
pub use invocation::{ForwarderArgs, FORKPROXY_COMMAND, NO_FD_MARKER};
