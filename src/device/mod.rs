//! Proxy devices: the daemon side.
//!
//! A proxy device forwards connections across a container boundary. The
//! daemon never relays traffic itself; for each device it starts one
//! forwarder process (see [`crate::forwarder`]), remembers its PID in the
//! [`Registry`], and signals it when the device goes away.
//!
//! ```text
//! ProxyController::create ──► DaemonState::spawn("forkproxy ...")
//!        │                           │
//!        └──── Registry::record ◄────┘ pid
//! ```

pub mod cleanup;
pub mod container;
pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod registry;

pub use cleanup::{is_forwarder_process, prune_stale_entries, PruneReport};
pub use container::{Container, ContainerRef, DaemonState, LocalDaemon};
pub use error::{LifecycleError, LifecycleResult, RegistryError};
pub use lifecycle::{ForwarderSettings, ProxyController, StartOutcome, DEFAULT_LOG_DIR};
pub use proxy::{BindSide, DeviceConfig, ProxySpec, KEY_BIND, KEY_CONNECT, KEY_LISTEN};
pub use registry::{Registry, DEFAULT_STATE_DIR};
