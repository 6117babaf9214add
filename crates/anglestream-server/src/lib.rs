//! `anglestream-server` – latest-value joint-angle streaming over TCP.
//!
//! A producer pushes complete joint-angle sets into a [`StateStore`]; every
//! connected client receives one text line per interval describing the most
//! recent state:
//!
//! ```text
//! 0.000,a:1.0000:2.0000:3.0000,b:4.0000:5.0000:6.0000
//! 0.050,a:1.0000:2.0000:3.0000,b:4.0000:5.0000:6.0000
//! ```
//!
//! The stream is "latest value", not an event log: updates that land between
//! two ticks of a session are never delivered to it.
//!
//! # Modules
//!
//! - [`store`] – [`StateStore`]: validated, all-or-nothing updates and owned
//!   snapshots behind a single mutex.
//! - [`server`] – [`AngleServer`] / [`ServerHandle`]: bind, accept loop,
//!   lifecycle states and cooperative shutdown.
//! - [`shutdown`] – [`ShutdownSignal`]: the stop flag shared by every task.
//! - `session` – the per-client tick loop.

pub mod server;
mod session;
pub mod shutdown;
pub mod store;

pub use server::{AngleServer, DEFAULT_INTERVAL, ServerHandle, ServerState};
pub use shutdown::ShutdownSignal;
pub use store::StateStore;
