//! Domain state for the teleop server.
//!
//! This module contains pure state and rules with no infrastructure
//! dependencies: nothing in here opens a port, spawns a task or reads a clock
//! on its own.  The server crate owns the I/O and feeds results into these
//! types.

/// Reconnect delay policy.
pub mod backoff;
/// Controller identities and connection states.
pub mod device;
/// Motor and servo status snapshots.
pub mod status;
/// Video stream settings.
pub mod stream;
