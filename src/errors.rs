//! Crate-wide error handling.
//!
//! The teacher's `failure`/`failure_derive` stack is unmaintained; every error kind below is a
//! `thiserror` variant instead, but the shape (one generic `CommandError<T>` wrapper for
//! command-implementation errors, one flat `BridgeError` for everything the core itself can
//! raise) is carried over from `HuaweiError`/`CommandError` verbatim.
use std::io;
use thiserror::Error;

/// Error raised by the core itself (proxying, framing, SMS state machine, IPC bring-up).
///
/// Exhaustive matching is NOT guaranteed by the crate API: new variants may be added without a
/// semver break.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Opening a datagram socket against the IPC router failed outright. Fatal at bring-up (§7).
    #[error("failed to open IPC router socket for service {service}/{instance}")]
    NoSocket { service: u32, instance: u32 },
    /// A `(service, instance)` lookup came back empty, or only resolved to the reserved node.
    #[error("no server found for service {service}/{instance}")]
    LookupMiss { service: u32, instance: u32 },
    /// Installing an IPC router access rule was rejected by the kernel.
    #[error("failed to install IPC router security rule for service category {category}")]
    RuleRejected { category: u32 },
    /// A write to a proxied descriptor wrote fewer bytes than the packet contained.
    #[error("short write on {tag}: wrote {wrote} of {expected} bytes")]
    ShortWrite {
        tag: String,
        wrote: usize,
        expected: usize,
    },
    /// One side of a stream pair closed (zero-length read).
    #[error("peer {tag} closed")]
    PeerClosed { tag: String },
    /// The message queue is at capacity (`QUEUE_SIZE`) and cannot accept more pending messages.
    #[error("message queue is full")]
    QueueFull,
    /// A generic I/O failure against a character device or the flash partition.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// QMI frame parsing failed to produce even an opaque view of a buffer that claimed to start
    /// with the QMUX framing byte.
    #[error("malformed QMI frame: {0}")]
    BadFrame(String),
}

/// Convenience alias for the core's fallible operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Wraps either an error from a command implementation, or one raised by the bridge core itself.
///
/// Mirrors the teacher's `CommandError<T>` exactly: host-interface implementations (rebooting,
/// toggling ADB, scheduling a callback, ...) can fail with their own error type `T`, but still
/// need to propagate `BridgeError`s (e.g. "queue full" while trying to enqueue a reply) through
/// the same `?` chain.
#[derive(Error, Debug)]
pub enum CommandError<T: std::error::Error + 'static> {
    #[error("error in command: {0}")]
    Command(#[source] T),
    #[error("{0}")]
    Bridge(#[source] BridgeError),
}
impl<T: std::error::Error + 'static> From<BridgeError> for CommandError<T> {
    fn from(e: BridgeError) -> Self {
        CommandError::Bridge(e)
    }
}
