//! IPC Router client bring-up.
pub mod router;

pub use router::{bring_up, init_port_mapper, resolve_service, IpcSocket, ServiceEndpoint};
