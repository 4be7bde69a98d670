//! QMI/QMUX framing, client-registration tracking, and call-indication sniffing.
pub mod callsniff;
pub mod frame;
pub mod registry;

pub use frame::{QmiFrame, QmiHeader, Tlv};
pub use registry::ClientRegistry;
