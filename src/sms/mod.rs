//! SMS interception/synthesis: GSM-7 codec, PDU building, and the pending-message queue.
pub mod codec;
pub mod pdu;
pub mod queue;

pub use pdu::{SmsDeliverPdu, SmsSubmitPdu, Timestamp};
pub use queue::{MessageQueue, MessageSource, MessageState, QueueAction};
