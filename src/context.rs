//! Shared runtime state, assembled once at startup and handed to every worker.
//!
//! The original C program keeps its equivalent state (`sms_runtime`, the client-tracking array,
//! the call-audio flag, command history) as file-scope globals. Idiomatic Rust has no direct
//! equivalent of mutable C globals shared across threads without `unsafe`, so this crate follows
//! the teacher's pattern of threading an explicit context value through instead (the teacher's
//! `HuaweiModem` struct in `src/lib.rs` plays the same role for its single-device client): one
//! `Arc`-shared `CoreContext`, injected into every worker and hook rather than reached for via a
//! global.
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use std::sync::Mutex as SyncMutex;

use crate::audio::CallAudioState;
use crate::command::history::CommandHistory;
use crate::command::hostif::HostInterfaces;
use crate::config::Config;
use crate::proxy::{ProxyStats, SuspendGate};
use crate::qmi::registry::ClientRegistry;
use crate::sms::queue::MessageQueue;

/// Mutable "who am I" state the command interpreter's naming commands rewrite at runtime.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub bot_name: String,
    pub user_name: String,
}

impl Default for BotIdentity {
    fn default() -> Self {
        BotIdentity {
            bot_name: "modem".to_string(),
            user_name: "User".to_string(),
        }
    }
}

/// Everything the workers need to share, bundled behind one `Arc`.
///
/// Locks are split by access pattern rather than one coarse mutex: the message queue and command
/// history are awaited under an async mutex (both are touched from spawned async tasks that hold
/// the guard across `.await` points, which rules out `std::sync::Mutex`), while the registry,
/// audio state, and bot identity are touched only from synchronous hook callbacks and use
/// `std::sync::Mutex`, matching the teacher's preference for the cheapest lock that fits the call
/// site rather than a single big one.
pub struct CoreContext {
    pub config: Config,
    pub message_queue: AsyncMutex<MessageQueue>,
    pub client_registry: SyncMutex<ClientRegistry>,
    pub call_audio: SyncMutex<CallAudioState>,
    pub command_history: AsyncMutex<CommandHistory>,
    pub bot_identity: SyncMutex<BotIdentity>,
    pub suspend_gate: SuspendGate,
    pub rmnet_stats: ProxyStats,
    pub gps_stats: ProxyStats,
    pub hosts: HostInterfaces,
}

impl CoreContext {
    pub fn new(config: Config, hosts: HostInterfaces) -> Arc<Self> {
        Arc::new(CoreContext {
            config,
            message_queue: AsyncMutex::new(MessageQueue::new()),
            client_registry: SyncMutex::new(ClientRegistry::new()),
            call_audio: SyncMutex::new(CallAudioState::new()),
            command_history: AsyncMutex::new(CommandHistory::new()),
            bot_identity: SyncMutex::new(BotIdentity::default()),
            suspend_gate: SuspendGate::new(),
            rmnet_stats: ProxyStats::new(),
            gps_stats: ProxyStats::new(),
            hosts,
        })
    }
}
