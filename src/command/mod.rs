//! The private SMS-carried command channel: table lookup, abuse detection, and dispatch.
//!
//! Grounded in `original_source/.../command.c`'s `parse_command` entry point, which is the single
//! place incoming SMS bodies addressed to the bot are turned into host-side effects. Dispatch is
//! generic over the error type a [`HostInterfaces`] implementation can fail with, mirroring the
//! teacher's `CommandError<T>` design in `src/errors.rs`.
pub mod history;
pub mod hostif;
pub mod table;

use std::sync::Mutex as SyncMutex;
use std::time::Duration;

use rand::Rng;
use tracing::info;

use crate::command::history::CommandHistory;
use crate::command::hostif::HostInterfaces;
use crate::command::table::{resolve_with_history, PartialCommand, Resolved, StaticCommand};
use crate::context::BotIdentity;
use crate::errors::BridgeResult;
use crate::proxy::{ProxyStats, SuspendGate};

/// Text to reply with over SMS once a command has been handled.
pub type CommandReply = String;

/// Bundles the bits of shared state the command interpreter reads or mutates, beyond the command
/// history and host interfaces every dispatch already needs. Kept as one small struct rather than
/// four more positional parameters on `dispatch`.
pub struct DispatchState<'a> {
    pub bot_identity: &'a SyncMutex<BotIdentity>,
    pub rmnet_stats: &'a ProxyStats,
    pub gps_stats: &'a ProxyStats,
    pub suspend_gate: &'a SuspendGate,
}

fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86400;
    let rem = total_secs % 86400;
    let hours = rem / 3600;
    let minutes = (rem % 3600) / 60;
    if days > 0 {
        let plural = if days == 1 { "" } else { "s" };
        format!("{days} day{plural}, {hours}:{minutes:02}")
    } else if hours > 0 {
        format!("{hours}:{minutes:02}")
    } else {
        format!("{minutes} min")
    }
}

async fn read_uptime_secs() -> BridgeResult<u64> {
    let raw = tokio::fs::read_to_string("/proc/uptime").await?;
    let secs = raw
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    Ok(secs as u64)
}

async fn read_load_average() -> BridgeResult<String> {
    let raw = tokio::fs::read_to_string("/proc/loadavg").await?;
    Ok(raw.trim().to_string())
}

async fn read_memory_stats() -> BridgeResult<String> {
    let raw = tokio::fs::read_to_string("/proc/meminfo").await?;
    let mut total_kb = 0u64;
    let mut free_kb = 0u64;
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemFree:") {
            free_kb = parse_kb(rest);
        }
    }
    Ok(format!("Total:{}M\nFree:{}M", total_kb / 1024, free_kb / 1024))
}

fn parse_kb(field: &str) -> u64 {
    field
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

/// Parse and dispatch one incoming command line, returning the text to reply with.
///
/// `rng` drives the randomized reproach message on repeated-command abuse; it's threaded through
/// explicitly (rather than using a thread-local) so dispatch stays deterministic under test.
pub async fn dispatch<R: Rng>(
    text: &str,
    history: &mut CommandHistory,
    hosts: &HostInterfaces,
    rng: &mut R,
    state: &DispatchState<'_>,
) -> BridgeResult<CommandReply> {
    let resolved = match resolve_with_history(text, history) {
        Some(r) => r,
        None => return Ok(history.reproach(rng).to_string()),
    };
    info!(command = text, "dispatching command");
    let user_name = state
        .bot_identity
        .lock()
        .expect("bot identity lock poisoned")
        .user_name
        .clone();
    let reply = match resolved {
        Resolved::Static(StaticCommand::Status) => "ok".to_string(),
        Resolved::Static(StaticCommand::Reboot) => {
            hosts.power.reboot_after(Duration::from_secs(0)).await?;
            "rebooting".to_string()
        }
        Resolved::Static(StaticCommand::Shutdown) => {
            hosts.power.shutdown_after(Duration::from_secs(0)).await?;
            "shutting down".to_string()
        }
        Resolved::Static(StaticCommand::AdbOn) => {
            hosts.adb.set_adb_enabled(true).await?;
            "adb enabled".to_string()
        }
        Resolved::Static(StaticCommand::AdbOff) => {
            hosts.adb.set_adb_enabled(false).await?;
            "adb disabled".to_string()
        }
        Resolved::Static(StaticCommand::UsbReset) => {
            hosts.usb.reset_usb().await?;
            "usb reset".to_string()
        }
        Resolved::Static(StaticCommand::Uptime) => {
            let uptime = format_uptime(read_uptime_secs().await?);
            format!("Hi {user_name}, Your uptime is:\n {uptime}\n")
        }
        Resolved::Static(StaticCommand::LoadAverage) => {
            let loadavg = read_load_average().await?;
            format!("Hi {user_name}, Your load average is:\n {loadavg}\n")
        }
        Resolved::Static(StaticCommand::MemoryStats) => {
            format!("Memory stats:\n{}\n", read_memory_stats().await?)
        }
        Resolved::Static(StaticCommand::RmnetStats) => format!(
            "RMNET IF stats:\nForwarded: {}\nDropped: {}\n",
            state.rmnet_stats.forwarded(),
            state.rmnet_stats.dropped()
        ),
        Resolved::Static(StaticCommand::GpsStats) => format!(
            "GPS IF stats:\nForwarded: {}\nDropped: {}\n",
            state.gps_stats.forwarded(),
            state.gps_stats.dropped()
        ),
        Resolved::Static(StaticCommand::UsbSuspendInhibit) => {
            state.suspend_gate.set_inhibited(true);
            "USB suspend inhibited\n".to_string()
        }
        Resolved::Static(StaticCommand::UsbSuspendAllow) => {
            state.suspend_gate.set_inhibited(false);
            "USB suspend allowed\n".to_string()
        }
        Resolved::Static(StaticCommand::Help) => {
            let names: Vec<&str> = crate::command::table::command_names().collect();
            format!("Commands:\n{}\n", names.join("\n"))
        }
        Resolved::Static(StaticCommand::SignalReport) => {
            let line = hosts.cell.query_csq().await?;
            match crate::cell::parse_csq(&line) {
                Some(sample) => format!("{} dBm, ber {}%", sample.rssi_dbm, sample.ber_percent),
                None => "no signal data".to_string(),
            }
        }
        Resolved::Partial(PartialCommand::SetModemName, arg) | Resolved::Partial(PartialCommand::NameYourself, arg) => {
            let name = arg.trim().to_string();
            state.bot_identity.lock().expect("bot identity lock poisoned").bot_name = name.clone();
            format!("My name is now {name}\n")
        }
        Resolved::Partial(PartialCommand::SetUserName, arg) => {
            let name = arg.trim().to_string();
            state.bot_identity.lock().expect("bot identity lock poisoned").user_name = name.clone();
            format!("I will call you {name} from now on\n")
        }
        Resolved::Partial(PartialCommand::ScheduleCallback, arg) => {
            hosts.callbacks.schedule(Duration::from_secs(60), arg).await?;
            "scheduled".to_string()
        }
        Resolved::Partial(PartialCommand::CallMeIn, arg) => match arg.trim().parse::<u64>() {
            Ok(secs) => {
                hosts
                    .callbacks
                    .schedule(Duration::from_secs(secs), "call me in".to_string())
                    .await?;
                format!("I will call you back in {secs} seconds\n")
            }
            Err(_) => format!("Please tell me in how many seconds you want me to call you, {user_name}\n"),
        },
        Resolved::Partial(PartialCommand::DebugCb, _arg) => "Dummy CB Message parse\n".to_string(),
        Resolved::Unknown => "unrecognized command".to_string(),
    };
    Ok(reply)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::AudioBackend;
    use crate::cell::CellSampler;
    use crate::command::hostif::{AdbSetter, CallbackScheduler, Rebooter, UsbResetter};
    use async_trait::async_trait;
    use rand::rngs::mock::StepRng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FakeHosts {
        rebooted: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AdbSetter for FakeHosts {
        async fn set_adb_enabled(&self, _enabled: bool) -> std::io::Result<()> {
            Ok(())
        }
    }
    #[async_trait]
    impl UsbResetter for FakeHosts {
        async fn reset_usb(&self) -> std::io::Result<()> {
            Ok(())
        }
    }
    #[async_trait]
    impl Rebooter for FakeHosts {
        async fn reboot_after(&self, _delay: Duration) -> std::io::Result<()> {
            self.rebooted.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn shutdown_after(&self, _delay: Duration) -> std::io::Result<()> {
            Ok(())
        }
    }
    #[async_trait]
    impl CallbackScheduler for FakeHosts {
        async fn schedule(&self, _after: Duration, _label: String) -> std::io::Result<()> {
            Ok(())
        }
    }
    #[async_trait]
    impl AudioBackend for FakeHosts {
        async fn set_sample_rate(&self, _hz: u32) -> std::io::Result<()> {
            Ok(())
        }
    }
    #[async_trait]
    impl CellSampler for FakeHosts {
        async fn query_csq(&self) -> std::io::Result<String> {
            Ok("+CSQ: 16,99".to_string())
        }
    }

    fn fake_state() -> (SyncMutex<BotIdentity>, ProxyStats, ProxyStats, SuspendGate) {
        (
            SyncMutex::new(BotIdentity::default()),
            ProxyStats::new(),
            ProxyStats::new(),
            SuspendGate::new(),
        )
    }

    fn fake_interfaces(rebooted: Arc<AtomicBool>) -> HostInterfaces {
        let shared = Arc::new(FakeHosts { rebooted });
        HostInterfaces {
            adb: Box::new(FakeHosts {
                rebooted: shared.rebooted.clone(),
            }),
            usb: Box::new(FakeHosts {
                rebooted: shared.rebooted.clone(),
            }),
            power: Box::new(FakeHosts {
                rebooted: shared.rebooted.clone(),
            }),
            callbacks: Box::new(FakeHosts {
                rebooted: shared.rebooted.clone(),
            }),
            audio: Box::new(FakeHosts {
                rebooted: shared.rebooted.clone(),
            }),
            cell: Box::new(FakeHosts {
                rebooted: shared.rebooted.clone(),
            }),
        }
    }

    #[tokio::test]
    async fn status_command_replies_ok() {
        let mut history = CommandHistory::new();
        let rebooted = Arc::new(AtomicBool::new(false));
        let hosts = fake_interfaces(rebooted);
        let mut rng = StepRng::new(0, 1);
        let (bot_identity, rmnet_stats, gps_stats, suspend_gate) = fake_state();
        let state = DispatchState {
            bot_identity: &bot_identity,
            rmnet_stats: &rmnet_stats,
            gps_stats: &gps_stats,
            suspend_gate: &suspend_gate,
        };
        let reply = dispatch("status", &mut history, &hosts, &mut rng, &state).await.unwrap();
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn reboot_command_invokes_rebooter() {
        let mut history = CommandHistory::new();
        let rebooted = Arc::new(AtomicBool::new(false));
        let hosts = fake_interfaces(rebooted.clone());
        let mut rng = StepRng::new(0, 1);
        let (bot_identity, rmnet_stats, gps_stats, suspend_gate) = fake_state();
        let state = DispatchState {
            bot_identity: &bot_identity,
            rmnet_stats: &rmnet_stats,
            gps_stats: &gps_stats,
            suspend_gate: &suspend_gate,
        };
        dispatch("reboot", &mut history, &hosts, &mut rng, &state).await.unwrap();
        assert!(rebooted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn repeated_command_triggers_reproach() {
        let mut history = CommandHistory::new();
        let rebooted = Arc::new(AtomicBool::new(false));
        let hosts = fake_interfaces(rebooted);
        let mut rng = StepRng::new(0, 1);
        let (bot_identity, rmnet_stats, gps_stats, suspend_gate) = fake_state();
        let state = DispatchState {
            bot_identity: &bot_identity,
            rmnet_stats: &rmnet_stats,
            gps_stats: &gps_stats,
            suspend_gate: &suspend_gate,
        };
        for _ in 0..5 {
            dispatch("status", &mut history, &hosts, &mut rng, &state).await.unwrap();
        }
        let reply = dispatch("status", &mut history, &hosts, &mut rng, &state).await.unwrap();
        assert_ne!(reply, "ok");
    }

    #[tokio::test]
    async fn uptime_reply_greets_user_by_name() {
        let mut history = CommandHistory::new();
        let hosts = fake_interfaces(Arc::new(AtomicBool::new(false)));
        let mut rng = StepRng::new(0, 1);
        let (bot_identity, rmnet_stats, gps_stats, suspend_gate) = fake_state();
        let state = DispatchState {
            bot_identity: &bot_identity,
            rmnet_stats: &rmnet_stats,
            gps_stats: &gps_stats,
            suspend_gate: &suspend_gate,
        };
        let reply = dispatch("uptime", &mut history, &hosts, &mut rng, &state).await.unwrap();
        assert!(reply.starts_with("Hi User, Your uptime is:"));
    }

    #[tokio::test]
    async fn name_yourself_updates_bot_identity() {
        let mut history = CommandHistory::new();
        let hosts = fake_interfaces(Arc::new(AtomicBool::new(false)));
        let mut rng = StepRng::new(0, 1);
        let (bot_identity, rmnet_stats, gps_stats, suspend_gate) = fake_state();
        let state = DispatchState {
            bot_identity: &bot_identity,
            rmnet_stats: &rmnet_stats,
            gps_stats: &gps_stats,
            suspend_gate: &suspend_gate,
        };
        let reply = dispatch("name yourself pixel", &mut history, &hosts, &mut rng, &state)
            .await
            .unwrap();
        assert_eq!(reply, "My name is now pixel\n");
        assert_eq!(bot_identity.lock().unwrap().bot_name, "pixel");
    }

    #[tokio::test]
    async fn usb_suspend_inhibit_sets_gate() {
        let mut history = CommandHistory::new();
        let hosts = fake_interfaces(Arc::new(AtomicBool::new(false)));
        let mut rng = StepRng::new(0, 1);
        let (bot_identity, rmnet_stats, gps_stats, suspend_gate) = fake_state();
        let state = DispatchState {
            bot_identity: &bot_identity,
            rmnet_stats: &rmnet_stats,
            gps_stats: &gps_stats,
            suspend_gate: &suspend_gate,
        };
        dispatch("usb suspend inhibit", &mut history, &hosts, &mut rng, &state)
            .await
            .unwrap();
        assert!(suspend_gate.is_inhibited());
    }
}
