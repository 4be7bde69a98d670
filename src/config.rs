//! Startup configuration.
//!
//! The teacher takes its one device path from `std::env::args` by hand in `src/main.rs`; this
//! crate has enough independent knobs (two proxied character devices, the IPC router socket, the
//! flash partition used for persistence) that hand-rolled arg parsing stops being idiomatic, so it
//! uses `clap`'s derive API instead, the same way `oxidecomputer-hubris`'s `packager` tool in the
//! example pack structures its CLI.
use std::path::PathBuf;

use clap::Parser;

/// Userspace supervisor interposing on the QMI byte streams between a USB host and a cellular
/// modem DSP, with a private SMS-carried command channel.
#[derive(Parser, Debug, Clone)]
#[command(name = "qti-bridged", version, about)]
pub struct Config {
    /// Character device carrying RMNET/QMI traffic between the USB host and the modem.
    #[arg(long, default_value = "/dev/smdcntl0")]
    pub rmnet_host_device: PathBuf,
    /// Character device carrying RMNET/QMI traffic on the modem DSP side.
    #[arg(long, default_value = "/dev/smd11")]
    pub rmnet_modem_device: PathBuf,
    /// Character device carrying GPS/PDS traffic between the USB host and the modem.
    #[arg(long, default_value = "/dev/smdcntl8")]
    pub gps_host_device: PathBuf,
    /// Character device carrying GPS/PDS traffic on the modem DSP side.
    #[arg(long, default_value = "/dev/smd8")]
    pub gps_modem_device: PathBuf,
    /// Raw flash partition (or file, for local testing) used for name/flag persistence.
    #[arg(long, default_value = "/dev/block/bootdevice/by-name/persist")]
    pub persist_partition: PathBuf,
    /// Phone number (or short code) the private command channel listens on.
    #[arg(long, default_value = "0000000000")]
    pub bot_number: String,
    /// Log filter, forwarded to `tracing_subscriber::EnvFilter`.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

#[cfg(test)]
impl Config {
    /// Build a `Config` with placeholder paths, for tests that need a `CoreContext` but never
    /// touch the filesystem.
    pub fn for_test() -> Self {
        Config {
            rmnet_host_device: PathBuf::from("/dev/null"),
            rmnet_modem_device: PathBuf::from("/dev/null"),
            gps_host_device: PathBuf::from("/dev/null"),
            gps_modem_device: PathBuf::from("/dev/null"),
            persist_partition: PathBuf::from("/dev/null"),
            bot_number: "0000000000".to_string(),
            log_filter: "info".to_string(),
        }
    }
}
