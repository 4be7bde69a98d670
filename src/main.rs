//! Binary entry point: parses configuration, brings up the IPC router client, opens the proxied
//! character devices, and spawns every worker.
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::fs::OpenOptions;
use tracing::{error, info};

use qti_bridge::audio::AudioBackend;
use qti_bridge::cell::CellSampler;
use qti_bridge::command::hostif::{AdbSetter, CallbackScheduler, HostInterfaces, Rebooter, UsbResetter};
use qti_bridge::config::Config;
use qti_bridge::context::CoreContext;
use qti_bridge::proxy::gps::PassthroughHook;
use qti_bridge::proxy::rmnet::RmnetHook;
use qti_bridge::proxy::StreamPair;
use qti_bridge::workers::{spawn_callback, spawn_delayed_reboot, spawn_delayed_shutdown, spawn_sms_tick};

/// Writes the audio codec's sample-rate sysfs node.
struct SysfsAudioBackend {
    node: PathBuf,
}
#[async_trait]
impl AudioBackend for SysfsAudioBackend {
    async fn set_sample_rate(&self, hz: u32) -> std::io::Result<()> {
        tokio::fs::write(&self.node, hz.to_string()).await
    }
}

/// Toggles ADB by writing the matching sysfs/debugfs property.
struct SysfsAdbSetter {
    node: PathBuf,
}
#[async_trait]
impl AdbSetter for SysfsAdbSetter {
    async fn set_adb_enabled(&self, enabled: bool) -> std::io::Result<()> {
        tokio::fs::write(&self.node, if enabled { "1" } else { "0" }).await
    }
}

/// Unbinds and rebinds the USB gadget driver through its sysfs control files.
struct SysfsUsbResetter {
    unbind_node: PathBuf,
    bind_node: PathBuf,
    driver_name: String,
}
#[async_trait]
impl UsbResetter for SysfsUsbResetter {
    async fn reset_usb(&self) -> std::io::Result<()> {
        tokio::fs::write(&self.unbind_node, &self.driver_name).await?;
        tokio::fs::write(&self.bind_node, &self.driver_name).await
    }
}

/// Issues `reboot`/`poweroff` via the host's init system.
struct SystemRebooter;
#[async_trait]
impl Rebooter for SystemRebooter {
    async fn reboot_after(&self, delay: Duration) -> std::io::Result<()> {
        spawn_delayed_reboot(delay, async {
            tokio::process::Command::new("reboot").status().await?;
            Ok(())
        });
        Ok(())
    }
    async fn shutdown_after(&self, delay: Duration) -> std::io::Result<()> {
        spawn_delayed_shutdown(delay, async {
            tokio::process::Command::new("poweroff").status().await?;
            Ok(())
        });
        Ok(())
    }
}

/// Schedules a logged reminder; the original's `schedule_call` notifies back over the same SMS
/// channel, which this stub leaves as a follow-up for whoever wires the reply path in.
struct LoggingCallbackScheduler;
#[async_trait]
impl CallbackScheduler for LoggingCallbackScheduler {
    async fn schedule(&self, after: Duration, label: String) -> std::io::Result<()> {
        spawn_callback(after, async move {
            info!(label, "scheduled callback fired");
            Ok(())
        });
        Ok(())
    }
}

/// Issues `AT+CSQ` over the diagnostic serial port and reads back the response line.
struct SerialCellSampler {
    device: PathBuf,
}
#[async_trait]
impl CellSampler for SerialCellSampler {
    async fn query_csq(&self) -> std::io::Result<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut port = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device)
            .await?;
        port.write_all(b"AT+CSQ\r\n").await?;
        let mut buf = vec![0u8; 256];
        let n = port.read(&mut buf).await?;
        // AT response lines are nominally ASCII, but this modem's firmware has been observed to
        // emit stray high-byte noise; decode permissively rather than rejecting the line outright.
        let (text, _, _) = encoding_rs::WINDOWS_1252.decode(&buf[..n]);
        Ok(text.into_owned())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    qti_bridge::logging::init(&config.log_filter);
    info!("starting qti-bridged");

    let hosts = HostInterfaces {
        adb: Box::new(SysfsAdbSetter {
            node: PathBuf::from("/sys/class/android_usb/android0/functions"),
        }),
        usb: Box::new(SysfsUsbResetter {
            unbind_node: PathBuf::from("/sys/bus/platform/drivers/msm_hsusb/unbind"),
            bind_node: PathBuf::from("/sys/bus/platform/drivers/msm_hsusb/bind"),
            driver_name: "msm_hsusb".to_string(),
        }),
        power: Box::new(SystemRebooter),
        callbacks: Box::new(LoggingCallbackScheduler),
        audio: Box::new(SysfsAudioBackend {
            node: PathBuf::from("/sys/kernel/audio/sample_rate"),
        }),
        cell: Box::new(SerialCellSampler {
            device: PathBuf::from("/dev/smd_cntl0"),
        }),
    };

    let ctx = CoreContext::new(config.clone(), hosts);

    let gps_host = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.gps_host_device)
        .await?;
    let gps_modem = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.gps_modem_device)
        .await?;
    let rmnet_host = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.rmnet_host_device)
        .await?;
    let rmnet_modem = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.rmnet_modem_device)
        .await?;

    let gps_pair = StreamPair::with_stats(
        gps_host,
        gps_modem,
        Box::new(PassthroughHook),
        ctx.suspend_gate.clone(),
        ctx.gps_stats.clone(),
    );
    let rmnet_pair = StreamPair::with_stats(
        rmnet_host,
        rmnet_modem,
        Box::new(RmnetHook::new(ctx.clone())),
        ctx.suspend_gate.clone(),
        ctx.rmnet_stats.clone(),
    );
    let rmnet_host_handle = rmnet_pair.host_handle();

    let sms_tick = spawn_sms_tick(ctx.clone(), rmnet_host_handle);

    let gps_task = tokio::spawn(async move {
        if let Err(e) = gps_pair.run().await {
            error!(error = %e, "GPS proxy pair exited");
        }
    });
    let rmnet_task = tokio::spawn(async move {
        if let Err(e) = rmnet_pair.run().await {
            error!(error = %e, "RMNET proxy pair exited");
        }
    });

    tokio::select! {
        _ = gps_task => {}
        _ = rmnet_task => {}
        _ = sms_tick => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, exiting");
        }
    }
    Ok(())
}
