//! Host-interface traits the command interpreter's side effects are injected behind.
//!
//! Grounded in `original_source/.../command.c`'s direct calls out to `system()`/sysfs/`reboot()`
//! for things like toggling ADB, resetting the USB stack, or scheduling a delayed reboot. The
//! teacher injects similar host effects behind traits in `src/cmd/mod.rs` (e.g. its `Modem` trait
//! wrapping AT command dispatch); this follows the same shape; one trait per distinct side effect
//! the command table can trigger, so the dispatcher in [`crate::command`] stays unit-testable with
//! fakes instead of a real device tree.
use async_trait::async_trait;
use std::time::Duration;

/// Enables or disables the ADB debug interface.
#[async_trait]
pub trait AdbSetter: Send + Sync {
    async fn set_adb_enabled(&self, enabled: bool) -> std::io::Result<()>;
}

/// Forces a USB port reset (the original's workaround for a wedged host-side enumeration).
#[async_trait]
pub trait UsbResetter: Send + Sync {
    async fn reset_usb(&self) -> std::io::Result<()>;
}

/// Reboots or shuts down the device, optionally after a delay.
#[async_trait]
pub trait Rebooter: Send + Sync {
    async fn reboot_after(&self, delay: Duration) -> std::io::Result<()>;
    async fn shutdown_after(&self, delay: Duration) -> std::io::Result<()>;
}

/// Schedules a one-shot callback reminder (`schedule_call` in the original).
#[async_trait]
pub trait CallbackScheduler: Send + Sync {
    async fn schedule(&self, after: Duration, label: String) -> std::io::Result<()>;
}

/// Bundle of every host side effect the command table can invoke, plus the audio/cell samplers
/// defined alongside their respective state machines.
pub struct HostInterfaces {
    pub adb: Box<dyn AdbSetter>,
    pub usb: Box<dyn UsbResetter>,
    pub power: Box<dyn Rebooter>,
    pub callbacks: Box<dyn CallbackScheduler>,
    pub audio: Box<dyn crate::audio::AudioBackend>,
    pub cell: Box<dyn crate::cell::CellSampler>,
}
