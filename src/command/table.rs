//! Command tables: exact-match commands and prefix-match argument commands.
//!
//! Grounded in `original_source/.../command.c`'s `parse_command`, which first checks the incoming
//! text against a table of bare commands (`"reboot"`, `"status"`, ...) and, failing that, checks
//! whether it starts with one of a second table's prefixes (`"name "`, `"user "`, ...) and treats
//! the remainder as an argument.
use crate::command::history::CommandHistory;

/// A command recognized verbatim, with no argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticCommand {
    Status,
    Reboot,
    Shutdown,
    AdbOn,
    AdbOff,
    UsbReset,
    Uptime,
    SignalReport,
    LoadAverage,
    MemoryStats,
    RmnetStats,
    GpsStats,
    UsbSuspendInhibit,
    UsbSuspendAllow,
    Help,
}

/// A command recognized by prefix, carrying the remainder of the line as its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialCommand {
    SetModemName,
    SetUserName,
    ScheduleCallback,
    NameYourself,
    CallMeIn,
    DebugCb,
}

const STATIC_TABLE: &[(&str, StaticCommand)] = &[
    ("status", StaticCommand::Status),
    ("reboot", StaticCommand::Reboot),
    ("shutdown", StaticCommand::Shutdown),
    ("adb on", StaticCommand::AdbOn),
    ("adb off", StaticCommand::AdbOff),
    ("usb reset", StaticCommand::UsbReset),
    ("uptime", StaticCommand::Uptime),
    ("signal", StaticCommand::SignalReport),
    ("load average", StaticCommand::LoadAverage),
    ("memory stats", StaticCommand::MemoryStats),
    ("rmnet stats", StaticCommand::RmnetStats),
    ("gps stats", StaticCommand::GpsStats),
    ("usb suspend inhibit", StaticCommand::UsbSuspendInhibit),
    ("usb suspend allow", StaticCommand::UsbSuspendAllow),
    ("help", StaticCommand::Help),
];

const PARTIAL_TABLE: &[(&str, PartialCommand)] = &[
    // Tried before the bare "name " entry so a "name yourself ..." line isn't swallowed by it.
    ("name yourself ", PartialCommand::NameYourself),
    ("name ", PartialCommand::SetModemName),
    ("user ", PartialCommand::SetUserName),
    ("remind ", PartialCommand::ScheduleCallback),
    ("call me in ", PartialCommand::CallMeIn),
    ("debug cb ", PartialCommand::DebugCb),
];

/// A command text resolved to either a known bare command, a prefix command with its argument, or
/// nothing the table recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Static(StaticCommand),
    Partial(PartialCommand, String),
    Unknown,
}

/// Command names/prefixes for the `help` command's listing, in table order.
pub fn command_names() -> impl Iterator<Item = &'static str> {
    STATIC_TABLE
        .iter()
        .map(|(name, _)| *name)
        .chain(PARTIAL_TABLE.iter().map(|(prefix, _)| prefix.trim_end()))
}

/// Resolve `text` against the static table first, then the prefix table.
pub fn resolve(text: &str) -> Resolved {
    let trimmed = text.trim();
    if let Some((_, cmd)) = STATIC_TABLE.iter().find(|(name, _)| *name == trimmed) {
        return Resolved::Static(*cmd);
    }
    for (prefix, cmd) in PARTIAL_TABLE {
        if let Some(arg) = trimmed.strip_prefix(prefix) {
            return Resolved::Partial(*cmd, arg.to_string());
        }
    }
    Resolved::Unknown
}

/// Resolve `text` against the command tables, additionally checking `history` for repeated-command
/// abuse. Returns `None` if the abuse check wants a reproach sent instead of dispatching.
pub fn resolve_with_history(text: &str, history: &mut CommandHistory) -> Option<Resolved> {
    let abusive = history.is_abusive_repeat(text.trim());
    history.push(text.trim());
    if abusive {
        None
    } else {
        Some(resolve(text))
    }
}
