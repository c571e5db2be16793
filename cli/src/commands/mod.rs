// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Projector CLI

pub mod config;
pub mod mount;
pub mod validate;
pub mod watch;

pub use self::config::ConfigCommand;
pub use self::mount::MountArgs;
pub use self::validate::ValidateArgs;
pub use self::watch::WatchArgs;

/// Parse a permission mode given in octal, with or without a `0o` prefix.
pub fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| format!("'{}' is not an octal mode", value))?;
    if mode > 0o7777 {
        return Err(format!("'{}' is not a permission mode", value));
    }
    Ok(mode)
}
