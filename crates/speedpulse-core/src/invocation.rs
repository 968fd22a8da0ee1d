//! Allow-listed invocation of the measurement utility.
//!
//! Arguments are rendered from typed [`UtilityFlag`]s only. Nothing here
//! accepts a free-form argument string, and the process is spawned without a
//! shell.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Flags the launcher is allowed to pass to the Ookla `speedtest` CLI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UtilityFlag {
    /// --accept-license
    AcceptLicense,

    /// --accept-gdpr
    AcceptGdpr,

    /// --progress=yes (live progress even when stdout is not a TTY)
    Progress,

    /// --server-id=<n>
    ServerId(u32),

    /// --precision=<n>, clamped to 0..=8
    Precision(u8),
}

impl UtilityFlag {
    /// Render the flag as a single argv element.
    pub fn render(&self) -> String {
        match self {
            UtilityFlag::AcceptLicense => "--accept-license".to_string(),
            UtilityFlag::AcceptGdpr => "--accept-gdpr".to_string(),
            UtilityFlag::Progress => "--progress=yes".to_string(),
            UtilityFlag::ServerId(id) => format!("--server-id={id}"),
            UtilityFlag::Precision(p) => format!("--precision={}", (*p).min(8)),
        }
    }
}

/// A fully-specified, injection-free command line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invocation {
    /// Executable path (operator configuration, never request input).
    pub program: PathBuf,

    /// Flags in the order they are passed.
    pub flags: Vec<UtilityFlag>,
}

impl Invocation {
    /// The standard non-interactive invocation of the Ookla CLI.
    pub fn ookla(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            flags: vec![
                UtilityFlag::AcceptLicense,
                UtilityFlag::AcceptGdpr,
                UtilityFlag::Progress,
            ],
        }
    }

    /// Add a flag unless an identical one is already present.
    pub fn with_flag(mut self, flag: UtilityFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    /// Rendered argv, excluding the program itself.
    pub fn args(&self) -> Vec<String> {
        self.flags.iter().map(UtilityFlag::render).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ookla_default_args() {
        let inv = Invocation::ookla("speedtest");
        assert_eq!(
            inv.args(),
            vec!["--accept-license", "--accept-gdpr", "--progress=yes"]
        );
    }

    #[test]
    fn test_with_flag_deduplicates() {
        let inv = Invocation::ookla("speedtest")
            .with_flag(UtilityFlag::ServerId(4242))
            .with_flag(UtilityFlag::ServerId(4242))
            .with_flag(UtilityFlag::Progress);
        assert_eq!(inv.flags.len(), 4);
        assert_eq!(inv.args().last().map(String::as_str), Some("--server-id=4242"));
    }

    #[test]
    fn test_precision_is_clamped() {
        assert_eq!(UtilityFlag::Precision(200).render(), "--precision=8");
    }
}
