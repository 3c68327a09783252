//! Semantic MIDI commands and patches
//!
//! Commands stay at the "channel / kind / parameters" level; turning them into bytes is
//! the job of the external send tool.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::mode::ConnectionMode;

/// Highest value a 7-bit MIDI data byte can carry.
pub const MAX_DATA_VALUE: u8 = 127;

/// Label of the diagnostic patch kept at the bottom of every patch list.
pub const TEST_PATCH_LABEL: &str = "TEST 123";

/// CH1 program the diagnostic patch sends first on any wired route.
pub const TEST_MARKER_PROGRAM: u8 = 126;

/// The two logical MIDI channels a patch addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Channel {
    One,
    Two,
}

impl Channel {
    pub fn number(self) -> u8 {
        match self {
            Channel::One => 1,
            Channel::Two => 2,
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Channel::One),
            2 => Ok(Channel::Two),
            other => Err(format!("channel must be 1 or 2, got {}", other)),
        }
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> Self {
        channel.number()
    }
}

/// Kind of channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    ProgramChange,
    ControlChange,
}

impl CommandKind {
    /// Keyword used by the send tool (`pc` / `cc`).
    pub fn keyword(self) -> &'static str {
        match self {
            CommandKind::ProgramChange => "pc",
            CommandKind::ControlChange => "cc",
        }
    }
}

/// One semantic MIDI command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    channel: Channel,
    kind: CommandKind,
    params: Vec<u8>,
}

impl Command {
    /// Program Change: program (0-127)
    pub fn program_change(channel: Channel, program: u8) -> Result<Self> {
        check_data("program", program)?;
        Ok(Self {
            channel,
            kind: CommandKind::ProgramChange,
            params: vec![program],
        })
    }

    /// Control Change: controller (0-127), value (0-127)
    pub fn control_change(channel: Channel, controller: u8, value: u8) -> Result<Self> {
        check_data("controller", controller)?;
        check_data("value", value)?;
        Ok(Self {
            channel,
            kind: CommandKind::ControlChange,
            params: vec![controller, value],
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    pub fn is_program_change_on(&self, channel: Channel) -> bool {
        self.kind == CommandKind::ProgramChange && self.channel == channel
    }

    /// Arguments for the send tool, e.g. `["ch", "1", "pc", "5"]`.
    pub fn to_tool_args(&self) -> Vec<String> {
        let mut args = vec![
            "ch".to_string(),
            self.channel.number().to_string(),
            self.kind.keyword().to_string(),
        ];
        args.extend(self.params.iter().map(|p| p.to_string()));
        args
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_tool_args().join(" "))
    }
}

fn check_data(name: &str, value: u8) -> Result<()> {
    if value > MAX_DATA_VALUE {
        return Err(Error::InvalidCommand(format!(
            "{} {} out of range (0-{})",
            name, value, MAX_DATA_VALUE
        )));
    }
    Ok(())
}

/// Command as written in the configuration file
///
/// ```yaml
/// - { channel: 2, program: 127 }
/// - { channel: 1, cc: 47, value: 2 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Program { channel: u8, program: u8 },
    Control { channel: u8, cc: u8, value: u8 },
}

impl TryFrom<&CommandSpec> for Command {
    type Error = Error;

    fn try_from(spec: &CommandSpec) -> Result<Self> {
        match *spec {
            CommandSpec::Program { channel, program } => {
                Command::program_change(parse_channel(channel)?, program)
            },
            CommandSpec::Control { channel, cc, value } => {
                Command::control_change(parse_channel(channel)?, cc, value)
            },
        }
    }
}

fn parse_channel(channel: u8) -> Result<Channel> {
    Channel::try_from(channel).map_err(Error::InvalidCommand)
}

/// One patch-list row: a label, the two program numbers and any extra CCs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEntry {
    pub label: String,
    pub program1: u8,
    pub program2: u8,
    /// (channel, controller, value)
    pub controls: Vec<(u8, u8, u8)>,
}

/// Ordered commands for one footswitch action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    label: String,
    commands: Vec<Command>,
}

impl Patch {
    pub fn new(label: impl Into<String>, commands: Vec<Command>) -> Self {
        Self {
            label: label.into(),
            commands,
        }
    }

    /// Build a patch as `prefix`, CH1 program, CH2 program, then the entry's CCs.
    pub fn from_entry(entry: &PatchEntry, prefix: &[Command]) -> Result<Self> {
        let mut commands = prefix.to_vec();
        commands.push(Command::program_change(Channel::One, entry.program1)?);
        commands.push(Command::program_change(Channel::Two, entry.program2)?);

        for &(channel, cc, value) in &entry.controls {
            commands.push(Command::control_change(parse_channel(channel)?, cc, value)?);
        }

        Ok(Self::new(entry.label.clone(), commands))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_test(&self) -> bool {
        self.label == TEST_PATCH_LABEL
    }

    /// Commands to send in `mode`. Outside Bluetooth the diagnostic patch leads with
    /// `ch 1 pc 126` unless it already carries it.
    pub fn commands_for(&self, mode: ConnectionMode) -> Vec<Command> {
        let mut commands = self.commands.clone();
        if self.is_test() && mode != ConnectionMode::Bluetooth {
            let marker = Command {
                channel: Channel::One,
                kind: CommandKind::ProgramChange,
                params: vec![TEST_MARKER_PROGRAM],
            };
            if !commands.contains(&marker) {
                commands.insert(0, marker);
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_args() {
        let pc = Command::program_change(Channel::Two, 127).unwrap();
        assert_eq!(pc.to_tool_args(), vec!["ch", "2", "pc", "127"]);

        let cc = Command::control_change(Channel::One, 47, 2).unwrap();
        assert_eq!(cc.to_string(), "ch 1 cc 47 2");
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(Command::program_change(Channel::One, 128).is_err());
        assert!(Command::control_change(Channel::One, 200, 0).is_err());
        assert!(Command::control_change(Channel::One, 7, 255).is_err());
    }

    #[test]
    fn test_channel_serde() {
        let ch: Channel = serde_json::from_str("2").unwrap();
        assert_eq!(ch, Channel::Two);
        assert!(serde_json::from_str::<Channel>("3").is_err());
    }

    #[test]
    fn test_command_spec_yaml() {
        let specs: Vec<CommandSpec> =
            serde_yaml::from_str("- { channel: 2, program: 127 }\n- { channel: 1, cc: 47, value: 2 }\n")
                .unwrap();
        let commands: Vec<Command> = specs
            .iter()
            .map(Command::try_from)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(commands[0], Command::program_change(Channel::Two, 127).unwrap());
        assert_eq!(commands[1], Command::control_change(Channel::One, 47, 2).unwrap());
    }

    #[test]
    fn test_patch_from_entry_order() {
        let prefix = vec![Command::control_change(Channel::One, 47, 2).unwrap()];
        let entry = PatchEntry {
            label: "Verse".into(),
            program1: 12,
            program2: 3,
            controls: vec![(2, 20, 127), (1, 21, 0)],
        };

        let patch = Patch::from_entry(&entry, &prefix).unwrap();
        let rendered: Vec<String> = patch.commands().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "ch 1 cc 47 2",
                "ch 1 pc 12",
                "ch 2 pc 3",
                "ch 2 cc 20 127",
                "ch 1 cc 21 0",
            ]
        );
        assert_eq!(patch.label(), "Verse");
    }

    #[test]
    fn test_patch_from_entry_rejects_bad_channel() {
        let entry = PatchEntry {
            label: "Bad".into(),
            program1: 1,
            program2: 1,
            controls: vec![(5, 1, 1)],
        };
        assert!(Patch::from_entry(&entry, &[]).is_err());
    }

    #[test]
    fn test_diagnostic_patch_marker() {
        let entry = PatchEntry {
            label: TEST_PATCH_LABEL.into(),
            program1: 1,
            program2: 2,
            controls: Vec::new(),
        };
        let patch = Patch::from_entry(&entry, &[]).unwrap();
        assert!(patch.is_test());

        let wired = patch.commands_for(ConnectionMode::Hybrid);
        assert_eq!(wired[0].to_string(), "ch 1 pc 126");
        assert_eq!(wired.len(), 3);
        assert_eq!(patch.commands_for(ConnectionMode::Bluetooth), patch.commands());

        // Never inserted twice
        let marked = Patch::new(TEST_PATCH_LABEL, wired.clone());
        assert_eq!(marked.commands_for(ConnectionMode::UsbDirect), wired);

        let regular = Patch::new("Verse", patch.commands().to_vec());
        assert_eq!(regular.commands_for(ConnectionMode::UsbDirect), patch.commands());
    }
}
