//! Named command channels and what each one may carry.

use std::fmt;

use tcs_common::control_unit::state::Subsystem;

use super::parse::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelId {
    Control = 0,
    Slew = 1,
    Track = 2,
    Paddle = 3,
    Filter = 4,
    Focus = 5,
    Dome = 6,
    Shutter = 7,
}

impl ChannelId {
    pub const ALL: [ChannelId; 8] = [
        Self::Control,
        Self::Slew,
        Self::Track,
        Self::Paddle,
        Self::Filter,
        Self::Focus,
        Self::Dome,
        Self::Shutter,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Name used for the FIFO pair (`<Name>.in` / `<Name>.out`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Control => "Control",
            Self::Slew => "Slew",
            Self::Track => "Track",
            Self::Paddle => "Paddle",
            Self::Filter => "Filter",
            Self::Focus => "Focus",
            Self::Dome => "Dome",
            Self::Shutter => "Shutter",
        }
    }

    /// Subsystem this channel drives.
    pub const fn subsystem(self) -> Subsystem {
        match self {
            Self::Control | Self::Slew | Self::Track | Self::Paddle => Subsystem::Mount,
            Self::Filter => Subsystem::Filter,
            Self::Focus => Subsystem::Focus,
            Self::Dome => Subsystem::Dome,
            Self::Shutter => Subsystem::Shutter,
        }
    }

    /// Whether `command` is part of this channel's vocabulary.
    pub fn accepts(self, command: &Command) -> bool {
        use Command as C;
        match self {
            Self::Control => matches!(
                command,
                C::Reset | C::Home(_) | C::Limits(_) | C::Stop | C::Offset { .. }
            ),
            Self::Slew => matches!(command, C::Slew(_) | C::Stop),
            Self::Track => matches!(command, C::Track(_) | C::Offset { .. } | C::Stop),
            Self::Paddle => matches!(command, C::Jog(_) | C::Stop),
            Self::Filter => matches!(command, C::Filter(_) | C::Home(_) | C::Limits(_) | C::Stop),
            Self::Focus => matches!(command, C::Focus(_) | C::Home(_) | C::Limits(_) | C::Stop),
            Self::Dome => matches!(command, C::Dome(_) | C::Home(_) | C::Limits(_) | C::Stop),
            Self::Shutter => matches!(command, C::Open | C::Close | C::Stop),
        }
    }

    /// Subsystems a `stop` on this channel halts. Control stops everything.
    pub fn stop_scope(self) -> &'static [Subsystem] {
        match self {
            Self::Control => &Subsystem::ALL,
            Self::Slew | Self::Track | Self::Paddle => &[Subsystem::Mount],
            Self::Filter => &[Subsystem::Filter],
            Self::Focus => &[Subsystem::Focus],
            Self::Dome => &[Subsystem::Dome],
            Self::Shutter => &[Subsystem::Shutter],
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse::{AxisMask, parse_command};
    use tcs_common::time::Timestamp;

    fn cmd(line: &str) -> Command {
        parse_command(line, Timestamp::from_unix_secs(0.0)).unwrap()
    }

    #[test]
    fn indices_are_dense() {
        for (i, ch) in ChannelId::ALL.iter().enumerate() {
            assert_eq!(ch.index(), i);
        }
    }

    #[test]
    fn vocabulary_per_channel() {
        assert!(ChannelId::Control.accepts(&Command::Home(AxisMask::X)));
        assert!(ChannelId::Control.accepts(&cmd("reset")));
        assert!(!ChannelId::Control.accepts(&cmd("slew radec 1 2")));
        assert!(ChannelId::Slew.accepts(&cmd("slew radec 1 2")));
        assert!(!ChannelId::Slew.accepts(&cmd("track radec 1 2")));
        assert!(ChannelId::Track.accepts(&cmd("offset 1 2")));
        assert!(ChannelId::Paddle.accepts(&cmd("jog n")));
        assert!(!ChannelId::Paddle.accepts(&cmd("home")));
        assert!(ChannelId::Filter.accepts(&cmd("filter R")));
        assert!(!ChannelId::Filter.accepts(&cmd("focus 10")));
        assert!(ChannelId::Dome.accepts(&cmd("dome auto")));
        assert!(ChannelId::Shutter.accepts(&cmd("open")));
        assert!(!ChannelId::Shutter.accepts(&cmd("home")));
        for ch in ChannelId::ALL {
            assert!(ch.accepts(&Command::Stop), "{ch} must accept stop");
        }
    }

    #[test]
    fn stop_scope() {
        assert_eq!(ChannelId::Control.stop_scope().len(), Subsystem::ALL.len());
        assert_eq!(ChannelId::Paddle.stop_scope(), &[Subsystem::Mount]);
        assert_eq!(ChannelId::Shutter.subsystem(), Subsystem::Shutter);
    }
}
