//! Command line grammar.
//!
//! Keywords are case-insensitive. Right ascension and hour angle are in
//! hours, every other angle in degrees, offsets and rates in arcseconds.
//! The paddle is the exception to case-insensitivity: an upper-case
//! direction jogs fast, lower case slow.

use bitflags::bitflags;
use thiserror::Error;

use tcs_common::astro::{OrbitalElements, TargetObject};
use tcs_common::control_unit::state::AxisId;
use tcs_common::time::Timestamp;

use crate::state::mount::{JogDirection, PaddleJog};

bitflags! {
    /// Mount axes named by `home` / `limits` (empty = all fitted).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AxisMask: u8 {
        const X = 0x01;
        const Y = 0x02;
        const R = 0x04;
    }
}

impl AxisMask {
    /// Selected axes; empty means "all fitted".
    pub fn axes(self) -> heapless::Vec<AxisId, 3> {
        let mut out = heapless::Vec::new();
        for (flag, id) in [
            (Self::X, AxisId::MountX),
            (Self::Y, AxisId::MountY),
            (Self::R, AxisId::MountR),
        ] {
            if self.contains(flag) {
                // Three flags, three slots.
                let _ = out.push(id);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DomeCommand {
    /// Azimuth [rad].
    Goto(f64),
    Auto,
    Manual,
}

/// One parsed command. Angles are in radians.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reset,
    Home(AxisMask),
    Limits(AxisMask),
    Stop,
    Slew(TargetObject),
    Track(TargetObject),
    /// Sky offsets [rad].
    Offset { ra: f64, dec: f64 },
    /// `None` releases the paddle.
    Jog(Option<PaddleJog>),
    Filter(String),
    /// Relative focus move [µm].
    Focus(f64),
    Dome(DomeCommand),
    Open,
    Close,
}

impl Command {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Home(_) => "home",
            Self::Limits(_) => "limits",
            Self::Stop => "stop",
            Self::Slew(_) => "slew",
            Self::Track(_) => "track",
            Self::Offset { .. } => "offset",
            Self::Jog(_) => "jog",
            Self::Filter(_) => "filter",
            Self::Focus(_) => "focus",
            Self::Dome(_) => "dome",
            Self::Open => "open",
            Self::Close => "close",
        }
    }

    /// Commands that start or change motion, refused under e-stop.
    pub fn is_motion(&self) -> bool {
        !matches!(
            self,
            Self::Reset
                | Self::Stop
                | Self::Offset { .. }
                | Self::Jog(None)
                | Self::Dome(DomeCommand::Manual)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("'{0}' is not a number")]
    Number(String),

    #[error("{0} out of range")]
    Range(&'static str),
}

const USAGE_SLEW: &str = "slew radec <ra_h> <dec_deg> | hadec <ha_h> <dec_deg> | altaz <alt_deg> <az_deg>";
const USAGE_TRACK: &str = "track radec <ra_h> <dec_deg> [<ra_rate> <dec_rate>] | elements <a> <e> <i> <node> <peri> <M> <epoch>";

fn number(token: &str) -> Result<f64, ParseError> {
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::Number(token.to_string())),
    }
}

fn numbers<const N: usize>(args: &[&str], usage: &'static str) -> Result<[f64; N], ParseError> {
    if args.len() != N {
        return Err(ParseError::Usage(usage));
    }
    let mut out = [0.0; N];
    for (slot, token) in out.iter_mut().zip(args) {
        *slot = number(token)?;
    }
    Ok(out)
}

fn arcsec(value: f64) -> f64 {
    (value / 3600.0).to_radians()
}

fn hours(value: f64) -> f64 {
    (value * 15.0).to_radians()
}

fn declination(deg: f64) -> Result<f64, ParseError> {
    if !(-90.0..=90.0).contains(&deg) {
        return Err(ParseError::Range("declination"));
    }
    Ok(deg.to_radians())
}

fn axis_mask(args: &[&str], usage: &'static str) -> Result<AxisMask, ParseError> {
    let mut mask = AxisMask::empty();
    for arg in args {
        mask |= match arg.to_ascii_lowercase().as_str() {
            "x" => AxisMask::X,
            "y" => AxisMask::Y,
            "r" => AxisMask::R,
            _ => return Err(ParseError::Usage(usage)),
        };
    }
    Ok(mask)
}

fn slew_target(args: &[&str]) -> Result<TargetObject, ParseError> {
    let Some((frame, rest)) = args.split_first() else {
        return Err(ParseError::Usage(USAGE_SLEW));
    };
    match frame.to_ascii_lowercase().as_str() {
        "radec" => {
            let [ra, dec] = numbers(rest, USAGE_SLEW)?;
            Ok(TargetObject::Equatorial {
                ra: hours(ra.rem_euclid(24.0)),
                dec: declination(dec)?,
            })
        }
        "hadec" => {
            let [ha, dec] = numbers(rest, USAGE_SLEW)?;
            if !(-12.0..=12.0).contains(&ha) {
                return Err(ParseError::Range("hour angle"));
            }
            Ok(TargetObject::HourAngle {
                ha: hours(ha),
                dec: declination(dec)?,
            })
        }
        "altaz" => {
            let [alt, az] = numbers(rest, USAGE_SLEW)?;
            if !(-90.0..=90.0).contains(&alt) {
                return Err(ParseError::Range("altitude"));
            }
            Ok(TargetObject::Horizon {
                alt: alt.to_radians(),
                az: az.rem_euclid(360.0).to_radians(),
            })
        }
        _ => Err(ParseError::Usage(USAGE_SLEW)),
    }
}

fn track_target(args: &[&str], now: Timestamp) -> Result<TargetObject, ParseError> {
    let Some((kind, rest)) = args.split_first() else {
        return Err(ParseError::Usage(USAGE_TRACK));
    };
    match kind.to_ascii_lowercase().as_str() {
        "radec" if rest.len() == 2 => {
            let [ra, dec] = numbers(rest, USAGE_TRACK)?;
            Ok(TargetObject::Equatorial {
                ra: hours(ra.rem_euclid(24.0)),
                dec: declination(dec)?,
            })
        }
        "radec" => {
            let [ra, dec, ra_rate, dec_rate] = numbers(rest, USAGE_TRACK)?;
            Ok(TargetObject::Moving {
                ra: hours(ra.rem_euclid(24.0)),
                dec: declination(dec)?,
                ra_rate: arcsec(ra_rate),
                dec_rate: arcsec(dec_rate),
                epoch: now,
            })
        }
        "elements" => {
            let [a, e, i, node, peri, m, epoch] = numbers(rest, USAGE_TRACK)?;
            if !(a > 0.0) {
                return Err(ParseError::Range("semi-major axis"));
            }
            if !(0.0..1.0).contains(&e) {
                return Err(ParseError::Range("eccentricity"));
            }
            Ok(TargetObject::Elements(OrbitalElements {
                a,
                e,
                i: i.to_radians(),
                node: node.to_radians(),
                peri: peri.to_radians(),
                mean_anomaly: m.to_radians(),
                epoch: Timestamp::from_unix_secs(epoch),
            }))
        }
        _ => Err(ParseError::Usage(USAGE_TRACK)),
    }
}

fn jog(args: &[&str]) -> Result<Option<PaddleJog>, ParseError> {
    const USAGE: &str = "jog <N|S|E|W|n|s|e|w|0>";
    let [arg] = args else {
        return Err(ParseError::Usage(USAGE));
    };
    let mut chars = arg.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return Err(ParseError::Usage(USAGE));
    };
    let direction = match c.to_ascii_uppercase() {
        '0' => return Ok(None),
        'N' => JogDirection::North,
        'S' => JogDirection::South,
        'E' => JogDirection::East,
        'W' => JogDirection::West,
        _ => return Err(ParseError::Usage(USAGE)),
    };
    Ok(Some(PaddleJog {
        direction,
        fast: c.is_ascii_uppercase(),
    }))
}

/// Parse one command line. `now` stamps the epoch of moving targets.
pub fn parse_command(line: &str, now: Timestamp) -> Result<Command, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((keyword, args)) = tokens.split_first() else {
        return Err(ParseError::Empty);
    };
    let bare = |command: Command, usage: &'static str| {
        if args.is_empty() {
            Ok(command)
        } else {
            Err(ParseError::Usage(usage))
        }
    };
    match keyword.to_ascii_lowercase().as_str() {
        "reset" => bare(Command::Reset, "reset"),
        "stop" => bare(Command::Stop, "stop"),
        "open" => bare(Command::Open, "open"),
        "close" => bare(Command::Close, "close"),
        "home" => Ok(Command::Home(axis_mask(args, "home [x] [y] [r]")?)),
        "limits" => Ok(Command::Limits(axis_mask(args, "limits [x] [y] [r]")?)),
        "slew" => Ok(Command::Slew(slew_target(args)?)),
        "track" => Ok(Command::Track(track_target(args, now)?)),
        "offset" => {
            let [ra, dec] = numbers(args, "offset <ra_arcsec> <dec_arcsec>")?;
            Ok(Command::Offset {
                ra: arcsec(ra),
                dec: arcsec(dec),
            })
        }
        "jog" => Ok(Command::Jog(jog(args)?)),
        "filter" => match args {
            [name] => Ok(Command::Filter((*name).to_string())),
            _ => Err(ParseError::Usage("filter <name>")),
        },
        "focus" => {
            let [microns] = numbers(args, "focus <offset_um>")?;
            Ok(Command::Focus(microns))
        }
        "dome" => match args {
            [arg] if arg.eq_ignore_ascii_case("auto") => Ok(Command::Dome(DomeCommand::Auto)),
            [arg] if arg.eq_ignore_ascii_case("manual") => Ok(Command::Dome(DomeCommand::Manual)),
            [arg] => Ok(Command::Dome(DomeCommand::Goto(
                number(arg)?.rem_euclid(360.0).to_radians(),
            ))),
            _ => Err(ParseError::Usage("dome <az_deg> | auto | manual")),
        },
        other => Err(ParseError::Unknown(other.to_string())),
    }
}
