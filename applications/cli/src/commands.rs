//! Interactive commands read from stdin

use anyhow::{anyhow, bail, Context, Result};
use soul_transition::LoopingMode;
use std::str::FromStr;

pub const HELP: &str = "\
p        play / pause
n        next track
b        previous track
j N      jump to playlist index N
s MS     seek to MS milliseconds
l MODE   looping mode (none, track, playlist)
v X      volume, 0.0 - 1.0
r X      speed, 0.0 - 8.0
pos      print position
h        this help
q        quit";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    PlayPause,
    Next,
    Prev,
    Jump(usize),
    Seek(u64),
    Looping(LoopingMode),
    Volume(f32),
    Speed(f32),
    Position,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let argument = words.next();
        if let Some(extra) = words.next() {
            bail!("unexpected argument '{}'", extra);
        }

        let command = match (name, argument) {
            ("p", None) => Self::PlayPause,
            ("n", None) => Self::Next,
            ("b", None) => Self::Prev,
            ("pos", None) => Self::Position,
            ("h" | "?", None) => Self::Help,
            ("q", None) => Self::Quit,
            ("j", Some(index)) => Self::Jump(index.parse().context("index must be a number")?),
            ("s", Some(ms)) => Self::Seek(ms.parse().context("position must be milliseconds")?),
            ("l", Some(mode)) => Self::Looping(mode.parse()?),
            ("v", Some(volume)) => Self::Volume(volume.parse().context("volume must be a number")?),
            ("r", Some(speed)) => Self::Speed(speed.parse().context("speed must be a number")?),
            ("j" | "s" | "l" | "v" | "r", None) => bail!("'{}' needs an argument", name),
            (_, Some(_)) if ["p", "n", "b", "pos", "h", "?", "q"].contains(&name) => {
                bail!("'{}' takes no argument", name)
            }
            _ => bail!("unknown command '{}', try 'h'", name),
        };
        Ok(command)
    }
}
