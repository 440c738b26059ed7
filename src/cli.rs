use std::{path::PathBuf, str::FromStr, time::Duration};

use bytesize::ByteSize;

use crate::{
    config::{HopPlan, TtyMode},
    error::ConfigError,
};

pub const USAGE: &str = "\
Usage: nssh [OPTIONS] [user[:password]@]host[:port]... [--] [COMMAND]...

Connects to each hop in order, tunneling every hop through the previous one,
then runs COMMAND (or an interactive shell) on the last hop.

Options:
  -i PATH                    Private key for every hop
  -iN PATH                   Private key for hop N (0-based)
  -t                         Force pseudo-terminal allocation
  -T                         Disable pseudo-terminal allocation
  -v                         Increase verbosity (repeatable)
  --cmd                      Treat every following argument as the command
  --run_local_fwd HOST:PORT  Forward a local port to HOST:PORT through the last
                             hop, then run COMMAND locally; {{fwd}} in COMMAND is
                             replaced with the local address
  --connect-timeout DURATION Timeout for each hop (default: 30s)
  --keepalive-interval DURATION
                             Send SSH keepalives on every hop
  --buffer-size SIZE         Buffer size for forwarded connections (default: 32KiB)
  -h, --help                 Print help
  -V, --version              Print version
";

/// Result of scanning the command line.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    Run(HopPlan),
    Help,
    Version,
}

// Classes of command-line tokens.
#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    // The characters after a single dash, e.g. `vvv` for `-vvv`.
    Short(&'a str),
    // A double-dash option, possibly with an inline `=value`.
    Long {
        name: &'a str,
        value: Option<&'a str>,
    },
    Positional(&'a str),
}

impl<'a> Token<'a> {
    fn classify(arg: &'a str) -> Self {
        if let Some(long) = arg.strip_prefix("--") {
            match long.split_once('=') {
                Some((name, value)) => Token::Long {
                    name,
                    value: Some(value),
                },
                None => Token::Long {
                    name: long,
                    value: None,
                },
            }
        } else if let Some(short) = arg.strip_prefix('-')
            && !short.is_empty()
        {
            Token::Short(short)
        } else {
            Token::Positional(arg)
        }
    }
}

// Options whose value is the next token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueSlot {
    GlobalIdentity,
    IndexedIdentity(usize),
    ForwardTarget,
    ConnectTimeout,
    KeepaliveInterval,
    BufferSize,
}

impl ValueSlot {
    fn option_name(self) -> String {
        match self {
            ValueSlot::GlobalIdentity => "-i".into(),
            ValueSlot::IndexedIdentity(index) => format!("-i{index}"),
            ValueSlot::ForwardTarget => "--run_local_fwd".into(),
            ValueSlot::ConnectTimeout => "--connect-timeout".into(),
            ValueSlot::KeepaliveInterval => "--keepalive-interval".into(),
            ValueSlot::BufferSize => "--buffer-size".into(),
        }
    }

    fn apply(self, value: &str, plan: &mut HopPlan) -> Result<(), ConfigError> {
        match self {
            ValueSlot::GlobalIdentity => plan.identities.global = Some(PathBuf::from(value)),
            ValueSlot::IndexedIdentity(index) => {
                plan.identities.indexed.insert(index, PathBuf::from(value));
            }
            ValueSlot::ForwardTarget => {
                if value.is_empty() {
                    return Err(self.invalid(value, "target cannot be empty"));
                }
                plan.forward_target = Some(value.to_string());
            }
            ValueSlot::ConnectTimeout => plan.config.connect_timeout = self.duration(value)?,
            ValueSlot::KeepaliveInterval => {
                plan.config.keepalive_interval = Some(self.duration(value)?)
            }
            ValueSlot::BufferSize => {
                let size = ByteSize::from_str(value).map_err(|error| self.invalid(value, error))?;
                if size.as_u64() == 0 {
                    return Err(self.invalid(value, "size cannot be zero"));
                }
                plan.config.buffer_size = usize::try_from(size.as_u64())
                    .map_err(|error| self.invalid(value, error.to_string()))?;
            }
        }
        Ok(())
    }

    fn duration(self, value: &str) -> Result<Duration, ConfigError> {
        let duration: Duration = value
            .parse::<humantime::Duration>()
            .map_err(|error| self.invalid(value, error.to_string()))?
            .into();
        if duration.is_zero() {
            return Err(self.invalid(value, "duration cannot be zero"));
        }
        Ok(duration)
    }

    fn invalid(self, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            option: self.option_name(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

// Where the scanner is between two tokens.
#[derive(Debug, PartialEq, Eq)]
enum State {
    // Looking at options and hop descriptors.
    Scanning,
    // The previous option needs this token as its value.
    AwaitingValue(ValueSlot),
    // Every remaining token belongs to the command.
    Command,
}

// What a single option token did to the scanner.
enum Step {
    Next(State),
    Finish(ParseOutcome),
}

/// Scans the arguments (without the program name) into a [`HopPlan`].
///
/// A positional argument containing `@` is a hop; the first positional without
/// one starts the command, and everything after it is passed along verbatim.
pub fn parse_args<I, S>(args: I) -> Result<ParseOutcome, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut plan = HopPlan::default();
    let mut force_tty = false;
    let mut disable_tty = false;
    let mut state = State::Scanning;
    for arg in args {
        let arg = arg.as_ref();
        state = match state {
            State::Command => {
                plan.command.push(arg.to_string());
                State::Command
            }
            State::AwaitingValue(slot) => {
                slot.apply(arg, &mut plan)?;
                State::Scanning
            }
            State::Scanning => {
                let step = match Token::classify(arg) {
                    Token::Short(flags) => {
                        scan_short(flags, &mut plan, &mut force_tty, &mut disable_tty)?
                    }
                    Token::Long { name, value } => scan_long(name, value, &mut plan)?,
                    Token::Positional(text) if text.contains('@') => {
                        plan.hops.push(text.to_string());
                        Step::Next(State::Scanning)
                    }
                    Token::Positional(text) => {
                        plan.command.push(text.to_string());
                        Step::Next(State::Command)
                    }
                };
                match step {
                    Step::Next(state) => state,
                    Step::Finish(outcome) => return Ok(outcome),
                }
            }
        };
    }
    if let State::AwaitingValue(slot) = state {
        return Err(ConfigError::MissingValue(slot.option_name()));
    }
    plan.tty = match (force_tty, disable_tty) {
        (true, true) => return Err(ConfigError::ConflictingTtyFlags),
        (true, false) => TtyMode::Force,
        (false, true) => TtyMode::Disable,
        (false, false) => TtyMode::Auto,
    };
    if plan.hops.is_empty() {
        return Err(ConfigError::NoHops);
    }
    if plan.forward_target.is_some() && plan.command.is_empty() {
        return Err(ConfigError::ForwardWithoutCommand);
    }
    Ok(ParseOutcome::Run(plan))
}

fn scan_short(
    flags: &str,
    plan: &mut HopPlan,
    force_tty: &mut bool,
    disable_tty: &mut bool,
) -> Result<Step, ConfigError> {
    for (position, flag) in flags.char_indices() {
        match flag {
            'v' => plan.verbosity = plan.verbosity.saturating_add(1),
            't' => *force_tty = true,
            'T' => *disable_tty = true,
            'h' => return Ok(Step::Finish(ParseOutcome::Help)),
            'V' => return Ok(Step::Finish(ParseOutcome::Version)),
            // The rest of the token is the hop index for this identity.
            'i' => {
                let index = &flags[position + 1..];
                let slot = if index.is_empty() {
                    ValueSlot::GlobalIdentity
                } else {
                    ValueSlot::IndexedIdentity(
                        index
                            .parse()
                            .map_err(|_| ConfigError::InvalidIdentityIndex(index.to_string()))?,
                    )
                };
                return Ok(Step::Next(State::AwaitingValue(slot)));
            }
            flag => return Err(ConfigError::UnknownShortOption(flag)),
        }
    }
    Ok(Step::Next(State::Scanning))
}

fn scan_long(name: &str, value: Option<&str>, plan: &mut HopPlan) -> Result<Step, ConfigError> {
    let slot = match name {
        // A bare `--` and `--cmd` both end option scanning.
        "" | "cmd" => {
            if value.is_some() {
                return Err(ConfigError::UnexpectedValue(name.to_string()));
            }
            return Ok(Step::Next(State::Command));
        }
        "help" => return Ok(Step::Finish(ParseOutcome::Help)),
        "version" => return Ok(Step::Finish(ParseOutcome::Version)),
        "run_local_fwd" | "run-local-fwd" => ValueSlot::ForwardTarget,
        "connect-timeout" => ValueSlot::ConnectTimeout,
        "keepalive-interval" => ValueSlot::KeepaliveInterval,
        "buffer-size" => ValueSlot::BufferSize,
        name => return Err(ConfigError::UnknownLongOption(name.to_string())),
    };
    match value {
        Some(value) => {
            slot.apply(value, plan)?;
            Ok(Step::Next(State::Scanning))
        }
        None => Ok(Step::Next(State::AwaitingValue(slot))),
    }
}
