// Operator command language read line-by-line by the console binary

use crate::gateway::{ControlCommand, Signal};
use crate::models::{SortDirection, SortKey};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Control(ControlCommand),
    Filter(String),
    Sort(SortKey, SortDirection),
    Show,
    Pending,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?} (try: kill, stop, quota, filter, sort, show, pending, status)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("not a number: {0:?}")]
    InvalidNumber(String),
    #[error("{0}")]
    InvalidArgument(String),
}

const KILL_USAGE: &str = "kill <user> <pid> [TERM|KILL|INT|HUP]";
const STOP_USAGE: &str = "stop <user>";
const QUOTA_USAGE: &str = "quota <user> <mb>";
const SORT_USAGE: &str = "sort <username|cpu|mem|storage|status> [asc|desc]";

impl FromStr for OperatorCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandParseError::Empty)?;
        let args: Vec<&str> = words.collect();

        match verb.to_ascii_lowercase().as_str() {
            "kill" => {
                let (user, pid, signal) = match args.as_slice() {
                    [user, pid] => (*user, *pid, Signal::default()),
                    [user, pid, sig] => (
                        *user,
                        *pid,
                        sig.parse::<Signal>()
                            .map_err(|e| CommandParseError::InvalidArgument(e.to_string()))?,
                    ),
                    _ => return Err(CommandParseError::Usage(KILL_USAGE)),
                };
                Ok(OperatorCommand::Control(ControlCommand::KillProcess {
                    username: user.to_string(),
                    pid: parse_number(pid)?,
                    signal,
                }))
            }
            "stop" => match args.as_slice() {
                [user] => Ok(OperatorCommand::Control(ControlCommand::StopSession {
                    username: user.to_string(),
                })),
                _ => Err(CommandParseError::Usage(STOP_USAGE)),
            },
            "quota" => match args.as_slice() {
                [user, mb] => Ok(OperatorCommand::Control(ControlCommand::SetQuota {
                    username: user.to_string(),
                    quota_mb: parse_number(mb)?,
                })),
                _ => Err(CommandParseError::Usage(QUOTA_USAGE)),
            },
            "filter" => Ok(OperatorCommand::Filter(args.join(" "))),
            "sort" => {
                let (key, direction) = match args.as_slice() {
                    [key] => (*key, SortDirection::Ascending),
                    [key, dir] => (*key, parse_direction(dir)?),
                    _ => return Err(CommandParseError::Usage(SORT_USAGE)),
                };
                let key = key
                    .parse::<SortKey>()
                    .map_err(CommandParseError::InvalidArgument)?;
                Ok(OperatorCommand::Sort(key, direction))
            }
            "show" | "ls" => Ok(OperatorCommand::Show),
            "pending" => Ok(OperatorCommand::Pending),
            "status" => Ok(OperatorCommand::Status),
            other => Err(CommandParseError::Unknown(other.to_string())),
        }
    }
}

fn parse_number<T: FromStr>(s: &str) -> Result<T, CommandParseError> {
    s.parse()
        .map_err(|_| CommandParseError::InvalidNumber(s.to_string()))
}

fn parse_direction(s: &str) -> Result<SortDirection, CommandParseError> {
    match s.to_ascii_lowercase().as_str() {
        "asc" | "+" => Ok(SortDirection::Ascending),
        "desc" | "-" => Ok(SortDirection::Descending),
        _ => Err(CommandParseError::Usage(SORT_USAGE)),
    }
}
