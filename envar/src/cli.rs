//! Command-line surface: flag parsing and validation into an [`Intent`].
//!
//! Parsing holds no business logic. Contradictory flag combinations are
//! rejected here, before any store is opened.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Parser};

use crate::core::types::{Mode, MutationRequest, Scope};
use crate::error::EnvarError;
use crate::io::config::CONFIG_ENV;

#[derive(Parser, Debug)]
#[command(
    name = "envar",
    version,
    about = "Inspect and modify user, machine and process environment variables",
    disable_help_flag = true,
    disable_version_flag = true,
    arg_required_else_help = true,
    after_help = EXAMPLES
)]
#[command(group(ArgGroup::new("action").required(true).args(["list", "set", "broadcast", "watch"])))]
pub struct Cli {
    /// List the variables of a scope (user if none is given).
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Create or update a variable. Existing values are appended to unless -o is given.
    #[arg(short = 's', long)]
    pub set: bool,

    /// Notify running listeners that the environment changed, without modifying anything.
    #[arg(short = 'b', long)]
    pub broadcast: bool,

    /// Wait for the next change notification, acknowledge it and exit.
    #[arg(short = 'w', long)]
    pub watch: bool,

    /// Target the machine-wide store.
    #[arg(short = 'm', long)]
    pub machine: bool,

    /// Target the current user's store.
    #[arg(short = 'u', long)]
    pub user: bool,

    /// List the environment block of the process with this id.
    /// Ids are reused once a process exits, so the block may belong to another process.
    #[arg(short = 'p', long, value_name = "PID")]
    pub process: Option<u32>,

    /// Append the value with a ';' delimiter if the variable exists (default).
    #[arg(short = 'a', long)]
    pub append: bool,

    /// Overwrite the value of an existing variable.
    #[arg(short = 'o', long)]
    pub overwrite: bool,

    #[arg(short = 'n', long, value_name = "NAME")]
    pub name: Option<String>,

    /// An empty value together with -o (or no mode) deletes the variable.
    #[arg(short = 'v', long, value_name = "VALUE", allow_hyphen_values = true)]
    pub value: Option<String>,

    /// Configuration file (default: <config dir>/envar/config.toml).
    #[arg(long, value_name = "PATH", env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Display this help information.
    #[arg(short = '?', short_alias = 'h', long = "help", action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Print version information.
    #[arg(long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,
}

const EXAMPLES: &str = "\
Examples:
  List the machine-wide variables:
    envar -l -m
  List the environment of process 15222:
    envar -l -p 15222
  Append a directory to the current user's PATH:
    envar -s -u -a -n PATH -v /opt/sysinternals/bin
  Replace the current user's EDITOR:
    envar -s -u -o -n EDITOR -v vim
  Delete the machine-wide JAVA_HOME:
    envar -s -m -o -n JAVA_HOME -v \"\"";

/// Validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    List { scope: Scope },
    Set(MutationRequest),
    BroadcastOnly,
    Watch,
}

impl Cli {
    /// Parse normalized process arguments.
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    pub fn into_intent(self) -> Result<Intent, EnvarError> {
        let scope_flags =
            usize::from(self.machine) + usize::from(self.user) + usize::from(self.process.is_some());
        if scope_flags > 1 {
            return Err(EnvarError::validation(
                "The -m, -u and -p options are mutually exclusive.",
            ));
        }
        if self.append && self.overwrite {
            return Err(EnvarError::validation(
                "The -a and -o options are mutually exclusive.",
            ));
        }

        let scope = match (self.machine, self.process) {
            (true, _) => Scope::Machine,
            (_, Some(pid)) => Scope::Process(pid),
            _ => Scope::User,
        };

        if self.set {
            if self.process.is_some() {
                return Err(EnvarError::validation(
                    "A process' environment block cannot be modified except by a parent process.",
                ));
            }
            let name = self.name.ok_or_else(|| {
                EnvarError::validation("A variable name must be specified with the -n option.")
            })?;
            let value = self.value.ok_or_else(|| {
                EnvarError::validation("A variable value must be specified with the -v option.")
            })?;
            let mode = match (self.append, self.overwrite) {
                (true, _) => Some(Mode::Append),
                (_, true) => Some(Mode::Overwrite),
                _ => None,
            };
            return Ok(Intent::Set(MutationRequest {
                scope,
                name,
                value,
                mode,
            }));
        }

        if self.append || self.overwrite || self.name.is_some() || self.value.is_some() {
            return Err(EnvarError::validation(
                "The -a, -o, -n and -v options are only valid with -s.",
            ));
        }
        if self.list {
            return Ok(Intent::List { scope });
        }
        if scope_flags > 0 {
            return Err(EnvarError::validation(
                "The -m, -u and -p options are only valid with -l or -s.",
            ));
        }
        if self.broadcast {
            return Ok(Intent::BroadcastOnly);
        }
        Ok(Intent::Watch)
    }
}

/// Rewrite two-character flags given as `/x` or `-X` to `-x`.
///
/// Tokens following a flag that takes a value are left untouched.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    let mut takes_value = false;
    for (index, arg) in args.into_iter().enumerate() {
        let arg: OsString = arg.into();
        if index == 0 || takes_value {
            takes_value = false;
            out.push(arg);
            continue;
        }
        let normalized = arg.to_str().and_then(normalize_flag);
        let arg = normalized.map(OsString::from).unwrap_or(arg);
        takes_value = matches!(arg.to_str(), Some("-n" | "-v" | "-p" | "--config"));
        out.push(arg);
    }
    out
}

fn normalize_flag(token: &str) -> Option<String> {
    let mut chars = token.chars();
    let (Some(prefix @ ('/' | '-')), Some(flag), None) = (chars.next(), chars.next(), chars.next())
    else {
        return None;
    };
    if !(flag.is_ascii_alphabetic() || flag == '?') {
        return None;
    }
    let lowered = flag.to_ascii_lowercase();
    if prefix == '-' && lowered == flag {
        return None;
    }
    Some(format!("-{lowered}"))
}
