//! Line commands understood by the console host.

use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { name: String, world: Option<String> },
    World { name: String, world: String },
    Respawn { name: String, world: Option<String>, alive: bool },
    Quit { name: String },
    Check { who: String, node: String },
    Contexts { who: String },
    Status,
    Sweep,
    Reload,
    Start,
    Stop,
    Help,
    Exit,
}

pub const HELP: &str = "\
login <name> [world]            connect a player
world <name> <world>            move a player to another world
respawn <name> [world] [dead]   rebind a player's session
quit <name>                     disconnect a player
check <name|console> <node>     evaluate a permission node
contexts <name|console>         show the contexts a check would use
status                          print server state as JSON
sweep                           run cache housekeeping now
reload                          reload policy files
start | stop                    start or stop the server
exit                            leave the console";

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?.to_lowercase();
        let args: Vec<String> = words.map(str::to_string).collect();
        let mut args = args.into_iter();

        let command = match verb.as_str() {
            "login" => Command::Login {
                name: args.next().ok_or(CommandError::Usage("login <name> [world]"))?,
                world: args.next(),
            },
            "world" => {
                let usage = CommandError::Usage("world <name> <world>");
                let name = args.next().ok_or(usage.clone())?;
                let world = args.next().ok_or(usage)?;
                Command::World { name, world }
            }
            "respawn" => {
                let name = args
                    .next()
                    .ok_or(CommandError::Usage("respawn <name> [world] [dead]"))?;
                let rest: Vec<String> = args.collect();
                let alive = !rest.iter().any(|a| a.eq_ignore_ascii_case("dead"));
                let world = rest.into_iter().find(|a| !a.eq_ignore_ascii_case("dead"));
                Command::Respawn { name, world, alive }
            }
            "quit" => Command::Quit {
                name: args.next().ok_or(CommandError::Usage("quit <name>"))?,
            },
            "check" => {
                let usage = CommandError::Usage("check <name|console> <node>");
                let who = args.next().ok_or(usage.clone())?;
                let node = args.next().ok_or(usage)?;
                Command::Check { who, node }
            }
            "contexts" => Command::Contexts {
                who: args
                    .next()
                    .ok_or(CommandError::Usage("contexts <name|console>"))?,
            },
            "status" => Command::Status,
            "sweep" => Command::Sweep,
            "reload" => Command::Reload,
            "start" => Command::Start,
            "stop" => Command::Stop,
            "help" | "?" => Command::Help,
            "exit" => Command::Exit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}
