// apps/console/src/commands.rs
use std::path::PathBuf;
use vehicle_api::{ScriptId, Topic};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    ApiList,
    ApiStart { path: String, args: Vec<String> },
    /// No id stops the most recently started script
    ApiStop(Option<ScriptId>),
    ApiHistory,
    Status,
    Get(Topic),
    Watch(Topic),
    Unwatch(Topic),
    Mode(String),
    Arm(bool),
    ParamGet(String),
    ParamSet(String, f32),
    ParamList,
    ParamFetch,
    WpLoad(PathBuf),
    WpSave(PathBuf),
    WpList,
    WpFetch,
    WpFlush,
    Help,
    Quit,
}

pub const HELP: &str = "\
api list | api start <script> [args..] | api stop [id] | api history
status | get <attr> | watch <attr> | unwatch <attr>
mode <name> | arm | disarm
param get <name> | param set <name> <value> | param list | param fetch
wp load <file> | wp save <file> | wp list | wp fetch | wp flush
help | quit";

/// Parse one console line. `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, rest)) = words.split_first() else { return Ok(None) };
    use ConsoleCommand::*;
    let cmd = match (head, rest) {
        ("api", ["list"]) => ApiList,
        ("api", ["history"]) => ApiHistory,
        ("api", ["start", path, args @ ..]) => ApiStart {
            path: path.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        },
        ("api", ["stop"]) => ApiStop(None),
        ("api", ["stop", id]) => ApiStop(Some(id.parse().map_err(|_| format!("bad script id {id:?}"))?)),
        ("api", _) => return Err("usage: api list | api start <script> [args..] | api stop [id] | api history".into()),
        ("status", []) => Status,
        ("get", [attr]) => Get(topic(attr)?),
        ("watch", [attr]) => Watch(topic(attr)?),
        ("unwatch", [attr]) => Unwatch(topic(attr)?),
        ("mode", [name]) => Mode(name.to_ascii_uppercase()),
        ("arm", []) => Arm(true),
        ("disarm", []) => Arm(false),
        ("param", ["get", name]) => ParamGet(name.to_string()),
        ("param", ["set", name, value]) => {
            ParamSet(name.to_string(), value.parse().map_err(|_| format!("bad value {value:?}"))?)
        }
        ("param", ["list"]) => ParamList,
        ("param", ["fetch"]) => ParamFetch,
        ("wp", ["load", file]) => WpLoad(PathBuf::from(file)),
        ("wp", ["save", file]) => WpSave(PathBuf::from(file)),
        ("wp", ["list"]) => WpList,
        ("wp", ["fetch"]) => WpFetch,
        ("wp", ["flush"]) => WpFlush,
        ("help", _) => Help,
        ("quit" | "exit", []) => Quit,
        _ => return Err(format!("unknown command {line:?}, try help")),
    };
    Ok(Some(cmd))
}

fn topic(attr: &str) -> Result<Topic, String> {
    attr.parse().map_err(|e: vehicle_api::VehicleError| e.to_string())
}
