use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail};
use parking_lot::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use link_core::{FrameSource, FrameTx, OutboundRx};
use vehicle_api::*;

use crate::commands::{ConsoleCommand, HELP};

pub struct ConsoleSession {
    conn: Connection,
    catalog: ScriptCatalog,
    watches: Mutex<HashMap<Topic, SubscriptionId>>,
}

impl ConsoleSession {
    pub fn new(conn: Connection, catalog: ScriptCatalog) -> Self {
        Self { conn, catalog, watches: Mutex::new(HashMap::new()) }
    }

    pub fn close(&self) -> Vec<ScriptId> {
        self.conn.close()
    }

    /// Run one command. Calls that would wait on the vehicle are refused up front
    /// so the prompt never hangs.
    pub fn execute(&self, cmd: ConsoleCommand) -> anyhow::Result<String> {
        let v = self.conn.vehicle();
        let scripts = self.conn.scripts();
        let out = match cmd {
            ConsoleCommand::ApiList => {
                let live = scripts.list();
                if live.is_empty() {
                    "no scripts running".to_string()
                } else {
                    live.iter().map(|i| format!("{}: {}", i.id, i.description)).collect::<Vec<_>>().join("\n")
                }
            }
            ConsoleCommand::ApiStart { path, args } => {
                let entry = self.catalog.resolve(&path).ok_or_else(|| {
                    anyhow!("unknown script {path:?}, known: {}", self.catalog.names().join(", "))
                })?;
                let id = scripts.start(entry, &path, args)?;
                format!("started {id}")
            }
            ConsoleCommand::ApiStop(None) => match scripts.kill_latest() {
                Some(id) => format!("stopping {id}"),
                None => "no scripts running".to_string(),
            },
            ConsoleCommand::ApiStop(Some(id)) => {
                if scripts.kill(id) { format!("stopping {id}") } else { format!("no running script {id}") }
            }
            ConsoleCommand::ApiHistory => {
                let mut out = String::new();
                for i in scripts.history() {
                    let _ = writeln!(out, "{}: {} {:?} {} .. {}", i.id, i.description, i.status,
                        stamp(i.started_at), i.finished_at.map(stamp).unwrap_or_default());
                }
                out.trim_end().to_string()
            }
            ConsoleCommand::Status => self.status(&v),
            ConsoleCommand::Get(t) => format!("{t} = {}", v.attribute(t)),
            ConsoleCommand::Watch(t) => {
                let mut watches = self.watches.lock();
                if watches.contains_key(&t) {
                    format!("already watching {t}")
                } else {
                    let weak = Arc::downgrade(&v);
                    let id = v.add_attribute_observer(t, move |t| {
                        if let Some(v) = weak.upgrade() {
                            log::info!("{t} = {}", v.attribute(t));
                        }
                    });
                    watches.insert(t, id);
                    format!("watching {t}")
                }
            }
            ConsoleCommand::Unwatch(t) => match self.watches.lock().remove(&t) {
                Some(id) => {
                    v.remove_attribute_observer(id);
                    format!("stopped watching {t}")
                }
                None => format!("not watching {t}"),
            },
            ConsoleCommand::Mode(name) => {
                self.require_ready(&v)?;
                v.set_mode(name.as_str())?;
                format!("mode {name} requested")
            }
            ConsoleCommand::Arm(arm) => {
                self.require_ready(&v)?;
                v.set_armed(arm)?;
                if arm { "arming".to_string() } else { "disarming".to_string() }
            }
            ConsoleCommand::ParamGet(name) => {
                self.require_params(&v)?;
                let name = name.to_ascii_uppercase();
                match v.parameters().snapshot().into_iter().find(|(n, _)| *n == name) {
                    Some((n, value)) => format!("{n} = {value}"),
                    None => format!("no parameter {name}"),
                }
            }
            ConsoleCommand::ParamSet(name, value) => {
                self.require_params(&v)?;
                v.parameters().set(&name, value)?;
                format!("{} <- {value}", name.to_ascii_uppercase())
            }
            ConsoleCommand::ParamList => v
                .parameters()
                .snapshot()
                .into_iter()
                .map(|(n, value)| format!("{n} = {value}"))
                .collect::<Vec<_>>()
                .join("\n"),
            ConsoleCommand::ParamFetch => {
                v.parameters().refresh()?;
                "requested parameter list".to_string()
            }
            ConsoleCommand::WpLoad(path) => {
                self.require_idle_commands(&v)?;
                let items = iox::import_waypoints(&path)?;
                let n = items.len();
                v.commands().clear();
                for item in items {
                    v.commands().add(item);
                }
                format!("loaded {n} commands from {}, use wp flush to upload", path.display())
            }
            ConsoleCommand::WpSave(path) => {
                let items = v.commands().items();
                iox::export_waypoints(&items, &path)?;
                format!("saved {} commands to {}", items.len(), path.display())
            }
            ConsoleCommand::WpList => {
                let items = v.commands().items();
                let mut out = format!("{} commands, active {}", items.len(), v.commands().active_index());
                for (i, c) in items.iter().enumerate() {
                    let _ = write!(out, "\n{i}: cmd {} {:?} {} {} {}", c.command, c.frame, c.x, c.y, c.z);
                }
                out
            }
            ConsoleCommand::WpFetch => {
                self.require_idle_commands(&v)?;
                v.commands().download()?;
                "requested command list".to_string()
            }
            ConsoleCommand::WpFlush => {
                if v.commands().flush()? {
                    format!("uploading {} commands", v.commands().count())
                } else {
                    "no changes to upload".to_string()
                }
            }
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => String::new(),
        };
        Ok(out)
    }

    fn status(&self, v: &Vehicle) -> String {
        let s = v.snapshot();
        let mode = s.mode().map(|m| m.name).unwrap_or_else(|| "unknown".into());
        let loc = s.location().map(|l| l.to_string()).unwrap_or_else(|| "no position".into());
        let params = v.parameters();
        format!(
            "mode {mode} armed {} ekf_ok {}\n{loc}\nparams {}{}\ncommands {} (active {}){}\nscripts running {}",
            s.armed(),
            s.ekf_ok,
            params.len(),
            if params.is_valid() { "" } else { " (loading)" },
            v.commands().count(),
            s.active_index,
            if v.commands().is_dirty() { " unsaved edits" } else { "" },
            self.conn.scripts().running(),
        )
    }

    fn require_ready(&self, v: &Vehicle) -> anyhow::Result<()> {
        if !v.is_ready() {
            return Err(VehicleError::NotReady.into());
        }
        Ok(())
    }

    fn require_params(&self, v: &Vehicle) -> anyhow::Result<()> {
        if !v.parameters().is_valid() {
            bail!("parameters not loaded yet ({} received), try param fetch", v.parameters().len());
        }
        Ok(())
    }

    fn require_idle_commands(&self, v: &Vehicle) -> anyhow::Result<()> {
        if v.commands().is_fetching() {
            bail!("command download in progress");
        }
        Ok(())
    }
}

fn stamp(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

/// Drive a frame source on the runtime, feeding the dispatcher.
pub fn run_source<S: FrameSource + 'static>(src: S, tx: FrameTx) {
    tokio::spawn(async move {
        if let Err(e) = src.run(tx).await {
            log::error!("frame source stopped: {e}");
        }
    });
}

/// Stand-in transmitter: outbound frames are logged as JSON.
pub fn spawn_printer(rx: OutboundRx) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("tx-printer".into()).spawn(move || {
        for frame in rx {
            match serde_json::to_string(&frame) {
                Ok(json) => log::info!("tx {json}"),
                Err(e) => log::warn!("tx {}: {e}", frame.name()),
            }
        }
    })
}
