//! Script tasks: one std thread per script, cooperative cancellation.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::connection::ApiConnection;
use crate::error::ScriptError;
use crate::filter::RxFilter;
use crate::vehicle::Vehicle;

pub type ScriptId = u32;

#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `d`, waking early when cancelled. Returns false if cancelled.
    pub fn sleep(&self, d: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(20);
        let mut left = d;
        while !left.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let step = left.min(SLICE);
            thread::sleep(step);
            left -= step;
        }
        !self.is_cancelled()
    }
}

/// What a running script gets to work with.
pub struct ScriptContext {
    pub api: ApiConnection,
    /// Directory of the script, for loading files next to it
    pub local_path: PathBuf,
    pub arguments: Vec<String>,
    pub cancel: CancelToken,
}

impl ScriptContext {
    pub fn vehicle(&self) -> Arc<Vehicle> {
        self.api.vehicle()
    }

    /// True once the operator asked this script to stop.
    pub fn should_exit(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub type ScriptFn = Arc<dyn Fn(ScriptContext) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStatus {
    Running,
    Finished,
    Failed(String),
    Killed,
}

#[derive(Debug, Clone)]
pub struct ScriptInfo {
    pub id: ScriptId,
    pub description: String,
    pub status: ScriptStatus,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
}

/// Entry points by name, so an operator can start scripts from a console.
#[derive(Clone, Default)]
pub struct ScriptCatalog {
    scripts: BTreeMap<String, ScriptFn>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, f: impl Fn(ScriptContext) -> anyhow::Result<()> + Send + Sync + 'static) {
        self.scripts.insert(name.to_string(), Arc::new(f));
    }

    /// Exact name first, then the file stem of a path (`missions/survey.rs` -> `survey`).
    pub fn resolve(&self, path: &str) -> Option<ScriptFn> {
        self.scripts.get(path).or_else(|| {
            let stem = Path::new(path).file_stem()?.to_str()?;
            self.scripts.get(stem)
        }).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scripts.keys().map(String::as_str).collect()
    }
}

struct Task {
    info: ScriptInfo,
    cancel: CancelToken,
    done: Receiver<()>,
}

#[derive(Default)]
struct Registry {
    live: Mutex<BTreeMap<ScriptId, Task>>,
    history: Mutex<VecDeque<ScriptInfo>>,
}

impl Registry {
    fn finish(&self, id: ScriptId, status: ScriptStatus, history_len: usize) {
        let Some(task) = self.live.lock().remove(&id) else { return };
        let mut info = task.info;
        match &status {
            ScriptStatus::Finished => log::info!("{} exited", info.description),
            ScriptStatus::Killed => log::info!("{} stopped", info.description),
            ScriptStatus::Failed(msg) => log::error!("{} failed: {msg}", info.description),
            ScriptStatus::Running => {}
        }
        info.status = status;
        info.finished_at = Some(OffsetDateTime::now_utc());

        let mut history = self.history.lock();
        history.push_back(info);
        while history.len() > history_len {
            history.pop_front();
        }
    }
}

pub struct ScriptEngine {
    api: ApiConnection,
    filter: Option<Arc<RxFilter>>,
    history_len: usize,
    next_id: AtomicU32,
    registry: Arc<Registry>,
}

impl ScriptEngine {
    pub fn new(api: ApiConnection, filter: Option<Arc<RxFilter>>, history_len: usize) -> Self {
        Self {
            api,
            filter,
            history_len,
            next_id: AtomicU32::new(0),
            registry: Arc::new(Registry::default()),
        }
    }

    pub fn start(&self, entry: ScriptFn, description: &str, arguments: Vec<String>) -> Result<ScriptId, ScriptError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelToken::default();
        let suppression = match &self.filter {
            Some(f) => Some(f.acquire()),
            None => {
                log::warn!("no rx filter, {description} runs without suppression");
                None
            }
        };
        let ctx = ScriptContext {
            api: self.api.clone(),
            local_path: script_dir(description),
            arguments,
            cancel: cancel.clone(),
        };

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        // listed before the thread exists so a fast script can't finish unregistered
        self.registry.live.lock().insert(id, Task {
            info: ScriptInfo {
                id,
                description: description.to_string(),
                status: ScriptStatus::Running,
                started_at: OffsetDateTime::now_utc(),
                finished_at: None,
            },
            cancel: cancel.clone(),
            done: done_rx,
        });

        let registry = self.registry.clone();
        let history_len = self.history_len;
        let spawned = thread::Builder::new().name(format!("script-{id}")).spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry(ctx)));
            drop(suppression);
            let status = match outcome {
                _ if cancel.is_cancelled() => ScriptStatus::Killed,
                Ok(Ok(())) => ScriptStatus::Finished,
                Ok(Err(e)) => ScriptStatus::Failed(format!("{e:#}")),
                Err(payload) => ScriptStatus::Failed(panic_message(payload.as_ref())),
            };
            registry.finish(id, status, history_len);
            let _ = done_tx.send(());
        });

        if let Err(e) = spawned {
            self.registry.live.lock().remove(&id);
            return Err(ScriptError::Spawn(e));
        }
        log::info!("started {id}: {description}");
        Ok(id)
    }

    /// Ask a live script to stop. False if it already finished or never existed.
    pub fn kill(&self, id: ScriptId) -> bool {
        match self.registry.live.lock().get(&id) {
            Some(task) => {
                log::info!("asking {id}: {} to exit", task.info.description);
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop the most recently started live script.
    pub fn kill_latest(&self) -> Option<ScriptId> {
        let id = *self.registry.live.lock().keys().next_back()?;
        self.kill(id).then_some(id)
    }

    pub fn list(&self) -> Vec<ScriptInfo> {
        self.registry.live.lock().values().map(|t| t.info.clone()).collect()
    }

    pub fn history(&self) -> Vec<ScriptInfo> {
        self.registry.history.lock().iter().cloned().collect()
    }

    pub fn status(&self, id: ScriptId) -> Option<ScriptStatus> {
        if let Some(t) = self.registry.live.lock().get(&id) {
            return Some(t.info.status.clone());
        }
        self.registry.history.lock().iter().rev().find(|i| i.id == id).map(|i| i.status.clone())
    }

    pub fn running(&self) -> usize {
        self.registry.live.lock().len()
    }

    /// Signal every script and wait up to `grace` for each. Returns the ids still running.
    pub fn shutdown(&self, grace: Duration) -> Vec<ScriptId> {
        let waiting: Vec<(ScriptId, String, Receiver<()>)> = {
            let live = self.registry.live.lock();
            live.iter()
                .map(|(id, t)| {
                    t.cancel.cancel();
                    (*id, t.info.description.clone(), t.done.clone())
                })
                .collect()
        };

        let mut stuck = Vec::new();
        for (id, description, done) in waiting {
            if done.recv_timeout(grace).is_err() {
                log::warn!("timed out waiting for {id}: {description} to exit");
                stuck.push(id);
            }
        }
        stuck
    }
}

fn script_dir(description: &str) -> PathBuf {
    match Path::new(description).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleConfig;
    use crate::Connection;
    use link_core::mock::RecordingSink;
    use std::time::Instant;

    fn engine() -> (Connection, ScriptEngine) {
        let cfg = VehicleConfig { poll_interval_ms: 10, ..Default::default() };
        let conn = Connection::new(cfg, Arc::new(RecordingSink::new()));
        let engine = ScriptEngine::new(conn.api(), Some(conn.dispatcher().filter().clone()), 4);
        (conn, engine)
    }

    fn script(f: impl Fn(ScriptContext) -> anyhow::Result<()> + Send + Sync + 'static) -> ScriptFn {
        Arc::new(f)
    }

    fn wait_for(engine: &ScriptEngine, id: ScriptId) -> ScriptStatus {
        let t0 = Instant::now();
        loop {
            match engine.status(id) {
                Some(ScriptStatus::Running) if t0.elapsed() < Duration::from_secs(5) => {
                    thread::sleep(Duration::from_millis(5))
                }
                Some(s) => return s,
                None => panic!("unknown script {id}"),
            }
        }
    }

    #[test]
    fn kill_stops_a_polling_loop_quickly() {
        let (_conn, engine) = engine();
        let id = engine
            .start(script(|ctx| {
                while !ctx.should_exit() {
                    thread::sleep(Duration::from_millis(100));
                }
                Ok(())
            }), "loop.rs", vec![])
            .unwrap();
        thread::sleep(Duration::from_millis(50));

        let t0 = Instant::now();
        assert!(engine.kill(id));
        assert_eq!(wait_for(&engine, id), ScriptStatus::Killed);
        assert!(t0.elapsed() < Duration::from_millis(200));
        assert!(engine.list().is_empty());
        assert!(!engine.kill(id));
    }

    #[test]
    fn outcomes_are_recorded() {
        let (_conn, engine) = engine();
        let ok = engine.start(script(|_| Ok(())), "ok.rs", vec![]).unwrap();
        let err = engine.start(script(|_| anyhow::bail!("no gps")), "err.rs", vec![]).unwrap();
        let boom = engine.start(script(|_| panic!("bad index")), "boom.rs", vec![]).unwrap();

        assert_eq!(wait_for(&engine, ok), ScriptStatus::Finished);
        assert_eq!(wait_for(&engine, err), ScriptStatus::Failed("no gps".into()));
        assert_eq!(wait_for(&engine, boom), ScriptStatus::Failed("panicked: bad index".into()));
        assert!(engine.history().iter().all(|i| i.finished_at.is_some()));
        assert_eq!(engine.status(99), None);
    }

    #[test]
    fn ids_increase_and_latest_is_killed() {
        let (_conn, engine) = engine();
        let idle = script(|ctx| {
            ctx.cancel.sleep(Duration::from_secs(10));
            Ok(())
        });
        let a = engine.start(idle.clone(), "a", vec![]).unwrap();
        let b = engine.start(idle, "b", vec![]).unwrap();
        assert!(b > a);
        assert_eq!(engine.running(), 2);

        assert_eq!(engine.kill_latest(), Some(b));
        assert_eq!(wait_for(&engine, b), ScriptStatus::Killed);
        assert_eq!(engine.status(a), Some(ScriptStatus::Running));
        assert_eq!(engine.kill_latest(), Some(a));
        wait_for(&engine, a);
        assert_eq!(engine.kill_latest(), None);
    }

    #[test]
    fn suppression_follows_live_scripts() {
        let (conn, engine) = engine();
        let filter = conn.dispatcher().filter().clone();
        assert!(!filter.is_active());

        let id = engine.start(script(|ctx| {
            ctx.cancel.sleep(Duration::from_secs(10));
            Ok(())
        }), "hold", vec![]).unwrap();
        assert!(filter.is_active());
        engine.kill(id);
        wait_for(&engine, id);
        assert!(!filter.is_active());
    }

    #[test]
    fn runs_without_filter() {
        let (conn, _) = engine();
        let bare = ScriptEngine::new(conn.api(), None, 4);
        let id = bare.start(script(|ctx| {
            assert_eq!(ctx.arguments, vec!["--alt", "20"]);
            assert!(ctx.local_path.ends_with("missions"));
            Ok(())
        }), "missions/survey.rs", vec!["--alt".into(), "20".into()]).unwrap();
        assert_eq!(wait_for(&bare, id), ScriptStatus::Finished);
    }

    #[test]
    fn shutdown_reports_stuck_scripts() {
        let (_conn, engine) = engine();
        let polite = engine.start(script(|ctx| {
            ctx.cancel.sleep(Duration::from_secs(10));
            Ok(())
        }), "polite", vec![]).unwrap();
        let stubborn = engine.start(script(|_| {
            thread::sleep(Duration::from_millis(400));
            Ok(())
        }), "stubborn", vec![]).unwrap();

        let stuck = engine.shutdown(Duration::from_millis(100));
        assert_eq!(stuck, vec![stubborn]);
        assert_eq!(engine.status(polite), Some(ScriptStatus::Killed));
        // still finishes on its own later, recorded as killed
        assert_eq!(wait_for(&engine, stubborn), ScriptStatus::Killed);
    }

    #[test]
    fn history_is_bounded() {
        let (_conn, engine) = engine();
        for i in 0..6 {
            let id = engine.start(script(|_| Ok(())), &format!("s{i}"), vec![]).unwrap();
            wait_for(&engine, id);
        }
        let names: Vec<_> = engine.history().into_iter().map(|i| i.description).collect();
        assert_eq!(names, vec!["s2", "s3", "s4", "s5"]);
    }

    #[test]
    fn catalog_resolves_by_stem() {
        let mut catalog = ScriptCatalog::new();
        catalog.register("survey", |_| Ok(()));
        assert!(catalog.resolve("survey").is_some());
        assert!(catalog.resolve("missions/survey.rs").is_some());
        assert!(catalog.resolve("orbit").is_none());
        assert_eq!(catalog.names(), vec!["survey"]);
    }
}
