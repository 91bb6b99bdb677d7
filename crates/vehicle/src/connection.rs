use std::sync::Arc;
use std::thread::{self, JoinHandle};

use link_core::{FrameRx, FrameSink, LinkTargets, Targets};
use parking_lot::Mutex;

use crate::commands::CommandSequence;
use crate::config::VehicleConfig;
use crate::dispatcher::Dispatcher;
use crate::filter::RxFilter;
use crate::outbox::Outbox;
use crate::params::Parameters;
use crate::scripts::{ScriptEngine, ScriptId};
use crate::store::TelemetryStore;
use crate::vehicle::Vehicle;
use crate::wait::{Poller, Shutdown};

/// Handle scripts receive. There is exactly one vehicle per connection.
#[derive(Clone)]
pub struct ApiConnection {
    vehicle: Arc<Vehicle>,
}

impl ApiConnection {
    pub fn vehicles(&self) -> Vec<Arc<Vehicle>> {
        vec![self.vehicle.clone()]
    }

    pub fn vehicle(&self) -> Arc<Vehicle> {
        self.vehicle.clone()
    }
}

/// One link to one vehicle: state, dispatcher thread and script engine.
pub struct Connection {
    config: VehicleConfig,
    shutdown: Shutdown,
    outbox: Outbox,
    dispatcher: Arc<Dispatcher>,
    api: ApiConnection,
    scripts: ScriptEngine,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Wire everything up without a receive thread; frames go through `dispatcher().handle`.
    pub fn new(config: VehicleConfig, sink: Arc<dyn FrameSink>) -> Self {
        let shutdown = Shutdown::new();
        let poller = Poller::new(config.poll_interval(), shutdown.clone());
        let outbox = Outbox::new(sink, Arc::new(LinkTargets::new(config.targets())));

        let store = Arc::new(TelemetryStore::new());
        let params = Arc::new(Parameters::new(outbox.clone(), poller.clone()));
        let commands = Arc::new(CommandSequence::new(store.clone(), outbox.clone(), poller.clone()));
        let filter = Arc::new(RxFilter::new(config.suppress_while_scripting.iter().cloned()));
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), params.clone(), commands.clone(), filter.clone()));
        let vehicle = Arc::new(Vehicle::new(
            store,
            params,
            commands,
            dispatcher.clone(),
            outbox.clone(),
            poller,
            config.init_timeout(),
        ));
        let api = ApiConnection { vehicle };
        let scripts = ScriptEngine::new(api.clone(), Some(filter), config.script_history);

        Self { config, shutdown, outbox, dispatcher, api, scripts, worker: Mutex::new(None) }
    }

    /// `new` plus a dispatcher thread draining `rx`.
    pub fn start(config: VehicleConfig, sink: Arc<dyn FrameSink>, rx: FrameRx) -> std::io::Result<Self> {
        let conn = Self::new(config, sink);
        let dispatcher = conn.dispatcher.clone();
        let shutdown = conn.shutdown.clone();
        let poll = conn.config.poll_interval();
        let handle = thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || dispatcher.run(&rx, &shutdown, poll))?;
        *conn.worker.lock() = Some(handle);
        Ok(conn)
    }

    pub fn config(&self) -> &VehicleConfig {
        &self.config
    }

    pub fn api(&self) -> ApiConnection {
        self.api.clone()
    }

    pub fn vehicle(&self) -> Arc<Vehicle> {
        self.api.vehicle()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scripts(&self) -> &ScriptEngine {
        &self.scripts
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Retarget outbound frames, e.g. after the host learns the vehicle's sysid.
    pub fn set_targets(&self, t: Targets) {
        self.outbox.retarget(t);
    }

    /// Stop scripts and the dispatcher thread. Returns scripts that outlived the grace period.
    pub fn close(&self) -> Vec<ScriptId> {
        // wake waiters first so scripts blocked on convergence can see their cancel flag
        self.shutdown.trigger();
        let stuck = self.scripts.shutdown(self.config.script_grace());
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("dispatcher thread panicked");
            }
        }
        stuck
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
