//! Scripting API for a single MAVLink vehicle.
//!
//! A [`Connection`] owns the dispatcher thread that applies inbound frames to
//! the telemetry store, parameter table and command sequence, and the script
//! engine that runs user scripts against the [`Vehicle`] facade.

pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod modes;
mod outbox;
pub mod params;
pub mod scripts;
pub mod store;
pub mod vehicle;
pub mod wait;

pub use commands::CommandSequence;
pub use config::VehicleConfig;
pub use connection::{ApiConnection, Connection};
pub use dispatcher::{ekf_healthy, Dispatcher, EkfFlags};
pub use error::{DispatchError, ScriptError, VehicleError};
pub use filter::RxFilter;
pub use params::Parameters;
pub use scripts::{CancelToken, ScriptCatalog, ScriptContext, ScriptEngine, ScriptFn, ScriptId, ScriptInfo, ScriptStatus};
pub use store::{SubscriptionId, TelemetryState, TelemetryStore, Topic};
pub use vehicle::{MessageFactory, Vehicle};
pub use wait::{Poller, Shutdown};

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;
    use std::time::Duration;

    use link_core::{mock::RecordingSink, LinkTargets, Targets};

    use crate::outbox::Outbox;
    use crate::wait::{Poller, Shutdown};

    pub fn outbox() -> (Arc<RecordingSink>, Outbox) {
        let sink = Arc::new(RecordingSink::new());
        let outbox = Outbox::new(sink.clone(), Arc::new(LinkTargets::new(Targets::default())));
        (sink, outbox)
    }

    pub fn poller(interval: Duration) -> Poller {
        Poller::new(interval, Shutdown::new())
    }
}
