//! Wires the configured backend, the planner loop and (for the memory
//! backend) a simulated executor onto one tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use wayfinder_channel::{MemoryChannel, NavBus, RestChannel, SharedChannel};
use wayfinder_executor::{
    CommandExecutor, RoverSpec, SimDriveBase, SimLocation, SimProximity, SimRover,
};
use wayfinder_planner::{Planner, PlannerHandle};
use wayfinder_types::{Clock, GeoPoint, SystemClock};

use crate::config::{Backend, Config};

type Loops = (PlannerHandle, NavBus, watch::Sender<bool>, Vec<JoinHandle<()>>);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A running planner (and, in simulation, executor).
pub struct Session {
    runtime: Runtime,
    handle: PlannerHandle,
    bus: NavBus,
    backend: Backend,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Build the runtime and spawn the loops.
    pub fn start(cfg: &Config) -> Result<Self, String> {
        let runtime =
            Runtime::new().map_err(|e| format!("Failed to start async runtime: {}", e))?;
        let (handle, bus, shutdown, tasks) = {
            let _enter = runtime.enter();
            Self::spawn_loops(cfg)?
        };

        info!(backend = %cfg.backend, "session started");
        Ok(Self {
            runtime,
            handle,
            bus,
            backend: cfg.backend,
            shutdown,
            tasks,
        })
    }

    /// Must run inside the runtime context.
    fn spawn_loops(cfg: &Config) -> Result<Loops, String> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let bus = NavBus::default();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let store: Arc<dyn SharedChannel> = match cfg.backend {
            Backend::Memory => Arc::new(MemoryChannel::new(Arc::clone(&clock))),
            Backend::Rest => Arc::new(
                RestChannel::new(
                    cfg.channel_url.clone(),
                    cfg.auth(),
                    Duration::from_millis(cfg.planner.channel.timeout_ms),
                    Arc::clone(&clock),
                )
                .map_err(|e| format!("Failed to create REST channel client: {}", e))?,
            ),
        };

        if cfg.backend == Backend::Memory {
            let sim = cfg.simulation;
            let rover = SimRover::new(
                GeoPoint::new(sim.start_lat, sim.start_lng),
                sim.start_heading_deg,
                RoverSpec::default(),
                Arc::clone(&clock),
            );
            let executor = CommandExecutor::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                cfg.executor.clone(),
                bus.clone(),
                Box::new(SimDriveBase::new().with_rover(rover.clone())),
                Box::new(SimProximity::clear()),
            )
            .with_location(Box::new(SimLocation::new(rover)));
            tasks.push(executor.spawn(shutdown_rx.clone()));
            info!(start = %GeoPoint::new(sim.start_lat, sim.start_lng), "simulated rover attached");
        }

        let planner = Planner::new(store, clock, cfg.planner.clone(), bus.clone());
        let (handle, planner_task) = planner.spawn(shutdown_rx);
        tasks.push(planner_task);

        Ok((handle, bus, shutdown, tasks))
    }

    pub fn handle(&self) -> &PlannerHandle {
        &self.handle
    }

    pub fn bus(&self) -> &NavBus {
        &self.bus
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Run `fut` to completion on the session runtime.
    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Issue `stop`, then stop the loops.
    pub fn shutdown(self) {
        let Self {
            runtime,
            handle,
            shutdown,
            tasks,
            ..
        } = self;

        runtime.block_on(async {
            if let Err(e) = handle.stop_trip().await {
                warn!(error = %e, "stop on shutdown failed");
            }
            let _ = shutdown.send(true);
            for task in tasks {
                if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                    warn!("loop did not stop within the grace period");
                }
            }
        });
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
        info!("session stopped");
    }
}
