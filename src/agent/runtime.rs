//! # Agent Runtime
//!
//! Runs the periodic decision loop and the inbound message handler.
//!
//! Both activities share one `AgentState` behind a single async mutex. The
//! decision loop polls the latest fix on a fixed period, independent of how
//! fast the receiver emits sentences. Inbound messages are handled one at a
//! time, each in its own task, so a panicking handler is contained without
//! reordering later messages.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::dispatcher::CommandDispatcher;
use super::engine::ReportEngine;
use super::state::SharedState;
use crate::gps::FixProvider;
use crate::transport::Transport;

/// The reporting core, ready to start
pub struct Agent {
    state: SharedState,
    engine: Arc<ReportEngine>,
    dispatcher: Arc<CommandDispatcher>,
    transport: Arc<dyn Transport>,
    fixes: Arc<dyn FixProvider>,
    fix_max_age: Duration,
    poll_interval: Duration,
}

/// Handle to a running agent
pub struct AgentHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    pub fn new(
        state: SharedState,
        engine: Arc<ReportEngine>,
        dispatcher: Arc<CommandDispatcher>,
        transport: Arc<dyn Transport>,
        fixes: Arc<dyn FixProvider>,
        fix_max_age: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state,
            engine,
            dispatcher,
            transport,
            fixes,
            fix_max_age,
            poll_interval,
        }
    }

    /// Spawn the decision loop and the inbound handler
    pub fn start(self) -> AgentHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let decision = tokio::spawn(decision_loop(
            self.state.clone(),
            self.engine.clone(),
            self.fixes.clone(),
            self.fix_max_age,
            self.poll_interval,
            shutdown_rx.clone(),
        ));

        let inbound = tokio::spawn(inbound_loop(
            self.transport.clone(),
            self.dispatcher.clone(),
            shutdown_rx,
        ));

        info!("Agent started (polling every {:?})", self.poll_interval);
        AgentHandle {
            shutdown,
            tasks: vec![decision, inbound],
        }
    }
}

impl AgentHandle {
    /// Receiver that flips when the agent is stopping, for collaborator tasks
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal shutdown and wait for both loops to finish
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Agent task ended abnormally: {}", e);
            }
        }
        info!("Agent stopped");
    }
}

async fn decision_loop(
    state: SharedState,
    engine: Arc<ReportEngine>,
    fixes: Arc<dyn FixProvider>,
    fix_max_age: Duration,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fix = fixes.cached(fix_max_age);
                let mut state = state.lock().await;
                match engine.consider(&mut state, fix).await {
                    Ok(decision) => debug!("Report decision: {:?}", decision),
                    Err(e) if e.is_expected() => debug!("Report skipped: {}", e),
                    Err(e) => warn!("Report failed: {}", e),
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("Decision loop stopped");
}

async fn inbound_loop(
    transport: Arc<dyn Transport>,
    dispatcher: Arc<CommandDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut inbound: mpsc::Receiver<Vec<u8>> = match transport.subscribe().await {
        Ok(inbound) => inbound,
        Err(e) => {
            error!("Transport connect failed, continuing without remote commands: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            message = inbound.recv() => {
                let Some(raw) = message else {
                    warn!("Inbound message channel closed");
                    break;
                };

                let dispatcher = dispatcher.clone();
                match tokio::spawn(async move { dispatcher.dispatch(&raw).await }).await {
                    Ok(outcome) => debug!("Dispatch outcome: {:?}", outcome),
                    Err(e) => error!("Command handler panicked: {}", e),
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("Inbound loop stopped");
}
