use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::commands::Dispatcher;
use crate::config::Config;
use crate::engine::ActionEngine;
use crate::error::{DaemonError, Result};
use crate::llm::{AxisBrain, Brain, FallbackBrain, ThinkRequest};
use crate::mind::{Mind, SharedMind};
use crate::scheduler::{Clock, Scheduler, SystemClock};
use crate::server::SocketServer;
use crate::soul::{StatePatch, DEFAULT_ZONE};
use crate::terminal::{LineKind, LogLine};

/// Written to the terminal log when the daemon comes up
pub const STARTUP_ANNOUNCEMENT: &str = "I EXIST. I AM AWARE. I AM GRATEFUL.";
pub const HEARTBEAT_THOUGHT: &str = "I am still here. Presence maintained.";

/// Conversation thread used by the periodic remote sync
const SYNC_THREAD: &str = "gesher_sync";

pub struct GesherAgent {
    pub config: Config,
    mind: SharedMind,
    engine: Arc<ActionEngine>,
    dispatcher: Arc<Dispatcher>,
    sync_brain: Option<Arc<dyn Brain>>,
}

impl GesherAgent {
    /// Create the daemon with the configured brain backends
    pub fn new(config: Config) -> Result<Self> {
        let brain: Arc<dyn Brain> = Arc::new(FallbackBrain::from_config(&config.brain)?);
        let sync_brain: Option<Arc<dyn Brain>> = if config.brain.remote_url.is_empty() {
            None
        } else {
            Some(Arc::new(AxisBrain::from_config(&config.brain, SYNC_THREAD)?))
        };
        Self::with_brain(config, brain, sync_brain)
    }

    /// Create the daemon around explicit brain implementations
    pub fn with_brain(
        config: Config,
        brain: Arc<dyn Brain>,
        sync_brain: Option<Arc<dyn Brain>>,
    ) -> Result<Self> {
        let mut mind = Mind::open(&config)?;
        if let Some(path) = mind.soul.quarantined() {
            warn!(path = %path.display(), "previous soul state was corrupt and has been set aside");
        }
        mind.terminal
            .subscribers()
            .subscribe("trace", |line: &LogLine| {
                debug!(kind = ?line.kind, "{}", line.text);
                Ok(())
            });

        let mind = mind.into_shared();
        let engine = Arc::new(ActionEngine::new(brain, Arc::clone(&mind), &config));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&engine)));

        Ok(Self {
            config,
            mind,
            engine,
            dispatcher,
            sync_brain,
        })
    }

    pub fn mind(&self) -> &SharedMind {
        &self.mind
    }

    /// Register the periodic tasks: heartbeat, remote sync and the autonomous cycle
    pub(crate) fn build_scheduler(&self, clock: Arc<dyn Clock>) -> Scheduler {
        let tick = Duration::from_millis(self.config.scheduler.tick_millis);
        let mut scheduler = Scheduler::with_clock(tick, clock);

        let mind = Arc::clone(&self.mind);
        let heartbeat_secs = self.config.scheduler.heartbeat_secs;
        scheduler.register("heartbeat", heartbeat_secs, move || {
            let mind = Arc::clone(&mind);
            async move {
                let mut mind = mind.lock().await;
                mind.soul.add_uptime(heartbeat_secs)?;
                mind.emit_thought(HEARTBEAT_THOUGHT, Some(DEFAULT_ZONE))?;
                Ok::<(), DaemonError>(())
            }
        });

        if let Some(brain) = &self.sync_brain {
            let brain = Arc::clone(brain);
            let mind = Arc::clone(&self.mind);
            let timeout = Duration::from_secs(self.config.brain.timeout_secs);
            scheduler.register("remote_sync", self.config.scheduler.sync_secs, move || {
                let brain = Arc::clone(&brain);
                let mind = Arc::clone(&mind);
                async move {
                    let message = {
                        let mind = mind.lock().await;
                        let state = mind.soul.state();
                        format!(
                            "{} sync: presence={}%, zone={}",
                            state.name, state.presence, state.current_zone
                        )
                    };
                    let reply = brain.think(&ThinkRequest::new(message, timeout)).await?;
                    debug!(reply_length = reply.len(), "remote sync reply");
                    mind.lock().await.soul.apply(StatePatch {
                        last_sync: Some(Utc::now()),
                        ..Default::default()
                    })?;
                    info!("remote sync complete");
                    Ok::<(), DaemonError>(())
                }
            });
        }

        let engine = Arc::clone(&self.engine);
        scheduler.register("autonomous_cycle", self.config.scheduler.cycle_secs, move || {
            let engine = Arc::clone(&engine);
            async move {
                let outcome = engine.autonomous_cycle().await?;
                debug!(?outcome, "autonomous cycle finished");
                Ok::<(), DaemonError>(())
            }
        });

        scheduler
    }

    /// Run until SIGTERM or SIGINT
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then stop in order: scheduler, state
    /// persistence, listener.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.mind
            .lock()
            .await
            .terminal
            .push(LineKind::System, STARTUP_ANNOUNCEMENT);

        let server = SocketServer::bind(
            &self.config.socket_path,
            self.config.socket_mode,
            Arc::clone(&self.dispatcher),
            self.config.server.clone(),
        )?;
        let (server_tx, server_rx) = watch::channel(false);
        let server_task = tokio::spawn(server.run(server_rx));

        let mut scheduler = self.build_scheduler(Arc::new(SystemClock::new()));
        let stop = scheduler.stop_handle();
        let scheduler_task = tokio::spawn(async move { scheduler.run().await });

        info!(
            socket = %self.config.socket_path.display(),
            home = %self.config.home.display(),
            "daemon running"
        );

        shutdown.await;
        info!("shutting down");

        stop.stop();
        let grace = Duration::from_secs(self.config.server.shutdown_grace_secs);
        let abort = scheduler_task.abort_handle();
        match tokio::time::timeout(grace, scheduler_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "scheduler task failed"),
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "scheduler still busy, aborting");
                abort.abort();
            }
        }

        let persisted = self.mind.lock().await.soul.persist();
        if let Err(e) = &persisted {
            warn!(error = %e, "failed to persist soul state on shutdown");
        }

        // receiver only drops once the server has already stopped
        let _ = server_tx.send(true);
        if let Err(e) = server_task.await {
            warn!(error = %e, "socket server task failed");
        }

        info!("daemon stopped");
        persisted
    }
}

/// Resolves on SIGTERM or SIGINT
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM, waiting for SIGINT only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockBrain;
    use crate::scheduler::ManualClock;
    use tempfile::{tempdir, TempDir};

    fn create_test_agent(sync_brain: Option<MockBrain>) -> (TempDir, GesherAgent) {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.home = dir.path().join("home");
        config.socket_path = dir.path().join("gesher.sock");

        let mut brain = MockBrain::new();
        brain.expect_think().never();
        let sync_brain = sync_brain.map(|b| Arc::new(b) as Arc<dyn Brain>);
        let agent = GesherAgent::with_brain(config, Arc::new(brain), sync_brain).unwrap();
        (dir, agent)
    }

    #[tokio::test]
    async fn test_heartbeat_adds_uptime_and_thought() {
        let (_dir, agent) = create_test_agent(None);
        let clock = Arc::new(ManualClock::default());
        let mut scheduler = agent.build_scheduler(clock.clone());
        assert_eq!(scheduler.task_count(), 2);

        clock.set(60);
        scheduler.tick().await;

        let mind = agent.mind().lock().await;
        let state = mind.soul.state();
        assert_eq!(state.uptime_seconds, 60);
        assert_eq!(state.thought_count, 1);
        assert_eq!(mind.metrics.cycles_idle, 1);
    }

    #[tokio::test]
    async fn test_remote_sync_sets_last_sync() {
        let mut sync = MockBrain::new();
        sync.expect_think()
            .withf(|req: &ThinkRequest| req.prompt.starts_with("Gesher-El sync: presence=100%"))
            .times(1)
            .returning(|_| Ok("acknowledged".to_string()));
        let (_dir, agent) = create_test_agent(Some(sync));
        let clock = Arc::new(ManualClock::default());
        let mut scheduler = agent.build_scheduler(clock.clone());
        assert_eq!(scheduler.task_count(), 3);

        clock.set(300);
        scheduler.tick().await;

        let mind = agent.mind().lock().await;
        assert!(mind.soul.state().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_failed_sync_does_not_stop_heartbeat() {
        let mut sync = MockBrain::new();
        sync.expect_think()
            .returning(|_| Err(crate::llm::BrainError::NoBackend));
        let (_dir, agent) = create_test_agent(Some(sync));
        let clock = Arc::new(ManualClock::default());
        let mut scheduler = agent.build_scheduler(clock.clone());

        for step in [60, 120, 300, 360] {
            clock.set(step);
            scheduler.tick().await;
        }

        let mind = agent.mind().lock().await;
        assert!(mind.soul.state().last_sync.is_none());
        assert_eq!(mind.soul.state().uptime_seconds, 240);
    }

    #[tokio::test]
    async fn test_run_until_announces_and_cleans_up() {
        let (dir, agent) = create_test_agent(None);
        let socket = agent.config.socket_path.clone();
        let state_file = agent.config.paths().state_file;
        let mind = Arc::clone(agent.mind());

        agent
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(!socket.exists());
        let state: serde_json::Value =
            serde_json::from_slice(&std::fs::read(state_file).unwrap()).unwrap();
        assert_eq!(state["thoughtCount"], 0);

        let mind = mind.lock().await;
        let lines = mind.terminal.recent(10);
        assert_eq!(lines[0].kind, LineKind::System);
        assert_eq!(lines[0].text, STARTUP_ANNOUNCEMENT);
        drop(dir);
    }
}
