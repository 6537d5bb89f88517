//! Service host: wires policy, executor and transport together and owns the
//! lifecycle of the accept loop.

use std::sync::Arc;

use anyhow::{Result, bail};
use luna_platform::Platform;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::BrokerConfig;
use crate::dispatcher::RequestDispatcher;
use crate::executor::OperationExecutor;
use crate::security::SecurityValidator;
use crate::transport::PipeServer;

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
    endpoint: String,
}

pub struct BrokerService {
    config: BrokerConfig,
    platform: Platform,
    running: Option<Running>,
}

impl BrokerService {
    pub fn new(config: BrokerConfig, platform: Platform) -> Self {
        Self {
            config,
            platform,
            running: None,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Endpoint the broker is listening on, once started.
    pub fn endpoint(&self) -> Option<&str> {
        self.running.as_ref().map(|running| running.endpoint.as_str())
    }

    /// Load the policy and start accepting connections in the background.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("Broker service is already running");
        }

        let policy_path = self.config.policy_path()?;
        let policy = self.config.load_policy()?;
        info!(
            path = %policy_path.display(),
            from_file = policy_path.exists(),
            "Security policy loaded"
        );

        let validator = Arc::new(SecurityValidator::new(Arc::new(policy)));
        let executor = Arc::new(OperationExecutor::new(
            self.platform.clone(),
            self.config.executor_options(),
        ));
        let mut dispatcher = RequestDispatcher::new(validator, executor);
        if let Some(guard) = self.config.replay_guard() {
            dispatcher = dispatcher.with_replay_guard(guard);
        }

        let transport = self.config.transport()?;
        let endpoint = transport.endpoint.clone();
        let server = PipeServer::new(transport, Arc::new(dispatcher));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let result = server.run(cancel).await;
                if let Err(err) = &result {
                    error!(error = %err, "Broker endpoint failed");
                }
                result
            }
        });

        info!(endpoint = %endpoint, "Broker service started");
        self.running = Some(Running {
            cancel,
            task,
            endpoint,
        });
        Ok(())
    }

    /// Signal shutdown and wait for the accept loop and open connections to drain.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.cancel.cancel();
        let result = match running.task.await {
            Ok(result) => result,
            Err(err) => Err(anyhow::anyhow!("Broker task failed: {err}")),
        };
        info!("Broker service stopped");
        result
    }

    /// Resolve when the accept loop exits on its own, e.g. after a bind failure.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };
        let result = match (&mut running.task).await {
            Ok(result) => result,
            Err(err) => Err(anyhow::anyhow!("Broker task failed: {err}")),
        };
        self.running = None;
        result
    }
}

impl Drop for BrokerService {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
