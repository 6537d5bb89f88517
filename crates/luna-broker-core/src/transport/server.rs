use std::sync::Arc;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{RequestFrame, RequestLineCodec};
use super::{Listener, TransportConfig};
use crate::dispatcher::RequestDispatcher;
use crate::error::BrokerError;
use crate::models::BrokerResponse;
use crate::security::CallerIdentity;

/// Accept loop for the broker endpoint.
pub struct PipeServer {
    config: TransportConfig,
    dispatcher: Arc<RequestDispatcher>,
}

impl PipeServer {
    pub fn new(config: TransportConfig, dispatcher: Arc<RequestDispatcher>) -> Self {
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Serve until `cancel` fires, then wait for open connections to finish
    /// their current request.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut listener = Listener::bind(&self.config)?;
        info!(
            endpoint = %self.config.endpoint,
            max_connections = self.config.max_connections,
            "Broker endpoint listening"
        );

        let slots = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let mut connections = JoinSet::new();

        loop {
            // A slot is taken before the next endpoint instance exists, so
            // clients beyond the limit queue instead of being served.
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, caller)) => {
                    debug!(caller = %caller, "Client connected");
                    let dispatcher = self.dispatcher.clone();
                    let cancel = cancel.clone();
                    let max_line_bytes = self.config.max_line_bytes;
                    connections.spawn(async move {
                        let _permit = permit;
                        match serve_connection(stream, caller.clone(), &dispatcher, max_line_bytes, &cancel)
                            .await
                        {
                            Ok(()) => debug!(caller = %caller, "Client disconnected"),
                            Err(err) => warn!(caller = %caller, error = %err, "Connection closed with error"),
                        }
                    });
                }
                Err(err) => {
                    drop(permit);
                    error!(error = %err, "Broker accept error");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.accept_retry_delay) => {}
                    }
                }
            }

            while let Some(joined) = connections.try_join_next() {
                log_join(joined);
            }
        }

        info!(open_connections = connections.len(), "Broker endpoint shutting down");
        drop(listener);
        while let Some(joined) = connections.join_next().await {
            log_join(joined);
        }
        info!("Broker endpoint stopped");
        Ok(())
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined
        && err.is_panic()
    {
        error!(error = %err, "Connection task panicked");
    }
}

/// Run the request/response loop on one connected stream.
///
/// Requests are handled strictly one at a time: the next line is not read
/// until the previous response has been written. An empty line or end of
/// stream closes the connection. Cancellation is honoured between requests.
pub async fn serve_connection<S>(
    stream: S,
    caller: CallerIdentity,
    dispatcher: &RequestDispatcher,
    max_line_bytes: usize,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, RequestLineCodec::new(max_line_bytes));

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = framed.next() => next,
        };

        let response = match next {
            None => break,
            Some(Err(err)) => return Err(err.into()),
            Some(Ok(RequestFrame::Line(line))) if line.is_empty() => break,
            Some(Ok(RequestFrame::Line(line))) if line.trim().is_empty() => {
                BrokerResponse::from(BrokerError::Protocol("Empty request".to_string()))
            }
            Some(Ok(RequestFrame::Line(line))) => dispatcher.handle_line(&line, &caller).await,
            Some(Ok(RequestFrame::TooLong)) => {
                warn!(caller = %caller, max_line_bytes, "Request line too long");
                BrokerResponse::from(BrokerError::Protocol(format!(
                    "Request exceeds {max_line_bytes} bytes"
                )))
            }
            Some(Ok(RequestFrame::NotUtf8)) => {
                warn!(caller = %caller, "Request line is not UTF-8");
                BrokerResponse::from(BrokerError::Protocol(
                    "Request is not valid UTF-8".to_string(),
                ))
            }
        };

        let line = serde_json::to_string(&response)?;
        framed.send(line).await?;
    }

    Ok(())
}
