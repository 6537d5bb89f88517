use anyhow::{Context, Result, anyhow, bail};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};

use super::connect_stream;
use crate::models::{BrokerRequest, BrokerResponse};

trait BrokerStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> BrokerStream for T {}

/// Line-protocol client for a running broker.
pub struct BrokerClient {
    framed: Framed<Box<dyn BrokerStream>, LinesCodec>,
}

impl BrokerClient {
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let stream = connect_stream(endpoint)
            .await
            .context("Failed to connect to broker. Is it running?")?;
        Ok(Self::from_stream(stream))
    }

    /// Speak the protocol over an already connected stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let stream: Box<dyn BrokerStream> = Box::new(stream);
        // Responses are not length-capped: `file.read` returns whole files inline.
        Self {
            framed: Framed::new(stream, LinesCodec::new()),
        }
    }

    pub async fn request(&mut self, request: &BrokerRequest) -> Result<BrokerResponse> {
        let line = serde_json::to_string(request)?;
        self.framed.send(line).await?;
        let reply = self
            .framed
            .next()
            .await
            .ok_or_else(|| anyhow!("Broker closed the connection"))??;
        let response = serde_json::from_str(&reply).context("Invalid response from broker")?;
        Ok(response)
    }

    /// Send `operation` with a fresh request id.
    pub async fn call(&mut self, operation: &str, parameters: Option<Value>) -> Result<BrokerResponse> {
        self.request(&BrokerRequest::new(operation, parameters)).await
    }

    /// Like [`call`](Self::call), failing on an unsuccessful response.
    pub async fn call_typed<T: DeserializeOwned>(
        &mut self,
        operation: &str,
        parameters: Option<Value>,
    ) -> Result<T> {
        let response = self.call(operation, parameters).await?;
        if !response.success {
            bail!(
                "{}",
                response
                    .error_message
                    .unwrap_or_else(|| "Unknown broker error".to_string())
            );
        }
        let data = response.data.unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }

    /// End the session with an empty line.
    pub async fn close(mut self) -> Result<()> {
        self.framed.send(String::new()).await?;
        Ok(())
    }
}
