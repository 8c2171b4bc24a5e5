use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::ConverseError;
use crate::types::{ClientFrame, Code, ConverseRequest, ConverseResponse, RpcStatus, ServerFrame};

mod config;
mod consts;
mod credentials;
mod utils;

pub use config::{Config, ConfigBuilder};
pub use credentials::{CredentialProvider, StaticCredentials};

#[cfg(test)]
pub use credentials::MockCredentialProvider;

type ResponseTx = mpsc::Sender<Result<ConverseResponse, RpcStatus>>;
type ResponseRx = mpsc::Receiver<Result<ConverseResponse, RpcStatus>>;

/// Opens duplex converse calls. One call per turn attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<Call, ConverseError>;

    /// Per-call deadline configured for this transport, if any.
    fn deadline(&self) -> Option<Duration> {
        None
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn open(&self) -> Result<Call, ConverseError> {
        (**self).open().await
    }

    fn deadline(&self) -> Option<Duration> {
        (**self).deadline()
    }
}

/// Outbound half of a call. Dropping it half-closes the call.
pub struct Requests {
    tx: mpsc::Sender<ConverseRequest>,
}

impl Requests {
    pub async fn send(&self, request: ConverseRequest) -> Result<(), RpcStatus> {
        self.tx
            .send(request)
            .await
            .map_err(|_| RpcStatus::new(Code::Unavailable, "request stream closed"))
    }
}

/// Inbound half of a call.
pub struct Responses {
    rx: ResponseRx,
}

impl Responses {
    /// Next response, `Ok(None)` once the call ended with OK, or the call's failure status.
    pub async fn message(&mut self) -> Result<Option<ConverseResponse>, RpcStatus> {
        self.rx.recv().await.transpose()
    }
}

/// One open duplex call. Background tasks serving it are aborted when the call is dropped.
pub struct Call {
    requests: Requests,
    responses: Responses,
    guard: CallGuard,
}

/// Aborts the background tasks of a call when dropped.
pub struct CallGuard(Vec<JoinHandle<()>>);

impl Drop for CallGuard {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

impl Call {
    pub fn new(requests: mpsc::Sender<ConverseRequest>, responses: ResponseRx) -> Self {
        Self {
            requests: Requests { tx: requests },
            responses: Responses { rx: responses },
            guard: CallGuard(Vec::new()),
        }
    }

    fn with_tasks(mut self, tasks: Vec<JoinHandle<()>>) -> Self {
        self.guard = CallGuard(tasks);
        self
    }

    /// The returned guard keeps the call's background tasks alive.
    pub fn split(self) -> (Requests, Responses, CallGuard) {
        (self.requests, self.responses, self.guard)
    }
}

/// Converse calls over a WebSocket with JSON frames.
pub struct WsTransport {
    config: Config,
    credentials: Arc<dyn CredentialProvider>,
}

impl WsTransport {
    pub fn new(config: Config, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { config, credentials }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn deadline(&self) -> Option<Duration> {
        Some(self.config.deadline())
    }

    async fn open(&self) -> Result<Call, ConverseError> {
        let token = self.credentials.access_token()?;
        let request = utils::build_request(&self.config, &token)
            .map_err(|e| ConverseError::from(classify_ws_error(&e)))?;

        tracing::info!("Connecting to {}", self.config.endpoint());
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ConverseError::from(classify_ws_error(&e)))?;

        let (mut write, mut read) = ws_stream.split();
        let (c_tx, mut c_rx) = mpsc::channel::<ConverseRequest>(self.config.capacity());
        let (s_tx, s_rx) = mpsc::channel(self.config.capacity());

        let send_handle = tokio::spawn(async move {
            while let Some(request) = c_rx.recv().await {
                if !send_frame(&mut write, &ClientFrame::Request(request)).await {
                    return;
                }
            }
            // The session dropped its sender: no more requests on this call.
            send_frame(&mut write, &ClientFrame::HalfClose).await;
        });

        let recv_handle = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        forward(&s_tx, Err(classify_ws_error(&e))).await;
                        return;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Response(response)) => {
                            if !forward(&s_tx, Ok(response)).await {
                                return;
                            }
                        }
                        Ok(ServerFrame::Status(status)) => {
                            tracing::debug!("call finished with status {}", status);
                            if !status.code().is_ok() {
                                forward(&s_tx, Err(status)).await;
                            }
                            return;
                        }
                        Err(e) => {
                            tracing::error!("failed to deserialize frame: {}", e);
                            let status = RpcStatus::new(Code::Internal, &format!("undecodable frame: {e}"));
                            forward(&s_tx, Err(status)).await;
                            return;
                        }
                    },
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message: {} bytes", bin.len());
                    }
                    Message::Close(reason) => {
                        tracing::info!("connection closed: {:?}", reason);
                        if let Some(status) = close_status(reason.as_ref()) {
                            forward(&s_tx, Err(status)).await;
                        }
                        return;
                    }
                    _ => {}
                }
            }
            forward(&s_tx, Err(RpcStatus::new(Code::Unavailable, "connection lost"))).await;
        });

        Ok(Call::new(c_tx, s_rx).with_tasks(vec![send_handle, recv_handle]))
    }
}

/// Public function to connect with settings from the environment.
pub fn connect() -> WsTransport {
    let config = Config::new();
    let credentials = Arc::new(StaticCredentials::new(config.access_token().clone()));
    WsTransport::new(config, credentials)
}

async fn send_frame<S>(write: &mut S, frame: &ClientFrame) -> bool
where
    S: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match serde_json::to_string(frame) {
        Ok(text) => {
            if let Err(e) = write.send(Message::Text(text)).await {
                tracing::error!("failed to send message: {}", e);
                return false;
            }
            true
        }
        Err(e) => {
            tracing::error!("failed to serialize frame: {}", e);
            false
        }
    }
}

async fn forward(tx: &ResponseTx, item: Result<ConverseResponse, RpcStatus>) -> bool {
    if tx.send(item).await.is_err() {
        tracing::debug!("response receiver dropped");
        return false;
    }
    true
}

/// `None` for a clean close; otherwise the status the close stands for.
fn close_status(frame: Option<&CloseFrame<'_>>) -> Option<RpcStatus> {
    let frame = frame?;
    let code = match frame.code {
        CloseCode::Normal => return None,
        CloseCode::Away | CloseCode::Error | CloseCode::Restart | CloseCode::Again => Code::Unavailable,
        CloseCode::Policy => Code::PermissionDenied,
        _ => Code::Unknown,
    };
    Some(RpcStatus::new(code, &frame.reason))
}

fn classify_ws_error(error: &tungstenite::Error) -> RpcStatus {
    let code = match error {
        tungstenite::Error::Io(_)
        | tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed => Code::Unavailable,
        tungstenite::Error::Http(response) => match response.status().as_u16() {
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            429 => Code::ResourceExhausted,
            502..=504 => Code::Unavailable,
            _ => Code::Unknown,
        },
        tungstenite::Error::Url(_) | tungstenite::Error::HttpFormat(_) => Code::InvalidArgument,
        _ => Code::Internal,
    };
    RpcStatus::new(code, &error.to_string())
}
