//! Client session for the fee portal API.
//!
//! A [`PortalClient`] carries the base URL and the current bearer token; views
//! that need the network get it passed in explicitly. [`RemoteSubscription`] is
//! the `/ws` side of the same session.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::auth::AuthSession;
use crate::models::{PaymentRecord, PaymentUpdate, ServerEvent, StudentView};
use crate::payments::{PaymentReceipt, PaymentRequest};
use crate::rest::StudentEnvelope;
use crate::roster::{LiveRoster, UpdateStream};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The server answered with an error body.
    #[error("{message} ({kind}, HTTP {status})")]
    Api {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("Not logged in")]
    NotLoggedIn,
}

#[derive(Clone)]
pub struct PortalClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn logout(&mut self) {
        self.token = None;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/ws", base)
    }

    fn authed(&self, req: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self.token.as_deref().ok_or(ClientError::NotLoggedIn)?;
        Ok(req.bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ClientError> {
        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res.json().await?);
        }

        let body: serde_json::Value = res.json().await.unwrap_or_default();
        Err(ClientError::Api {
            status: status.as_u16(),
            kind: body["error"].as_str().unwrap_or("Unknown").to_string(),
            message: body["message"]
                .as_str()
                .or(status.canonical_reason())
                .unwrap_or("request failed")
                .to_string(),
        })
    }

    /// Registers and keeps the returned token for later calls.
    pub async fn register(&mut self, name: &str, email: &str, password: &str) -> Result<AuthSession, ClientError> {
        let req = self
            .http
            .post(self.url("/auth/register"))
            .json(&json!({ "name": name, "email": email, "password": password }));
        let session: AuthSession = Self::send(req).await?;
        self.token = Some(session.token.clone());
        Ok(session)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<AuthSession, ClientError> {
        let req = self
            .http
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }));
        let session: AuthSession = Self::send(req).await?;
        self.token = Some(session.token.clone());
        Ok(session)
    }

    pub async fn me(&self) -> Result<StudentView, ClientError> {
        let req = self.authed(self.http.get(self.url("/auth/me")))?;
        let envelope: StudentEnvelope = Self::send(req).await?;
        Ok(envelope.student)
    }

    pub async fn list_students(&self) -> Result<Vec<StudentView>, ClientError> {
        Self::send(self.http.get(self.url("/students"))).await
    }

    pub async fn update_profile(&self, name: Option<&str>, email: Option<&str>) -> Result<StudentView, ClientError> {
        let req = self
            .authed(self.http.put(self.url("/students/profile")))?
            .json(&json!({ "name": name, "email": email }));
        let envelope: StudentEnvelope = Self::send(req).await?;
        Ok(envelope.student)
    }

    pub async fn process_payment(&self, payment: &PaymentRequest) -> Result<PaymentReceipt, ClientError> {
        let req = self
            .authed(self.http.post(self.url("/payments/process")))?
            .json(payment);
        Self::send(req).await
    }

    pub async fn payment_history(&self) -> Result<Vec<PaymentRecord>, ClientError> {
        let req = self.authed(self.http.get(self.url("/payments/history")))?;
        Self::send(req).await
    }

    /// Opens the realtime channel. No authentication is required to listen.
    pub async fn subscribe(&self) -> Result<RemoteSubscription, ClientError> {
        let url = self.ws_url();
        let (stream, _) = connect_async(url.as_str()).await.map_err(Box::new)?;
        debug!(%url, "subscribed to payment updates");
        Ok(RemoteSubscription { stream: Some(stream) })
    }

    /// Subscribes first, then fetches, so no update between the two is lost.
    pub async fn open_roster(&self) -> Result<LiveRoster<RemoteSubscription>, ClientError> {
        let subscription = self.subscribe().await?;
        LiveRoster::activate(subscription, self.list_students()).await
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Payment updates received over `/ws`. Ends for good when the socket closes.
pub struct RemoteSubscription {
    stream: Option<Socket>,
}

impl RemoteSubscription {
    pub async fn next(&mut self) -> Option<PaymentUpdate> {
        loop {
            let stream = self.stream.as_mut()?;
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::PaymentUpdate(update)) => return Some(update),
                    Err(e) => warn!(error = %e, "ignoring unreadable frame"),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    self.stream = None;
                    return None;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    /// Sends a close frame before dropping the socket.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "close handshake failed");
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl UpdateStream for RemoteSubscription {
    async fn next_update(&mut self) -> Option<PaymentUpdate> {
        self.next().await
    }

    async fn close(&mut self) {
        self.disconnect().await;
    }
}
