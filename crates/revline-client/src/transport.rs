//! Network transports.
//!
//! [`SocketConnector`] opens the realtime channel, over WebSocket or over HTTP
//! long-polling, and [`GraphqlUnreadSource`] answers unread-count queries.
//! Both are thin: they move text between the network and the channels of a
//! [`TransportHandle`]; protocol logic stays in the sans-IO
//! [`Client`](crate::Client).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::{StatusCode, Url};
use revline_core::{AuthToken, PollError, SessionContext, TransportFailure, TransportKind};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};

use crate::{
    config::ServerSection,
    driver::{Connector, FRAME_CHANNEL_CAPACITY, TransportHandle, UnreadSource},
};

/// How long the server may hold a long-poll request open.
pub const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(35);

/// Suffix of the long-polling endpoint below the socket path.
const POLL_SUFFIX: &str = "/poll";

/// GraphQL query for the unread count.
const UNREAD_QUERY: &str = "query { unreadMessageCount }";

/// Opens the realtime channel against a server.
#[derive(Debug, Clone)]
pub struct SocketConnector {
    socket_url: Url,
    http: reqwest::Client,
}

impl SocketConnector {
    /// Connector for the server described by `server`.
    pub fn new(server: &ServerSection) -> Result<Self, TransportFailure> {
        let socket_url = join(&server.url, &server.socket_path)?;
        let http = reqwest::Client::builder()
            .timeout(LONG_POLL_TIMEOUT)
            .build()
            .map_err(|e| TransportFailure::Unreachable(format!("http client: {e}")))?;
        Ok(Self { socket_url, http })
    }

    async fn open_websocket(&self, token: &AuthToken) -> Result<TransportHandle, TransportFailure> {
        let mut url = self.socket_url.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| TransportFailure::Unreachable(format!("cannot use {scheme} for {url}")))?;
        url.query_pairs_mut().append_pair("token", token.expose());

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportFailure::Unreachable(format!("invalid request: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|_| TransportFailure::Unauthorized("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _response) = connect_async(request).await.map_err(websocket_failure)?;
        tracing::debug!(%url, "websocket open");

        let (to_server_tx, mut to_server_rx) = mpsc::channel::<String>(FRAME_CHANNEL_CAPACITY);
        let (from_server_tx, from_server_rx) = mpsc::channel::<String>(FRAME_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            let (mut sink, mut stream) = socket.split();
            loop {
                tokio::select! {
                    outgoing = to_server_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(error) = sink.send(Message::Text(text)).await {
                                tracing::warn!(%error, "websocket send failed");
                                break;
                            }
                        },
                        None => {
                            let _ = sink.close().await;
                            break;
                        },
                    },
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if from_server_tx.send(text).await.is_err() {
                                break;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        // Pings are answered by tungstenite; binary frames are not part of the protocol
                        Some(Ok(_)) => {},
                        Some(Err(error)) => {
                            tracing::warn!(%error, "websocket receive failed");
                            break;
                        },
                    },
                }
            }
        });

        Ok(TransportHandle::new(to_server_tx, from_server_rx, task.abort_handle()))
    }

    async fn open_polling(&self, token: &AuthToken) -> Result<TransportHandle, TransportFailure> {
        let mut url = self.socket_url.clone();
        url.set_path(&format!("{}{POLL_SUFFIX}", url.path().trim_end_matches('/')));

        // First poll doubles as the handshake
        let first = poll_once(&self.http, &url, token).await?;
        tracing::debug!(%url, "long-polling open");

        let (to_server_tx, to_server_rx) = mpsc::channel::<String>(FRAME_CHANNEL_CAPACITY);
        let (from_server_tx, from_server_rx) = mpsc::channel::<String>(FRAME_CHANNEL_CAPACITY);

        // Ends once the handle and its sender are dropped
        tokio::spawn(post_loop(self.http.clone(), url.clone(), token.clone(), to_server_rx));

        let http = self.http.clone();
        let token = token.clone();
        let task = tokio::spawn(async move {
            let mut batch = first;
            loop {
                for frame in batch {
                    if from_server_tx.send(frame).await.is_err() {
                        return;
                    }
                }
                batch = match poll_once(&http, &url, &token).await {
                    Ok(next) => next,
                    Err(failure) => {
                        tracing::warn!(%failure, "long-poll failed");
                        return;
                    },
                };
            }
        });

        Ok(TransportHandle::new(to_server_tx, from_server_rx, task.abort_handle()))
    }
}

#[async_trait]
impl Connector for SocketConnector {
    async fn open(
        &self,
        kind: TransportKind,
        token: &AuthToken,
    ) -> Result<TransportHandle, TransportFailure> {
        match kind {
            TransportKind::WebSocket => self.open_websocket(token).await,
            TransportKind::Polling => self.open_polling(token).await,
        }
    }
}

/// One long-poll round trip. Returns the envelopes the server had queued.
async fn poll_once(
    http: &reqwest::Client,
    url: &Url,
    token: &AuthToken,
) -> Result<Vec<String>, TransportFailure> {
    let response = http
        .get(url.clone())
        .bearer_auth(token.expose())
        .query(&[("token", token.expose())])
        .send()
        .await
        .map_err(request_failure)?;

    let status = response.status();
    if !status.is_success() {
        return Err(status_failure(status));
    }

    let envelopes: Vec<serde_json::Value> = response
        .json()
        .await
        .map_err(|e| TransportFailure::Closed(format!("invalid poll response: {e}")))?;
    Ok(envelopes.into_iter().map(|envelope| envelope.to_string()).collect())
}

async fn post_loop(
    http: reqwest::Client,
    url: Url,
    token: AuthToken,
    mut to_server: mpsc::Receiver<String>,
) {
    while let Some(text) = to_server.recv().await {
        let result = http
            .post(url.clone())
            .bearer_auth(token.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(text)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {},
            Ok(response) => tracing::warn!(status = %response.status(), "command rejected"),
            Err(error) => tracing::warn!(%error, "command post failed"),
        }
    }
}

fn websocket_failure(error: tungstenite::Error) -> TransportFailure {
    match error {
        tungstenite::Error::Http(response) => status_failure(response.status()),
        tungstenite::Error::Io(error) => TransportFailure::Unreachable(error.to_string()),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportFailure::Closed("closed during handshake".into())
        },
        other => TransportFailure::UpgradeRejected(other.to_string()),
    }
}

fn status_failure(status: StatusCode) -> TransportFailure {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportFailure::Unauthorized(format!("HTTP {status}"))
        },
        _ => TransportFailure::UpgradeRejected(format!("HTTP {status}")),
    }
}

fn request_failure(error: reqwest::Error) -> TransportFailure {
    if error.is_timeout() {
        TransportFailure::Timeout(LONG_POLL_TIMEOUT)
    } else {
        TransportFailure::Unreachable(error.to_string())
    }
}

fn join(base: &str, path: &str) -> Result<Url, TransportFailure> {
    let mut url =
        Url::parse(base).map_err(|e| TransportFailure::Unreachable(format!("invalid url {base}: {e}")))?;
    let joined = format!("{}/{}", url.path().trim_end_matches('/'), path.trim_start_matches('/'));
    url.set_path(&joined);
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<UnreadData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadData {
    unread_message_count: u64,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Unread count from the GraphQL API.
#[derive(Debug, Clone)]
pub struct GraphqlUnreadSource {
    endpoint: Url,
    http: reqwest::Client,
}

impl GraphqlUnreadSource {
    /// Source for the server described by `server`.
    pub fn new(server: &ServerSection) -> Result<Self, PollError> {
        let endpoint = join(&server.url, &server.graphql_path)
            .map_err(|failure| PollError::Request(failure.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PollError::Request(e.to_string()))?;
        Ok(Self { endpoint, http })
    }
}

#[async_trait]
impl UnreadSource for GraphqlUnreadSource {
    async fn fetch(&self, session: &SessionContext) -> Result<u64, PollError> {
        let mut request =
            self.http.post(self.endpoint.clone()).json(&serde_json::json!({ "query": UNREAD_QUERY }));
        if let Some(token) = &session.token {
            request = request.bearer_auth(token.expose());
        }

        let response = request.send().await.map_err(|e| PollError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        let body: GraphqlResponse =
            response.json().await.map_err(|e| PollError::InvalidResponse(e.to_string()))?;
        if let Some(error) = body.errors.into_iter().next() {
            return Err(PollError::InvalidResponse(error.message));
        }

        body.data
            .map(|data| data.unread_message_count)
            .ok_or_else(|| PollError::InvalidResponse("missing data".into()))
    }
}
