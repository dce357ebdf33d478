//! Agent-Server Client
//!
//! Typed HTTP/SSE client for the agent-server wire protocol. The
//! agent-server itself is a black-box peer; this module only knows its
//! request/response shapes and how to turn its SSE frames into
//! `RunnerMessage`s.

mod translate;
mod types;

pub use translate::translate_event;
pub use types::*;

use eventsource_stream::Eventsource;
use futures_util::Stream;
use reqwest::Client;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::error::AgentServerError;

#[derive(Clone)]
pub struct AgentServerClient {
    http: Client,
    base_url: String,
}

impl AgentServerClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<(), AgentServerError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(map_transport_error)?;
        map_status(response).await.map(|_| ())
    }

    #[instrument(skip(self, config))]
    pub async fn create_session(
        &self,
        config: &crate::settings_manager::RunnerSettings,
    ) -> Result<SessionId, AgentServerError> {
        let response = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(config)
            .send()
            .await
            .map_err(map_transport_error)?;
        let value = map_status(response).await?;
        let id = value
            .get("id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AgentServerError::ApiError {
                status: 200,
                message: "session response missing id".to_string(),
                body: value.to_string(),
            })?;
        Ok(SessionId(id.to_string()))
    }

    #[instrument(skip(self, text))]
    pub async fn send_message(
        &self,
        session: &SessionId,
        provider_id: &str,
        model_id: &str,
        text: &str,
    ) -> Result<(), AgentServerError> {
        let response = self
            .http
            .post(format!("{}/session/{}/message", self.base_url, session.0))
            .json(&serde_json::json!({
                "model": { "providerID": provider_id, "modelID": model_id },
                "parts": [{ "type": "text", "text": text }],
            }))
            .send()
            .await
            .map_err(map_transport_error)?;
        map_status(response).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn close_session(&self, session: &SessionId) -> Result<(), AgentServerError> {
        let response = self
            .http
            .delete(format!("{}/session/{}", self.base_url, session.0))
            .send()
            .await
            .map_err(map_transport_error)?;
        map_status(response).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub fn events(
        &self,
        session: &SessionId,
    ) -> impl Stream<Item = Result<AgentServerEvent, AgentServerError>> {
        use eventsource_stream::{Event as SseEvent, EventStreamError};
        use futures_util::stream::{self, StreamExt};
        use std::pin::Pin;

        type Sse = Pin<
            Box<dyn Stream<Item = Result<SseEvent, EventStreamError<reqwest::Error>>> + Send>,
        >;

        enum State {
            Connecting { http: Client, url: String },
            Open(Sse),
            Done,
        }

        stream::unfold(
            State::Connecting {
                http: self.http.clone(),
                url: format!("{}/session/{}/events", self.base_url, session.0),
            },
            |state| async move {
                let mut sse = match state {
                    State::Done => return None,
                    State::Open(sse) => sse,
                    State::Connecting { http, url } => {
                        let response = match http.get(&url).send().await {
                            Ok(r) => r,
                            Err(e) => return Some((Err(map_transport_error(e)), State::Done)),
                        };
                        if !response.status().is_success() {
                            let err = match map_status(response).await {
                                Err(e) => e,
                                Ok(_) => AgentServerError::ApiTimeout,
                            };
                            return Some((Err(err), State::Done));
                        }
                        Box::pin(response.bytes_stream().eventsource())
                    }
                };

                loop {
                    match sse.next().await {
                        Some(Ok(event)) => {
                            if event.data.trim() == "[DONE]" {
                                return None;
                            }
                            match serde_json::from_str::<serde_json::Value>(&event.data) {
                                Ok(raw) => {
                                    let kind = raw
                                        .get("type")
                                        .and_then(serde_json::Value::as_str)
                                        .unwrap_or_default()
                                        .to_string();
                                    let properties = raw
                                        .get("properties")
                                        .cloned()
                                        .map(serde_json::from_value)
                                        .transpose();
                                    match properties {
                                        Ok(properties) => {
                                            return Some((
                                                Ok(AgentServerEvent {
                                                    kind,
                                                    properties: properties.unwrap_or_default(),
                                                    raw,
                                                }),
                                                State::Open(sse),
                                            ))
                                        }
                                        Err(e) => {
                                            warn!(error = %e, "failed to parse SSE frame properties");
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "failed to parse SSE frame body");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(AgentServerError::ApiConnectionFailed(e.to_string())),
                                State::Done,
                            ))
                        }
                        None => return None,
                    }
                }
            },
        )
    }
}

fn map_transport_error(error: reqwest::Error) -> AgentServerError {
    if error.is_timeout() {
        AgentServerError::ApiTimeout
    } else if error.is_connect() {
        AgentServerError::ApiConnectionFailed(error.to_string())
    } else {
        AgentServerError::ApiConnectionFailed(error.to_string())
    }
}

async fn map_status(response: reqwest::Response) -> Result<serde_json::Value, AgentServerError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| AgentServerError::ApiError {
                status: status.as_u16(),
                message: format!("failed to decode JSON body: {e}"),
                body: String::new(),
            });
    }

    if status.as_u16() == 404 {
        return Err(AgentServerError::NotFound);
    }
    if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
        return Err(AgentServerError::ApiTimeout);
    }

    let body_text = response.text().await.unwrap_or_default();
    let is_html = body_text.trim_start().starts_with("<!DOCTYPE")
        || body_text.trim_start().starts_with("<html")
        || body_text.trim_start().starts_with("<HTML");

    let body = if is_html {
        "(html error page omitted)".to_string()
    } else if body_text.len() > 2000 {
        format!("{}... (truncated)", &body_text[..2000])
    } else {
        body_text
    };

    Err(AgentServerError::ApiError {
        status: status.as_u16(),
        message: format!("agent-server returned {status}"),
        body,
    })
}
