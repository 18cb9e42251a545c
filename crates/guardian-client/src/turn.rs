//! HTTP side of a turn: POST the request, decode the SSE body, and feed
//! frames into a [`TurnAccumulator`].

use std::time::Duration;

use futures_util::StreamExt;
use guardian_protocol::{Frame, FrameDecoder, TurnRequest};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::consumer::{Applied, ConsumerState, TurnAccumulator, TurnResult};
use crate::error::{ClientError, Result};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: String,
}

/// Talks to one gateway as one caller.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    idle_timeout: Duration,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Longest gap between two body chunks before the turn is abandoned.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
    }

    /// Run one turn to its end.
    ///
    /// `acc` must already be open. `on_frame` sees every accepted frame
    /// after it was applied, so a UI can redraw from `acc`. Rejections
    /// before the stream opens come back as `Err`; everything after that
    /// ends in the returned result.
    pub async fn stream_turn<F>(
        &self,
        request: &TurnRequest,
        acc: &mut TurnAccumulator,
        mut on_frame: F,
    ) -> Result<TurnResult>
    where
        F: FnMut(&Frame, &TurnAccumulator),
    {
        if acc.state() != ConsumerState::Open {
            return Err(ClientError::NotOpen);
        }
        request.validate()?;

        let resp = self
            .request(reqwest::Method::POST, "/api/chat")
            .json(request)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let mut decoder = FrameDecoder::new();
        let mut body = resp.bytes_stream();

        loop {
            let next = match tokio::time::timeout(self.idle_timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let notice = format!(
                        "no response for {}s, the answer was cut short",
                        self.idle_timeout.as_secs()
                    );
                    return abandoned(acc, notice);
                }
            };

            let ended = next.is_none();
            let frames = match next {
                Some(Ok(chunk)) => decoder.push(&chunk),
                Some(Err(e)) => {
                    warn!(error = %e, "turn stream broke");
                    return abandoned(acc, "connection lost while answering");
                }
                None => decoder.finish(),
            };

            for frame in frames {
                match frame {
                    Ok(frame) => {
                        if acc.apply(frame.clone()) == Applied::Accepted {
                            on_frame(&frame, acc);
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping undecodable frame"),
                }
            }

            if let Some(result) = acc.result() {
                debug!(status = ?result.status, calls = result.function_calls, "turn ended");
                return Ok(result);
            }
            if ended {
                return abandoned(acc, "the answer ended unexpectedly");
            }
        }
    }
}

fn abandoned(acc: &mut TurnAccumulator, notice: impl Into<String>) -> Result<TurnResult> {
    acc.abandon(notice)
        .or_else(|| acc.result())
        .ok_or(ClientError::NotOpen)
}

/// Turn a non-2xx answer into [`ClientError::Rejected`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.code, body.error),
        Err(_) => (String::new(), text),
    };
    Err(ClientError::Rejected {
        status: status.as_u16(),
        code,
        message,
    })
}
