//! reqwest-backed [`ChatTransport`] for the NDJSON query endpoint.

use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};

use cs_domain::config::BackendConfig;
use cs_domain::error::{Error, Result};
use cs_domain::frame::QueryRequest;

use crate::transport::{ByteStream, ChatTransport};
use crate::util::from_reqwest;

const NDJSON: &str = "application/x-ndjson";

/// Status bodies longer than this are cut before they reach error text.
const MAX_STATUS_BODY: usize = 512;

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .user_agent(cfg.user_agent.clone());
        if let Some(ms) = cfg.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let client = builder.build().map_err(from_reqwest)?;

        Ok(Self {
            client,
            url: cfg.query_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, req: &QueryRequest) -> Result<ByteStream> {
        tracing::debug!(
            url = %self.url,
            has_session = req.session_id.is_some(),
            "opening query stream"
        );

        let resp = self
            .client
            .post(&self.url)
            .header(ACCEPT, HeaderValue::from_static(NDJSON))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(serde_json::to_vec(req)?)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_STATUS_BODY {
                let mut cut = MAX_STATUS_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body_stream(resp))
    }
}

fn body_stream(response: reqwest::Response) -> ByteStream {
    let stream = async_stream::stream! {
        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => yield Ok(bytes.to_vec()),
                Ok(None) => break,
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}
