//! Text recognition over HTTP.

use async_trait::async_trait;
use lantern_core::emit;
use lantern_core::metrics::events::OcrRequestCompleted;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tokio::time::Instant;

use crate::error::{OcrError, RequestSnafu, ServiceStatusSnafu};

use super::traits::OcrClient;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeRequest<'a> {
    image_url: &'a str,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    text: String,
}

/// Client for a recognition service that accepts an image URL and
/// returns the text found in the image.
pub struct HttpOcrClient {
    client: Client,
    endpoint: String,
}

impl HttpOcrClient {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn recognize(&self, image_url: &str) -> Result<String, OcrError> {
        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RecognizeRequest { image_url })
            .send()
            .await
            .context(RequestSnafu)?;
        ensure!(
            response.status().is_success(),
            ServiceStatusSnafu {
                status: response.status(),
            }
        );
        let body: RecognizeResponse = response.json().await.context(RequestSnafu)?;
        emit!(OcrRequestCompleted {
            duration: started.elapsed(),
        });
        Ok(body.text)
    }
}
