//! HTTP clients for the blog host and the recognition service.

use std::time::Duration;

use reqwest::Client;
use snafu::ResultExt;

use crate::error::{BlogError, ClientBuildSnafu};

mod blog;
mod ocr;
mod traits;

pub use blog::HttpBlogClient;
pub use ocr::HttpOcrClient;
pub use traits::{BlogClient, OcrClient, PostContent};

/// Some blog hosts reject requests without a browser user agent.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Build the shared HTTP client used by all outbound requests.
pub fn build_http_client(timeout: Duration) -> Result<Client, BlogError> {
    Client::builder()
        .user_agent(DESKTOP_USER_AGENT)
        .timeout(timeout)
        .build()
        .context(ClientBuildSnafu)
}
