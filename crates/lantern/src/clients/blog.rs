//! Blog post fetching and parsing.
//!
//! Posts are plain HTML pages. Some hosts wrap the actual post in a
//! `mainFrame` iframe; when one is present the frame document is
//! fetched and parsed instead of the wrapper page.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use bytes::Bytes;
use lantern_core::emit;
use lantern_core::metrics::events::PageFetchCompleted;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use snafu::{ResultExt, ensure};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::error::{BlogError, EmptyPostSnafu, FetchSnafu, InvalidUrlSnafu, StatusSnafu};

use super::traits::{BlogClient, PostContent};

static FRAME_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("iframe#mainFrame, iframe[name=\"mainFrame\"]")
        .expect("frame selector must parse")
});

static OG_TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[property="og:title"]"#).expect("og:title selector must parse")
});

static H1_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("h1 selector must parse"));

static TITLE_TAG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector must parse"));

// Post body candidates, most specific first.
static CONTENT_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [".se-main-container", "#postViewArea", "article", "body"]
        .iter()
        .map(|s| Selector::parse(s).expect("content selector must parse"))
        .collect()
});

static IMG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("img selector must parse"));

/// HTTP implementation of [`BlogClient`].
pub struct HttpBlogClient {
    client: Client,
}

impl HttpBlogClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_page(&self, url: &str) -> Result<String, BlogError> {
        let started = Instant::now();
        let response = self.client.get(url).send().await.context(FetchSnafu { url })?;
        ensure!(
            response.status().is_success(),
            StatusSnafu {
                url,
                status: response.status(),
            }
        );
        let body = response.text().await.context(FetchSnafu { url })?;
        emit!(PageFetchCompleted {
            duration: started.elapsed(),
        });
        Ok(body)
    }
}

#[async_trait]
impl BlogClient for HttpBlogClient {
    async fn fetch_post(&self, url: &str) -> Result<PostContent, BlogError> {
        let html = self.fetch_page(url).await?;

        let html = match extract_frame_src(&html, url)? {
            Some(frame_url) => {
                debug!(frame = %frame_url, "Following content frame");
                self.fetch_page(&frame_url).await?
            }
            None => html,
        };

        parse_post(&html, url)
    }

    async fn fetch_image(&self, url: &str) -> Result<Bytes, BlogError> {
        let response = self.client.get(url).send().await.context(FetchSnafu { url })?;
        ensure!(
            response.status().is_success(),
            StatusSnafu {
                url,
                status: response.status(),
            }
        );
        response.bytes().await.context(FetchSnafu { url })
    }
}

/// Resolve the content frame URL, if the page has one.
fn extract_frame_src(html: &str, base_url: &str) -> Result<Option<String>, BlogError> {
    let document = Html::parse_document(html);
    let Some(frame) = document.select(&FRAME_SELECTOR).next() else {
        return Ok(None);
    };
    let Some(src) = frame.value().attr("src") else {
        return Ok(None);
    };

    let base = Url::parse(base_url).context(InvalidUrlSnafu { url: base_url })?;
    let resolved = base.join(src).context(InvalidUrlSnafu { url: src })?;
    Ok(Some(resolved.to_string()))
}

fn parse_post(html: &str, page_url: &str) -> Result<PostContent, BlogError> {
    let document = Html::parse_document(html);

    let title = extract_title(&document);
    let text = extract_text(&document);
    let image_urls = extract_image_urls(&document, page_url)?;

    ensure!(
        !(title.is_empty() && text.is_empty()),
        EmptyPostSnafu { url: page_url }
    );

    Ok(PostContent {
        title,
        text,
        image_urls,
    })
}

fn extract_title(document: &Html) -> String {
    if let Some(meta) = document.select(&OG_TITLE_SELECTOR).next()
        && let Some(content) = meta.value().attr("content")
    {
        let content = content.trim();
        if !content.is_empty() {
            return content.to_string();
        }
    }

    for selector in [&*H1_SELECTOR, &*TITLE_TAG_SELECTOR] {
        if let Some(element) = document.select(selector).next() {
            let text: String = element.text().collect();
            let text = text.trim();
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }

    String::new()
}

fn extract_text(document: &Html) -> String {
    for selector in CONTENT_SELECTORS.iter() {
        if let Some(element) = document.select(selector).next() {
            let text = collect_text(element);
            if !text.is_empty() {
                return text;
            }
        }
    }
    String::new()
}

fn collect_text(element: ElementRef) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Absolute image URLs in document order, deduplicated. Inline data
/// URIs and unresolvable references are skipped.
fn extract_image_urls(document: &Html, page_url: &str) -> Result<Vec<String>, BlogError> {
    let base = Url::parse(page_url).context(InvalidUrlSnafu { url: page_url })?;

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for img in document.select(&IMG_SELECTOR) {
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        if src.starts_with("data:") {
            continue;
        }
        let Ok(resolved) = base.join(src) else {
            continue;
        };
        let url = resolved.to_string();
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }

    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST_HTML: &str = r#"
        <html>
          <head>
            <meta property="og:title" content="Missing: Jane Doe" />
            <title>some blog</title>
          </head>
          <body>
            <div class="se-main-container">
              <p>Last seen near the station.</p>
              <p>Call 010-1234-5678</p>
              <img src="/images/poster.jpg" />
              <img src="https://cdn.example/poster2.png" />
              <img src="/images/poster.jpg" />
              <img src="data:image/gif;base64,AAAA" />
            </div>
          </body>
        </html>"#;

    #[test]
    fn parses_title_text_and_images() {
        let post = parse_post(POST_HTML, "https://blog.example/post/1").unwrap();

        assert_eq!(post.title, "Missing: Jane Doe");
        assert!(post.text.contains("Last seen near the station."));
        assert!(post.text.contains("Call 010-1234-5678"));
        assert_eq!(
            post.image_urls,
            vec![
                "https://blog.example/images/poster.jpg".to_string(),
                "https://cdn.example/poster2.png".to_string(),
            ]
        );
    }

    #[test]
    fn falls_back_to_the_title_tag() {
        let html = "<html><head><title>Sighting report</title></head>\
                    <body><article>Seen downtown.</article></body></html>";
        let post = parse_post(html, "https://blog.example/post/2").unwrap();
        assert_eq!(post.title, "Sighting report");
        assert_eq!(post.text, "Seen downtown.");
    }

    #[test]
    fn page_without_content_is_an_error() {
        let error = parse_post("<html><body></body></html>", "https://blog.example/p").unwrap_err();
        assert!(matches!(error, BlogError::EmptyPost { .. }));
    }

    #[test]
    fn frame_src_resolves_against_the_page_url() {
        let html = r#"<html><body>
            <iframe id="mainFrame" src="/PostView.naver?blogId=x&logNo=1"></iframe>
        </body></html>"#;

        let src = extract_frame_src(html, "https://blog.naver.com/x/1")
            .unwrap()
            .unwrap();
        assert_eq!(src, "https://blog.naver.com/PostView.naver?blogId=x&logNo=1");
    }

    #[test]
    fn page_without_frame_parses_in_place() {
        assert_eq!(
            extract_frame_src("<html><body></body></html>", "https://blog.example/p").unwrap(),
            None
        );
    }
}
