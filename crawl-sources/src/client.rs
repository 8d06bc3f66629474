use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use futures_util::StreamExt;
use reqwest::ClientBuilder;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crawl_sync::extension_from_url;

use crate::error::{FeedError, Result};

/// HTTP settings shared by every feed source
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Whole-request timeout for feed documents
    pub timeout: Duration,
    /// Whole-request timeout for asset downloads
    pub download_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Attempts per request, including the first
    pub max_attempts: u32,
    pub retry_initial_interval: Duration,
    /// Honour HTTP(S)_PROXY from the environment
    pub use_system_proxy: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("crawlavator/", env!("CARGO_PKG_VERSION")).to_string(),
            max_attempts: 3,
            retry_initial_interval: Duration::from_millis(500),
            use_system_proxy: true,
        }
    }
}

/// A file written by [`HttpClient::download_to`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub content_type: Option<String>,
}

/// reqwest client with retries for transient failures
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    options: HttpOptions,
}

impl HttpClient {
    pub fn new(options: HttpOptions) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .timeout(options.download_timeout.max(options.timeout))
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.clone());
        if !options.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    /// Fetch a document as text
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.send_with_retry(url, self.options.timeout).await?;
        Ok(response.text().await?)
    }

    /// Stream `url` into `<dir>/<stem>.<ext>` through a `.part` file.
    ///
    /// The extension comes from the URL path, then the content type, then
    /// `default_ext`.
    pub async fn download_to(&self, url: &str, dir: &Path, stem: &str, default_ext: &str) -> Result<DownloadedFile> {
        let response = self.send_with_retry(url, self.options.download_timeout).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let ext = extension_from_url(url)
            .or_else(|| content_type.as_deref().and_then(extension_from_content_type))
            .unwrap_or(default_ext);

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.{}", stem, ext));
        let part = dir.join(format!("{}.{}.part", stem, ext));

        match stream_to_file(response, &part).await {
            Ok(bytes) => {
                tokio::fs::rename(&part, &path).await?;
                debug!(url, path = %path.display(), bytes, "Download complete");
                Ok(DownloadedFile {
                    path,
                    bytes,
                    content_type,
                })
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                    debug!(path = %part.display(), error = %cleanup, "No partial file to clean up");
                }
                Err(e)
            }
        }
    }

    async fn send_with_retry(&self, url: &str, timeout: Duration) -> Result<reqwest::Response> {
        let parsed = Url::parse(url)?;
        let max_attempts = self.options.max_attempts.max(1);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.options.retry_initial_interval)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        backoff::future::retry(policy, || {
            attempt += 1;
            let this_attempt = attempt;
            let request = self.client.get(parsed.clone()).timeout(timeout);

            async move {
                let result = match request.send().await {
                    Ok(response) if response.status().is_success() => Ok(response),
                    Ok(response) => Err(FeedError::from_status(
                        response.status().as_u16(),
                        response.url().to_string(),
                    )),
                    Err(e) => Err(FeedError::Network(e)),
                };

                result.map_err(|e| {
                    if e.is_retryable() && this_attempt < max_attempts {
                        warn!(attempt = this_attempt, error = %e, "Request failed, retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" | "audio/aac" => Some("m4a"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/ogg" => Some("ogg"),
        "video/mp4" => Some("mp4"),
        "application/pdf" => Some("pdf"),
        _ => None,
    }
}
