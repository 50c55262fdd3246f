use anyhow::Result;
use reqwest::RequestBuilder;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Adds a bearer token when one is configured.
pub fn with_api_key(request: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

/// Streams a successful response body into `dest`, creating parent
/// directories. Returns the number of bytes written.
pub async fn save_body(response: reqwest::Response, dest: &Path) -> Result<u64> {
    if !response.status().is_success() {
        return Err(anyhow::anyhow!(
            "HTTP request failed with status: {}",
            response.status()
        ));
    }

    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir).await?;
    }

    let mut file = fs::File::create(dest).await?;
    let mut response = response;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    info!("Saved {} bytes to {}", written, dest.display());
    Ok(written)
}
