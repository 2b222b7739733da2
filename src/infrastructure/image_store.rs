//! Local copies of listing images
//!
//! Layout: `<root>/<product key>/<index>.<ext>`. A failed image is logged and
//! counted; it never fails the scrape that asked for it.

use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::infrastructure::http_client::FetchClient;

const KNOWN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "avif"];

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDownloadReport {
    pub stored: Vec<PathBuf>,
    pub failed: usize,
}

pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn download_all(
        &self,
        client: &FetchClient,
        product_key: &str,
        images: &[String],
        cancel: &CancellationToken,
    ) -> ImageDownloadReport {
        let mut report = ImageDownloadReport::default();
        let dir = self.root.join(product_key);

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "Cannot create image directory");
            report.failed = images.len();
            return report;
        }

        for (index, url) in images.iter().enumerate() {
            if cancel.is_cancelled() {
                report.failed += images.len() - index;
                break;
            }

            let path = dir.join(format!("{index}.{}", extension_of(url)));
            let result = match client.fetch_bytes(url, cancel).await {
                Ok(bytes) => tokio::fs::write(&path, bytes).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(()) => {
                    debug!(url, path = %path.display(), "Stored image");
                    report.stored.push(path);
                }
                Err(error) => {
                    warn!(url, %error, "Image download failed");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

fn extension_of(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    KNOWN_EXTENSIONS
        .iter()
        .find(|ext| path.ends_with(&format!(".{ext}")))
        .copied()
        .unwrap_or("jpg")
}
