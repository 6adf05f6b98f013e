//! Quality ladder derivation from HLS manifests
//!
//! Ladders are derived once per loaded source and cached in the
//! [`SessionRegistry`](crate::SessionRegistry) so that views attaching later
//! never re-fetch the manifest.

use crate::{error::Error, types::Quality, Result};
use async_trait::async_trait;
use bytes::Bytes;
use m3u8_rs::{MasterPlaylist, Playlist};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Fetches raw manifest bytes
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, headers: &HashMap<String, String>) -> Result<Bytes>;
}

/// HTTP manifest fetcher
pub struct HttpManifestFetcher {
    client: Client,
}

impl HttpManifestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    #[instrument(skip(self, headers))]
    async fn fetch(&self, url: &Url, headers: &HashMap<String, String>) -> Result<Bytes> {
        let mut request = self.client.get(url.clone());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ManifestFetch(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::ManifestFetch(format!(
                "{}: HTTP {}",
                url,
                response.status()
            )));
        }

        Ok(response.bytes().await?)
    }
}

/// Fetch a manifest and derive its quality ladder
#[instrument(skip(fetcher, headers))]
pub async fn derive_qualities(
    fetcher: &dyn ManifestFetcher,
    url: &Url,
    headers: &HashMap<String, String>,
) -> Result<Vec<Quality>> {
    let content = fetcher.fetch(url, headers).await?;
    let qualities = parse_qualities(&content, url)?;
    debug!(count = qualities.len(), "Quality ladder derived");
    Ok(qualities)
}

/// Parse manifest content into a ladder: `Auto` first, then variants by
/// ascending bandwidth. A media playlist yields only `Auto`.
pub fn parse_qualities(content: &[u8], base_url: &Url) -> Result<Vec<Quality>> {
    let playlist = m3u8_rs::parse_playlist_res(content)
        .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS playlist: {:?}", e)))?;

    let mut qualities = vec![Quality::auto(base_url.clone())];
    if let Playlist::MasterPlaylist(master) = playlist {
        qualities.extend(extract_variants(&master, base_url)?);
    }
    Ok(qualities)
}

fn extract_variants(master: &MasterPlaylist, base_url: &Url) -> Result<Vec<Quality>> {
    let mut variants: Vec<Quality> = Vec::new();

    for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
        let url = base_url
            .join(&variant.uri)
            .map_err(|e| Error::InvalidManifest(format!("Invalid URI '{}': {}", variant.uri, e)))?;

        if variants.iter().any(|q| q.url == url) {
            continue;
        }

        let width = variant.resolution.map(|r| r.width as u32);
        let height = variant.resolution.map(|r| r.height as u32);
        let bitrate = Some(variant.bandwidth);

        variants.push(Quality {
            label: Quality::label_for(height, bitrate),
            url,
            width,
            height,
            bitrate,
            is_auto: false,
        });
    }

    variants.sort_by_key(|q| q.bitrate.unwrap_or_default());
    Ok(variants)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
1080p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=854x480
480p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720
720p/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-TARGETDURATION:6
#EXTINF:6.0,
seg0.ts
#EXT-X-ENDLIST
";

    fn base() -> Url {
        Url::parse("https://cdn.example.com/show/master.m3u8").unwrap()
    }

    #[test]
    fn test_master_playlist_ladder() {
        let qualities = parse_qualities(MASTER.as_bytes(), &base()).unwrap();
        let labels: Vec<_> = qualities.iter().map(|q| q.label.as_str()).collect();
        assert_eq!(labels, vec!["Auto", "480p", "720p", "1080p"]);
        assert!(qualities[0].is_auto);
        assert_eq!(
            qualities[1].url.as_str(),
            "https://cdn.example.com/show/480p/index.m3u8"
        );
        assert_eq!(qualities[3].width, Some(1920));
    }

    #[test]
    fn test_media_playlist_only_auto() {
        let qualities = parse_qualities(MEDIA.as_bytes(), &base()).unwrap();
        assert_eq!(qualities.len(), 1);
        assert!(qualities[0].is_auto);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = parse_qualities(b"<html>not a playlist</html>", &base()).unwrap_err();
        assert_eq!(err.error_code(), "MANIFEST_PARSE");
    }
}
