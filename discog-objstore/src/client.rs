use std::collections::HashMap;
use std::io;
use std::pin::Pin;

use async_compression::tokio::bufread::GzipDecoder;
use discog_types::{ContentHash, DumpVersion, EntityClass, RetryPolicy, retry};
use futures::TryStreamExt;
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::io::{AsyncRead, BufReader};
use tokio_util::io::StreamReader;

use crate::error::ObjectStoreError;
use crate::hashing_stream::HashingReader;
use crate::manifest::{DumpManifest, FileDescriptor};

#[derive(Debug, Deserialize)]
struct DirectoryIndex {
    versions: Vec<String>,
}

/// Client for the upstream object store.
///
/// The directory-listing format isn't standardized upstream, so this
/// implementation pins it to a JSON index at `{base_url}/data/index.json`
/// of shape `{"versions": [...]}`.
pub struct ObjectStoreClient {
    client: reqwest::Client,
    base_url: String,
    retry_policy: RetryPolicy,
}

impl ObjectStoreClient {
    pub fn new(base_url: impl Into<String>, retry_policy: RetryPolicy) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), retry_policy }
    }

    fn data_root(&self) -> String {
        format!("{}/data", self.base_url.trim_end_matches('/'))
    }

    /// Lists the dump root and returns the largest version tag with a
    /// checksum manifest present.
    pub async fn latest_version(&self) -> Result<DumpVersion, ObjectStoreError> {
        let url = format!("{}/index.json", self.data_root());
        debug!("event=list_versions url={url}");

        let text = retry(
            self.retry_policy,
            "list_versions",
            || async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(ObjectStoreError::UpstreamUnavailable)?
                    .error_for_status()
                    .map_err(ObjectStoreError::UpstreamUnavailable)?;
                response.text().await.map_err(ObjectStoreError::UpstreamUnavailable)
            },
            ObjectStoreError::is_retryable,
        )
        .await?;

        let index: DirectoryIndex =
            serde_json::from_str(&text).map_err(ObjectStoreError::ListingParseError)?;

        let mut versions = Vec::with_capacity(index.versions.len());
        for tag in index.versions {
            match DumpVersion::parse(&tag) {
                Ok(v) => versions.push(v),
                Err(err) => warn!("event=skip_malformed_version tag={tag:?} error={err}"),
            }
        }

        versions.into_iter().max().ok_or(ObjectStoreError::NoVersionsPublished)
    }

    /// Downloads and parses the checksum manifest for `version`.
    pub async fn verify_manifest(
        &self,
        version: DumpVersion,
    ) -> Result<HashMap<EntityClass, ContentHash>, ObjectStoreError> {
        let file_name = DumpManifest::checksum_file_name(version);
        let url = format!("{}/{version}/{file_name}", self.data_root());
        debug!("event=fetch_manifest url={url}");

        let text = retry(
            self.retry_policy,
            "fetch_manifest",
            || async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(ObjectStoreError::ManifestFetchError)?
                    .error_for_status()
                    .map_err(ObjectStoreError::ManifestFetchError)?;
                response.text().await.map_err(ObjectStoreError::ManifestFetchError)
            },
            ObjectStoreError::is_retryable,
        )
        .await?;

        let mut digests = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let (Some(hex_digest), Some(file_name)) = (parts.next(), parts.next()) else {
                return Err(ObjectStoreError::ManifestLineMalformed(line.to_string()));
            };
            let file_name = file_name.trim();

            let Some(class) = EntityClass::ALL
                .into_iter()
                .find(|c| file_name.contains(&format!("_{}s.xml.gz", c.as_str())))
            else {
                debug!("event=manifest_line_not_an_entity_file line={line:?}");
                continue;
            };

            let digest = discog_types::hash_from_hex(hex_digest)
                .map_err(|_| ObjectStoreError::ManifestLineMalformed(line.to_string()))?;
            digests.insert(class, digest);
        }

        for class in EntityClass::ALL {
            if !digests.contains_key(&class) {
                return Err(ObjectStoreError::ManifestMissingEntity(class));
            }
        }

        info!("event=manifest_verified version={version} files={}", digests.len());
        Ok(digests)
    }

    pub async fn manifest(&self, version: DumpVersion) -> Result<DumpManifest, ObjectStoreError> {
        let digests = self.verify_manifest(version).await?;
        let files = EntityClass::ALL.map(|class| FileDescriptor {
            entity_class: class,
            url: format!(
                "{}/{version}/{}",
                self.data_root(),
                DumpManifest::file_name(version, class)
            ),
            expected_sha256: digests[&class],
        });
        Ok(DumpManifest { version, files })
    }

    /// Opens `descriptor`'s compressed XML object, verifying its SHA-256
    /// incrementally as bytes arrive, and returns a lazy stream of the
    /// *decompressed* XML bytes.
    pub async fn fetch(
        &self,
        descriptor: &FileDescriptor,
    ) -> Result<Pin<Box<dyn AsyncRead + Send>>, ObjectStoreError> {
        debug!("event=fetch_begin url={}", descriptor.url);

        let response = retry(
            self.retry_policy,
            "fetch_begin",
            || async {
                let request = self
                    .client
                    .get(&descriptor.url)
                    .build()
                    .map_err(ObjectStoreError::RequestBuildError)?;

                self.client
                    .execute(request)
                    .await
                    .map_err(ObjectStoreError::RequestExecuteError)?
                    .error_for_status()
                    .map_err(ObjectStoreError::UpstreamStatusError)
            },
            ObjectStoreError::is_retryable,
        )
        .await?;

        let byte_stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let raw_reader = StreamReader::new(byte_stream);
        let hashing_reader = HashingReader::new(raw_reader, descriptor.expected_sha256);
        let gunzip = GzipDecoder::new(BufReader::new(hashing_reader));

        Ok(Box::pin(gunzip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_root_strips_trailing_slash() {
        let policy = RetryPolicy::new(1, std::time::Duration::from_millis(1), std::time::Duration::ZERO);
        let client = ObjectStoreClient::new("https://example.test/discogs/", policy);
        assert_eq!(client.data_root(), "https://example.test/discogs/data");
    }

    #[test]
    fn manifest_file_name_follows_upstream_convention() {
        let version = DumpVersion::parse("20240601").unwrap();
        assert_eq!(
            DumpManifest::file_name(version, EntityClass::Release),
            "discogs_20240601_releases.xml.gz"
        );
        assert_eq!(
            DumpManifest::checksum_file_name(version),
            "discogs_20240601_CHECKSUM.txt"
        );
    }
}
