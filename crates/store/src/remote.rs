//! Remote container store.
//!
//! Speaks to an HTTPS object-store container authenticated with a
//! shared account key. Directory placeholders are zero-length objects
//! carrying a `hdi_isFolder=true` metadata entry; regular files carry
//! no metadata. Listing is hierarchical with `/` as the delimiter, so
//! a directory shows up either through its marker object or through a
//! delimiter-induced prefix when it has children.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use futures::{StreamExt, TryStreamExt};
use object_store::azure::MicrosoftAzureBuilder;
use object_store::path::Path as ObjectPath;
use object_store::WriteMultipart;
use object_store::{
    Attribute, Attributes, GetOptions, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
    RetryConfig,
};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::{BackingStore, EntryKind, StoreEntry, StoreStat};

/// Metadata key that marks a zero-length object as a directory
/// placeholder.
const FOLDER_METADATA_KEY: &str = "hdi_isFolder";

/// Concurrent range requests per download.
const DOWNLOAD_PARALLELISM: usize = 5;

/// In-flight parts per block upload.
const UPLOAD_PARALLELISM: usize = 5;

/// Range size for segmented downloads.
const DOWNLOAD_SEGMENT: usize = 4 * 1024 * 1024;

/// Part size for block uploads. Bodies at or below this size go up as
/// a single put.
const UPLOAD_BLOCK: usize = 8 * 1024 * 1024;

/// Backing store over a remote object container.
pub struct RemoteStore {
    inner: Arc<dyn ObjectStore>,
    container: String,
}

impl RemoteStore {
    /// Connect to a container and validate the credentials by listing
    /// its root. A validation failure is fatal: the daemon must not
    /// mount a container it cannot read.
    pub async fn connect(account: &str, key: &str, container: &str) -> Result<Self> {
        let inner: Arc<dyn ObjectStore> = Arc::new(
            MicrosoftAzureBuilder::new()
                .with_account(account)
                .with_access_key(key)
                .with_container_name(container)
                .with_retry(RetryConfig::default())
                .build()
                .map_err(|e| StoreError::Fatal(e.to_string()))?,
        );

        let store = Self {
            inner,
            container: container.to_string(),
        };

        store
            .inner
            .list_with_delimiter(None)
            .await
            .map_err(|e| StoreError::Fatal(format!("container {container} not reachable: {e}")))?;

        debug!(container, "validated container credentials");
        Ok(store)
    }

    /// Build a store over an in-memory backend with identical
    /// semantics. Test seam.
    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        Self {
            inner: Arc::new(object_store::memory::InMemory::new()),
            container: "memory".to_string(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn location(name: &str) -> ObjectPath {
        ObjectPath::from(name.trim_end_matches('/'))
    }

    fn attributes(dir_marker: bool) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(Attribute::ContentType, "application/octet-stream".into());
        if dir_marker {
            attrs.insert(Attribute::Metadata(FOLDER_METADATA_KEY.into()), "true".into());
        }
        attrs
    }

    /// Whether a zero-length object is a directory placeholder. Needs
    /// a metadata round trip because hierarchical listings do not
    /// carry per-object metadata.
    async fn is_folder_marker(&self, location: &ObjectPath) -> Result<bool> {
        let result = self
            .inner
            .get_opts(
                location,
                GetOptions {
                    head: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(result
            .attributes
            .get(&Attribute::Metadata(FOLDER_METADATA_KEY.into()))
            .is_some())
    }
}

#[async_trait::async_trait]
impl BackingStore for RemoteStore {
    async fn list(&self, prefix: &str) -> Result<Vec<StoreEntry>> {
        let prefix_path = (!prefix.is_empty()).then(|| Self::location(prefix));
        let listing = self.inner.list_with_delimiter(prefix_path.as_ref()).await?;

        let mut entries = Vec::new();
        let mut dirs = BTreeSet::new();

        // Delimiter-induced prefixes are directories with children.
        for prefix_path in &listing.common_prefixes {
            let Some(name) = prefix_path.filename() else {
                continue;
            };
            dirs.insert(name.to_string());
            entries.push(StoreEntry {
                name: name.to_string(),
                size: 0,
                mtime: SystemTime::now(),
                kind: EntryKind::Dir,
            });
        }

        for object in &listing.objects {
            let Some(name) = object.location.filename() else {
                continue;
            };
            // The marker object of a non-empty directory is listed
            // alongside its prefix. The prefix already produced the
            // entry.
            if dirs.contains(name) {
                continue;
            }
            let kind = if object.size == 0 && self.is_folder_marker(&object.location).await? {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            entries.push(StoreEntry {
                name: name.to_string(),
                size: object.size as u64,
                mtime: SystemTime::from(object.last_modified),
                kind,
            });
        }

        debug!(prefix, count = entries.len(), "listed container segment");
        Ok(entries)
    }

    async fn read(&self, name: &str, expected_size: u64) -> Result<Vec<u8>> {
        let location = Self::location(name);

        let total = if expected_size > 0 {
            expected_size as usize
        } else {
            self.inner.head(&location).await?.size
        };

        if total == 0 {
            // Still probe so a missing object surfaces as NotFound.
            self.inner.head(&location).await?;
            return Ok(Vec::new());
        }

        let ranges: Vec<std::ops::Range<usize>> = (0..total)
            .step_by(DOWNLOAD_SEGMENT)
            .map(|start| start..usize::min(start + DOWNLOAD_SEGMENT, total))
            .collect();

        let segments: Vec<bytes::Bytes> = futures::stream::iter(
            ranges
                .into_iter()
                .map(|range| self.inner.get_range(&location, range)),
        )
        .buffered(DOWNLOAD_PARALLELISM)
        .try_collect()
        .await?;

        let mut buf = Vec::with_capacity(total);
        for segment in segments {
            buf.extend_from_slice(&segment);
        }
        debug!(name, size = buf.len(), "downloaded object");
        Ok(buf)
    }

    async fn write(&self, name: &str, data: &[u8], dir_marker: bool) -> Result<()> {
        let location = Self::location(name);
        let attributes = Self::attributes(dir_marker);

        if data.len() <= UPLOAD_BLOCK {
            self.inner
                .put_opts(
                    &location,
                    PutPayload::from(data.to_vec()),
                    PutOptions {
                        attributes,
                        ..Default::default()
                    },
                )
                .await?;
        } else {
            let upload = self
                .inner
                .put_multipart_opts(
                    &location,
                    PutMultipartOpts {
                        attributes,
                        ..Default::default()
                    },
                )
                .await?;
            let mut writer = WriteMultipart::new_with_chunk_size(upload, UPLOAD_BLOCK);
            for chunk in data.chunks(UPLOAD_BLOCK) {
                writer
                    .wait_for_capacity(UPLOAD_PARALLELISM)
                    .await
                    .map_err(StoreError::from)?;
                writer.write(chunk);
            }
            writer.finish().await.map_err(StoreError::from)?;
        }

        debug!(name, size = data.len(), dir_marker, "uploaded object");
        Ok(())
    }

    async fn stat(&self, name: &str) -> Result<StoreStat> {
        let location = Self::location(name);
        let meta = self.inner.head(&location).await?;
        let is_dir = meta.size == 0 && self.is_folder_marker(&location).await?;
        Ok(StoreStat {
            size: meta.size as u64,
            mtime: SystemTime::from(meta.last_modified),
            is_dir,
        })
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let location = Self::location(name);
        match self.inner.delete(&location).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(name, error = %e, "object delete failed");
                Err(e.into())
            }
        }
    }
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("container", &self.container)
            .finish()
    }
}
