//! Remote fetch into the warehouse
//!
//! A transfer goes `open_and_track` → `stream_to_local_file` → `publish`.
//! Bytes land in a uniquely named scratch file first and only become part of
//! the content tree through a rename, so a crash mid-transfer never leaves a
//! truncated file at a published path.

use crate::error::{IngestError, Result};
use crate::store::WarehouseStore;
use crate::warehouse::host_of;
use chrono::Utc;
use futures::TryStreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Readable body of an opened remote resource
pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;

pub struct OpenedResource {
    pub reader: RemoteReader,
    pub host_id: i64,
    pub submit_dir_id: i64,
}

impl std::fmt::Debug for OpenedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedResource")
            .field("host_id", &self.host_id)
            .field("submit_dir_id", &self.submit_dir_id)
            .finish_non_exhaustive()
    }
}

/// A completed copy waiting in the scratch area
#[derive(Debug, Clone)]
pub struct ScratchFile {
    pub path: PathBuf,
    pub size: u64,
    /// MD5 computed while copying
    pub content_hash: String,
}

#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    client: Client,
    store: WarehouseStore,
    scratch_dir: PathBuf,
    warehouse_root: PathBuf,
}

impl RemoteFetcher {
    pub fn new(
        store: WarehouseStore,
        warehouse_root: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(concat!("edw-submit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            store,
            scratch_dir: scratch_dir.into(),
            warehouse_root: warehouse_root.into(),
        })
    }

    pub fn warehouse_root(&self) -> &Path {
        &self.warehouse_root
    }

    /// Open `url` and record the attempt against its host and submit directory.
    ///
    /// The attempt is written to both health records before any failure is
    /// returned, so an unreachable endpoint still shows up in its counters.
    pub async fn open_and_track(&self, submit_dir: &str, file_name: &str, url: &str) -> Result<OpenedResource> {
        let now = Utc::now();
        let host = self.store.get_or_create_host(&host_of(url)?, now).await?;
        let dir = self.store.get_or_create_submit_dir(submit_dir, host.id, now).await?;

        let opened = self.open(url).await;
        let ok = opened.is_ok();

        self.store.record_host_open(host.id, ok, now).await?;
        self.store.record_dir_open(dir.id, ok, now).await?;

        match opened {
            Ok(reader) => {
                debug!(file = %file_name, url = %url, host = %host.name, "Opened remote file");
                Ok(OpenedResource {
                    reader,
                    host_id: host.id,
                    submit_dir_id: dir.id,
                })
            },
            Err(e) => {
                warn!(file = %file_name, url = %url, error = %e, "Failed to open remote file");
                Err(e)
            },
        }
    }

    async fn open(&self, url: &str) -> Result<RemoteReader> {
        let parsed =
            url::Url::parse(url).map_err(|e| IngestError::transport(url, format!("invalid URL: {}", e)))?;

        match parsed.scheme() {
            "http" | "https" => {
                let response = self
                    .client
                    .get(parsed)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| IngestError::transport(url, e))?;

                let body = response.bytes_stream().map_err(std::io::Error::other);
                Ok(Box::pin(StreamReader::new(body)))
            },
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| IngestError::transport(url, "not a local path"))?;
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| IngestError::transport(url, e))?;
                Ok(Box::pin(file))
            },
            other => Err(IngestError::transport(url, format!("unsupported scheme '{}'", other))),
        }
    }

    /// Copy the whole stream into a fresh scratch file, hashing as it goes.
    /// A failed copy leaves nothing behind.
    pub async fn stream_to_local_file(&self, mut reader: RemoteReader, url: &str) -> Result<ScratchFile> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let path = self.scratch_dir.join(format!("edw-{}.part", Uuid::new_v4()));

        let copied = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await?;

            let mut context = md5::Context::new();
            let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
            let mut size = 0u64;

            loop {
                let n = reader
                    .read(&mut buffer)
                    .await
                    .map_err(|e| IngestError::transport(url, e))?;
                if n == 0 {
                    break;
                }
                context.consume(&buffer[..n]);
                file.write_all(&buffer[..n]).await?;
                size += n as u64;
            }

            file.flush().await?;
            file.sync_all().await?;

            Ok::<_, IngestError>((size, format!("{:x}", context.compute())))
        }
        .await;

        match copied {
            Ok((size, content_hash)) => Ok(ScratchFile {
                path,
                size,
                content_hash,
            }),
            Err(e) => {
                remove_partial(&path).await;
                Err(e)
            },
        }
    }

    /// Move a finished scratch file to `relative_path` under the warehouse root.
    pub async fn publish(&self, temp_path: &Path, relative_path: &str) -> Result<PathBuf> {
        let final_path = self.warehouse_root.join(relative_path);
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::rename(temp_path, &final_path).await?;
        info!(path = %final_path.display(), "Published file");
        Ok(final_path)
    }
}

/// Best effort removal of a scratch or half-published file.
pub async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}
