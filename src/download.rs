use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::process::Command;
use tokio_util::io::ReaderStream;

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::hls::Segment;

/// Segments in playlist order; failed ones are skipped.
pub fn concat_segments(
    fetcher: Arc<Fetcher>,
    key: String,
    segments: Vec<Segment>,
    concurrency: usize,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let total = segments.len();
    let failed: Arc<Mutex<Vec<usize>>> = Arc::default();
    let failed_in_body = failed.clone();

    let body = stream::iter(segments.into_iter().enumerate())
        .map(move |(index, segment)| {
            let fetcher = fetcher.clone();
            async move { (index, fetcher.fetch_bytes(&segment.uri).await) }
        })
        .buffered(concurrency.max(1))
        .filter_map(move |(index, result)| {
            let failed = failed_in_body.clone();
            async move {
                match result {
                    Ok(bytes) => {
                        debug!("Segment {}/{} ({} bytes)", index + 1, total, bytes.len());
                        Some(Ok(bytes))
                    }
                    Err(err) => {
                        warn!("Skipping segment {index}: {err}");
                        failed.lock().push(index);
                        None
                    }
                }
            }
        });

    let summary = stream::once(async move {
        let missing = failed.lock().clone();
        if missing.is_empty() {
            info!("Download of {key} finished: {total} segments");
        } else {
            warn!(
                "Download of {key} finished with {} of {total} segments missing: {missing:?}",
                missing.len()
            );
        }
        None
    })
    .filter_map(|item: Option<io::Result<Bytes>>| async move { item });

    body.chain(summary)
}

// The body stream owns the temporary directory.
pub struct RemuxedFile {
    pub size: u64,
    pub body: std::pin::Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
}

#[derive(Debug, Clone)]
pub struct Remuxer {
    ffmpeg: PathBuf,
}

impl Remuxer {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Remuxer { ffmpeg }
    }

    pub fn detect() -> Option<Self> {
        match which::which("ffmpeg") {
            Ok(path) => {
                info!("ffmpeg found at {}, HLS downloads will be remuxed to MP4", path.display());
                Some(Self::new(path))
            }
            Err(_) => {
                warn!("ffmpeg not found, HLS downloads will be served as MPEG-TS");
                None
            }
        }
    }

    pub async fn remux(
        &self,
        fetcher: &Fetcher,
        key: &str,
        segments: &[Segment],
    ) -> Result<RemuxedFile> {
        let workdir = tempfile::Builder::new()
            .prefix("embed-proxy-")
            .tempdir()
            .map_err(|err| Error::Download(format!("cannot create temporary directory: {err}")))?;

        let stored = store_segments(fetcher, key, segments, workdir.path()).await?;
        if stored.is_empty() {
            return Err(Error::Download(format!("no segment of {key} could be fetched")));
        }

        let list_path = workdir.path().join("list.txt");
        let list: String = stored
            .iter()
            .map(|path| format!("file '{}'\n", path.display()))
            .collect();
        tokio::fs::write(&list_path, list)
            .await
            .map_err(|err| Error::Download(format!("cannot write concat list: {err}")))?;

        let output = workdir.path().join("output.mp4");
        info!("Remuxing {} segments of {key} with ffmpeg", stored.len());
        let status = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-c", "copy", "-bsf:a", "aac_adtstoasc"])
            .arg(&output)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|err| Error::Download(format!("cannot run ffmpeg: {err}")))?;
        if !status.success() {
            return Err(Error::Download(format!("ffmpeg exited with {status}")));
        }

        let file = tokio::fs::File::open(&output)
            .await
            .map_err(|err| Error::Download(format!("remuxed file missing: {err}")))?;
        let size = file
            .metadata()
            .await
            .map_err(|err| Error::Download(err.to_string()))?
            .len();
        info!("Remuxed {key}: {:.1} MB", size as f64 / (1024.0 * 1024.0));

        let body = ReaderStream::with_capacity(file, 64 * 1024).map(move |chunk| {
            let _workdir = &workdir;
            chunk
        });

        Ok(RemuxedFile {
            size,
            body: Box::pin(body),
        })
    }
}

async fn store_segments(
    fetcher: &Fetcher,
    key: &str,
    segments: &[Segment],
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut stored = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        let bytes = match fetcher.fetch_bytes(&segment.uri).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Skipping segment {index} of {key}: {err}");
                continue;
            }
        };
        let path = dir.join(format!("segment_{index:05}.ts"));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| Error::Download(format!("cannot store segment {index}: {err}")))?;
        if index % 10 == 0 {
            debug!("Stored {}/{} segments of {key}", index + 1, segments.len());
        }
        stored.push(path);
    }
    Ok(stored)
}
