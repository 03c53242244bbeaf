//! Result selection and streamed artifact download.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use genjob_types::{NamedFallback, ResultPayload, ResultRef, ResultSelection};

use crate::error::{JobError, Result};

/// Default cap on a single artifact.
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// One artifact to download and where to put it.
#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub source: ResultRef,
    pub path: PathBuf,
}

/// A downloaded artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub url: String,
    pub label: Option<String>,
    pub duration: Option<f64>,
    pub bytes: u64,
}

/// Resolve which artifacts to download for `selection`.
///
/// `dest` is a file path for `First` and `Named`, and a directory for `All`.
pub fn select(
    payload: &ResultPayload,
    selection: &ResultSelection,
    dest: &Path,
) -> Result<Vec<Download>> {
    let refs = payload.refs();
    if refs.is_empty() {
        return Err(JobError::ResultFormat(
            "job succeeded but returned no output".into(),
        ));
    }

    match selection {
        ResultSelection::First => Ok(vec![Download {
            source: refs[0].clone(),
            path: dest.to_path_buf(),
        }]),
        ResultSelection::Named { name, fallback } => {
            let chosen = match payload {
                ResultPayload::Named(entries) => {
                    match entries.iter().find(|r| r.label.as_deref() == Some(name.as_str())) {
                        Some(found) => found,
                        None => match fallback {
                            NamedFallback::FirstAvailable => {
                                warn!(requested = %name, "Named output missing, using first available");
                                refs[0]
                            }
                            NamedFallback::None => {
                                let available: Vec<&str> =
                                    entries.iter().filter_map(|r| r.label.as_deref()).collect();
                                return Err(JobError::ResultFormat(format!(
                                    "output '{name}' not found; available: {}",
                                    available.join(", ")
                                )));
                            }
                        },
                    }
                }
                _ => refs[0],
            };
            Ok(vec![Download {
                source: chosen.clone(),
                path: dest.to_path_buf(),
            }])
        }
        ResultSelection::All => {
            let mut taken = HashSet::new();
            Ok(refs
                .iter()
                .enumerate()
                .map(|(i, r)| Download {
                    source: (*r).clone(),
                    path: dest.join(artifact_file_name(r, i + 1, &mut taken)),
                })
                .collect())
        }
    }
}

/// `<sanitized label or id><url extension>`, or `output-<n>` when unlabelled.
///
/// Names already in `taken` get a `-2`, `-3`, ... suffix on the stem.
fn artifact_file_name(r: &ResultRef, n: usize, taken: &mut HashSet<String>) -> String {
    let stem = r
        .label
        .as_deref()
        .or(r.id.as_deref())
        .map(sanitize_file_stem)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("output-{n}"));
    let ext = url_extension(&r.url);
    let join = |stem: &str| match &ext {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    };

    let mut name = join(&stem);
    let mut copy = 2;
    while taken.contains(&name) {
        name = join(&format!("{stem}-{copy}"));
        copy += 1;
    }
    taken.insert(name.clone());
    name
}

fn sanitize_file_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

fn url_extension(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Sibling of `path` that receives the bytes until the download completes.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

fn validate_download_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| JobError::ResultFormat(format!("invalid result URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(JobError::ResultFormat(format!(
            "unsupported result URL scheme '{other}'"
        ))),
    }
}

/// Streams result artifacts to local files.
#[derive(Debug, Clone)]
pub struct ResultFetcher {
    client: reqwest::Client,
    download_timeout: Duration,
    max_bytes: u64,
}

impl ResultFetcher {
    pub fn new(download_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .map_err(|e| JobError::Configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            download_timeout,
            max_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn download_timeout(&self) -> Duration {
        self.download_timeout
    }

    /// Select and download the requested artifacts.
    pub async fn fetch(
        &self,
        payload: &ResultPayload,
        selection: &ResultSelection,
        dest: &Path,
    ) -> Result<Vec<Artifact>> {
        let plan = select(payload, selection, dest)?;
        if matches!(selection, ResultSelection::All) {
            tokio::fs::create_dir_all(dest).await?;
        }

        let mut artifacts = Vec::with_capacity(plan.len());
        for download in plan {
            artifacts.push(self.download(download).await?);
        }
        Ok(artifacts)
    }

    async fn download(&self, download: Download) -> Result<Artifact> {
        let Download { source, path } = download;
        let url = validate_download_url(&source.url)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!(url = %url, path = %path.display(), "Downloading artifact");
        let part = partial_path(&path);
        let bytes = match self.stream_to_file(url, &part).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&part, &path).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e.into());
        }
        info!(path = %path.display(), bytes, "Saved artifact");

        Ok(Artifact {
            path,
            url: source.url,
            label: source.label,
            duration: source.duration,
            bytes,
        })
    }

    async fn stream_to_file(&self, url: Url, path: &Path) -> Result<u64> {
        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| JobError::from_reqwest("download", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(JobError::Transport(format!(
                "download failed with HTTP {}",
                status.as_u16()
            )));
        }
        if let Some(len) = resp.content_length().filter(|&len| len > self.max_bytes) {
            return Err(JobError::ResultFormat(format!(
                "artifact is {len} bytes, above the {} byte limit",
                self.max_bytes
            )));
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| JobError::from_reqwest("download", e))?
        {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(JobError::ResultFormat(format!(
                    "artifact exceeds the {} byte limit",
                    self.max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }
}
