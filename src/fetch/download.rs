// src/fetch/download.rs

use futures_util::StreamExt;
use reqwest::{header::CONTENT_TYPE, Client};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs, io::AsyncWriteExt, io::BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::error::{AttemptError, CandidateFailure, FetchError};
use super::sources::FetchTarget;
use super::validate::{self, Classification};

/// Minimum number of body bytes buffered before the content is judged.
pub const SNIFF_LEN: usize = 512;

const PREVIEW_LEN: usize = 200;

/// Knobs for building a [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub connect_timeout: Duration,
    pub max_time: Duration,
    pub user_agent: String,
    pub bypass_env_proxy: bool,
    /// Where sniffed bytes of rejected candidates are kept, if anywhere.
    pub rejected_dir: Option<PathBuf>,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            max_time: Duration::from_secs(300),
            user_agent: concat!("markscraper/", env!("CARGO_PKG_VERSION")).to_string(),
            bypass_env_proxy: true,
            rejected_dir: None,
        }
    }
}

/// Where a returned artifact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOrigin {
    /// A non-empty file was already at the destination; no request was made.
    Existing,
    Remote(Url),
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub path: PathBuf,
    pub origin: FetchOrigin,
    pub size_bytes: u64,
}

impl FetchResult {
    pub fn source_used(&self) -> Option<&Url> {
        match &self.origin {
            FetchOrigin::Existing => None,
            FetchOrigin::Remote(u) => Some(u),
        }
    }
}

/// Downloads one archive per target from the first candidate that yields
/// real archive bytes.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    rejected_dir: Option<PathBuf>,
}

impl Fetcher {
    pub fn new(opts: FetcherOptions) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .connect_timeout(opts.connect_timeout)
            .timeout(opts.max_time)
            .user_agent(opts.user_agent);
        if opts.bypass_env_proxy {
            builder = builder.no_proxy();
        }
        Ok(Self {
            client: builder.build()?,
            rejected_dir: opts.rejected_dir,
        })
    }

    /// Fetch `target` into `destination`.
    ///
    /// Candidates are tried in order and the first one whose body starts
    /// with the archive magic is committed; nothing after it is tried. The
    /// body is streamed to a temporary file next to `destination` and only
    /// renamed into place once complete, so `destination` never holds a
    /// partial download.
    #[instrument(level = "info", skip(self, target, destination), fields(id = %target.identifier))]
    pub async fn fetch(
        &self,
        target: &FetchTarget,
        destination: &Path,
    ) -> Result<FetchResult, FetchError> {
        if let Some(size) = existing_size(destination).await {
            info!(path = %destination.display(), bytes = size, "artifact exists; skipping download");
            return Ok(FetchResult {
                path: destination.to_path_buf(),
                origin: FetchOrigin::Existing,
                size_bytes: size,
            });
        }

        let dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .await
            .map_err(|e| FetchError::io(dir, e))?;

        let mut attempted = Vec::with_capacity(target.candidates.len());
        let mut last = None;

        for (idx, candidate) in target.candidates.iter().enumerate() {
            attempted.push(candidate.to_string());

            let url = match candidate.url() {
                Ok(u) => u,
                Err(_) => {
                    let failure = CandidateFailure::InvalidUrl {
                        url: candidate.to_string(),
                    };
                    warn!(candidate = %candidate, "skipping unparsable source");
                    last = Some(failure);
                    continue;
                }
            };

            debug!(%url, attempt = idx + 1, "trying source");
            match self.attempt(target, idx, &url, dir, destination).await {
                Ok(result) => {
                    info!(%url, bytes = result.size_bytes, "downloaded");
                    return Ok(result);
                }
                Err(AttemptError::Retryable(failure)) => {
                    warn!(%url, reason = %failure, "source rejected");
                    last = Some(failure);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
            }
        }

        match last {
            Some(last) => Err(FetchError::Exhausted {
                identifier: target.identifier.clone(),
                attempted,
                last,
            }),
            None => Err(FetchError::NoCandidates {
                identifier: target.identifier.clone(),
            }),
        }
    }

    async fn attempt(
        &self,
        target: &FetchTarget,
        idx: usize,
        url: &Url,
        dir: &Path,
        destination: &Path,
    ) -> Result<FetchResult, AttemptError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CandidateFailure::from_reqwest(&e))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(CandidateFailure::HttpStatus {
                status: status.as_u16(),
            }
            .into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let expected_len = response.content_length();

        let mut stream = response.bytes_stream();
        let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
        while head.len() < SNIFF_LEN {
            match stream.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| CandidateFailure::from_reqwest(&e))?;
                    head.extend_from_slice(&chunk);
                }
                None => break,
            }
        }

        match validate::classify(&head, content_type.as_deref()) {
            Classification::Valid => {}
            verdict => {
                self.keep_rejected(&target.identifier, idx, verdict, &head).await;
                let preview = validate::preview(&head, PREVIEW_LEN);
                let failure = if verdict == Classification::LooksLikeErrorDocument {
                    CandidateFailure::ErrorDocument {
                        content_type,
                        preview,
                    }
                } else {
                    CandidateFailure::Unrecognized {
                        content_type,
                        preview,
                    }
                };
                return Err(failure.into());
            }
        }

        // The temp path is removed on drop, so every early return below
        // cleans up after itself.
        let tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(dir)
            .map_err(|e| FetchError::io(dir, e))?;
        let (std_file, tmp_path) = tmp.into_parts();
        let mut writer = BufWriter::new(fs::File::from_std(std_file));

        writer
            .write_all(&head)
            .await
            .map_err(|e| FetchError::io(&*tmp_path, e))?;
        let mut size = head.len() as u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CandidateFailure::from_reqwest(&e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(&*tmp_path, e))?;
            size += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|e| FetchError::io(&*tmp_path, e))?;
        drop(writer);

        if let Some(expected) = expected_len.filter(|&n| n != size) {
            return Err(CandidateFailure::Truncated {
                expected,
                actual: size,
            }
            .into());
        }

        tmp_path
            .persist(destination)
            .map_err(|e| FetchError::io(destination, e.error))?;

        Ok(FetchResult {
            path: destination.to_path_buf(),
            origin: FetchOrigin::Remote(url.clone()),
            size_bytes: size,
        })
    }

    /// Best effort: a failure to keep a diagnostic copy never fails the fetch.
    async fn keep_rejected(&self, id: &str, idx: usize, verdict: Classification, head: &[u8]) {
        let Some(dir) = &self.rejected_dir else {
            return;
        };
        let ext = match verdict {
            Classification::LooksLikeErrorDocument => "html",
            _ => "bin",
        };
        let path = dir.join(format!("{}_{}.{}", id, idx + 1, ext));
        let res = async {
            fs::create_dir_all(dir).await?;
            fs::write(&path, head).await
        }
        .await;
        match res {
            Ok(()) => debug!(
                path = %path.display(),
                verdict = verdict.as_str(),
                "kept rejected body"
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "could not keep rejected body"),
        }
    }
}

/// Size of a non-empty regular file at `path`, if there is one.
async fn existing_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file() && m.len() > 0)
        .map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::sources::CandidateSource;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn zip_body() -> Vec<u8> {
        let mut body = b"PK\x03\x04".to_vec();
        body.extend((0..4096u32).map(|i| (i % 251) as u8));
        body
    }

    fn fetcher(rejected: Option<PathBuf>) -> Fetcher {
        Fetcher::new(FetcherOptions {
            connect_timeout: Duration::from_secs(5),
            max_time: Duration::from_secs(10),
            rejected_dir: rejected,
            ..FetcherOptions::default()
        })
        .unwrap()
    }

    fn target(server: &MockServer, names: &[&str]) -> FetchTarget {
        FetchTarget {
            identifier: "AL".into(),
            candidates: names
                .iter()
                .map(|n| CandidateSource::new(format!("{}/pub/", server.uri()), *n))
                .collect(),
        }
    }

    fn leftover_parts(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("part"))
            .collect()
    }

    #[tokio::test]
    async fn first_valid_source_wins_and_later_ones_are_not_tried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.ZIP"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_body()))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("AL.ZIP");
        let result = fetcher(None)
            .fetch(&target(&server, &["AL.ZIP", "AL.zip"]), &dest)
            .await
            .unwrap();

        assert_eq!(result.size_bytes, zip_body().len() as u64);
        assert!(result.source_used().unwrap().as_str().ends_with("/pub/AL.ZIP"));
        assert_eq!(std::fs::read(&dest).unwrap(), zip_body());
        assert!(leftover_parts(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn html_with_200_falls_through_to_next_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.ZIP"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/zip")
                    .set_body_bytes(&b"\n  <!DOCTYPE html><html><body>File not found</body></html>"[..]),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_body()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let rejected = tmp.path().join("rejected");
        let dest = tmp.path().join("AL.ZIP");
        let result = fetcher(Some(rejected.clone()))
            .fetch(&target(&server, &["AL.ZIP", "AL.zip"]), &dest)
            .await
            .unwrap();

        assert!(result.source_used().unwrap().as_str().ends_with("/pub/AL.zip"));
        let kept = std::fs::read_to_string(rejected.join("AL_1.html")).unwrap();
        assert!(kept.contains("File not found"));
    }

    #[tokio::test]
    async fn http_errors_move_on_to_next_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.ZIP"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_body()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("AL.ZIP");
        let result = fetcher(None)
            .fetch(&target(&server, &["AL.ZIP", "AL.zip"]), &dest)
            .await
            .unwrap();
        assert!(matches!(result.origin, FetchOrigin::Remote(_)));
    }

    #[tokio::test]
    async fn exhaustion_reports_every_source_and_last_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.ZIP"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html")
                    .set_body_bytes(&b"<html>maintenance</html>"[..]),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("AL.ZIP");
        let err = fetcher(None)
            .fetch(&target(&server, &["AL.ZIP", "AL.zip"]), &dest)
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted {
                identifier,
                attempted,
                last,
            } => {
                assert_eq!(identifier, "AL");
                assert_eq!(attempted.len(), 2);
                assert!(attempted[0].ends_with("/pub/AL.ZIP"));
                assert!(attempted[1].ends_with("/pub/AL.zip"));
                assert_eq!(last.kind(), "error_document");
                assert!(last.preview().unwrap().contains("maintenance"));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert!(!dest.exists());
        assert!(leftover_parts(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn unrecognized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.ZIP"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("AL.ZIP");
        let err = fetcher(None)
            .fetch(&target(&server, &["AL.ZIP"]), &dest)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Exhausted {
                last: CandidateFailure::Unrecognized { .. },
                ..
            }
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn existing_artifact_short_circuits_without_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_body()))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("AL.ZIP");
        std::fs::write(&dest, b"PK previously downloaded").unwrap();

        let f = fetcher(None);
        let t = target(&server, &["AL.ZIP"]);
        let first = f.fetch(&t, &dest).await.unwrap();
        let second = f.fetch(&t, &dest).await.unwrap();

        assert_eq!(first.origin, FetchOrigin::Existing);
        assert_eq!(second.origin, FetchOrigin::Existing);
        assert_eq!(std::fs::read(&dest).unwrap(), b"PK previously downloaded");
    }

    #[tokio::test]
    async fn empty_existing_file_is_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.ZIP"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_body()))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("AL.ZIP");
        std::fs::write(&dest, b"").unwrap();

        let result = fetcher(None)
            .fetch(&target(&server, &["AL.ZIP"]), &dest)
            .await
            .unwrap();
        assert!(matches!(result.origin, FetchOrigin::Remote(_)));
        assert_eq!(std::fs::read(&dest).unwrap(), zip_body());
    }

    #[tokio::test]
    async fn unreachable_host_is_swallowed_as_candidate_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.ZIP"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_body()))
            .mount(&server)
            .await;

        let t = FetchTarget {
            identifier: "AL".into(),
            candidates: vec![
                // Port 9 (discard) on localhost: connection refused.
                CandidateSource::new("http://127.0.0.1:9/pub/", "AL.ZIP"),
                CandidateSource::new(format!("{}/pub/", server.uri()), "AL.ZIP"),
            ],
        };

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("AL.ZIP");
        let result = fetcher(None).fetch(&t, &dest).await.unwrap();
        assert!(result
            .source_used()
            .unwrap()
            .as_str()
            .starts_with(&server.uri()));
    }

    fn impatient_fetcher() -> Fetcher {
        Fetcher::new(FetcherOptions {
            connect_timeout: Duration::from_secs(1),
            max_time: Duration::from_secs(1),
            ..FetcherOptions::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn slow_source_times_out_and_next_one_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.ZIP"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(zip_body())
                    .set_delay(Duration::from_secs(3)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_body()))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("AL.ZIP");
        let result = impatient_fetcher()
            .fetch(&target(&server, &["AL.ZIP", "AL.zip"]), &dest)
            .await
            .unwrap();
        assert!(result.source_used().unwrap().as_str().ends_with("/pub/AL.zip"));
        assert_eq!(std::fs::read(&dest).unwrap(), zip_body());
    }

    #[tokio::test]
    async fn lone_slow_source_exhausts_with_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/AL.ZIP"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(zip_body())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("AL.ZIP");
        let err = impatient_fetcher()
            .fetch(&target(&server, &["AL.ZIP"]), &dest)
            .await
            .unwrap_err();
        match err {
            FetchError::Exhausted { attempted, last, .. } => {
                assert_eq!(attempted.len(), 1);
                assert_eq!(last.kind(), "timeout");
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert!(!dest.exists());
        assert!(leftover_parts(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn no_candidates_is_its_own_error() {
        let tmp = TempDir::new().unwrap();
        let t = FetchTarget {
            identifier: "AL".into(),
            candidates: vec![],
        };
        let err = fetcher(None)
            .fetch(&t, &tmp.path().join("AL.ZIP"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NoCandidates { .. }));
    }
}
