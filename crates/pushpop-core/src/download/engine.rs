//! The download state machine.

use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{RequestBuilder, StatusCode, Url};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::io::StreamReader;

use super::event::{BodyReader, DigestReply, Event};
use super::{DownloadOptions, DownloadOutcome, DownloadProgress, DownloadRequest, Phase, MAX_DIGEST_BODY};
use crate::error::{Error, Result};
use crate::hasher::{ContentHasher, Digest};
use crate::reconcile::TransferPaths;
use crate::server::DIGEST_SUFFIX;
use crate::USER_HEADER;

/// Session state, only ever touched by the engine's own handlers.
#[derive(Debug)]
struct Session {
    phase: Phase,
    resume_offset: u64,
    resumed_from: u64,
    total: Option<u64>,
    transferred: u64,
    hash_bytes: u64,
    hash_total: u64,
    remote_digest: Option<Digest>,
    digest_retries: u32,
    speed_bps: u64,
    eta: Option<Duration>,
    last_sample: (Instant, u64),
    error: Option<String>,
    started_at: Instant,
}

impl Session {
    fn new(resume_offset: u64) -> Self {
        let now = Instant::now();
        Self {
            phase: Phase::Requesting,
            resume_offset,
            resumed_from: resume_offset,
            total: None,
            transferred: resume_offset,
            hash_bytes: 0,
            hash_total: 0,
            remote_digest: None,
            digest_retries: 0,
            speed_bps: 0,
            eta: None,
            last_sample: (now, 0),
            error: None,
            started_at: now,
        }
    }

    /// Monotonic work counter used for rate sampling: downloaded bytes,
    /// then hashed bytes.
    const fn work_done(&self) -> u64 {
        self.transferred.saturating_sub(self.resumed_from) + self.hash_bytes
    }

    fn remaining(&self) -> Option<u64> {
        match self.phase {
            Phase::Requesting | Phase::Streaming => {
                self.total.map(|t| t.saturating_sub(self.transferred))
            }
            Phase::ComputingDigest => Some(self.hash_total.saturating_sub(self.hash_bytes)),
            _ => None,
        }
    }
}

type Step = Option<Result<DownloadOutcome>>;

#[derive(Debug)]
pub(super) struct Engine {
    client: reqwest::Client,
    file_url: Url,
    digest_url: Url,
    paths: TransferPaths,
    username: String,
    options: DownloadOptions,
    session: Session,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    in_flight: Option<JoinHandle<()>>,
    progress: watch::Sender<DownloadProgress>,
}

impl Engine {
    pub(super) fn new(request: DownloadRequest, mut options: DownloadOptions) -> Result<Self> {
        options.chunk_size = options.chunk_size.max(1);
        options.progress_interval = options.progress_interval.max(Duration::from_millis(1));

        let base = Url::parse(&request.base_url)
            .map_err(|e| Error::Transport(format!("invalid sender URL '{}': {e}", request.base_url)))?;
        let name = request.paths.file_name().to_string();
        let file_url = resource_url(&base, &name)?;
        let digest_url = resource_url(&base, &format!("{name}{DIGEST_SUFFIX}"))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("cannot create HTTP client: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (progress, _) = watch::channel(DownloadProgress::new(request.resume_offset));

        Ok(Self {
            client,
            file_url,
            digest_url,
            paths: request.paths,
            username: request.username,
            options,
            session: Session::new(request.resume_offset),
            tx,
            rx,
            in_flight: None,
            progress,
        })
    }

    pub(super) fn subscribe(&self) -> watch::Receiver<DownloadProgress> {
        self.progress.subscribe()
    }

    pub(super) fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    pub(super) async fn run(mut self) -> Result<DownloadOutcome> {
        tracing::info!(
            url = %self.file_url,
            offset = self.session.resume_offset,
            dest = %self.paths.final_path.display(),
            "Starting download"
        );

        let ticker = self.spawn_ticker();
        self.start_request();

        let result = loop {
            let Some(event) = self.rx.recv().await else {
                break Err(Error::Internal("download event queue closed".to_string()));
            };
            if let Some(result) = self.handle(event) {
                break result;
            }
        };

        ticker.abort();
        self.finish(result).await
    }

    /// Release everything still in flight and publish the final state.
    async fn finish(&mut self, result: Result<DownloadOutcome>) -> Result<DownloadOutcome> {
        if let Some(task) = self.in_flight.take() {
            task.abort();
            let _ = task.await;
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    path = %outcome.path.display(),
                    bytes = outcome.bytes,
                    digest = %outcome.digest,
                    "Download verified"
                );
                self.session.eta = None;
                self.set_phase(Phase::Done);
            }
            Err(e) => {
                tracing::debug!(phase = %self.session.phase, error = %e, "Download failed");
                self.session.error = Some(e.to_string());
                self.set_phase(Phase::Failed);
            }
        }
        result
    }

    #[allow(clippy::too_many_lines)]
    fn handle(&mut self, event: Event) -> Step {
        if !matches!(event, Event::Tick) {
            tracing::trace!(event = event.name(), phase = %self.session.phase, "Handling event");
        }

        match event {
            Event::Tick => {
                self.sample();
                None
            }
            Event::Cancel => {
                tracing::info!(phase = %self.session.phase, "Download cancelled");
                Some(Err(Error::Cancelled))
            }

            Event::Responded(Ok(response)) => self.on_response(response),
            Event::Responded(Err(e)) => Some(Err(e.into())),

            Event::PartOpened { file: Ok(file), body } => {
                self.set_phase(Phase::Streaming);
                let buf = vec![0u8; self.options.chunk_size];
                self.read_chunk(body, file, buf);
                None
            }
            Event::PartOpened { file: Err(source), .. } => Some(Err(self.part_error(source))),

            Event::ChunkRead {
                read: Ok(0), file, ..
            } => {
                self.close_part(file);
                None
            }
            Event::ChunkRead {
                read: Ok(n),
                body,
                file,
                buf,
            } => {
                self.write_chunk(body, file, buf, n);
                None
            }
            Event::ChunkRead { read: Err(e), .. } => Some(Err(Error::Transport(e.to_string()))),

            Event::ChunkWritten {
                result: Ok(()),
                body,
                file,
                buf,
                written,
            } => {
                self.session.transferred += written as u64;
                self.read_chunk(body, file, buf);
                None
            }
            Event::ChunkWritten {
                result: Err(source),
                ..
            } => Some(Err(self.part_error(source))),

            Event::PartClosed(Ok(())) => {
                if let Some(expected) = self.session.total {
                    if self.session.transferred < expected {
                        return Some(Err(Error::Truncated {
                            received: self.session.transferred,
                            expected,
                        }));
                    }
                }
                self.start_rename();
                None
            }
            Event::PartClosed(Err(source)) => Some(Err(self.part_error(source))),

            Event::Renamed(Ok(())) => {
                tracing::debug!(path = %self.paths.final_path.display(), "Partial file renamed");
                self.fetch_digest();
                None
            }
            Event::Renamed(Err(source)) => Some(Err(Error::Rename {
                from: self.paths.part_path.clone(),
                to: self.paths.final_path.clone(),
                source,
            })),

            Event::DigestFetched(Ok(DigestReply::Ready(digest))) => {
                tracing::debug!(digest = %digest, "Remote digest received");
                self.session.remote_digest = Some(digest);
                self.open_for_hash();
                None
            }
            Event::DigestFetched(Ok(DigestReply::Pending)) => self.on_digest_pending(),
            Event::DigestFetched(Err(e)) => Some(Err(e)),
            Event::RetryDigest => {
                self.fetch_digest();
                None
            }

            Event::HashOpened(Ok((file, len))) => {
                self.session.hash_total = len;
                self.publish();
                let buf = vec![0u8; self.options.chunk_size];
                self.hash_chunk(file, ContentHasher::new(), buf);
                None
            }
            Event::HashOpened(Err(source)) => Some(Err(self.hash_error(source))),

            Event::HashChunk {
                read: Ok(0), hasher, ..
            } => self.verify(hasher.finalize()),
            Event::HashChunk {
                read: Ok(n),
                file,
                hasher,
                buf,
            } => {
                self.session.hash_bytes += n as u64;
                self.hash_chunk(file, hasher, buf);
                None
            }
            Event::HashChunk { read: Err(source), .. } => Some(Err(self.hash_error(source))),

            Event::CorruptRemoved {
                result,
                expected,
                computed,
            } => {
                if let Err(e) = result {
                    tracing::error!(
                        path = %self.paths.final_path.display(),
                        error = %e,
                        "Failed to remove corrupted file"
                    );
                }
                Some(Err(Error::DigestMismatch {
                    expected: expected.to_string(),
                    computed: computed.to_string(),
                }))
            }
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn start_request(&mut self) {
        self.set_phase(Phase::Requesting);

        let offset = self.session.resume_offset;
        let mut request = self
            .client
            .get(self.file_url.clone())
            .header(USER_HEADER, &self.username);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        self.dispatch(async move { Event::Responded(request.send().await) });
    }

    fn on_response(&mut self, response: reqwest::Response) -> Step {
        let status = response.status();
        let offset = self.session.resume_offset;
        let length = response.content_length();

        let append = match status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => {
                if let Some(start) = content_range_start(response.headers()) {
                    if start != offset {
                        return Some(Err(Error::UnexpectedStatus {
                            status: status.as_u16(),
                            context: "resuming (server answered with a different range)",
                        }));
                    }
                }
                self.session.total = match resumed_total(length, offset) {
                    Ok(total) => total,
                    Err(e) => return Some(Err(e)),
                };
                self.session.transferred = offset;
                true
            }
            StatusCode::OK => {
                if offset > 0 {
                    tracing::warn!(
                        offset,
                        "Server ignored the range request, restarting from the beginning"
                    );
                }
                self.session.total = length;
                self.session.transferred = 0;
                self.session.resumed_from = 0;
                false
            }
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                tracing::warn!(
                    offset,
                    "Server has nothing past the partial file, treating it as complete"
                );
                self.session.total = Some(offset);
                self.session.transferred = offset;
                self.start_rename();
                return None;
            }
            other => {
                return Some(Err(Error::UnexpectedStatus {
                    status: other.as_u16(),
                    context: "requesting the file",
                }));
            }
        };

        self.session.last_sample = (Instant::now(), self.session.work_done());
        tracing::debug!(
            status = status.as_u16(),
            total = ?self.session.total,
            append,
            "File response accepted"
        );

        let body: BodyReader = Box::pin(StreamReader::new(
            response.bytes_stream().map_err(io::Error::other),
        ));
        let path = self.paths.part_path.clone();
        self.dispatch(async move {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&path)
                .await;
            Event::PartOpened { file, body }
        });
        None
    }

    fn read_chunk(&mut self, mut body: BodyReader, file: File, mut buf: Vec<u8>) {
        self.dispatch(async move {
            let read = body.read(&mut buf).await;
            Event::ChunkRead {
                body,
                file,
                buf,
                read,
            }
        });
    }

    fn write_chunk(&mut self, body: BodyReader, mut file: File, buf: Vec<u8>, n: usize) {
        self.dispatch(async move {
            let result = async {
                file.write_all(&buf[..n]).await?;
                file.flush().await
            }
            .await;
            Event::ChunkWritten {
                body,
                file,
                buf,
                written: n,
                result,
            }
        });
    }

    fn close_part(&mut self, mut file: File) {
        self.dispatch(async move {
            let result = async {
                file.flush().await?;
                file.sync_all().await
            }
            .await;
            drop(file);
            Event::PartClosed(result)
        });
    }

    fn start_rename(&mut self) {
        self.set_phase(Phase::Renaming);
        let from = self.paths.part_path.clone();
        let to = self.paths.final_path.clone();
        self.dispatch(async move { Event::Renamed(fs::rename(&from, &to).await) });
    }

    fn fetch_digest(&mut self) {
        self.set_phase(Phase::FetchingDigest);
        let request = self
            .client
            .get(self.digest_url.clone())
            .header(USER_HEADER, &self.username);
        self.dispatch(async move { Event::DigestFetched(fetch_digest(request).await) });
    }

    fn on_digest_pending(&mut self) -> Step {
        self.session.digest_retries += 1;
        let retries = self.session.digest_retries;

        if let Some(max) = self.options.max_digest_retries {
            if retries > max {
                return Some(Err(Error::DigestFetch(format!(
                    "digest still not ready after {max} retries"
                ))));
            }
        }

        tracing::debug!(retries, "Digest not ready, retrying");
        self.set_phase(Phase::DigestPending);
        let delay = self.options.digest_retry_interval;
        self.dispatch(async move {
            tokio::time::sleep(delay).await;
            Event::RetryDigest
        });
        None
    }

    fn open_for_hash(&mut self) {
        self.set_phase(Phase::ComputingDigest);
        let path = self.paths.final_path.clone();
        self.dispatch(async move {
            let opened = async {
                let file = File::open(&path).await?;
                let len = file.metadata().await?.len();
                Ok::<_, io::Error>((file, len))
            }
            .await;
            Event::HashOpened(opened)
        });
    }

    fn hash_chunk(&mut self, mut file: File, mut hasher: ContentHasher, mut buf: Vec<u8>) {
        self.dispatch(async move {
            let read = file.read(&mut buf).await;
            if let Ok(n) = read {
                hasher.update(&buf[..n]);
            }
            Event::HashChunk {
                file,
                hasher,
                buf,
                read,
            }
        });
    }

    fn verify(&mut self, computed: Digest) -> Step {
        self.set_phase(Phase::Verifying);

        let Some(expected) = self.session.remote_digest.clone() else {
            return Some(Err(Error::Internal(
                "verifying without a remote digest".to_string(),
            )));
        };

        if computed == expected {
            return Some(Ok(DownloadOutcome {
                path: self.paths.final_path.clone(),
                bytes: self.session.hash_total,
                resumed_from: self.session.resumed_from,
                digest: computed,
                elapsed: self.session.started_at.elapsed(),
            }));
        }

        tracing::warn!(
            expected = %expected,
            computed = %computed,
            path = %self.paths.final_path.display(),
            "Digest mismatch, removing corrupted file"
        );
        let path = self.paths.final_path.clone();
        self.dispatch(async move {
            let result = fs::remove_file(&path).await;
            Event::CorruptRemoved {
                result,
                expected,
                computed,
            }
        });
        None
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    /// Run one I/O step; its completion arrives as exactly one event.
    fn dispatch<F>(&mut self, step: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let tx = self.tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let _ = tx.send(step.await);
        }));
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let period = self.options.progress_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(Event::Tick).is_err() {
                    break;
                }
            }
        })
    }

    /// Update throughput and time remaining from the work done since the
    /// previous tick.
    fn sample(&mut self) {
        let now = Instant::now();
        let (then, done_then) = self.session.last_sample;
        let done = self.session.work_done();
        let elapsed = now.duration_since(then).as_secs_f64();

        if elapsed > 0.0 {
            let instant = (done.saturating_sub(done_then) as f64 / elapsed) as u64;
            self.session.speed_bps = if self.session.speed_bps == 0 {
                instant
            } else {
                (self.session.speed_bps * 3 + instant) / 4
            };
        }
        self.session.last_sample = (now, done);

        self.session.eta = match (self.session.remaining(), self.session.speed_bps) {
            (Some(remaining), speed) if speed > 0 => {
                Some(Duration::from_secs_f64(remaining as f64 / speed as f64))
            }
            _ => None,
        };
        self.publish();
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.session.phase != phase {
            tracing::debug!(from = %self.session.phase, to = %phase, "Download phase");
            self.session.phase = phase;
        }
        self.publish();
    }

    fn publish(&self) {
        let s = &self.session;
        self.progress.send_replace(DownloadProgress {
            phase: s.phase,
            bytes_transferred: s.transferred,
            total_bytes: s.total,
            resumed_from: s.resumed_from,
            speed_bps: s.speed_bps,
            eta: s.eta,
            hash_bytes: s.hash_bytes,
            hash_total: s.hash_total,
            digest_retries: s.digest_retries,
            error: s.error.clone(),
            started_at: s.started_at,
        });
    }

    fn part_error(&self, source: io::Error) -> Error {
        Error::PartialWrite {
            path: self.paths.part_path.clone(),
            source,
        }
    }

    fn hash_error(&self, source: io::Error) -> Error {
        Error::HashRead {
            path: self.paths.final_path.clone(),
            source,
        }
    }
}

/// `base` with `name` appended as a single, percent-encoded path segment.
fn resource_url(base: &Url, name: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::Transport(format!("'{base}' cannot be used as a sender URL")))?
        .pop_if_empty()
        .push(name);
    Ok(url)
}

/// Full file size of a resumed response: the remaining length plus what is
/// already on disk.
fn resumed_total(length: Option<u64>, offset: u64) -> Result<Option<u64>> {
    length
        .map(|len| {
            len.checked_add(offset).ok_or(Error::UnexpectedStatus {
                status: StatusCode::PARTIAL_CONTENT.as_u16(),
                context: "resuming (declared length overflows the file size)",
            })
        })
        .transpose()
}

/// First byte position of a `Content-Range: bytes <start>-<end>/<len>` header.
fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

async fn fetch_digest(request: RequestBuilder) -> Result<DigestReply> {
    let mut response = request
        .send()
        .await
        .map_err(|e| Error::DigestFetch(e.to_string()))?;

    match response.status() {
        StatusCode::SERVICE_UNAVAILABLE => Ok(DigestReply::Pending),
        StatusCode::OK => {
            let mut body = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| Error::DigestFetch(e.to_string()))?
            {
                body.extend_from_slice(&chunk);
                if body.len() > MAX_DIGEST_BODY {
                    return Err(Error::MalformedDigest { length: body.len() });
                }
            }
            let text = String::from_utf8(body).map_err(|e| Error::MalformedDigest {
                length: e.as_bytes().len(),
            })?;
            Digest::parse(&text).map(DigestReply::Ready)
        }
        other => Err(Error::UnexpectedStatus {
            status: other.as_u16(),
            context: "fetching the digest",
        }),
    }
}
