//! Resumable file upload, single-shot form.
//!
//! The handshake is an explicit state machine: [`UploadState::advance`] is a
//! pure transition function, and [`FileUploadCoordinator`] performs the I/O
//! that produces each [`UploadEvent`].

use super::error::{Error, Result};
use super::transport::{rejected, Transport};
use super::types::{FileResource, FileUploadResponse, StartUploadFile, StartUploadRequest};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::time::Duration;

const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
const PROCESSING: &str = "PROCESSING";
const FAILED: &str = "FAILED";

#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    NotStarted,
    SessionStarted { upload_url: String },
    Uploaded { file: FileResource, polls: u32 },
    Active { file: FileResource },
    Failed { file: FileResource },
    TimedOut { polls: u32 },
}

/// Outcome of one network step of the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Start call answered; carries the upload URL header, if present.
    Started { upload_url: Option<String> },
    /// Upload-and-finalize answered with the file resource.
    Finalized { file: FileResource },
    /// Status check; `None` when the provider rejected the lookup.
    Polled { status: Option<FileResource> },
}

impl UploadState {
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::NotStarted => "not_started",
            UploadState::SessionStarted { .. } => "session_started",
            UploadState::Uploaded { .. } => "uploaded",
            UploadState::Active { .. } => "active",
            UploadState::Failed { .. } => "failed",
            UploadState::TimedOut { .. } => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Active { .. } | UploadState::Failed { .. } | UploadState::TimedOut { .. }
        )
    }

    /// Applies `event`. A status check that still reports PROCESSING on the
    /// `max_polls`-th attempt moves to `TimedOut`.
    pub fn advance(self, event: UploadEvent, max_polls: u32) -> Result<UploadState> {
        match (self, event) {
            (UploadState::NotStarted, UploadEvent::Started { upload_url }) => {
                match upload_url.filter(|u| !u.trim().is_empty()) {
                    Some(upload_url) => Ok(UploadState::SessionStarted { upload_url }),
                    None => Err(Error::UploadProtocol(
                        "start response carried no upload URL".into(),
                    )),
                }
            }
            (UploadState::SessionStarted { .. }, UploadEvent::Finalized { file }) => {
                if file.id().is_none() {
                    return Err(Error::UploadProtocol(
                        "finalize response carried no file name".into(),
                    ));
                }
                Ok(UploadState::Uploaded { file, polls: 0 })
            }
            (UploadState::Uploaded { file, polls }, UploadEvent::Polled { status }) => {
                let polls = polls + 1;
                match status.filter(|s| !state_is(s, PROCESSING)) {
                    Some(status) => {
                        let failed = state_is(&status, FAILED);
                        let file = status.merged_over(&file);
                        if failed {
                            Ok(UploadState::Failed { file })
                        } else {
                            Ok(UploadState::Active { file })
                        }
                    }
                    None if polls >= max_polls => Ok(UploadState::TimedOut { polls }),
                    None => Ok(UploadState::Uploaded { file, polls }),
                }
            }
            (state, event) => Err(Error::UploadProtocol(format!(
                "unexpected {event:?} while {}",
                state.name()
            ))),
        }
    }
}

fn state_is(file: &FileResource, expected: &str) -> bool {
    file.state
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(expected))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub poll_interval: Duration,
    pub processing_timeout: Duration,
}

impl UploadOptions {
    /// `ceil(timeout / interval)`, at least one.
    pub fn max_polls(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        let polls = self.processing_timeout.as_millis().div_ceil(interval);
        polls.clamp(1, u32::MAX as u128) as u32
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            processing_timeout: Duration::from_secs(60),
        }
    }
}

/// A bounded-size document held in memory for upload.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct FileUploadCoordinator {
    transport: Transport,
    options: UploadOptions,
}

impl FileUploadCoordinator {
    pub fn new(transport: Transport, options: UploadOptions) -> Self {
        Self { transport, options }
    }

    /// Drives the handshake to a terminal state and returns the active file.
    pub async fn upload(&self, doc: &Document) -> Result<FileResource> {
        let max_polls = self.options.max_polls();
        let mut state = UploadState::NotStarted;

        loop {
            let event = match &state {
                UploadState::NotStarted => self.start(doc).await?,
                UploadState::SessionStarted { upload_url } => self.finalize(upload_url, doc).await?,
                UploadState::Uploaded { file, polls } => {
                    if *polls > 0 {
                        tokio::time::sleep(self.options.poll_interval).await;
                    }
                    self.poll(file).await?
                }
                UploadState::Active { file } => return Ok(file.clone()),
                UploadState::Failed { file } => {
                    return Err(Error::UploadProtocol(format!(
                        "file {} failed processing",
                        file.name.as_deref().unwrap_or("<unnamed>")
                    )));
                }
                UploadState::TimedOut { polls } => {
                    tracing::error!(file = %doc.file_name, polls, "file still processing; giving up");
                    return Err(Error::ProcessingTimeout { attempts: *polls });
                }
            };

            state = state.advance(event, max_polls)?;
            match &state {
                UploadState::Uploaded { polls, .. } if *polls > 0 => {
                    tracing::debug!(file = %doc.file_name, polls, "file still processing")
                }
                s => tracing::info!(file = %doc.file_name, state = s.name(), "upload advanced"),
            }
        }
    }

    async fn start(&self, doc: &Document) -> Result<UploadEvent> {
        let url = self.transport.endpoint("upload/v1beta/files", &[])?;
        let body = StartUploadRequest {
            file: StartUploadFile {
                display_name: doc.file_name.clone(),
            },
        };
        let length = doc.bytes.len().to_string();

        let resp = self
            .transport
            .send("files.upload.start", |http| {
                http.post(url.clone())
                    .header("X-Goog-Upload-Protocol", "resumable")
                    .header("X-Goog-Upload-Command", "start")
                    .header("X-Goog-Upload-Header-Content-Length", length.as_str())
                    .header("X-Goog-Upload-Header-Content-Type", doc.mime_type.as_str())
                    .json(&body)
            })
            .await?;

        if !resp.status().is_success() {
            let err = rejected(resp).await;
            tracing::error!(file = %doc.file_name, error = %err, "resumable upload start failed");
            return Err(err);
        }

        let upload_url = resp
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(UploadEvent::Started { upload_url })
    }

    async fn finalize(&self, upload_url: &str, doc: &Document) -> Result<UploadEvent> {
        let url = Url::parse(upload_url)
            .map_err(|e| Error::UploadProtocol(format!("invalid upload URL {upload_url}: {e}")))?;

        let resp = self
            .transport
            .send("files.upload.finalize", |http| {
                http.post(url.clone())
                    .header("X-Goog-Upload-Offset", "0")
                    .header("X-Goog-Upload-Command", "upload, finalize")
                    .header(CONTENT_TYPE, doc.mime_type.as_str())
                    .body(doc.bytes.clone())
            })
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::UploadProtocol(format!(
                "upload finalize rejected: HTTP {status}: {body}"
            )));
        }

        let parsed: FileUploadResponse = serde_json::from_slice(&resp.bytes().await?)?;
        let file = parsed
            .file
            .ok_or_else(|| Error::UploadProtocol("finalize response carried no file".into()))?;
        Ok(UploadEvent::Finalized { file })
    }

    async fn poll(&self, file: &FileResource) -> Result<UploadEvent> {
        let id = file.id().unwrap_or_default();
        let url = self.transport.endpoint(&format!("v1beta/files/{id}"), &[])?;
        let resp = self
            .transport
            .send("files.get", |http| http.get(url.clone()))
            .await?;

        if !resp.status().is_success() {
            tracing::debug!(file = id, status = resp.status().as_u16(), "file status check rejected");
            return Ok(UploadEvent::Polled { status: None });
        }

        let status: FileResource = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(UploadEvent::Polled {
            status: Some(status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(state: Option<&str>) -> FileResource {
        FileResource {
            name: Some("files/abc".into()),
            uri: Some("https://files/abc".into()),
            state: state.map(str::to_string),
            ..Default::default()
        }
    }

    fn uploaded(polls: u32) -> UploadState {
        UploadState::Uploaded {
            file: file(Some("PROCESSING")),
            polls,
        }
    }

    #[test]
    fn missing_or_empty_upload_url_is_fatal() {
        for url in [None, Some(String::new()), Some("  ".into())] {
            let err = UploadState::NotStarted
                .advance(UploadEvent::Started { upload_url: url }, 3)
                .unwrap_err();
            assert!(matches!(err, Error::UploadProtocol(_)));
        }
    }

    #[test]
    fn start_then_finalize_reaches_uploaded() {
        let s = UploadState::NotStarted
            .advance(
                UploadEvent::Started {
                    upload_url: Some("https://up/1".into()),
                },
                3,
            )
            .unwrap();
        assert_eq!(s.name(), "session_started");

        let s = s
            .advance(UploadEvent::Finalized { file: file(None) }, 3)
            .unwrap();
        assert_eq!(s, UploadState::Uploaded { file: file(None), polls: 0 });
    }

    #[test]
    fn finalize_without_name_is_fatal() {
        let s = UploadState::SessionStarted {
            upload_url: "https://up/1".into(),
        };
        let err = s
            .advance(
                UploadEvent::Finalized {
                    file: FileResource::default(),
                },
                3,
            )
            .unwrap_err();
        assert!(matches!(err, Error::UploadProtocol(_)));
    }

    #[test]
    fn active_status_merges_over_finalized_file() {
        let status = FileResource {
            name: Some("files/abc".into()),
            state: Some("ACTIVE".into()),
            mime_type: Some("application/pdf".into()),
            ..Default::default()
        };
        let s = uploaded(0)
            .advance(UploadEvent::Polled { status: Some(status) }, 3)
            .unwrap();
        let UploadState::Active { file } = s else {
            panic!("expected active, got {s:?}");
        };
        assert_eq!(file.uri.as_deref(), Some("https://files/abc"));
        assert_eq!(file.mime_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn failed_status_is_terminal_failure() {
        let s = uploaded(0)
            .advance(
                UploadEvent::Polled {
                    status: Some(file(Some("FAILED"))),
                },
                3,
            )
            .unwrap();
        assert!(matches!(s, UploadState::Failed { .. }));
        assert!(s.is_terminal());
    }

    #[test]
    fn processing_until_bound_times_out() {
        let mut s = uploaded(0);
        for _ in 0..3 {
            assert!(!s.is_terminal());
            s = s
                .advance(
                    UploadEvent::Polled {
                        status: Some(file(Some("processing"))),
                    },
                    3,
                )
                .unwrap();
        }
        assert_eq!(s, UploadState::TimedOut { polls: 3 });
    }

    #[test]
    fn rejected_poll_counts_as_still_processing() {
        let s = uploaded(0)
            .advance(UploadEvent::Polled { status: None }, 3)
            .unwrap();
        assert!(matches!(s, UploadState::Uploaded { polls: 1, .. }));
    }

    #[test]
    fn out_of_order_event_is_protocol_error() {
        let err = UploadState::NotStarted
            .advance(UploadEvent::Polled { status: None }, 3)
            .unwrap_err();
        assert!(matches!(err, Error::UploadProtocol(_)));
    }

    #[test]
    fn max_polls_rounds_up() {
        let opts = |interval_ms, timeout_ms| UploadOptions {
            poll_interval: Duration::from_millis(interval_ms),
            processing_timeout: Duration::from_millis(timeout_ms),
        };
        assert_eq!(UploadOptions::default().max_polls(), 30);
        assert_eq!(opts(2000, 5000).max_polls(), 3);
        assert_eq!(opts(2000, 0).max_polls(), 1);
        assert_eq!(opts(0, 10).max_polls(), 10);
    }
}
