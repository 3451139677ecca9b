use super::error::{Error, Result};
use super::transport::{rejected, Transport};
use super::types::{GenerateContentRequest, StreamEvent};
use futures_core::stream::BoxStream;
use reqwest::Response;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Lazily decoded text fragments. Ends after an `Err` item.
pub type TextStream = BoxStream<'static, Result<String>>;

const END_MARKER: &str = "[DONE]";

/// What a single line of the event stream means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Skip,
    Done,
    Fragments(Vec<String>),
    Failed(String),
}

/// Decodes one line of `streamGenerateContent` output.
///
/// JSON payloads yield their candidates' text parts in order, or the in-band
/// error message; JSON of any other shape is skipped. Payloads that are not
/// JSON at all are passed through as text. SSE field lines other than
/// `data:` are ignored.
pub fn decode_line(line: &str) -> LineEvent {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return LineEvent::Skip;
    }

    let payload = match line.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("data:") => line[5..].trim(),
        _ => {
            if ["event:", "id:", "retry:"].iter().any(|f| line.starts_with(f)) {
                return LineEvent::Skip;
            }
            line
        }
    };

    if payload.eq_ignore_ascii_case(END_MARKER) {
        return LineEvent::Done;
    }
    if payload.is_empty() {
        return LineEvent::Skip;
    }

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => return LineEvent::Fragments(vec![payload.to_string()]),
    };
    let event: StreamEvent = match serde_json::from_value(value) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring stream event of unexpected shape");
            return LineEvent::Skip;
        }
    };

    if let Some(candidates) = event.candidates {
        let texts = candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .filter(|t| !t.is_empty())
            .collect();
        return LineEvent::Fragments(texts);
    }

    match event.error.and_then(|e| e.message) {
        Some(message) => LineEvent::Failed(message),
        None => LineEvent::Skip,
    }
}

/// Splits a byte stream into lines.
///
/// Newline bytes never occur inside a multi-byte UTF-8 sequence, so splitting
/// on them before decoding is safe.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            out.push(String::from_utf8_lossy(&line).into_owned());
        }

        out
    }

    /// Trailing text after the last newline, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct StreamingClient {
    transport: Transport,
}

impl StreamingClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Starts a streaming generate call.
    ///
    /// A non-2xx initial status yields an empty stream and is only logged;
    /// an in-band error later in the stream surfaces as [`Error::Stream`].
    /// Dropping the returned stream stops reading from the network.
    pub async fn stream(&self, model: &str, req: &GenerateContentRequest) -> Result<TextStream> {
        let url = self.transport.endpoint(
            &format!("v1beta/models/{model}:streamGenerateContent"),
            &[("alt", "sse")],
        )?;

        let resp = self
            .transport
            .send_streaming("streamGenerateContent", |http| http.post(url.clone()).json(req))
            .await?;

        if !resp.status().is_success() {
            let err = rejected(resp).await;
            tracing::error!(model, error = %err, "streaming content failed");
            return Ok(Box::pin(tokio_stream::empty::<Result<String>>()) as TextStream);
        }

        let (tx, rx) = mpsc::channel::<Result<String>>(64);
        tokio::spawn(pump(resp, tx));
        Ok(Box::pin(ReceiverStream::new(rx)) as TextStream)
    }
}

async fn pump(resp: Response, tx: mpsc::Sender<Result<String>>) {
    let mut body = resp.bytes_stream();
    let mut lines = LineDecoder::default();

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!("stream consumer dropped; closing connection");
                return;
            }
            next = body.next() => next,
        };

        let (pending, finished) = match next {
            Some(Ok(bytes)) => (lines.push(&bytes), false),
            Some(Err(e)) => {
                let _ = tx.send(Err(Error::from(e))).await;
                return;
            }
            None => (lines.finish().into_iter().collect(), true),
        };

        if forward(&tx, pending).await.is_break() || finished {
            return;
        }
    }
}

async fn forward(tx: &mpsc::Sender<Result<String>>, lines: Vec<String>) -> ControlFlow<()> {
    for line in lines {
        match decode_line(&line) {
            LineEvent::Skip => {}
            LineEvent::Done => return ControlFlow::Break(()),
            LineEvent::Fragments(texts) => {
                for text in texts {
                    if tx.send(Ok(text)).await.is_err() {
                        return ControlFlow::Break(());
                    }
                }
            }
            LineEvent::Failed(message) => {
                tracing::error!(%message, "provider reported an error mid-stream");
                let _ = tx.send(Err(Error::Stream(message))).await;
                return ControlFlow::Break(());
            }
        }
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(texts: &[&str]) -> LineEvent {
        LineEvent::Fragments(texts.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn decodes_data_prefixed_candidates() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#;
        assert_eq!(decode_line(line), frag(&["Hel"]));
    }

    #[test]
    fn yields_each_part_separately_in_order() {
        let line = r#"{"candidates":[
            {"content":{"parts":[{"text":"a"},{"text":""},{"text":"b"}]}},
            {"content":{"parts":[{"text":"c"}]}}]}"#
            .replace('\n', "");
        assert_eq!(decode_line(&line), frag(&["a", "b", "c"]));
    }

    #[test]
    fn end_marker_is_case_insensitive() {
        assert_eq!(decode_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(decode_line("DATA:[done]"), LineEvent::Done);
    }

    #[test]
    fn error_event_fails() {
        let line = r#"data: {"error":{"message":"quota exceeded"}}"#;
        assert_eq!(decode_line(line), LineEvent::Failed("quota exceeded".into()));
    }

    #[test]
    fn blank_and_field_lines_are_skipped() {
        assert_eq!(decode_line("   "), LineEvent::Skip);
        assert_eq!(decode_line(": keep-alive"), LineEvent::Skip);
        assert_eq!(decode_line("event: message"), LineEvent::Skip);
        assert_eq!(decode_line("data:"), LineEvent::Skip);
    }

    #[test]
    fn non_json_payload_passes_through() {
        assert_eq!(decode_line("data: plain words"), frag(&["plain words"]));
    }

    #[test]
    fn json_of_another_shape_is_skipped() {
        assert_eq!(decode_line("data: 42"), LineEvent::Skip);
        assert_eq!(decode_line("data: [1, 2]"), LineEvent::Skip);
        assert_eq!(decode_line(r#"data: {"candidates":"oops"}"#), LineEvent::Skip);
        assert_eq!(decode_line(r#"data: {"usageMetadata":{"totalTokenCount":7}}"#), LineEvent::Skip);
    }

    #[test]
    fn line_decoder_handles_split_chunks_and_crlf() {
        let mut d = LineDecoder::default();
        assert!(d.push(b"data: {\"a\"").is_empty());
        assert_eq!(d.push(b":1}\r\n\r\ndata: x"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(d.finish().as_deref(), Some("data: x"));
        assert!(d.finish().is_none());
    }

    #[test]
    fn line_decoder_keeps_multibyte_text_intact() {
        let mut d = LineDecoder::default();
        let bytes = "caf\u{e9}\n".as_bytes();
        assert!(d.push(&bytes[..4]).is_empty());
        assert_eq!(d.push(&bytes[4..]), vec!["caf\u{e9}"]);
    }
}
