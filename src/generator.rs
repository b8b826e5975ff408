use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use crate::backend::BackendConfig;
use crate::config::GenerationSettings;
use crate::error::{RagError, RagResult};

/// Answer fragments in backend emission order. Single pass; dropping it closes
/// the underlying HTTP response.
pub type AnswerStream = BoxStream<'static, RagResult<String>>;

/// Text-generation backend. Every transport or protocol failure comes back as
/// [`RagError::BackendUnavailable`]; nothing here retries.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    fn endpoint(&self) -> &str;

    fn model(&self) -> &str;

    /// Resolves only once the complete answer is available.
    async fn answer(&self, prompt: &str) -> RagResult<String>;

    /// Resolves once the backend accepted the request; fragments follow lazily.
    async fn stream_answer(&self, prompt: &str) -> RagResult<AnswerStream>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
    num_predict: u32,
}

/// One `/api/generate` object: the whole reply, or one NDJSON line when streaming.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

fn unavailable(endpoint: &str, model: &str, detail: impl Display) -> RagError {
    RagError::BackendUnavailable {
        endpoint: endpoint.to_string(),
        model: model.to_string(),
        detail: detail.to_string(),
    }
}

/// Pull the `error` field out of an Ollama error body, or fall back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<GenerateChunk>(body)
        .ok()
        .and_then(|c| c.error)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Generator backed by Ollama's `/api/generate`.
pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
    settings: GenerationSettings,
}

impl OllamaGenerator {
    pub fn new(backend: &BackendConfig, settings: GenerationSettings) -> RagResult<Self> {
        settings.validate()?;
        Ok(Self {
            client: backend.http_client()?,
            endpoint: backend.endpoint("/api/generate"),
            request_timeout: backend.request_timeout,
            settings,
        })
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    fn fail(&self, detail: impl Display) -> RagError {
        unavailable(&self.endpoint, &self.settings.model, detail)
    }

    async fn send(&self, prompt: &str, stream: bool) -> RagResult<reqwest::Response> {
        let body = GenerateRequest {
            model: &self.settings.model,
            prompt,
            stream,
            options: GenerateOptions {
                temperature: self.settings.temperature(),
                num_ctx: self.settings.num_ctx,
                num_predict: self.settings.num_predict,
            },
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if !stream {
            request = request.timeout(self.request_timeout);
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.settings.model,
            stream,
            prompt_chars = prompt.len(),
            "generation request"
        );
        let resp = request.send().await.map_err(|e| {
            tracing::warn!(endpoint = %self.endpoint, error = %e, "generation backend unreachable");
            self.fail(e)
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            tracing::warn!(endpoint = %self.endpoint, %status, "generation backend returned an error");
            return Err(self.fail(format!("HTTP {}: {}", status, error_message(&text))));
        }
        Ok(resp)
    }
}

#[async_trait::async_trait]
impl Generator for OllamaGenerator {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn answer(&self, prompt: &str) -> RagResult<String> {
        let resp = self.send(prompt, false).await?;
        let parsed: GenerateChunk = resp
            .json()
            .await
            .map_err(|e| self.fail(format!("malformed response: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(self.fail(err));
        }
        tracing::debug!(answer_chars = parsed.response.len(), "generation complete");
        Ok(parsed.response)
    }

    async fn stream_answer(&self, prompt: &str) -> RagResult<AnswerStream> {
        let resp = self.send(prompt, true).await?;
        Ok(decode_ndjson(
            resp.bytes_stream(),
            self.endpoint.clone(),
            self.settings.model.clone(),
        ))
    }
}

struct NdjsonState<S> {
    bytes: Pin<Box<S>>,
    buf: Vec<u8>,
    /// Backend sent `"done": true`.
    done: bool,
    /// No more items will be yielded.
    finished: bool,
    endpoint: String,
    model: String,
}

impl<S> NdjsonState<S> {
    fn fail(&self, detail: impl Display) -> RagError {
        unavailable(&self.endpoint, &self.model, detail)
    }

    /// Decode one line. `Ok(None)` means nothing to yield for it.
    fn parse_line(&mut self, line: &[u8]) -> RagResult<Option<String>> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|e| self.fail(format!("malformed stream line: {e}")))?;
        if let Some(err) = chunk.error {
            return Err(self.fail(err));
        }
        if chunk.done {
            self.done = true;
            self.finished = true;
        }
        Ok(Some(chunk.response).filter(|r| !r.is_empty()))
    }
}

/// Turn a byte stream of newline-delimited generate objects into answer fragments.
/// Lines may be split across byte chunks arbitrarily. Reading stops at the
/// `done` line; a stream that ends before it is reported as a failure.
fn decode_ndjson<S, B, E>(bytes: S, endpoint: String, model: String) -> AnswerStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = NdjsonState {
        bytes: Box::pin(bytes),
        buf: Vec::new(),
        done: false,
        finished: false,
        endpoint,
        model,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                match st.parse_line(&line) {
                    Ok(Some(fragment)) => return Some((Ok(fragment), st)),
                    Ok(None) => continue,
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.finished = true;
                    let err = st.fail(format!("stream interrupted: {e}"));
                    return Some((Err(err), st));
                }
                None => {
                    if st.buf.iter().any(|b| !b.is_ascii_whitespace()) {
                        // Final line without a trailing newline.
                        st.buf.push(b'\n');
                        continue;
                    }
                    st.finished = true;
                    if st.done {
                        return None;
                    }
                    let err = st.fail("stream ended before the backend signalled completion");
                    return Some((Err(err), st));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const FRAGMENTS: [&str; 3] = ["Refunds are ", "accepted within ", "30 days."];

    async fn generate_handler(Json(body): Json<Value>) -> Response {
        if body["model"] == "missing" {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "model 'missing' not found, try pulling it first" })),
            )
                .into_response();
        }
        let options = &body["options"];
        if options["temperature"] != json!(0.0) || options["num_ctx"] != 2048 || options["num_predict"] != 256 {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "unexpected options" })))
                .into_response();
        }
        if body["stream"] == true {
            let mut lines = String::new();
            for f in FRAGMENTS {
                lines.push_str(&json!({ "model": body["model"], "response": f, "done": false }).to_string());
                lines.push('\n');
            }
            lines.push_str(&json!({ "model": body["model"], "response": "", "done": true }).to_string());
            lines.push('\n');
            ([(header::CONTENT_TYPE, "application/x-ndjson")], lines).into_response()
        } else {
            Json(json!({ "model": body["model"], "response": FRAGMENTS.concat(), "done": true }))
                .into_response()
        }
    }

    async fn mock_generator(model: &str) -> OllamaGenerator {
        let router = Router::new().route("/api/generate", post(generate_handler));
        let base = crate::test_support::spawn_backend(router).await;
        let backend = BackendConfig::new(&base).unwrap();
        let settings = GenerationSettings { model: model.to_string(), ..Default::default() };
        OllamaGenerator::new(&backend, settings).unwrap()
    }

    async fn collect(stream: AnswerStream) -> Vec<RagResult<String>> {
        stream.collect().await
    }

    fn lines_stream(parts: Vec<&'static str>) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
        stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())))
    }

    #[tokio::test]
    async fn test_blocking_answer() {
        let generator = mock_generator("phi3:mini").await;
        let answer = generator.answer("prompt").await.unwrap();
        assert_eq!(answer, "Refunds are accepted within 30 days.");
        assert!(generator.endpoint().ends_with("/api/generate"));
    }

    #[tokio::test]
    async fn test_stream_concatenates_to_blocking_answer() {
        let generator = mock_generator("phi3:mini").await;
        let blocking = generator.answer("prompt").await.unwrap();
        let stream = generator.stream_answer("prompt").await.unwrap();
        let fragments: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(fragments, FRAGMENTS.to_vec());
        assert_eq!(fragments.concat(), blocking);
    }

    #[tokio::test]
    async fn test_missing_model_is_backend_unavailable() {
        let generator = mock_generator("missing").await;
        let err = generator.answer("prompt").await.unwrap_err();
        match err {
            RagError::BackendUnavailable { endpoint, model, detail } => {
                assert!(endpoint.ends_with("/api/generate"));
                assert_eq!(model, "missing");
                assert!(detail.contains("404"));
                assert!(detail.contains("not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            generator.stream_answer("prompt").await,
            Err(RagError::BackendUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_names_endpoint() {
        let base = crate::test_support::dead_backend().await;
        let backend = BackendConfig::new(&base).unwrap();
        let generator = OllamaGenerator::new(&backend, GenerationSettings::default()).unwrap();
        let expected = format!("{base}/api/generate");

        let err = generator.answer("prompt").await.unwrap_err();
        assert!(matches!(err, RagError::BackendUnavailable { .. }));
        assert!(err.to_string().contains(&expected));

        let err = match generator.stream_answer("prompt").await {
            Err(e) => e,
            Ok(_) => panic!("stream should not open against a dead port"),
        };
        assert!(err.to_string().contains(&expected));
    }

    #[tokio::test]
    async fn test_malformed_blocking_body() {
        let router = Router::new().route("/api/generate", post(|| async { "not json" }));
        let backend = BackendConfig::new(&crate::test_support::spawn_backend(router).await).unwrap();
        let generator = OllamaGenerator::new(&backend, GenerationSettings::default()).unwrap();
        let err = generator.answer("prompt").await.unwrap_err();
        assert!(err.to_string().contains("malformed response"));
    }

    #[tokio::test]
    async fn test_decode_lines_split_across_chunks() {
        let stream = decode_ndjson(
            lines_stream(vec![
                "{\"response\":\"Hel",
                "lo\",\"done\":false}\n{\"resp",
                "onse\":\" world\",\"done\":false}\n",
                "{\"response\":\"\",\"done\":true}",
            ]),
            "http://x/api/generate".into(),
            "m".into(),
        );
        let out: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(out, vec!["Hello", " world"]);
    }

    #[tokio::test]
    async fn test_decode_error_line() {
        let stream = decode_ndjson(
            lines_stream(vec![
                "{\"response\":\"partial\",\"done\":false}\n",
                "{\"error\":\"model runner crashed\"}\n",
                "{\"response\":\"never\",\"done\":false}\n",
            ]),
            "http://x/api/generate".into(),
            "m".into(),
        );
        let out = collect(stream).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "partial");
        let err = out[1].as_ref().unwrap_err();
        assert!(err.to_string().contains("model runner crashed"));
        assert!(err.to_string().contains("http://x/api/generate"));
    }

    #[tokio::test]
    async fn test_decode_truncated_stream() {
        let stream = decode_ndjson(
            lines_stream(vec!["{\"response\":\"a\",\"done\":false}\n"]),
            "e".into(),
            "m".into(),
        );
        let out = collect(stream).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(RagError::BackendUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_decode_malformed_line() {
        let stream = decode_ndjson(lines_stream(vec!["<html>oops</html>\n"]), "e".into(), "m".into());
        let out = collect(stream).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].as_ref().unwrap_err().to_string().contains("malformed stream line"));
    }

    #[tokio::test]
    async fn test_decode_transport_error() {
        let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"{\"response\":\"a\",\"done\":false}\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer")),
        ];
        let stream = decode_ndjson(stream::iter(parts), "e".into(), "m".into());
        let out = collect(stream).await;
        assert_eq!(out.len(), 2);
        assert!(out[1].as_ref().unwrap_err().to_string().contains("reset by peer"));
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_done_line_stops_reading() {
        // The source never ends after `done`; the decoder must not wait on it.
        let source = lines_stream(vec!["{\"response\":\"x\",\"done\":true}\n"]).chain(stream::pending());
        let out = collect(decode_ndjson(source, "e".into(), "m".into())).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), "x");
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_source() {
        let released = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(released.clone());
        let source = lines_stream(vec!["{\"response\":\"first\",\"done\":false}\n"])
            .chain(stream::pending())
            .map(move |item| {
                let _keep = &guard;
                item
            });
        let mut answer = decode_ndjson(source, "e".into(), "m".into());
        assert_eq!(answer.next().await.unwrap().unwrap(), "first");
        assert!(!released.load(Ordering::SeqCst));
        drop(answer);
        assert!(released.load(Ordering::SeqCst));
    }
}
