use crate::config::{Settings, VoiceConfig, DEFAULT_REQUEST_DELAY_MS};
use crate::dialogue::DialogueLine;
use crate::tts::{SpeechSynthesizer, SynthesisOutcome, SynthesisRequest, SynthesisResult, TtsError};
use crate::util::{retry_with_backoff, RetryConfig};
use futures::{stream, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

const LOG_TARGET: &str = "tts::batch";

/// How a batch of lines is sent to the remote service.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchPolicy {
    /// Minimum spacing between outbound calls.
    pub request_delay: Duration,
    /// Requests allowed in flight at once.
    pub concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            concurrency: 1,
            retry: RetryConfig::default(),
        }
    }
}

impl BatchPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            request_delay: settings.request_delay,
            concurrency: settings.concurrency.max(1),
            retry: RetryConfig {
                max_attempts: settings.max_attempts,
                ..RetryConfig::default()
            },
        }
    }
}

/// Spaces out outbound calls. Every start and every completion restarts the
/// clock, so a sequential batch waits the full delay after each response.
/// Retries go through the same clock as first attempts.
pub struct Pacer {
    delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            sleep_until(prev + self.delay).await;
        }
        *last = Some(Instant::now());
    }

    async fn touch(&self) {
        *self.last.lock().await = Some(Instant::now());
    }
}

/// Synthesizes one line with the voice its speaker maps to. Failures are
/// folded into the result, never returned as errors.
pub async fn synthesize_line<S>(
    synth: &S,
    line: DialogueLine,
    voices: &VoiceConfig,
    retry: &RetryConfig,
) -> SynthesisResult
where
    S: SpeechSynthesizer + ?Sized,
{
    synthesize_paced(synth, line, voices, retry, &Pacer::new(Duration::ZERO)).await
}

/// Like [`synthesize_line`], but every attempt, retries included, waits on
/// `pacer` first.
pub async fn synthesize_paced<S>(
    synth: &S,
    line: DialogueLine,
    voices: &VoiceConfig,
    retry: &RetryConfig,
    pacer: &Pacer,
) -> SynthesisResult
where
    S: SpeechSynthesizer + ?Sized,
{
    let request = SynthesisRequest {
        text: line.text.clone(),
        voice: voices.resolve(&line.speaker).clone(),
        acoustic: voices.acoustic,
    };

    let attempt = move || {
        let request = request.clone();
        async move {
            pacer.wait().await;
            let result = synth.synthesize(request).await;
            pacer.touch().await;
            result
        }
    };

    let outcome = match retry_with_backoff(retry, attempt, TtsError::is_retryable).await {
        Ok(audio) => SynthesisOutcome::Success(audio),
        Err(e) => SynthesisOutcome::Failure(e.to_string()),
    };

    SynthesisResult { line, outcome }
}

/// Yields one result per line, in input order, as soon as it and every line
/// before it are done.
///
/// The first request goes out immediately; each later call, retries
/// included, waits for `policy.request_delay`. With `concurrency > 1` several
/// requests may be in flight, but results are still yielded in input order.
pub fn synthesize_stream<'a, S>(
    synth: &'a S,
    lines: Vec<DialogueLine>,
    voices: &'a VoiceConfig,
    policy: &'a BatchPolicy,
) -> impl Stream<Item = SynthesisResult> + 'a
where
    S: SpeechSynthesizer + ?Sized + 'a,
{
    let total = lines.len();
    let pacer = Arc::new(Pacer::new(policy.request_delay));

    stream::iter(lines)
        .map(move |line| {
            let pacer = Arc::clone(&pacer);
            async move {
                let result = synthesize_paced(synth, line, voices, &policy.retry, &pacer).await;
                log_outcome(&result, total);
                result
            }
        })
        .buffered(policy.concurrency.max(1))
}

/// Collects [`synthesize_stream`].
pub async fn synthesize_all<S>(
    synth: &S,
    lines: Vec<DialogueLine>,
    voices: &VoiceConfig,
    policy: &BatchPolicy,
) -> Vec<SynthesisResult>
where
    S: SpeechSynthesizer + ?Sized,
{
    synthesize_stream(synth, lines, voices, policy).collect().await
}

fn log_outcome(result: &SynthesisResult, total: usize) {
    let line = &result.line;
    match &result.outcome {
        SynthesisOutcome::Success(audio) => tracing::info!(
            target: LOG_TARGET,
            index = line.index,
            speaker = %line.speaker,
            bytes = audio.len(),
            "synthesized line {}/{}: {}",
            line.index + 1,
            total,
            preview(&line.text)
        ),
        SynthesisOutcome::Failure(reason) => tracing::warn!(
            target: LOG_TARGET,
            index = line.index,
            speaker = %line.speaker,
            error = %reason,
            "failed to synthesize line {}/{}",
            line.index + 1,
            total
        ),
    }
}

fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 30;
    let mut out: String = text.chars().take(MAX_CHARS).collect();
    if text.chars().nth(MAX_CHARS).is_some() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::VoiceId;
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Echoes the text back as audio; texts listed in `failures` get the
    /// mapped error instead.
    #[derive(Default)]
    struct ScriptedSynth {
        failures: HashMap<String, fn() -> TtsError>,
        latency: HashMap<String, Duration>,
        calls: StdMutex<Vec<(String, VoiceId, Instant)>>,
    }

    impl ScriptedSynth {
        fn failing(mut self, text: &str, err: fn() -> TtsError) -> Self {
            self.failures.insert(text.to_owned(), err);
            self
        }

        fn slow(mut self, text: &str, latency: Duration) -> Self {
            self.latency.insert(text.to_owned(), latency);
            self
        }

        fn calls(&self) -> Vec<(String, VoiceId, Instant)> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl SpeechSynthesizer for ScriptedSynth {
        fn synthesize(
            &self,
            request: SynthesisRequest,
        ) -> BoxFuture<'_, Result<Bytes, TtsError>> {
            async move {
                self.calls.lock().expect("lock").push((
                    request.text.clone(),
                    request.voice.clone(),
                    Instant::now(),
                ));
                if let Some(latency) = self.latency.get(&request.text) {
                    tokio::time::sleep(*latency).await;
                }
                match self.failures.get(&request.text) {
                    Some(err) => Err(err()),
                    None => Ok(Bytes::from(request.text.into_bytes())),
                }
            }
            .boxed()
        }
    }

    fn lines(texts: &[(&str, &str)]) -> Vec<DialogueLine> {
        texts
            .iter()
            .enumerate()
            .map(|(index, (speaker, text))| DialogueLine {
                index,
                speaker: (*speaker).to_owned(),
                text: (*text).to_owned(),
            })
            .collect()
    }

    fn voices() -> VoiceConfig {
        VoiceConfig::new(VoiceId::from("fallback"))
            .with_voice("主持人", VoiceId::from("v1"))
            .with_voice("嘉宾A", VoiceId::from("v2"))
    }

    fn api_error() -> TtsError {
        TtsError::Api {
            code: 2013,
            message: "invalid params".into(),
        }
    }

    fn sequential() -> BatchPolicy {
        BatchPolicy {
            retry: RetryConfig::no_retry(),
            ..BatchPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_voice_per_speaker() {
        let synth = ScriptedSynth::default();
        let input = lines(&[("主持人", "大家好"), ("嘉宾A", "你好"), ("路人", "嗯")]);

        let results = synthesize_all(&synth, input, &voices(), &sequential()).await;

        assert!(results.iter().all(SynthesisResult::is_success));
        let used: Vec<_> = synth.calls().into_iter().map(|(_, v, _)| v).collect();
        assert_eq!(
            used,
            vec![
                VoiceId::from("v1"),
                VoiceId::from("v2"),
                VoiceId::from("fallback")
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_line_does_not_stop_the_batch() {
        let synth = ScriptedSynth::default().failing("three", api_error);
        let input = lines(&[
            ("A", "one"),
            ("B", "two"),
            ("A", "three"),
            ("B", "four"),
            ("A", "five"),
        ]);

        let results = synthesize_all(&synth, input, &voices(), &sequential()).await;

        assert_eq!(results.len(), 5);
        assert_eq!(synth.calls().len(), 5);
        let ok: Vec<usize> = results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.line.index)
            .collect();
        assert_eq!(ok, vec![0, 1, 3, 4]);
        let reason = results[2].failure().expect("failure");
        assert!(reason.contains("invalid params"));
        assert!(results[2].audio().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn calls_are_spaced_by_the_request_delay() {
        let synth = ScriptedSynth::default();
        let input = lines(&[("A", "one"), ("B", "two"), ("A", "three")]);

        synthesize_all(&synth, input, &voices(), &sequential()).await;

        let starts: Vec<Instant> = synth.calls().into_iter().map(|(_, _, at)| at).collect();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_line_is_not_delayed() {
        let synth = ScriptedSynth::default();
        let started = Instant::now();

        let results =
            synthesize_all(&synth, lines(&[("A", "only")]), &voices(), &sequential()).await;

        assert_eq!(results.len(), 1);
        assert_eq!(Instant::now() - started, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_batch_keeps_input_order() {
        let synth = ScriptedSynth::default()
            .slow("one", Duration::from_secs(5))
            .slow("two", Duration::from_secs(3));
        let input = lines(&[("A", "one"), ("B", "two"), ("A", "three")]);
        let policy = BatchPolicy {
            request_delay: Duration::from_millis(100),
            concurrency: 3,
            retry: RetryConfig::no_retry(),
        };

        let results = synthesize_all(&synth, input, &voices(), &policy).await;

        let order: Vec<usize> = results.iter().map(|r| r.line.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        let audio: Vec<&[u8]> = results
            .iter()
            .map(|r| r.audio().expect("audio").as_ref())
            .collect();
        assert_eq!(audio, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);

        let starts: Vec<Instant> = synth.calls().into_iter().map(|(_, _, at)| at).collect();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let synth = ScriptedSynth::default().failing("flaky", || TtsError::HttpStatus {
            status: 503,
            body: "busy".into(),
        });
        let policy = BatchPolicy {
            retry: RetryConfig::new(3, Duration::from_millis(10)),
            ..BatchPolicy::default()
        };

        let results =
            synthesize_all(&synth, lines(&[("A", "flaky")]), &voices(), &policy).await;

        assert!(!results[0].is_success());
        assert_eq!(synth.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_their_turn_with_concurrent_calls() {
        let synth = ScriptedSynth::default().failing("one", || TtsError::HttpStatus {
            status: 503,
            body: "busy".into(),
        });
        let input = lines(&[("A", "one"), ("B", "two"), ("A", "three")]);
        let policy = BatchPolicy {
            concurrency: 2,
            ..BatchPolicy::default()
        };

        let results = synthesize_all(&synth, input, &voices(), &policy).await;

        assert!(!results[0].is_success());
        assert!(results[1].is_success() && results[2].is_success());
        let calls = synth.calls();
        assert_eq!(calls.iter().filter(|(text, _, _)| text == "one").count(), 3);
        let mut starts: Vec<Instant> = calls.into_iter().map(|(_, _, at)| at).collect();
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= policy.request_delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stream_yields_each_result_before_the_next_line_starts() {
        let synth = ScriptedSynth::default();
        let input = lines(&[("A", "one"), ("B", "two")]);
        let voices = voices();
        let policy = sequential();
        let mut results = std::pin::pin!(synthesize_stream(&synth, input, &voices, &policy));

        let first = results.next().await.expect("first result");

        assert_eq!(first.line.index, 0);
        assert_eq!(synth.calls().len(), 1);
        assert_eq!(results.next().await.expect("second result").line.index, 1);
        assert!(results.next().await.is_none());
    }

    #[test]
    fn preview_truncates_long_text() {
        assert_eq!(preview("短句"), "短句");
        let long = "字".repeat(40);
        assert_eq!(preview(&long), format!("{}...", "字".repeat(30)));
    }
}
