//! Mock synthesizer for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::*;

/// Mock synthesizer for testing.
///
/// Configurable output, availability and latency for unit tests.
pub struct MockSynthesizer {
    id: String,
    available: AtomicBool,
    output: Synthesis,
    delay: Option<Duration>,
    call_count: AtomicU32,
    last_request: Mutex<Option<SynthesisRequest>>,
}

impl MockSynthesizer {
    /// Create a new mock synthesizer.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            available: AtomicBool::new(true),
            output: Synthesis::new("Mock insight.", "Mock significance."),
            delay: None,
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Set the synthesis returned by every call.
    pub fn with_output(mut self, output: Synthesis) -> Self {
        self.output = output;
        self
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Toggle availability at runtime.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Get the number of times synthesize was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// The request of the most recent call.
    pub fn last_request(&self) -> Option<SynthesisRequest> {
        self.last_request.lock().ok().and_then(|last| last.clone())
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new("mock-synthesizer")
    }
}

#[async_trait]
impl TextSynthesizer for MockSynthesizer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn synthesize(&self, request: SynthesisRequest) -> Result<Synthesis, SynthesisError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(SynthesisError::Unavailable("Mock synthesizer disabled".to_string()));
        }

        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_synthesizer() {
        let synthesizer = MockSynthesizer::new("test")
            .with_output(Synthesis::new("Tests first.", "Fewer regressions.").with_confidence(0.7));

        assert!(synthesizer.is_available().await);
        assert_eq!(synthesizer.call_count(), 0);

        let output = synthesizer
            .synthesize(SynthesisRequest::new("session").with_entry("test", "why"))
            .await
            .unwrap();

        assert_eq!(output.insight, "Tests first.");
        assert_eq!(output.confidence, Some(0.7));
        assert_eq!(synthesizer.call_count(), 1);
        assert_eq!(synthesizer.last_request().map(|r| r.actions), Some(vec!["test".to_string()]));
    }

    #[tokio::test]
    async fn test_mock_unavailable() {
        let synthesizer = MockSynthesizer::default().with_available(false);
        assert!(!synthesizer.is_available().await);

        let result = synthesizer.synthesize(SynthesisRequest::new("day")).await;
        assert!(matches!(result, Err(SynthesisError::Unavailable(_))));

        synthesizer.set_available(true);
        assert!(synthesizer.synthesize(SynthesisRequest::new("day")).await.is_ok());
    }
}
