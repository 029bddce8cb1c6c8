//! Synthesis backend abstraction layer.
//!
//! Provides a trait-based interface for different synthesis backends:
//! - OpenAI-compatible model servers (vLLM, Ollama, OpenAI, etc.)
//! - Deterministic template fallback
//! - Mock backend for testing

pub mod mock;
pub mod openai;
pub mod template;
pub mod traits;

pub use mock::MockSynthesizer;
pub use openai::OpenAiSynthesizer;
pub use template::TemplateSynthesizer;
pub use traits::{Synthesis, SynthesisError, SynthesisRequest, TextSynthesizer};
