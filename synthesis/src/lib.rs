//! Text Synthesis
//!
//! The external capability the crystallization engine calls to compress a
//! window of actions into an insight:
//!
//! ```text
//! synthesize(actions, reasonings) -> { insight, significance, mood[7], topics[] }
//! ```
//!
//! - Trait-based backends behind [`TextSynthesizer`]
//! - [`OpenAiSynthesizer`] for any OpenAI-compatible model server
//! - [`TemplateSynthesizer`] as a deterministic offline fallback
//! - [`MockSynthesizer`] for tests

pub mod backend;
pub mod mood;
pub mod prompt;

pub use backend::{
    MockSynthesizer, OpenAiSynthesizer, Synthesis, SynthesisError, SynthesisRequest,
    TemplateSynthesizer, TextSynthesizer,
};
pub use mood::{Mood, MOOD_DIMENSIONS};
