//! Deterministic template synthesizer.
//!
//! Used offline or as a fallback when no model backend is reachable. Output
//! depends only on the request, so repeated runs over the same window agree.

use async_trait::async_trait;
use std::collections::HashMap;

use super::traits::*;
use crate::mood::Mood;

const MAX_TOPICS: usize = 5;
const MIN_TOPIC_LEN: usize = 4;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "because", "before", "from", "have", "into", "more",
    "only", "over", "some", "than", "that", "them", "then", "there", "these", "they", "this",
    "were", "what", "when", "which", "while", "with", "would",
];

/// Heuristic synthesizer built from action frequencies.
pub struct TemplateSynthesizer {
    id: String,
}

impl TemplateSynthesizer {
    /// Create a template synthesizer.
    pub fn new() -> Self {
        Self {
            id: "template".to_string(),
        }
    }

    /// Most frequent action; ties go to the earliest.
    fn dominant_action(actions: &[String]) -> Option<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for action in actions {
            let key = action.trim().to_lowercase();
            match counts.iter_mut().find(|(k, _)| *k == key) {
                Some((_, n)) => *n += 1,
                None => counts.push((key, 1)),
            }
        }

        let mut best: Option<(String, usize)> = None;
        for (key, n) in counts {
            if best.as_ref().map(|(_, b)| n > *b).unwrap_or(true) {
                best = Some((key, n));
            }
        }
        best
    }

    fn topics(request: &SynthesisRequest) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut first_seen: Vec<String> = Vec::new();

        for text in request.actions.iter().chain(request.reasonings.iter()) {
            for word in text
                .split(|c: char| !c.is_alphanumeric())
                .map(|w| w.to_lowercase())
                .filter(|w| w.len() >= MIN_TOPIC_LEN && !STOPWORDS.contains(&w.as_str()))
            {
                let count = counts.entry(word.clone()).or_insert(0);
                if *count == 0 {
                    first_seen.push(word);
                }
                *count += 1;
            }
        }

        // Stable sort keeps first-seen order among equal counts.
        first_seen.sort_by(|a, b| counts[b].cmp(&counts[a]));
        first_seen.into_iter().take(MAX_TOPICS).collect()
    }

    /// Blend of the source moods when the request carries them, otherwise
    /// derived from the shape of the entries.
    fn mood(request: &SynthesisRequest) -> Mood {
        if !request.moods.is_empty() {
            return Mood::blend(request.moods.iter());
        }

        let n = request.actions.len().max(1) as f64;

        let distinct = {
            let mut seen: Vec<String> = request.actions.iter().map(|a| a.to_lowercase()).collect();
            seen.sort();
            seen.dedup();
            seen.len() as f64
        };

        let avg_reasoning = request
            .reasonings
            .iter()
            .map(|r| r.chars().count() as f64)
            .sum::<f64>()
            / request.reasonings.len().max(1) as f64;

        Mood {
            tempo: (n.min(20.0) / 10.0 - 1.0).clamp(-1.0, 1.0),
            complexity: (distinct / n * 2.0 - 1.0).clamp(-1.0, 1.0),
            weight: (avg_reasoning.min(200.0) / 100.0 - 1.0).clamp(-1.0, 1.0),
            ..Mood::neutral()
        }
    }
}

impl Default for TemplateSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextSynthesizer for TemplateSynthesizer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn synthesize(&self, request: SynthesisRequest) -> Result<Synthesis, SynthesisError> {
        let (top, count) = Self::dominant_action(&request.actions)
            .ok_or_else(|| SynthesisError::InvalidOutput("nothing to synthesize".to_string()))?;

        let insight = if request.actions.len() == 1 {
            format!("A single {} action: {}.", request.level, top)
        } else {
            format!(
                "{} {} entries, most often '{}' ({} times).",
                request.actions.len(),
                request.level,
                top,
                count
            )
        };

        let significance = if request.principles.is_empty() {
            format!("Reasoning was recorded for {} actions.", request.actions.len())
        } else {
            let shown: Vec<&str> = request.principles.iter().take(3).map(String::as_str).collect();
            format!("The work was guided by {}.", shown.join(", "))
        };

        Ok(Synthesis::new(insight, significance)
            .with_mood(Self::mood(&request))
            .with_topics(Self::topics(&request)))
    }
}
