//! Prompt assembly for model-backed synthesis.

use crate::backend::traits::SynthesisRequest;
use crate::mood::MOOD_DIMENSIONS;
#[cfg(test)]
use crate::mood::Mood;

/// Cap on entries rendered into a single prompt.
const MAX_PROMPT_ENTRIES: usize = 200;

/// System prompt describing the expected JSON object.
pub fn system_prompt() -> String {
    let mut prompt = String::new();

    prompt.push_str("# CRYSTALLIZATION\n\n");
    prompt.push_str("You compress a batch of recorded actions into one crystal.\n");
    prompt.push_str("Answer with a single JSON object and nothing else:\n\n");
    prompt.push_str("- `insight`: one sentence, what happened\n");
    prompt.push_str("- `significance`: one sentence, why it matters\n");
    prompt.push_str("- `mood`: object with keys ");
    prompt.push_str(&MOOD_DIMENSIONS.join(", "));
    prompt.push_str(", each a number in [-1, 1]\n");
    prompt.push_str("- `topics`: array of short lowercase tags\n");
    prompt.push_str("- `confidence`: number in [0, 1], how faithful the insight is\n");

    prompt
}

/// User prompt listing the entries to compress.
pub fn entries_prompt(request: &SynthesisRequest) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("## Level: {}\n\n", request.level));

    if !request.principles.is_empty() {
        prompt.push_str(&format!("Principles: {}\n\n", request.principles.join(", ")));
    }

    prompt.push_str("## Entries\n\n");
    for (i, action) in request.actions.iter().take(MAX_PROMPT_ENTRIES).enumerate() {
        let reasoning = request.reasonings.get(i).map(String::as_str).unwrap_or("");
        prompt.push_str(&format!("{}. **{}**: {}", i + 1, action, reasoning));
        if let Some((dimension, value)) = request.moods.get(i).and_then(|m| m.dominant()) {
            prompt.push_str(&format!(" (mood: {} {:+.2})", dimension, value));
        }
        prompt.push('\n');
    }

    if request.actions.len() > MAX_PROMPT_ENTRIES {
        prompt.push_str(&format!(
            "\n({} further entries omitted)\n",
            request.actions.len() - MAX_PROMPT_ENTRIES
        ));
    }

    prompt
}
