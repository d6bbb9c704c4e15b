/// Label carried by every offline response.
pub const OFFLINE_LABEL: &str = "[OFFLINE RESPONSE - inference backends unavailable]";

/// Prompt characters echoed back in an offline response.
const ECHO_CHARS: usize = 100;

/// Deterministic stand-in used when no real backend can answer.
///
/// The same prompt always produces the same text, and the text is never
/// empty, so a degraded decision still carries usable output.
#[derive(Debug, Clone, Default)]
pub struct OfflineResponder;

impl OfflineResponder {
    pub fn new() -> Self {
        OfflineResponder
    }

    pub fn respond(&self, prompt: &str) -> String {
        let head: String = prompt.chars().take(ECHO_CHARS).collect();
        let ellipsis = if prompt.chars().count() > ECHO_CHARS {
            "..."
        } else {
            ""
        };

        format!(
            "{} No model output is available for this request. Analysis of input: {}{}",
            OFFLINE_LABEL, head, ellipsis
        )
    }
}
