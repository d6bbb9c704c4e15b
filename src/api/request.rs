use serde::{Deserialize, Serialize};

/// Context label used when a request does not name one.
pub const DEFAULT_CONTEXT: &str = "SOC Analysis";

/// Request for a moderation decision.
#[derive(Debug, Serialize, Deserialize)]
pub struct DecideRequest {
    /// Free-text input to moderate
    pub input: String,

    /// Context label (e.g. "Phishing Analysis", "Log Review")
    #[serde(default)]
    pub context: Option<String>,
}

impl DecideRequest {
    pub fn context(&self) -> &str {
        match self.context.as_deref() {
            Some(c) if !c.trim().is_empty() => c,
            _ => DEFAULT_CONTEXT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialization() {
        let req: DecideRequest =
            serde_json::from_str(r#"{"input": "rm -rf /", "context": "Log Review"}"#).unwrap();

        assert_eq!(req.input, "rm -rf /");
        assert_eq!(req.context(), "Log Review");
    }

    #[test]
    fn test_context_defaults() {
        let req: DecideRequest = serde_json::from_str(r#"{"input": "hi"}"#).unwrap();
        assert_eq!(req.context(), DEFAULT_CONTEXT);

        let req: DecideRequest = serde_json::from_str(r#"{"input": "hi", "context": " "}"#).unwrap();
        assert_eq!(req.context(), DEFAULT_CONTEXT);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let req: DecideRequest =
            serde_json::from_str(r#"{"input": "hi", "session": "abc"}"#).unwrap();
        assert_eq!(req.input, "hi");
    }
}
