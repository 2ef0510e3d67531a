//! Inbound body-shape detection (spec §4.4): which wire format a request is
//! using, determined from the request path rather than sniffing the body.

use crate::types::BodyShape;

/// Classify `path` (the request's route, e.g. `/v1/chat/completions`) into a
/// `BodyShape`. Returns `None` for paths that aren't a chat/generation
/// endpoint (embeddings, audio, images, raw completions) — those are
/// forwarded untouched, with no memory injection.
pub fn detect_body_shape(path: &str) -> Option<BodyShape> {
    if path.ends_with("/chat/completions") {
        return Some(BodyShape::OpenAi);
    }
    if path.ends_with("/messages") {
        return Some(BodyShape::Anthropic);
    }
    if path.contains(":generateContent") || path.contains(":streamGenerateContent") {
        return Some(BodyShape::Google);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_openai_shape() {
        assert_eq!(detect_body_shape("/v1/chat/completions"), Some(BodyShape::OpenAi));
    }

    #[test]
    fn detects_anthropic_shape() {
        assert_eq!(detect_body_shape("/v1/messages"), Some(BodyShape::Anthropic));
    }

    #[test]
    fn detects_google_shape() {
        assert_eq!(
            detect_body_shape("/v1/models/gemini-1.5-pro:generateContent"),
            Some(BodyShape::Google)
        );
    }

    #[test]
    fn unrecognised_path_is_none() {
        assert_eq!(detect_body_shape("/v1/embeddings"), None);
    }
}
