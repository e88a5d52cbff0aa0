//! Attempt-indexed instruction framing.
//!
//! When the service keeps rejecting the same request, re-sending it
//! verbatim tends to reproduce the rejection. Later attempts therefore
//! rephrase the instruction and, on the last variant, drop the system
//! instruction entirely.

const SYSTEM_INSTRUCTION: &str = "You are an expert digital artist specialised in photo retouching. \
Transform the image following the requested style, keep the person's original facial features \
and do not add any text or logos.";

const SOFT_SYSTEM_INSTRUCTION: &str =
    "Apply an artistic style to the image while preserving the face.";

/// The text parts of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    pub system_instruction: Option<String>,
    pub prompt: String,
}

/// Framing to use on zero-based `attempt` for the style instruction
/// `style`.
///
/// | attempt | system instruction | prompt                                   |
/// |---------|--------------------|------------------------------------------|
/// | 2       | softened           | `Style: {style}. Keep the identity.`     |
/// | 4       | none               | `Transform this photo with this ...`     |
/// | other   | standard           | `{style}`                                |
pub fn framing_for_attempt(attempt: u32, style: &str) -> Framing {
    match attempt {
        2 => Framing {
            system_instruction: Some(SOFT_SYSTEM_INSTRUCTION.to_string()),
            prompt: format!("Style: {style}. Keep the identity."),
        },
        4 => Framing {
            system_instruction: None,
            prompt: format!("Transform this photo with this artistic style: {style}."),
        },
        _ => Framing {
            system_instruction: Some(SYSTEM_INSTRUCTION.to_string()),
            prompt: style.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_framing() {
        for attempt in [0, 1, 3, 5, 9] {
            let f = framing_for_attempt(attempt, "oil painting");
            assert_eq!(f.prompt, "oil painting");
            assert_eq!(f.system_instruction.as_deref(), Some(SYSTEM_INSTRUCTION));
        }
    }

    #[test]
    fn test_softened_framing() {
        let f = framing_for_attempt(2, "oil painting");
        assert_eq!(f.prompt, "Style: oil painting. Keep the identity.");
        assert_eq!(f.system_instruction.as_deref(), Some(SOFT_SYSTEM_INSTRUCTION));
    }

    #[test]
    fn test_bare_framing_drops_system_instruction() {
        let f = framing_for_attempt(4, "oil painting");
        assert!(f.system_instruction.is_none());
        assert!(f.prompt.ends_with("oil painting."));
    }
}
