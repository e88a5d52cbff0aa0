use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Style key that selects the user's free-text prompt instead of a
/// catalogue entry.
pub const CUSTOM_STYLE: &str = "custom";

/// A named restyling instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub key: String,
    pub name: String,
    pub prompt: String,
}

/// Ordered table of available styles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleCatalog {
    styles: Vec<Style>,
}

const BUILTIN: &[(&str, &str, &str)] = &[
    (
        "renaissance",
        "Renaissance",
        "Turn the person into an Italian Renaissance masterpiece. Use chiaroscuro and sfumato, an aged oil-paint texture with fine craquelure, warm rich colours, dramatic old-master lighting and detailed period clothing.",
    ),
    (
        "graffiti",
        "Graffiti",
        "Turn the person into a colourful street-art mural on a brick wall, with spray-paint texture, drips and vibrant colours.",
    ),
    (
        "mosaic",
        "Mosaic",
        "Turn the photo into an ancient Byzantine mosaic made of small golden and coloured tiles, with a tactile, historic look.",
    ),
    (
        "cartoon",
        "Cartoon",
        "Turn this image into a friendly, simple cartoon. Use minimal lines and flat colours.",
    ),
    (
        "statue",
        "Statue",
        "Make the person look like a classical marble statue, including clothes and eyes.",
    ),
    (
        "popart",
        "Pop Art",
        "Turn the photo into a Pop Art piece in the style of Andy Warhol, with saturated contrasting colours and a light halftone effect.",
    ),
    (
        "ukiyo",
        "Ukiyo-e",
        "Turn the photo into a traditional Japanese Ukiyo-e woodblock print with elegant lines, harmonious colours and decorative patterns.",
    ),
    (
        "80s",
        "'80s",
        "Make the person look like they are in an 1980s yearbook photo. Change hairstyle and clothing freely. Do not add any text, names, years or writing to the image.",
    ),
    (
        "neon_noir",
        "Neon Noir",
        "Apply a modern cinematic noir style with strong contrast, rain and reflections from brightly coloured neon signs.",
    ),
    (
        "old",
        "Old",
        "Make the person in the photo look extremely old.",
    ),
];

impl Default for StyleCatalog {
    fn default() -> Self {
        Self {
            styles: BUILTIN
                .iter()
                .map(|(key, name, prompt)| Style {
                    key: key.to_string(),
                    name: name.to_string(),
                    prompt: prompt.to_string(),
                })
                .collect(),
        }
    }
}

impl StyleCatalog {
    /// Build a catalogue from explicit entries. Later duplicates of a key
    /// are dropped.
    pub fn new(styles: Vec<Style>) -> Self {
        let mut unique: Vec<Style> = Vec::with_capacity(styles.len());
        for style in styles {
            if !unique.iter().any(|s| s.key == style.key) {
                unique.push(style);
            }
        }
        Self { styles: unique }
    }

    /// Parse a JSON array of `{ "key", "name", "prompt" }` objects.
    pub fn from_json(json: &str) -> Result<Self> {
        let styles: Vec<Style> = serde_json::from_str(json)?;
        Ok(Self::new(styles))
    }

    pub fn get(&self, key: &str) -> Option<&Style> {
        self.styles.iter().find(|s| s.key == key)
    }

    pub fn styles(&self) -> &[Style] {
        &self.styles
    }

    /// Key of the first entry, used as the initial selection.
    pub fn first_key(&self) -> &str {
        self.styles
            .first()
            .map(|s| s.key.as_str())
            .unwrap_or(CUSTOM_STYLE)
    }

    /// Whether `key` can be selected: a catalogue key or the custom sentinel.
    pub fn contains(&self, key: &str) -> bool {
        key == CUSTOM_STYLE || self.get(key).is_some()
    }

    /// Resolve the instruction text for `key`, reading `custom_prompt` when
    /// the custom sentinel is selected.
    pub fn instruction(&self, key: &str, custom_prompt: &str) -> Result<String> {
        if key == CUSTOM_STYLE {
            let prompt = custom_prompt.trim();
            if prompt.is_empty() {
                return Err(PipelineError::EmptyPrompt);
            }
            return Ok(prompt.to_string());
        }
        self.get(key)
            .map(|s| s.prompt.clone())
            .ok_or_else(|| PipelineError::UnknownStyle(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = StyleCatalog::default();
        assert_eq!(catalog.first_key(), "renaissance");
        assert!(catalog.contains("cartoon"));
        assert!(catalog.contains(CUSTOM_STYLE));
        assert!(!catalog.contains("nope"));
    }

    #[test]
    fn test_instruction_resolution() {
        let catalog = StyleCatalog::default();
        let text = catalog.instruction("statue", "ignored").unwrap();
        assert!(text.contains("marble"));

        let custom = catalog.instruction(CUSTOM_STYLE, "  make it purple ").unwrap();
        assert_eq!(custom, "make it purple");
    }

    #[test]
    fn test_instruction_errors() {
        let catalog = StyleCatalog::default();
        assert!(matches!(
            catalog.instruction(CUSTOM_STYLE, "   "),
            Err(PipelineError::EmptyPrompt)
        ));
        assert!(matches!(
            catalog.instruction("missing", ""),
            Err(PipelineError::UnknownStyle(k)) if k == "missing"
        ));
    }

    #[test]
    fn test_from_json_dedupes() {
        let json = r#"[
            {"key": "a", "name": "A", "prompt": "first"},
            {"key": "a", "name": "A2", "prompt": "second"},
            {"key": "b", "name": "B", "prompt": "third"}
        ]"#;
        let catalog = StyleCatalog::from_json(json).unwrap();
        assert_eq!(catalog.styles().len(), 2);
        assert_eq!(catalog.get("a").unwrap().prompt, "first");
    }

    #[test]
    fn test_empty_catalog_defaults_to_custom() {
        let catalog = StyleCatalog::new(vec![]);
        assert_eq!(catalog.first_key(), CUSTOM_STYLE);
    }
}
