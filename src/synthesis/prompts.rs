//! Prompt construction for poster artwork

use super::SynthesisPrompt;
use crate::generation::PosterSpec;

/// Default scene description per event category
const EVENT_PHRASES: &[(&str, &str)] = &[
    ("Church Service", "elegant church service poster with cross and light rays"),
    ("Wedding", "romantic wedding invitation with floral elements gold accents"),
    ("Birthday Party", "colorful birthday celebration poster with balloons confetti"),
    ("Business Conference", "professional corporate conference poster modern design"),
    ("Funeral/Memorial", "peaceful memorial service poster soft blue tones dove"),
    ("Seminar/Workshop", "educational seminar poster professional clean layout"),
    ("Concert/Music Event", "dynamic concert poster with music notes stage lights"),
    ("Charity Event", "heartfelt charity event poster community helping hands"),
    ("Sports Event", "energetic sports event poster dynamic action theme"),
    ("Holiday Celebration", "festive holiday celebration poster seasonal decorations"),
];

const GENERIC_PHRASE: &str = "professional event poster design";

/// Steers the model away from rendered text and low quality output
pub const NEGATIVE_PROMPT: &str = "text, letters, words, typography, watermark, signature, \
    blurry, low quality, distorted, deformed, ugly, bad anatomy";

/// Scene phrase for an event category, case-insensitive
pub fn event_phrase(event_type: &str) -> &'static str {
    let event_type = event_type.trim();
    EVENT_PHRASES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(event_type))
        .map(|(_, phrase)| *phrase)
        .unwrap_or(GENERIC_PHRASE)
}

/// Prompt text kept on the poster record
pub fn stored_prompt(spec: &PosterSpec) -> String {
    spec.description
        .clone()
        .unwrap_or_else(|| event_phrase(&spec.event_type).to_string())
}

/// Full model prompt for `spec`.
///
/// The title is left out: lettering is added over the artwork afterwards
/// and diffusion models render text badly.
pub fn build_prompt(spec: &PosterSpec) -> SynthesisPrompt {
    let (width, height) = spec.size.dimensions();
    let prompt = format!(
        "Design a {} background artwork for a {} poster. {}. \
         High quality professional graphic design, highly detailed, 8k resolution. \
         Do not render any text, letters or typography.",
        spec.style,
        spec.event_type,
        stored_prompt(spec)
    );

    SynthesisPrompt {
        prompt,
        negative_prompt: NEGATIVE_PROMPT.to_string(),
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::SizePreset;

    fn spec(event_type: &str, description: Option<&str>) -> PosterSpec {
        PosterSpec {
            title: "Annual Gathering".to_string(),
            event_type: event_type.to_string(),
            description: description.map(str::to_string),
            style: "vintage".to_string(),
            size: SizePreset::Story,
        }
    }

    #[test]
    fn test_known_categories_have_phrases() {
        assert_eq!(
            event_phrase("Wedding"),
            "romantic wedding invitation with floral elements gold accents"
        );
        assert_eq!(
            event_phrase("concert/music event"),
            "dynamic concert poster with music notes stage lights"
        );
        assert_eq!(EVENT_PHRASES.len(), 10);
    }

    #[test]
    fn test_unknown_category_uses_generic_phrase() {
        assert_eq!(event_phrase("Book Club"), GENERIC_PHRASE);
    }

    #[test]
    fn test_description_overrides_phrase() {
        let with_description = spec("Wedding", Some("beach at sunset"));
        assert_eq!(stored_prompt(&with_description), "beach at sunset");

        let prompt = build_prompt(&with_description);
        assert!(prompt.prompt.contains("beach at sunset"));
        assert!(prompt.prompt.contains("vintage"));
        assert!(!prompt.prompt.contains("Annual Gathering"));
        assert_eq!((prompt.width, prompt.height), (1080, 1920));
        assert_eq!(prompt.negative_prompt, NEGATIVE_PROMPT);
    }
}
