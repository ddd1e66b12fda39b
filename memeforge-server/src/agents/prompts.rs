//! Prompt construction for the three agents

/// Keeps the background free of figures that would clash with the character
pub const BACKGROUND_NEGATIVE: &str = "people, person, human, face, character, text, watermark, logo";

pub const CHARACTER_NEGATIVE: &str =
    "background scenery, multiple subjects, cropped, text, watermark, shadow on background";

pub const CAPTION_SYSTEM: &str = "You write captions for image macro memes. \
Reply with a JSON object {\"top_text\": string, \"bottom_text\": string}. \
Each line is at most 8 words, punchy, and works in all caps. \
The top text sets up the joke and the bottom text delivers it. No hashtags, no emoji.";

fn style_suffix(style: Option<&str>) -> String {
    match style.map(str::trim).filter(|s| !s.is_empty()) {
        Some(style) => format!(", in {} style", style),
        None => String::new(),
    }
}

pub fn background_prompt(concept: &str, style: Option<&str>) -> String {
    format!(
        "Wide establishing shot of the setting for: {}{}. \
         Empty scene with no people or characters, clear open space in the lower center, \
         detailed environment, soft lighting",
        concept.trim(),
        style_suffix(style)
    )
}

pub fn character_prompt(concept: &str, style: Option<&str>) -> String {
    format!(
        "Full-body portrait of the main character of: {}{}. \
         Single subject, centered, expressive pose, isolated on a plain solid white background, \
         no scenery, no shadows",
        concept.trim(),
        style_suffix(style)
    )
}

pub fn caption_user_prompt(concept: &str, style: Option<&str>) -> String {
    match style.map(str::trim).filter(|s| !s.is_empty()) {
        Some(style) => format!(
            "Meme concept: {}\nThe image is drawn in {} style.",
            concept.trim(),
            style
        ),
        None => format!("Meme concept: {}", concept.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_appended_when_present() {
        let p = background_prompt("cat in a server room", Some("pixel art"));
        assert!(p.contains("cat in a server room, in pixel art style"));

        let p = character_prompt("cat in a server room", Some("  "));
        assert!(!p.contains("style"));
        assert!(p.contains("white background"));
    }

    #[test]
    fn test_caption_prompt() {
        assert_eq!(caption_user_prompt(" dogs ", None), "Meme concept: dogs");
        assert!(caption_user_prompt("dogs", Some("noir")).contains("noir style"));
    }
}
