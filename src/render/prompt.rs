//! Prompt construction.
//!
//! Prompts are pure functions of keyword, category and popularity so a
//! re-run asks the renderer exactly the same question.

/// Photographic style appended to the prompt for a category.
pub fn style_for_category(category: &str) -> &'static str {
    match category {
        "business" => {
            "professional corporate stock photography, modern office environment, business meeting, clean composition"
        }
        "technology" => {
            "cutting-edge technology stock photo, futuristic interface, clean minimalist aesthetic, innovation"
        }
        "lifestyle" => {
            "authentic lifestyle stock photography, natural lighting, contemporary setting, wellness focus"
        }
        "food" => {
            "professional food stock photography, appetizing presentation, natural lighting, gourmet styling"
        }
        "nature" => {
            "natural landscape stock photography, environmental beauty, golden hour lighting, scenic view"
        }
        _ => {
            "premium commercial stock photography, professional composition, studio lighting, clean background"
        }
    }
}

/// Quality tier and finishing cues for a popularity score.
///
/// | Popularity | Tier |
/// |------------|------|
/// | 90+ | Ultra-premium viral-quality |
/// | 80-89 | Premium high-demand |
/// | 70-79 | Professional quality |
/// | below 70 | High-quality |
pub fn quality_tier(popularity: u8) -> (&'static str, &'static str) {
    match popularity {
        90.. => (
            "Ultra-premium viral-quality",
            "trending composition, market-leading appeal, viral potential",
        ),
        80..=89 => (
            "Premium high-demand",
            "trending style, commercial appeal, market-ready",
        ),
        70..=79 => (
            "Professional quality",
            "contemporary style, commercial viability",
        ),
        _ => ("High-quality", "professional standard, clean execution"),
    }
}

pub fn build_prompt(keyword: &str, category: &str, popularity: u8) -> String {
    let (tier, cues) = quality_tier(popularity);
    format!(
        "{tier} commercial stock photograph: {keyword}. {}. {cues}. \
         Professional photography, perfect lighting, sharp focus, commercial use ready. \
         Clean composition without text overlays, suitable for marketing and advertising. \
         Ultra-high resolution, professional grade.",
        style_for_category(category)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_contains_keyword_and_style() {
        let prompt = build_prompt("mountain lake", "nature", 50);
        assert!(prompt.starts_with("High-quality commercial stock photograph: mountain lake."));
        assert!(prompt.contains("golden hour lighting"));
        assert!(prompt.ends_with("professional grade."));
    }

    #[test]
    fn popularity_picks_quality_tier() {
        assert!(build_prompt("viral", "general", 95).starts_with("Ultra-premium viral-quality"));
        assert!(build_prompt("viral", "general", 90).contains("viral potential"));
        assert!(build_prompt("hot", "general", 89).starts_with("Premium high-demand"));
        assert!(build_prompt("steady", "general", 70).starts_with("Professional quality"));
        assert!(build_prompt("quiet", "general", 69).starts_with("High-quality"));
    }

    #[test]
    fn unknown_category_uses_general_style() {
        assert_eq!(style_for_category("medical"), style_for_category("general"));
    }

    #[test]
    fn prompt_is_deterministic() {
        assert_eq!(
            build_prompt("storm", "nature", 75),
            build_prompt("storm", "nature", 75)
        );
    }
}
