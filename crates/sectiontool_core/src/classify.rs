use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{Display, EnumString};

/// Semantic category of a template section.
///
/// The set is closed on the Rust side but serialized as a plain lowercase tag,
/// so stored documents stay readable by the storefront renderer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, EnumString, Display,
    Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SectionType {
    Header,
    Hero,
    Categories,
    Products,
    Blogs,
    Collections,
    Banner,
    Marquee,
    Testimonials,
    Brands,
    Footer,
    Lookbook,
    Countdown,
    Slider,
    Features,
    Shopgram,
    Locations,
    #[default]
    Other,
}

impl SectionType {
    /// Header and footer sections are mandatory on every page.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Header | Self::Footer)
    }
}

// Stored documents may carry tags this build does not know yet; they decode as
// `other` instead of failing the whole template.
impl<'de> Deserialize<'de> for SectionType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_str(tag.trim()).unwrap_or(Self::Other))
    }
}

/// Ordered substring rules. The first matching pattern wins, so a name like
/// `BannerCollection` resolves to `collections` because that rule is checked
/// before `banner`.
pub const CLASSIFICATION_RULES: &[(&str, SectionType)] = &[
    ("header", SectionType::Header),
    ("hero", SectionType::Hero),
    ("categor", SectionType::Categories),
    ("product", SectionType::Products),
    ("blog", SectionType::Blogs),
    ("collection", SectionType::Collections),
    ("banner", SectionType::Banner),
    ("marquee", SectionType::Marquee),
    ("testimonial", SectionType::Testimonials),
    ("brand", SectionType::Brands),
    ("footer", SectionType::Footer),
    ("lookbook", SectionType::Lookbook),
    ("countdown", SectionType::Countdown),
    ("slider", SectionType::Slider),
    ("feature", SectionType::Features),
    ("shopgram", SectionType::Shopgram),
    ("location", SectionType::Locations),
];

pub fn classify_component(name: &str) -> SectionType {
    let lowered = name.to_lowercase();
    CLASSIFICATION_RULES
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, section_type)| *section_type)
        .unwrap_or(SectionType::Other)
}
