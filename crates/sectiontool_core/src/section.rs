use serde_json::{Map, Value};

use crate::classify::{SectionType, classify_component};
use crate::model::Section;

/// Starter configuration attached to a freshly synthesized section.
pub fn default_props(section_type: SectionType) -> Map<String, Value> {
    let limit = match section_type {
        SectionType::Categories => Some(6),
        SectionType::Products => Some(8),
        SectionType::Testimonials => Some(3),
        SectionType::Brands => Some(6),
        SectionType::Blogs => Some(3),
        _ => None,
    };

    let mut props = Map::new();
    if let Some(limit) = limit {
        props.insert("limit".to_string(), Value::from(limit));
    }
    props
}

/// Turn component names, in render order, into section records.
pub fn synthesize_sections<S: AsRef<str>>(components: &[S]) -> Vec<Section> {
    components
        .iter()
        .enumerate()
        .map(|(index, component)| synthesize_section(component.as_ref(), index))
        .collect()
}

fn synthesize_section(component: &str, order: usize) -> Section {
    let section_type = classify_component(component);
    Section {
        section_type,
        component: component.to_string(),
        name: format!("Section {component}"),
        description: format!("{component} ({section_type})"),
        order,
        is_active: true,
        is_required: section_type.is_required(),
        default_props: default_props(section_type),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn default_props_table() {
        assert_eq!(
            Value::Object(default_props(SectionType::Categories)),
            json!({"limit": 6})
        );
        assert_eq!(
            Value::Object(default_props(SectionType::Products)),
            json!({"limit": 8})
        );
        assert_eq!(
            Value::Object(default_props(SectionType::Testimonials)),
            json!({"limit": 3})
        );
        assert_eq!(
            Value::Object(default_props(SectionType::Brands)),
            json!({"limit": 6})
        );
        assert_eq!(
            Value::Object(default_props(SectionType::Blogs)),
            json!({"limit": 3})
        );
        assert!(default_props(SectionType::Footer).is_empty());
        assert!(default_props(SectionType::Other).is_empty());
    }

    #[test]
    fn synthesis_preserves_input_order() {
        let sections = synthesize_sections(&["Hero", "Categories", "Footer1"]);
        let orders = sections.iter().map(|s| s.order).collect::<Vec<_>>();
        let components = sections
            .iter()
            .map(|s| s.component.as_str())
            .collect::<Vec<_>>();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(components, vec!["Hero", "Categories", "Footer1"]);
    }

    #[test]
    fn five_component_home_page() {
        let sections =
            synthesize_sections(&["Header1", "Hero", "Categories", "Products", "Footer1"]);
        assert_eq!(sections.len(), 5);

        let types = sections
            .iter()
            .map(|s| s.section_type.to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            vec!["header", "hero", "categories", "products", "footer"]
        );
        assert_eq!(
            sections.iter().map(|s| s.order).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        assert_eq!(
            sections.iter().map(|s| s.is_required).collect::<Vec<_>>(),
            vec![true, false, false, false, true]
        );
        assert_eq!(sections[2].default_props.get("limit"), Some(&json!(6)));
        assert_eq!(sections[3].default_props.get("limit"), Some(&json!(8)));
    }

    #[test]
    fn required_flag_follows_inferred_type() {
        let sections = synthesize_sections(&[
            "Header3",
            "Marquee",
            "Lookbook",
            "Sparkle",
            "Footer2",
            "FooterBrand",
        ]);
        for section in &sections {
            let expected = matches!(
                section.section_type,
                SectionType::Header | SectionType::Footer
            );
            assert_eq!(section.is_required, expected, "{}", section.component);
        }
        assert!(!sections[5].is_required);
    }

    #[test]
    fn labels_and_flags_are_filled() {
        let sections = synthesize_sections(&[String::from("ProductsElectronic")]);
        let section = &sections[0];
        assert_eq!(section.name, "Section ProductsElectronic");
        assert_eq!(section.description, "ProductsElectronic (products)");
        assert!(section.is_active);
    }

    #[test]
    fn empty_input_yields_no_sections() {
        let components: Vec<String> = Vec::new();
        assert!(synthesize_sections(&components).is_empty());
    }
}
