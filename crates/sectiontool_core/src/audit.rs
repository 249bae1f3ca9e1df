use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use crate::classify::classify_component;
use crate::runtime::normalize_for_display;
use crate::store::{TemplateStore, UndecodableTemplate};

const COMPONENT_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx"];
const SKIPPED_DIRS: &[&str] = &["node_modules", ".next", ".git", "dist", "build"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingComponent {
    pub template: String,
    pub component: String,
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeMismatch {
    pub template: String,
    pub component: String,
    pub stored: String,
    pub inferred: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub components_dir: String,
    pub known_components: usize,
    pub checked_templates: usize,
    pub checked_sections: usize,
    pub missing: Vec<MissingComponent>,
    pub type_mismatches: Vec<TypeMismatch>,
    pub undecodable: Vec<UndecodableTemplate>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.type_mismatches.is_empty() && self.undecodable.is_empty()
    }
}

/// Component names present in a front-end source tree.
///
/// `Hero.jsx` contributes `Hero`; `Header1/index.tsx` contributes `Header1`.
pub fn scan_components(dir: &Path) -> Result<BTreeSet<String>> {
    if !dir.is_dir() {
        bail!("components directory not found: {}", dir.display());
    }

    let mut names = BTreeSet::new();
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_component_source = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| COMPONENT_EXTENSIONS.contains(&ext));
        if !is_component_source {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if stem == "index" {
            if let Some(folder) = path
                .parent()
                .filter(|parent| *parent != dir)
                .and_then(|parent| parent.file_name())
                .and_then(|name| name.to_str())
            {
                names.insert(folder.to_string());
            }
        } else {
            names.insert(stem.to_string());
        }
    }
    Ok(names)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// Cross-check stored sections against the front-end tree. Reports only.
pub fn audit_templates(store: &mut dyn TemplateStore, components_dir: &Path) -> Result<AuditReport> {
    let known = scan_components(components_dir)?;
    let listing = store.list_templates()?;

    let mut report = AuditReport {
        components_dir: normalize_for_display(components_dir),
        known_components: known.len(),
        checked_templates: listing.len(),
        checked_sections: 0,
        missing: Vec::new(),
        type_mismatches: Vec::new(),
        undecodable: listing.undecodable.clone(),
    };

    for template in &listing.templates {
        for section in template.sections_by_order() {
            report.checked_sections += 1;
            if !known.contains(&section.component) {
                report.missing.push(MissingComponent {
                    template: template.id.clone(),
                    component: section.component.clone(),
                    order: section.order,
                });
            }
            let inferred = classify_component(&section.component);
            if inferred != section.section_type {
                report.type_mismatches.push(TypeMismatch {
                    template: template.id.clone(),
                    component: section.component.clone(),
                    stored: section.section_type.to_string(),
                    inferred: inferred.to_string(),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::classify::SectionType;
    use crate::model::Template;
    use crate::section::synthesize_sections;
    use crate::store::tests::MemoryTemplateStore;

    fn write(path: &Path) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, "export default function Component() {}\n").expect("write");
    }

    #[test]
    fn scan_collects_files_and_index_folders() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("components");
        write(&root.join("homes/Hero.jsx"));
        write(&root.join("headers/Header1/index.tsx"));
        write(&root.join("common/Footer1.js"));
        write(&root.join("common/styles.css"));
        write(&root.join("index.js"));
        write(&root.join("node_modules/pkg/Sparkle.js"));

        let names = scan_components(&root).expect("scan");
        let names = names.into_iter().collect::<Vec<_>>();
        assert_eq!(names, vec!["Footer1", "Header1", "Hero"]);
    }

    #[test]
    fn scan_requires_existing_directory() {
        let err = scan_components(Path::new("/nonexistent/components")).expect_err("must fail");
        assert!(err.to_string().contains("components directory not found"));
    }

    #[test]
    fn audit_reports_missing_components_and_type_drift() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("components");
        write(&root.join("Header1.jsx"));
        write(&root.join("Hero.jsx"));
        write(&root.join("Footer1.jsx"));

        let mut template = Template::new("home-1", "Home", "Fashion");
        template.sections = synthesize_sections(&["Header1", "Hero", "ProductsElectronic", "Footer1"]);
        template.sections[1].section_type = SectionType::Slider;
        let mut store = MemoryTemplateStore::with_templates(vec![template]);
        store.undecodable.push(UndecodableTemplate {
            id: "home-broken".to_string(),
            error: "missing field `sections`".to_string(),
        });

        let report = audit_templates(&mut store, &root).expect("audit");
        assert!(!report.is_clean());
        assert_eq!(report.known_components, 3);
        assert_eq!(report.checked_templates, 2);
        assert_eq!(report.undecodable[0].id, "home-broken");
        assert_eq!(report.checked_sections, 4);
        assert_eq!(
            report.missing,
            vec![MissingComponent {
                template: "home-1".to_string(),
                component: "ProductsElectronic".to_string(),
                order: 2,
            }]
        );
        assert_eq!(report.type_mismatches.len(), 1);
        assert_eq!(report.type_mismatches[0].stored, "slider");
        assert_eq!(report.type_mismatches[0].inferred, "hero");
    }
}
