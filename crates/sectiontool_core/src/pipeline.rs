use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogTemplate, ComponentCatalog};
use crate::classify::SectionType;
use crate::model::{Section, Template, validate_sections};
use crate::section::synthesize_sections;
use crate::store::{ReplaceOutcome, TemplateStore};

/// Validate then fully replace a template's sections.
pub fn update_template(
    store: &mut dyn TemplateStore,
    id: &str,
    sections: &[Section],
) -> Result<ReplaceOutcome> {
    validate_sections(id, sections)?;
    store.replace_sections(id, sections)
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub template: Option<String>,
    pub dry_run: bool,
    pub create_missing: bool,
    /// Pause after this many records; 0 disables pacing.
    pub pause_every: usize,
    pub pause_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    Updated,
    Unchanged,
    Created,
    Planned,
    Failed,
}

impl ApplyAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Created => "created",
            Self::Planned => "planned",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyTemplateResult {
    pub id: String,
    pub action: ApplyAction,
    pub sections: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub backend: String,
    pub dry_run: bool,
    pub requested: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub created: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub templates: Vec<ApplyTemplateResult>,
}

impl ApplyReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Synthesize and write every selected catalog template, one at a time.
///
/// A failure on one template is logged and recorded, then the loop moves on;
/// nothing is retried or rolled back.
pub fn apply_catalog(
    store: &mut dyn TemplateStore,
    catalog: &ComponentCatalog,
    options: &ApplyOptions,
) -> Result<ApplyReport> {
    let selected = select_templates(catalog, options.template.as_deref())?;
    let mut report = ApplyReport {
        backend: store.backend_name().to_string(),
        dry_run: options.dry_run,
        requested: selected.len(),
        updated: 0,
        unchanged: 0,
        created: 0,
        failed: 0,
        errors: Vec::new(),
        templates: Vec::with_capacity(selected.len()),
    };

    for (index, entry) in selected.iter().enumerate() {
        if index > 0 && options.pause_every > 0 && index % options.pause_every == 0 {
            debug!(
                processed = index,
                pause_ms = options.pause_ms,
                "pausing between batches"
            );
            sleep(Duration::from_millis(options.pause_ms));
        }

        let sections = synthesize_sections(&entry.components);
        let result = if options.dry_run {
            Ok(ApplyAction::Planned)
        } else {
            apply_one(store, entry, &sections, options.create_missing)
        };

        match result {
            Ok(action) => {
                match action {
                    ApplyAction::Updated => report.updated += 1,
                    ApplyAction::Unchanged => report.unchanged += 1,
                    ApplyAction::Created => report.created += 1,
                    ApplyAction::Planned | ApplyAction::Failed => {}
                }
                info!(
                    template = %entry.id,
                    action = action.as_str(),
                    sections = sections.len(),
                    "template processed"
                );
                report.templates.push(ApplyTemplateResult {
                    id: entry.id.clone(),
                    action,
                    sections: sections.len(),
                    detail: None,
                });
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(template = %entry.id, error = %message, "template update failed");
                report.failed += 1;
                report.errors.push(format!("{}: {message}", entry.id));
                report.templates.push(ApplyTemplateResult {
                    id: entry.id.clone(),
                    action: ApplyAction::Failed,
                    sections: sections.len(),
                    detail: Some(message),
                });
            }
        }
    }

    Ok(report)
}

fn select_templates<'a>(
    catalog: &'a ComponentCatalog,
    filter: Option<&str>,
) -> Result<Vec<&'a CatalogTemplate>> {
    match filter {
        Some(id) => match catalog.find(id) {
            Some(entry) => Ok(vec![entry]),
            None => bail!("template `{id}` is not in the component catalog"),
        },
        None => Ok(catalog.templates.iter().collect()),
    }
}

fn apply_one(
    store: &mut dyn TemplateStore,
    entry: &CatalogTemplate,
    sections: &[Section],
    create_missing: bool,
) -> Result<ApplyAction> {
    let outcome = update_template(store, &entry.id, sections)?;
    debug!(template = %entry.id, outcome = outcome.as_str(), "sections replaced");
    match outcome {
        ReplaceOutcome::Updated => Ok(ApplyAction::Updated),
        ReplaceOutcome::Unchanged => Ok(ApplyAction::Unchanged),
        ReplaceOutcome::NotFound if create_missing => {
            let mut template = entry.to_template();
            template.sections = sections.to_vec();
            if store.insert_template(&template)? {
                Ok(ApplyAction::Created)
            } else {
                bail!("template appeared while it was being created")
            }
        }
        ReplaceOutcome::NotFound => {
            bail!("template not found in store (run `sectiontool seed` or pass --create-missing)")
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateVerification {
    pub id: String,
    pub sections: usize,
    pub passed: bool,
    pub problems: Vec<String>,
    pub advisories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub backend: String,
    pub checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub by_type: BTreeMap<String, usize>,
    pub templates: Vec<TemplateVerification>,
}

impl VerifyReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Re-read every stored template and report on its sections. Read-only.
pub fn verify_templates(store: &mut dyn TemplateStore) -> Result<VerifyReport> {
    let listing = store
        .list_templates()
        .context("failed to load templates for verification")?;
    let mut report = VerifyReport {
        backend: store.backend_name().to_string(),
        checked: listing.len(),
        passed: 0,
        failed: 0,
        by_type: BTreeMap::new(),
        templates: Vec::with_capacity(listing.len()),
    };

    for template in &listing.templates {
        for section in &template.sections {
            *report
                .by_type
                .entry(section.section_type.to_string())
                .or_insert(0) += 1;
        }
        let verification = verify_template(template);
        if verification.passed {
            report.passed += 1;
        } else {
            warn!(template = %template.id, problems = ?verification.problems, "template failed verification");
            report.failed += 1;
        }
        report.templates.push(verification);
    }

    for undecodable in &listing.undecodable {
        warn!(template = %undecodable.id, error = %undecodable.error, "stored template does not decode");
        report.failed += 1;
        report.templates.push(TemplateVerification {
            id: undecodable.id.clone(),
            sections: 0,
            passed: false,
            problems: vec![format!("document does not decode: {}", undecodable.error)],
            advisories: Vec::new(),
        });
    }

    Ok(report)
}

pub fn verify_template(template: &Template) -> TemplateVerification {
    let mut problems = Vec::new();
    let mut advisories = Vec::new();

    if template.sections.is_empty() {
        problems.push("no sections".to_string());
    }

    let mut orders = BTreeMap::new();
    for section in &template.sections {
        if section.component.trim().is_empty() {
            problems.push(format!("section at order {} has no component", section.order));
        }
        *orders.entry(section.order).or_insert(0usize) += 1;
        if section.section_type == SectionType::Other {
            advisories.push(format!(
                "{} has an unrecognized type (other)",
                section.component
            ));
        }
        if section.is_required && !section.is_active {
            advisories.push(format!("{} is required but inactive", section.component));
        }
    }
    for (order, count) in orders {
        if count > 1 {
            advisories.push(format!("order {order} is used by {count} sections"));
        }
    }

    TemplateVerification {
        id: template.id.clone(),
        sections: template.sections.len(),
        passed: problems.is_empty(),
        problems,
        advisories,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedReport {
    pub inserted: Vec<String>,
    pub existing: Vec<String>,
    pub errors: Vec<String>,
}

/// Insert catalog templates that the store does not know yet, with no sections.
pub fn seed_templates(
    store: &mut dyn TemplateStore,
    catalog: &ComponentCatalog,
) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    for entry in &catalog.templates {
        match store.insert_template(&entry.to_template()) {
            Ok(true) => {
                info!(template = %entry.id, "seeded template");
                report.inserted.push(entry.id.clone());
            }
            Ok(false) => report.existing.push(entry.id.clone()),
            Err(err) => {
                let message = format!("{err:#}");
                warn!(template = %entry.id, error = %message, "seeding failed");
                report.errors.push(format!("{}: {message}", entry.id));
            }
        }
    }
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateDiff {
    pub id: String,
    pub exists: bool,
    pub changed: bool,
    pub unified: String,
}

/// Compare stored sections with what `apply` would write.
pub fn diff_template(
    store: &mut dyn TemplateStore,
    catalog: &ComponentCatalog,
    id: &str,
) -> Result<TemplateDiff> {
    let entry = catalog
        .find(id)
        .with_context(|| format!("template `{id}` is not in the component catalog"))?;
    let stored = store.get_template(id)?;
    let exists = stored.is_some();
    let stored_sections = stored.map(|template| template.sections).unwrap_or_default();

    let old = render_sections(&stored_sections)?;
    let new = render_sections(&synthesize_sections(&entry.components))?;
    let diff = TextDiff::from_lines(&old, &new);
    let unified = diff
        .unified_diff()
        .context_radius(3)
        .header("stored", "synthesized")
        .to_string();

    Ok(TemplateDiff {
        id: id.to_string(),
        exists,
        changed: old != new,
        unified,
    })
}

fn render_sections(sections: &[Section]) -> Result<String> {
    let mut rendered =
        serde_json::to_string_pretty(sections).context("failed to render sections")?;
    rendered.push('\n');
    Ok(rendered)
}
