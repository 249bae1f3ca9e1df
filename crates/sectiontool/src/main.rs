use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use sectiontool_core::audit::{AuditReport, audit_templates};
use sectiontool_core::catalog::{ComponentCatalog, load_catalog};
use sectiontool_core::config::{ToolConfig, load_config};
use sectiontool_core::migrate::{
    MIGRATIONS_POLICY_MESSAGE, latest_version, pending_migration_count, run_migrations,
};
use sectiontool_core::pipeline::{
    ApplyOptions, ApplyReport, VerifyReport, apply_catalog, diff_template, seed_templates,
    verify_templates,
};
use sectiontool_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    resolve_paths,
};
use sectiontool_core::section::synthesize_sections;
use sectiontool_core::store::{SqliteTemplateStore, TemplateStore, open_store};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "sectiontool",
    version,
    about = "Normalize Ecomus template sections from the component catalog"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create .sectiontool/ and materialize config.toml")]
    Init(InitArgs),
    #[command(about = "Show runtime layout and store status")]
    Status,
    Catalog(CatalogArgs),
    #[command(about = "Print the sections synthesized for a component list")]
    Synthesize(SynthesizeArgs),
    #[command(about = "Insert catalog templates missing from the store")]
    Seed,
    #[command(about = "Synthesize and write sections for catalog templates")]
    Apply(ApplyArgs),
    #[command(about = "Re-read stored templates and report pass/fail")]
    Verify(JsonArgs),
    #[command(about = "Diff stored sections against freshly synthesized ones")]
    Diff(DiffArgs),
    #[command(about = "Check stored components against a front-end source tree")]
    Audit(AuditArgs),
    Db(DbArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .sectiontool/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct CatalogArgs {
    #[command(subcommand)]
    command: CatalogSubcommand,
}

#[derive(Debug, Subcommand)]
enum CatalogSubcommand {
    List,
    Show { id: String },
}

#[derive(Debug, Args)]
struct SynthesizeArgs {
    #[arg(required = true, value_name = "COMPONENT")]
    components: Vec<String>,
}

#[derive(Debug, Args)]
struct ApplyArgs {
    #[arg(short = 't', long, value_name = "ID", help = "Only process this template")]
    template: Option<String>,
    #[arg(long, help = "Synthesize without writing")]
    dry_run: bool,
    #[arg(long, help = "Create templates that are missing from the store")]
    create_missing: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct JsonArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct DiffArgs {
    id: String,
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[arg(long, value_name = "PATH", help = "Front-end components directory")]
    components_dir: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Catalog(CatalogArgs { command })) => match command {
            CatalogSubcommand::List => run_catalog_list(&runtime),
            CatalogSubcommand::Show { id } => run_catalog_show(&runtime, &id),
        },
        Some(Commands::Synthesize(args)) => run_synthesize(args),
        Some(Commands::Seed) => run_seed(&runtime),
        Some(Commands::Apply(args)) => run_apply(&runtime, args),
        Some(Commands::Verify(args)) => run_verify(&runtime, args.json),
        Some(Commands::Diff(DiffArgs { id })) => run_diff(&runtime, &id),
        Some(Commands::Audit(args)) => run_audit(&runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Resolved paths plus the config they point at.
struct Session {
    paths: ResolvedPaths,
    config: ToolConfig,
}

impl Session {
    fn load(runtime: &RuntimeOptions) -> Result<Self> {
        let paths = resolve_runtime_paths(runtime)?;
        let config = load_config(&paths.config_path)?;
        if runtime.diagnostics {
            println!("[diagnostics]\n{}\n", paths.diagnostics());
        }
        Ok(Self { paths, config })
    }

    fn catalog(&self) -> Result<ComponentCatalog> {
        load_catalog(self.config.catalog_path(&self.paths.project_root).as_deref())
    }

    fn store(&self) -> Result<Box<dyn TemplateStore>> {
        let store =
            open_store(&self.config, &self.paths).context("failed to open template store")?;
        info!(backend = store.backend_name(), "opened template store");
        Ok(store)
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let session = Session::load(runtime)?;
    let paths = &session.paths;
    let report = init_layout(
        paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("Initialized sectiontool runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let session = Session::load(runtime)?;
    let paths = &session.paths;
    let status = inspect_runtime(paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("backend: {}", session.config.backend()?.as_str());
    let catalog = session.catalog()?;
    println!("catalog.templates: {}", catalog.len());
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    Ok(())
}

fn run_catalog_list(runtime: &RuntimeOptions) -> Result<()> {
    let session = Session::load(runtime)?;
    let catalog = session.catalog()?;
    println!("catalog list");
    println!("catalog.templates: {}", catalog.len());
    for entry in &catalog.templates {
        println!(
            "template: {} | {} | {} | components={}",
            entry.id,
            entry.name,
            entry.category,
            entry.components.len()
        );
    }
    Ok(())
}

fn run_catalog_show(runtime: &RuntimeOptions, id: &str) -> Result<()> {
    let session = Session::load(runtime)?;
    let catalog = session.catalog()?;
    let Some(entry) = catalog.find(id) else {
        bail!("template `{id}` is not in the component catalog");
    };
    println!("catalog show");
    println!("id: {}", entry.id);
    println!("name: {}", entry.name);
    println!("category: {}", entry.category);
    for section in synthesize_sections(&entry.components) {
        println!(
            "section.{}: {} -> {}{}",
            section.order,
            section.component,
            section.section_type,
            if section.is_required {
                " (required)"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn run_synthesize(args: SynthesizeArgs) -> Result<()> {
    let sections = synthesize_sections(&args.components);
    print_json(&sections)
}

fn run_seed(runtime: &RuntimeOptions) -> Result<()> {
    let session = Session::load(runtime)?;
    let catalog = session.catalog()?;
    let mut store = session.store()?;
    let report = seed_templates(store.as_mut(), &catalog)?;

    println!("seed");
    println!("backend: {}", store.backend_name());
    println!("inserted: {}", report.inserted.len());
    for id in &report.inserted {
        println!("inserted.id: {id}");
    }
    println!("existing: {}", report.existing.len());
    print_errors(&report.errors);
    Ok(())
}

fn run_apply(runtime: &RuntimeOptions, args: ApplyArgs) -> Result<()> {
    let session = Session::load(runtime)?;
    let catalog = session.catalog()?;
    let mut store = session.store()?;
    let options = ApplyOptions {
        template: args.template,
        dry_run: args.dry_run,
        create_missing: args.create_missing,
        pause_every: session.config.pause_every(),
        pause_ms: session.config.pause_ms(),
    };
    let report = apply_catalog(store.as_mut(), &catalog, &options)?;
    if args.json {
        return print_json(&report);
    }
    print_apply_report(&report);
    Ok(())
}

fn run_verify(runtime: &RuntimeOptions, json: bool) -> Result<()> {
    let session = Session::load(runtime)?;
    let mut store = session.store()?;
    let report = verify_templates(store.as_mut())?;
    if json {
        print_json(&report)?;
    } else {
        print_verify_report(&report);
    }
    if !report.success() {
        bail!("{} of {} templates failed verification", report.failed, report.checked);
    }
    Ok(())
}

fn run_diff(runtime: &RuntimeOptions, id: &str) -> Result<()> {
    let session = Session::load(runtime)?;
    let catalog = session.catalog()?;
    let mut store = session.store()?;
    let diff = diff_template(store.as_mut(), &catalog, id)?;

    println!("diff {}", diff.id);
    println!("stored: {}", format_flag(diff.exists));
    println!("changed: {}", format_flag(diff.changed));
    if diff.changed {
        print!("{}", diff.unified);
    }
    Ok(())
}

fn run_audit(runtime: &RuntimeOptions, args: AuditArgs) -> Result<()> {
    let session = Session::load(runtime)?;
    let components_dir = match args.components_dir {
        Some(dir) => dir,
        None => session
            .config
            .components_dir(&session.paths.project_root)
            .context("no components directory: pass --components-dir or set [frontend].components_dir")?,
    };
    let mut store = session.store()?;
    let report = audit_templates(store.as_mut(), &components_dir)?;
    if args.json {
        return print_json(&report);
    }
    print_audit_report(&report);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let session = Session::load(runtime)?;
    let report = run_migrations(&session.paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_path(&session.paths.db_path));
    println!("applied: {}", report.applied.len());
    for migration in &report.applied {
        println!("applied.v{:03}: {}", migration.version, migration.name);
    }
    println!("current_version: {}", report.current_version);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let session = Session::load(runtime)?;
    let paths = &session.paths;
    let status = inspect_runtime(paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("schema.latest_version: {}", latest_version());
    let pending = pending_migration_count(paths)?;
    println!("schema.pending: {pending}");
    if status.db_exists && pending == 0 {
        let store = SqliteTemplateStore::open(&paths.db_path)?;
        println!("templates.count: {}", store.count()?);
    } else {
        println!("templates.count: n/a");
        println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    }
    Ok(())
}

fn print_apply_report(report: &ApplyReport) {
    println!("apply{}", if report.dry_run { " (dry run)" } else { "" });
    println!("backend: {}", report.backend);
    println!("requested: {}", report.requested);
    println!("updated: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("created: {}", report.created);
    println!("failed: {}", report.failed);
    for result in &report.templates {
        println!(
            "template.{}: {} (sections={})",
            result.id,
            result.action.as_str(),
            result.sections
        );
    }
    print_errors(&report.errors);
}

fn print_verify_report(report: &VerifyReport) {
    println!("verify");
    println!("backend: {}", report.backend);
    println!("checked: {}", report.checked);
    println!("passed: {}", report.passed);
    println!("failed: {}", report.failed);
    for (section_type, count) in &report.by_type {
        println!("sections.type.{section_type}: {count}");
    }
    for template in &report.templates {
        println!(
            "template.{}: {} (sections={})",
            template.id,
            if template.passed { "pass" } else { "FAIL" },
            template.sections
        );
        for problem in &template.problems {
            println!("  problem: {problem}");
        }
        for advisory in &template.advisories {
            println!("  advisory: {advisory}");
        }
    }
}

fn print_audit_report(report: &AuditReport) {
    println!("audit");
    println!("components_dir: {}", report.components_dir);
    println!("known_components: {}", report.known_components);
    println!("checked_templates: {}", report.checked_templates);
    println!("checked_sections: {}", report.checked_sections);
    println!("missing.count: {}", report.missing.len());
    for missing in &report.missing {
        println!(
            "missing: {} order={} component={}",
            missing.template, missing.order, missing.component
        );
    }
    println!("type_mismatches.count: {}", report.type_mismatches.len());
    for mismatch in &report.type_mismatches {
        println!(
            "type_mismatch: {} component={} stored={} inferred={}",
            mismatch.template, mismatch.component, mismatch.stored, mismatch.inferred
        );
    }
    println!("undecodable.count: {}", report.undecodable.len());
    for undecodable in &report.undecodable {
        println!("undecodable: {} error={}", undecodable.id, undecodable.error);
    }
}

fn print_errors(errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    println!("errors:");
    for error in errors {
        println!("  - {error}");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn apply_flags_parse_with_global_options() {
        let cli = Cli::try_parse_from([
            "sectiontool",
            "apply",
            "--template",
            "home-1",
            "--dry-run",
            "--project-root",
            "/srv/ecomus",
        ])
        .expect("parse");
        assert_eq!(cli.project_root, Some(PathBuf::from("/srv/ecomus")));
        let Some(Commands::Apply(args)) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.template.as_deref(), Some("home-1"));
        assert!(args.dry_run);
        assert!(!args.create_missing);
    }

    #[test]
    fn paths_and_flags_render_for_reports() {
        assert_eq!(normalize_path(Path::new(r"C:\ecomus\db")), "C:/ecomus/db");
        assert_eq!(format_flag(true), "yes");
        assert_eq!(format_flag(false), "no");
    }
}
