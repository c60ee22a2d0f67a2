//! Bundle CLI commands: show, list, scaffold.
//!
//! These only read (or write) configuration documents; no database is
//! opened.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use domchat_core::capability::CapabilityLoader;
use domchat_core::config::ConfigResolver;
use domchat_core::session::SessionAssembler;
use domchat_infra::capability::builtin_registry;
use domchat_infra::config::{FsConfigSource, ProcessEnv, scaffold_bundle};

use crate::state::ConcreteResolver;

fn resolver(config_dir: &Path) -> ConcreteResolver {
    ConfigResolver::new(FsConfigSource::new(config_dir), ProcessEnv)
}

/// Print the resolved bundle: identity, partition, capabilities and the
/// assembled instructions.
///
/// # Examples
///
/// ```bash
/// domchat bundle show
/// domchat bundle show --domain customer-support --json
/// ```
pub async fn show_bundle(config_dir: &Path, domain: Option<&str>, json: bool) -> Result<()> {
    let resolver = resolver(config_dir);
    let bundle = match domain {
        Some(id) => resolver.resolve(id).await?,
        None => resolver.resolve_active().await?,
    };
    let loaded = CapabilityLoader::new(Arc::new(builtin_registry())).load(&bundle);
    let instructions = SessionAssembler::build_instructions(&bundle)?;

    if json {
        let out = serde_json::json!({
            "bundle": &*bundle,
            "capabilities": loaded.names(),
            "warnings": loaded.warnings,
            "instructions": instructions,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style(&bundle.display.name).cyan().bold(),
        style(format!("({})", bundle.id)).dim()
    );
    if !bundle.display.description.is_empty() {
        println!("  {}", style(&bundle.display.description).dim());
    }
    println!();
    println!("  {}  {}", style("Partition:").bold(), bundle.partition);
    println!(
        "  {}      {} {}",
        style("Agent:").bold(),
        bundle.agent.name,
        style(format!("[{}]", bundle.agent.model)).dim()
    );
    println!(
        "  {}  {}",
        style("Templates:").bold(),
        bundle.template_keys.join(", ")
    );
    println!();
    println!("  {}", style("Capabilities:").bold());
    for name in loaded.names() {
        println!("    {} {name}", style("+").green());
    }
    for warning in &loaded.warnings {
        println!("    {} {}", style("!").yellow().bold(), style(warning).yellow());
    }
    println!();
    println!("  {}", style("Instructions:").bold());
    for line in instructions.lines() {
        println!("    {}", style(line).dim());
    }
    println!();

    Ok(())
}

/// List available bundles, marking the active one.
pub async fn list_bundles(config_dir: &Path, domain: Option<&str>, json: bool) -> Result<()> {
    let resolver = resolver(config_dir);
    let ids = resolver.list_bundles().await?;
    let active = match domain {
        Some(id) => Some(id.to_string()),
        None => resolver.active_bundle_id().await.ok(),
    };

    if json {
        let out = serde_json::json!({ "bundles": ids, "active": active });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if ids.is_empty() {
        println!();
        println!(
            "  {} No bundles under {}. Create one with: {}",
            style("i").blue().bold(),
            style(config_dir.join("domains").display()).cyan(),
            style("domchat bundle scaffold <id> --name <name>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Bundle").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Partition").fg(Color::White),
        Cell::new("").fg(Color::White),
    ]);

    for id in &ids {
        let marker = if active.as_deref() == Some(id.as_str()) {
            Cell::new("active").fg(Color::Green)
        } else {
            Cell::new("")
        };
        match resolver.resolve(id).await {
            Ok(bundle) => table.add_row(vec![
                Cell::new(id).fg(Color::Cyan),
                Cell::new(&bundle.display.name),
                Cell::new(&bundle.partition).fg(Color::DarkGrey),
                marker,
            ]),
            Err(e) => table.add_row(vec![
                Cell::new(id).fg(Color::Cyan),
                Cell::new(e.to_string()).fg(Color::Red),
                Cell::new(""),
                marker,
            ]),
        };
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// Write a new bundle skeleton.
pub async fn scaffold(
    config_dir: &Path,
    id: &str,
    name: &str,
    description: Option<&str>,
    json: bool,
) -> Result<()> {
    let written = scaffold_bundle(config_dir, id, name, description).await?;

    if json {
        let paths: Vec<String> = written.iter().map(|p| p.display().to_string()).collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "id": id, "files": paths }))?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Bundle '{}' created",
        style("✓").green().bold(),
        style(id).cyan()
    );
    for path in &written {
        println!("    {}", style(path.display()).dim());
    }
    println!();
    println!(
        "  Activate it with {} or set {} in app.config.yaml",
        style(format!("--domain {id}")).yellow(),
        style(format!("app.active_domain: {id}")).yellow()
    );
    println!();
    Ok(())
}
