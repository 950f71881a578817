use anyhow::{Context as _, Result};
use colored::Colorize;
use release::{Registry, ReleaseBundle};

use crate::Context;
use crate::ui;

pub fn list(ctx: &Context) -> Result<()> {
    let registry = ctx.config.registry()?;
    if registry.is_empty() {
        ui::warn("No release bundles registered");
        return Ok(());
    }

    if !ctx.quiet {
        ui::header("Release Bundles");
    }
    for bundle in registry.iter() {
        let checksum = bundle
            .checksum()
            .with_context(|| format!("Failed to checksum bundle {}", bundle.name()))?;
        println!(
            "  {:<16} {} {}",
            bundle.name().bold(),
            format!("target={}", bundle.target_name()).dimmed(),
            ui::short_checksum(&checksum)
        );
    }
    Ok(())
}

pub fn checksum(ctx: &Context, name: &str) -> Result<()> {
    let registry = ctx.config.registry()?;
    let bundle = resolve(&registry, name)?;
    let checksum = bundle
        .checksum()
        .with_context(|| format!("Failed to checksum bundle {name}"))?;
    println!("{checksum}");
    Ok(())
}

/// Look up a bundle, listing the known names when it is missing
pub fn resolve<'a>(registry: &'a Registry, name: &str) -> Result<&'a ReleaseBundle> {
    registry.get(name).with_context(|| {
        let known: Vec<&str> = registry.names().collect();
        format!(
            "Unknown release bundle '{name}' (known: {})",
            known.join(", ")
        )
    })
}
