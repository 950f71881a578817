use anyhow::{Context as _, Result};
use colored::Colorize;
use deployer::ObjectKey;
use reconciler::{BundleDeployment, BundleDeploymentSpec, ObjectStore};

use crate::Context;
use crate::cli::{CreateArgs, EditArgs};
use crate::ui;

pub fn create(ctx: &Context, args: CreateArgs) -> Result<()> {
    warn_unknown_bundle(ctx, &args.bundle)?;

    let store = ctx.state.load()?;
    let spec = BundleDeploymentSpec {
        replicas: args.replicas,
        release_bundle: args.bundle,
    };
    let obj = store
        .create(&args.key, spec)
        .with_context(|| format!("Failed to create {}", args.key))?;
    ctx.state.save(&store)?;

    ui::success(&format!("Created {} (uid {})", args.key, obj.metadata.uid));
    if !ctx.quiet {
        ui::dim("Run: bundlectl reconcile");
    }
    Ok(())
}

pub fn edit(ctx: &Context, args: EditArgs) -> Result<()> {
    let store = ctx.state.load()?;
    let current = store
        .get(&args.key)?
        .with_context(|| format!("{} not found", args.key))?;
    if current.is_terminating() {
        ui::warn(&format!(
            "{} is terminating; spec changes will not be applied",
            args.key
        ));
    }

    let mut spec = current.spec.clone();
    if let Some(bundle) = args.bundle {
        warn_unknown_bundle(ctx, &bundle)?;
        spec.release_bundle = bundle;
    }
    if let Some(replicas) = args.replicas {
        spec.replicas = replicas;
    }

    let updated = store
        .update_spec(&args.key, spec)
        .with_context(|| format!("Failed to update {}", args.key))?;
    if updated.generation() == current.generation() {
        ui::dim(&format!("{} unchanged", args.key));
        return Ok(());
    }

    ctx.state.save(&store)?;
    ui::success(&format!(
        "Updated {} (generation {})",
        args.key,
        updated.generation()
    ));
    Ok(())
}

pub fn delete(ctx: &Context, key: &ObjectKey) -> Result<()> {
    let store = ctx.state.load()?;
    let removed = store
        .delete(key)
        .with_context(|| format!("Failed to delete {key}"))?;
    ctx.state.save(&store)?;

    if removed {
        ui::success(&format!("Removed {key}"));
    } else {
        ui::success(&format!("Deletion of {key} requested"));
        if !ctx.quiet {
            ui::dim("Run: bundlectl reconcile to destroy its resources");
        }
    }
    Ok(())
}

pub fn status(ctx: &Context) -> Result<()> {
    let store = ctx.state.load()?;
    let objects = store.list();

    if !ctx.quiet {
        ui::header("BundleDeployments");
        ui::kv("State", &ctx.state.path().display().to_string());
    }
    if objects.is_empty() {
        ui::dim("No objects");
        return Ok(());
    }

    for obj in &objects {
        println!();
        println!("  {} {}", obj.key().to_string().bold(), state_label(obj));
        ui::kv("Bundle", &obj.spec.release_bundle);
        ui::kv("Replicas", &obj.spec.replicas.to_string());
        ui::kv(
            "Generation",
            &format!(
                "{} (observed {})",
                obj.generation(),
                obj.status.observed_generation
            ),
        );
        ui::kv(
            "Checksum",
            &ui::short_checksum(&obj.status.last_applied_release_checksum),
        );
        if ctx.verbose > 0 {
            ui::kv("UID", &obj.metadata.uid);
            let finalizers: Vec<&str> = obj.metadata.finalizers.iter().collect();
            ui::kv("Finalizers", &finalizers.join(", "));
        }
    }
    println!();
    Ok(())
}

fn state_label(obj: &BundleDeployment) -> String {
    if obj.is_terminating() {
        "terminating".red().to_string()
    } else if obj.status.ready && obj.status.observed_generation == obj.generation() {
        "ready".green().to_string()
    } else if obj.status.ready {
        "stale".yellow().to_string()
    } else {
        "pending".yellow().to_string()
    }
}

fn warn_unknown_bundle(ctx: &Context, bundle: &str) -> Result<()> {
    let registry = ctx.config.registry()?;
    if registry.get(bundle).is_none() {
        ui::warn(&format!(
            "Release bundle '{bundle}' is not registered; reconcile will fail until it is"
        ));
    }
    Ok(())
}
