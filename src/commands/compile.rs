use anyhow::{Context as _, Result};
use deployer::{CancelToken, ManifestOption, build_manifests};
use std::fs;

use crate::Context;
use crate::cli::CompileArgs;
use crate::commands::bundles;

pub fn run(ctx: &Context, args: CompileArgs) -> Result<()> {
    let manifests = render(ctx, args)?;
    print!("{manifests}");
    if !manifests.ends_with('\n') {
        println!();
    }
    Ok(())
}

/// Compile the requested bundle and return the rendered manifests
pub fn render(ctx: &Context, args: CompileArgs) -> Result<String> {
    let registry = ctx.config.registry()?;
    let bundle = bundles::resolve(&registry, &args.bundle)?;

    let mut options = Vec::new();
    if let Some(prefix) = args.name_prefix {
        options.push(ManifestOption::NamePrefix(prefix));
    }
    for path in &args.patches {
        let patch = fs::read_to_string(path)
            .with_context(|| format!("Failed to read patch file: {}", path.display()))?;
        options.push(ManifestOption::Patch(patch));
    }
    if let Some(replicas) = args.replicas {
        options.push(ManifestOption::Replicas(replicas));
    }

    let kind = args.renderer.map_or(ctx.config.renderer, Into::into);
    let renderer = ctx.config.renderer(kind);
    let cancel = CancelToken::with_timeout(ctx.config.timeout());

    build_manifests(bundle, options, renderer.as_ref(), &cancel)
        .with_context(|| format!("Failed to compile bundle {}", bundle.name()))
}
