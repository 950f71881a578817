use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use deployer::{CancelToken, Executor, ExecutorCall, KptExecutor, MockExecutor};
use reconciler::{BundleDeployment, Controller, Reconciler};
use std::sync::Arc;

use crate::Context;
use crate::cli::ReconcileArgs;
use crate::ui;

pub fn run(ctx: &Context, args: ReconcileArgs) -> Result<()> {
    let store = Arc::new(ctx.state.load()?);
    let registry = Arc::new(ctx.config.registry()?);
    let renderer = ctx.config.renderer(ctx.config.renderer);

    let recorder = MockExecutor::new();
    let executor: Arc<dyn Executor> = if args.dry_run {
        Arc::new(recorder.clone())
    } else {
        Arc::new(KptExecutor::new(ctx.config.kpt_path()))
    };

    let reconciler = Reconciler::new(store.clone(), registry, renderer, executor);
    let jobs = args.jobs.unwrap_or(ctx.config.jobs);
    let mut controller = Controller::new(reconciler, jobs)
        .context("Failed to start reconcile workers")?
        .with_policy(ctx.config.requeue_policy())
        .with_timeout(ctx.config.timeout());

    let keys = if args.keys.is_empty() {
        store.list().iter().map(BundleDeployment::key).collect()
    } else {
        args.keys
    };
    if keys.is_empty() {
        ui::dim("Nothing to reconcile");
        return Ok(());
    }

    log::info!("Reconciling {} object(s) with {jobs} worker(s)", keys.len());
    controller.enqueue_all(keys);
    let summary = controller.run_until_idle(&CancelToken::new());

    if args.dry_run {
        print_recorded(&recorder);
        ui::warn("Dry run: state not saved");
    } else {
        ctx.state.save(&store)?;
    }

    if !ctx.quiet {
        for (key, outcome) in &summary.outcomes {
            if outcome.is_change() {
                ui::success(&format!("{key}: {outcome}"));
            } else {
                ui::dim(&format!("{key}: {outcome}"));
            }
        }
    }
    for (key, error) in &summary.failed {
        ui::error(&format!("{key}: {error}"));
    }

    if !summary.failed.is_empty() {
        bail!("{} object(s) failed to reconcile", summary.failed.len());
    }
    Ok(())
}

fn print_recorded(recorder: &MockExecutor) {
    print!("{}", format_recorded(recorder));
}

/// Render recorded executor calls as a YAML stream with comment headers
fn format_recorded(recorder: &MockExecutor) -> String {
    let mut out = String::new();
    for call in recorder.calls() {
        match call {
            ExecutorCall::Apply { scope, manifests } => {
                out.push_str(&format!("{} {scope}\n", "# apply".cyan().bold()));
                out.push_str(&manifests);
                if !manifests.ends_with('\n') {
                    out.push('\n');
                }
            }
            ExecutorCall::Destroy { scope } => {
                out.push_str(&format!("{} {scope}\n", "# destroy".red().bold()));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployer::{InventoryScope, ObjectKey};

    #[test]
    fn test_format_recorded_calls() {
        colored::control::set_override(false);
        let recorder = MockExecutor::new();
        let scope = InventoryScope::new(ObjectKey::new("default", "demo"), "uid-1");
        let cancel = CancelToken::new();
        recorder.apply(&scope, "kind: Deployment", &cancel).unwrap();
        recorder.destroy(&scope, &cancel).unwrap();

        let out = format_recorded(&recorder);
        assert_eq!(
            out,
            "# apply default/demo (uid-1)\nkind: Deployment\n# destroy default/demo (uid-1)\n"
        );
    }
}
