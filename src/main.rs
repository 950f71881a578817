mod cli;
mod commands;
mod config;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Config;
use state::StateFile;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Config,
    pub state: StateFile,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "bundlectl", &mut io::stdout());
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    let state_path = match cli.state {
        Some(path) => path,
        None => config.state_path()?,
    };

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config,
        state: StateFile::new(state_path),
    };

    dispatch(&ctx, cli.command)
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Bundles => commands::bundles::list(ctx),
        Command::Checksum { bundle } => commands::bundles::checksum(ctx, &bundle),
        Command::Compile(args) => commands::compile::run(ctx, args),
        Command::Create(args) => commands::objects::create(ctx, args),
        Command::Edit(args) => commands::objects::edit(ctx, args),
        Command::Delete { key } => commands::objects::delete(ctx, &key),
        Command::Reconcile(args) => commands::reconcile::run(ctx, args),
        Command::Status => commands::objects::status(ctx),
        Command::Completions { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::RendererKind;
    use deployer::ObjectKey;
    use reconciler::ObjectStore;
    use std::fs;
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> Context {
        let config = Config {
            renderer: RendererKind::Builtin,
            jobs: 2,
            ..Config::default()
        };
        Context {
            verbose: 0,
            quiet: true,
            config,
            state: StateFile::new(temp.path().join("state.json")),
        }
    }

    fn run(ctx: &Context, args: &[&str]) -> Result<()> {
        let cli = Cli::try_parse_from(std::iter::once("bundlectl").chain(args.iter().copied()))?;
        dispatch(ctx, cli.command)
    }

    fn command(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("bundlectl").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_bundles_and_checksum() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        run(&ctx, &["bundles"]).unwrap();
        run(&ctx, &["checksum", "rapid"]).unwrap();

        let err = run(&ctx, &["checksum", "canary"]).unwrap_err();
        assert!(err.to_string().contains("Unknown release bundle"));
    }

    #[test]
    fn test_compile_applies_overrides() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let Command::Compile(args) = command(&[
            "compile",
            "rapid",
            "--name-prefix",
            "foo-bar",
            "--replicas",
            "999",
        ]) else {
            panic!("expected compile");
        };

        let out = commands::compile::render(&ctx, args).unwrap();
        assert!(out.contains("name: foo-bar-web"));
        assert!(out.contains("replicas: 999"));
    }

    #[test]
    fn test_object_lifecycle_in_state_file() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let key = ObjectKey::new("team", "web");

        run(&ctx, &["create", "team/web", "--bundle", "stable", "--replicas", "2"]).unwrap();
        let obj = ctx.state.load().unwrap().get(&key).unwrap().unwrap();
        assert_eq!(obj.spec.replicas, 2);
        assert_eq!(obj.generation(), 1);

        run(&ctx, &["edit", "team/web", "--replicas", "4"]).unwrap();
        let obj = ctx.state.load().unwrap().get(&key).unwrap().unwrap();
        assert_eq!(obj.spec.replicas, 4);
        assert_eq!(obj.generation(), 2);

        run(&ctx, &["status"]).unwrap();

        // Never reconciled, so no finalizer holds it back
        run(&ctx, &["delete", "team/web"]).unwrap();
        assert!(ctx.state.load().unwrap().list().is_empty());
    }

    #[test]
    fn test_dry_run_reconcile_keeps_state() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        run(&ctx, &["create", "demo", "--bundle", "rapid", "--replicas", "3"]).unwrap();
        let before = fs::read_to_string(ctx.state.path()).unwrap();

        run(&ctx, &["reconcile", "--dry-run"]).unwrap();

        assert_eq!(fs::read_to_string(ctx.state.path()).unwrap(), before);
    }

    #[test]
    fn test_reconcile_empty_state() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        run(&ctx, &["reconcile"]).unwrap();
        assert!(!ctx.state.path().exists());
    }
}
