use anyhow::{Context, Result};
use clap::Parser;
use querypack::config::{resolve_config, validate_config, VerifyConfig};
use querypack::ops;
use querypack::verify::{CancelToken, TracingReporter};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{Command, PackArgs, RootArgs, UnpackArgs, VerifyArgs};

fn main() -> Result<()> {
    init_tracing();
    let args = RootArgs::parse();
    let action = args.command.name();
    run(args.command).with_context(|| format!("{action:?} failed"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Pack(args) => cmd_pack(args),
        Command::Unpack(args) => cmd_unpack(args),
        Command::Verify(args) => cmd_verify(args),
    }
}

fn cmd_pack(args: PackArgs) -> Result<()> {
    let text = ops::pack(&args.source, &args.exclude)?;
    match &args.output {
        Some(path) => {
            write_private(path, text.as_bytes())?;
            tracing::info!(path = %path.display(), "wrote pack");
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn cmd_unpack(args: UnpackArgs) -> Result<()> {
    let (_, written) = ops::unpack(&args.pack, &args.output)?;
    println!("{written} queries saved to {}", args.output.display());
    Ok(())
}

fn cmd_verify(args: VerifyArgs) -> Result<()> {
    let config = verify_config(&args)?;
    let verifier = config.build_verifier()?;
    tracing::debug!(
        runner = %config.osqueryi.display(),
        platform = verifier.host_platform(),
        timeout_secs = config.timeout_secs,
        "verification settings"
    );
    let cancel = CancelToken::new();
    install_interrupt(&cancel)?;
    let report = ops::verify(
        &args.path,
        &args.exclude,
        &verifier,
        config.batch_options(),
        &cancel,
        &TracingReporter,
    )?;
    report.check()?;
    Ok(())
}

/// Config file values overridden by flags.
fn verify_config(args: &VerifyArgs) -> Result<VerifyConfig> {
    let mut config = resolve_config(args.config.as_deref())?;
    if let Some(osqueryi) = &args.osqueryi {
        config.osqueryi = osqueryi.clone();
    }
    if let Some(raw) = &args.runner_args {
        config.runner_args = shell_words::split(raw).context("parse --runner-args")?;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(platform) = &args.platform {
        config.platform = Some(platform.clone());
    }
    validate_config(&config)?;
    Ok(config)
}

/// Trip `cancel` on SIGINT/SIGTERM so running queries are killed. A second
/// signal exits immediately.
///
/// Runner processes live in their own process groups and never see the
/// terminal's signal themselves.
fn install_interrupt(cancel: &CancelToken) -> Result<()> {
    for signal in [SIGINT, SIGTERM] {
        flag::register_conditional_shutdown(signal, 1, cancel.flag())
            .context("install signal handler")?;
        flag::register(signal, cancel.flag()).context("install signal handler")?;
    }
    Ok(())
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
