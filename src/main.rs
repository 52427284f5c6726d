//! `swlocate` command line entry point.

use std::io::{self, BufRead, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing_subscriber::{EnvFilter, fmt};

use swlocate::config;
use swlocate::session::{
    ConnectionSecurityOptions, Credentials, HostKeyPolicy, NormalizeOptions, ReplayProvider,
    SecurityLevel, SessionProvider, SessionRecordLevel, SessionRecorder, SshSessionProvider,
};
use swlocate::templates::{self, TemplateMetadata};
use swlocate::walker::{LocateOptions, LocateResult, Termination, Walker};

#[derive(Parser, Debug)]
#[command(name = "swlocate", version)]
#[command(about = "Find the switch port a device is plugged into by walking ARP, MAC and CDP tables")]
struct Cli {
    /// Seed switch address. Prompted for when omitted.
    #[arg(short, long)]
    seed: Option<IpAddr>,

    /// Target device IPv4 address. Prompted for when omitted.
    #[arg(short, long)]
    target: Option<IpAddr>,

    #[arg(short, long, env = "SWLOCATE_USERNAME", default_value = config::DEFAULT_USERNAME)]
    username: String,

    /// Login password. Prompted for without echo when omitted.
    #[arg(long, env = "SWLOCATE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Enable secret; commands run in privileged mode when set.
    #[arg(long, env = "SWLOCATE_ENABLE_PASSWORD", hide_env_values = true)]
    enable_password: Option<String>,

    #[arg(short, long, default_value_t = config::DEFAULT_SSH_PORT)]
    port: u16,

    /// Device template (cisco, ios, cisco_ios).
    #[arg(long, default_value = config::DEFAULT_TEMPLATE)]
    template: String,

    /// SSH algorithm profile: secure, balanced or legacy.
    #[arg(long, default_value = "secure")]
    security: SecurityLevel,

    /// Only connect to switches whose host key is in ~/.ssh/known_hosts.
    /// Without it any host key is accepted.
    #[arg(long)]
    strict_host_keys: bool,

    /// Only connect to switches whose host key is in this known-hosts file.
    #[arg(long, value_name = "FILE")]
    known_hosts: Option<String>,

    /// Per-command timeout in seconds.
    #[arg(
        long,
        default_value_t = config::DEFAULT_COMMAND_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout: u64,

    /// Maximum number of switches to visit.
    #[arg(
        long,
        default_value_t = config::DEFAULT_MAX_HOPS as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    max_hops: u64,

    /// List the built-in device templates and exit.
    #[arg(long)]
    list_templates: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    /// Write the SSH sessions to a JSONL recording.
    #[arg(long, value_name = "FILE", conflicts_with = "replay")]
    record: Option<PathBuf>,

    /// Replay a JSONL recording instead of connecting.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let cli = Cli::parse();

    if cli.list_templates {
        for line in render_catalog(&templates::template_catalog()) {
            println!("{line}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let seed = match cli.seed {
        Some(seed) => seed,
        None => prompt_addr("Seed switch IP")?,
    };
    let target = match cli.target {
        Some(target) => target,
        None => prompt_addr("Target device IP")?,
    };

    let max_hops = usize::try_from(cli.max_hops).unwrap_or(usize::MAX);
    let options = LocateOptions::for_template(&cli.template)?.with_max_hops(max_hops);

    let result = if let Some(path) = cli.replay.as_deref() {
        let jsonl = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading recording {}", path.display()))?;
        let provider = ReplayProvider::from_jsonl(&jsonl)?;
        let recorded = provider.hosts();
        if !recorded.contains(&seed) {
            let recorded = recorded
                .iter()
                .map(IpAddr::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            bail!(
                "seed {seed} does not appear in {}; recorded switches: {recorded}",
                path.display()
            );
        }
        let credentials = Credentials::new(cli.username.clone(), String::new());
        locate(provider, options, seed, target, &credentials).await
    } else {
        let password = match cli.password.clone() {
            Some(password) => password,
            None => read_secret(&format!("Password for {}", cli.username))?,
        };
        let mut credentials = Credentials::new(cli.username.clone(), password);
        if let Some(enable) = cli.enable_password.clone() {
            credentials = credentials.with_enable_password(enable);
        }

        let mut provider = SshSessionProvider::new(&cli.template)?
            .with_port(cli.port)
            .with_security(
                ConnectionSecurityOptions::for_level(cli.security)
                    .with_host_key_policy(&host_key_policy(&cli)),
            )
            .with_command_timeout(Duration::from_secs(cli.timeout));
        let recorder = cli
            .record
            .as_ref()
            .map(|_| SessionRecorder::new(SessionRecordLevel::KeyEventsOnly));
        if let Some(recorder) = recorder.clone() {
            provider = provider.with_recorder(recorder);
        }

        let result = locate(provider, options, seed, target, &credentials).await;

        if let (Some(path), Some(recorder)) = (cli.record.as_deref(), recorder) {
            write_recording(path, &recorder).await?;
        }
        result
    };

    report(&result, cli.json)?;
    Ok(if result.found {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn host_key_policy(cli: &Cli) -> HostKeyPolicy {
    match (&cli.known_hosts, cli.strict_host_keys) {
        (Some(path), _) => HostKeyPolicy::KnownHostsFile(path.clone()),
        (None, true) => HostKeyPolicy::KnownHosts,
        (None, false) => HostKeyPolicy::AcceptAny,
    }
}

fn render_catalog(catalog: &[TemplateMetadata]) -> Vec<String> {
    catalog
        .iter()
        .map(|meta| {
            format!(
                "{:<8} {} {} (aliases: {})",
                meta.name,
                meta.vendor,
                meta.family,
                meta.aliases.join(", ")
            )
        })
        .collect()
}

async fn locate<P: SessionProvider>(
    provider: P,
    options: LocateOptions,
    seed: IpAddr,
    target: IpAddr,
    credentials: &Credentials,
) -> LocateResult {
    Walker::new(provider, options)
        .locate(seed, target, credentials)
        .await
}

async fn write_recording(path: &Path, recorder: &SessionRecorder) -> anyhow::Result<()> {
    let jsonl = SessionRecorder::normalize_jsonl(&recorder.to_jsonl()?, NormalizeOptions::default())?;
    tokio::fs::write(path, jsonl + "\n")
        .await
        .with_context(|| format!("writing recording {}", path.display()))
}

fn report(result: &LocateResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        for line in result.trace() {
            println!("{line}");
        }
    }
    if result.termination == Termination::ConnectFailure {
        eprintln!("{}", SSH_HINTS);
    }
    Ok(())
}

const SSH_HINTS: &str = "\
Could not work with the switch over SSH. Check that:
  - SSH is enabled: `ip domain-name <domain>`, `crypto key generate rsa`,
    and `transport input ssh` on the vty lines
  - the user exists with `privilege 15`
  - TCP port 22 is reachable and not filtered";

fn prompt_addr(label: &str) -> anyhow::Result<IpAddr> {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        eprint!("{label}: ");
        io::stderr().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            bail!("no {label} given");
        }
        match line.trim().parse() {
            Ok(addr) => return Ok(addr),
            Err(_) => eprintln!("'{}' is not an IP address", line.trim()),
        }
    }
}

/// Restores the terminal even when reading the secret fails.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn read_secret(label: &str) -> anyhow::Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;

    enable_raw_mode()?;
    let guard = RawModeGuard;
    let mut secret = String::new();
    loop {
        if let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match key.code {
                KeyCode::Enter => break,
                KeyCode::Backspace => {
                    secret.pop();
                }
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    drop(guard);
                    eprintln!();
                    bail!("interrupted");
                }
                KeyCode::Char(c) => secret.push(c),
                _ => {}
            }
        }
    }
    drop(guard);
    eprintln!();
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("swlocate").chain(args.iter().copied()))
    }

    #[test]
    fn zero_max_hops_is_rejected() {
        assert!(parse(&["--max-hops", "0"]).is_err());
        assert!(parse(&["--timeout", "0"]).is_err());
        let cli = parse(&["--max-hops", "1"]).expect("one hop is valid");
        assert_eq!(cli.max_hops, 1);
    }

    #[test]
    fn defaults_accept_unknown_host_keys() {
        let cli = parse(&[]).expect("defaults");
        assert_eq!(cli.max_hops, config::DEFAULT_MAX_HOPS as u64);
        assert_eq!(host_key_policy(&cli), HostKeyPolicy::AcceptAny);
    }

    #[test]
    fn host_key_flags_select_strict_policies() {
        let cli = parse(&["--strict-host-keys"]).expect("strict");
        assert_eq!(host_key_policy(&cli), HostKeyPolicy::KnownHosts);

        let cli = parse(&["--known-hosts", "/etc/swlocate/known_hosts"]).expect("file");
        assert_eq!(
            host_key_policy(&cli),
            HostKeyPolicy::KnownHostsFile("/etc/swlocate/known_hosts".to_string())
        );
    }

    #[test]
    fn template_listing_names_every_builtin_template() {
        let cli = parse(&["--list-templates"]).expect("list templates");
        assert!(cli.list_templates);

        let lines = render_catalog(&templates::template_catalog());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("cisco"));
        assert!(lines[0].contains("ios"));
    }
}
