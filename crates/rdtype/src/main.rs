use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rdtype_keymap::{KeymapProvider, LayoutTracker};
use rdtype_portal::constants::{PORTAL_BUS_NAME, RESTORE_TOKEN_KEY};
use rdtype_portal::{
    default_state_path, portal_available, AshpdPortal, KeyValueStore, PersistMode, PortalSession,
    SessionOptions, StateFile,
};

mod config;
mod orchestrator;

use orchestrator::{Orchestrator, Outcome};

/// Type text on a Wayland desktop through the `RemoteDesktop` portal.
///
/// The first run asks for permission to control the keyboard; the grant
/// is remembered so later runs type without a dialog.
#[derive(Parser, Debug)]
#[command(name = "rdtype", version, about)]
struct Cli {
    /// Text to type. Several arguments are joined without separator.
    text: Vec<String>,

    /// Path to configuration file (TOML).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Delay between press and release of each key, in milliseconds.
    #[arg(long, value_name = "MS")]
    tap_delay: Option<u64>,

    /// Forget the stored permission grant and ask again.
    #[arg(long)]
    reset_token: bool,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level(cli.verbose))),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Log level used when `RUST_LOG` is not set.
fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Load config from file and apply CLI overrides.
fn load_and_merge_config(cli: &Cli) -> Result<config::Config> {
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(tap_delay) = cli.tap_delay {
        cfg.tap_delay_ms = tap_delay;
    }
    Ok(cfg)
}

fn session_options(cfg: &config::Config) -> SessionOptions {
    SessionOptions {
        persist_mode: if cfg.persist_grant {
            PersistMode::ExplicitlyRevoked
        } else {
            PersistMode::DoNot
        },
        tap_delay: Duration::from_millis(cfg.tap_delay_ms),
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let cfg = load_and_merge_config(&cli)?;
    let text = cli.text.concat();

    let state_path = match &cfg.state_path {
        Some(path) => path.clone(),
        None => default_state_path().context("no state directory for the restore token")?,
    };
    let mut store = StateFile::new(state_path);
    if cli.reset_token {
        store
            .write(RESTORE_TOKEN_KEY, "")
            .context("failed to reset the restore token")?;
        tracing::info!(path = %store.path().display(), "Restore token cleared");
    }

    if !portal_available()
        .await
        .context("failed to query the session bus")?
    {
        bail!("{PORTAL_BUS_NAME} is not available on the session bus");
    }
    let portal = Arc::new(
        AshpdPortal::new()
            .await
            .context("failed to connect to the RemoteDesktop portal")?,
    );

    let (mut provider, keymap_events) =
        KeymapProvider::spawn().context("failed to start keyboard layout discovery")?;

    let (session, session_events) =
        PortalSession::new(portal, Box::new(store), session_options(&cfg));
    let orchestrator = Orchestrator::new(
        session,
        session_events,
        LayoutTracker::new(keymap_events),
        Duration::from_millis(cfg.action_delay_ms),
    );

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received SIGINT, stopping"),
            Err(e) => {
                tracing::warn!("Failed to listen for SIGINT: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    let outcome = orchestrator.run(&text, shutdown).await;
    provider.stop();

    match &outcome {
        Outcome::Typed => tracing::info!(chars = text.chars().count(), "Text typed"),
        Outcome::PartiallyTyped { failures } => {
            for failure in failures {
                tracing::warn!("Skipped: {failure}");
            }
        }
        Outcome::NotAuthenticated => {
            tracing::error!("Keyboard access through the RemoteDesktop portal was not granted");
        }
        Outcome::KeymapUnavailable => {
            tracing::error!("The compositor did not provide a keyboard layout");
        }
        Outcome::Interrupted => tracing::warn!("Typing interrupted"),
    }
    Ok(outcome.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_arguments() {
        let cli = Cli::try_parse_from(["rdtype", "hello", " ", "world"]).unwrap();
        assert_eq!(cli.text.concat(), "hello world");
        assert!(!cli.reset_token);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn no_text_is_allowed() {
        let cli = Cli::try_parse_from(["rdtype"]).unwrap();
        assert!(cli.text.is_empty());
    }

    #[test]
    fn parses_options() {
        let cli = Cli::try_parse_from([
            "rdtype",
            "-vv",
            "--tap-delay",
            "5",
            "--reset-token",
            "-c",
            "/tmp/rdtype.toml",
            "--",
            "-dash",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.tap_delay, Some(5));
        assert!(cli.reset_token);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rdtype.toml")));
        assert_eq!(cli.text, ["-dash"]);
    }

    #[test]
    fn rejects_bad_tap_delay() {
        assert!(Cli::try_parse_from(["rdtype", "--tap-delay", "soon"]).is_err());
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(default_level(0), "warn");
        assert_eq!(default_level(1), "info");
        assert_eq!(default_level(2), "debug");
        assert_eq!(default_level(7), "trace");
    }

    #[test]
    fn cli_tap_delay_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tap_delay_ms = 50\npersist_grant = false\n").unwrap();

        let args: Vec<std::ffi::OsString> = vec![
            "rdtype".into(),
            "--config".into(),
            path.clone().into_os_string(),
            "--tap-delay".into(),
            "7".into(),
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        let cfg = load_and_merge_config(&cli).unwrap();
        assert_eq!(cfg.tap_delay_ms, 7);

        let options = session_options(&cfg);
        assert_eq!(options.tap_delay, Duration::from_millis(7));
        assert_eq!(options.persist_mode, PersistMode::DoNot);
    }
}
