use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use gambit_client::backoff::Backoff;
use gambit_client::events::names;
use gambit_client::{ClientConfig, ClientEvent, ConnectionManager, TransportKind};
use gambit_core::game::TimeControl;
use gambit_core::net::messages::JoinMatchmakingMsg;
use gambit_core::player::PlayerIdentity;

/// Slack on top of the connect timeout for the whole retry sequence.
const SETTLE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    endpoint: Option<String>,
    transports: Option<Vec<TransportKind>>,
    matchmaking: bool,
    username: Option<String>,
}

fn parse_args(argv: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    for arg in argv {
        if let Some(path) = arg.strip_prefix("--config=") {
            args.config = Some(PathBuf::from(path));
        } else if let Some(url) = arg.strip_prefix("--endpoint=") {
            args.endpoint = Some(url.to_string());
        } else if let Some(list) = arg.strip_prefix("--transport=") {
            let parsed: Option<Vec<TransportKind>> =
                list.split(',').map(|s| TransportKind::parse(s.trim())).collect();
            args.transports = Some(parsed.ok_or_else(|| format!("bad transport list: {list}"))?);
        } else if let Some(name) = arg.strip_prefix("--username=") {
            args.username = Some(name.to_string());
        } else if arg == "--matchmaking" {
            args.matchmaking = true;
        } else {
            return Err(format!("unknown argument: {arg}"));
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprintln!(
                "usage: gambit-probe [--config=PATH] [--endpoint=URL] \
                 [--transport=polling,websocket] [--username=NAME] [--matchmaking]"
            );
            return ExitCode::from(2);
        },
    };

    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    };
    if let Some(endpoint) = args.endpoint.clone() {
        config.endpoint = endpoint;
    }
    if let Some(transports) = args.transports.clone() {
        config.transports = transports;
    }

    match probe(config, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Probe failed: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Longest time the manager can spend before it either connects or reports
/// `reconnect_failed`: every attempt timing out plus every backoff sleep at
/// its largest jittered value.
fn give_up_window(config: &ClientConfig) -> Duration {
    let retries = &config.reconnection;
    let attempts = config.connect_timeout() * (retries.max_attempts + 1);
    let backoff = Backoff::from_config(retries);
    let sleeps: Duration = (1..=retries.max_attempts)
        .map(|n| backoff.base(n).mul_f64(1.0 + retries.jitter_factor).min(backoff.max()))
        .sum();
    attempts + sleeps + SETTLE_GRACE
}

async fn probe(config: ClientConfig, args: &Args) -> Result<(), String> {
    let deadline = give_up_window(&config);
    let manager = ConnectionManager::with_socket_io(config).map_err(|e| e.to_string())?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriptions = Vec::new();
    for event in [names::CONNECTION_STATUS, names::RECONNECT_FAILED] {
        let tx = tx.clone();
        subscriptions.push(manager.on(event, move |e| {
            let _ = tx.send(e.clone());
        }));
    }
    let _log = manager.on(names::CONNECTION_ERROR, |e| {
        if let ClientEvent::ConnectionError { error } = e {
            tracing::warn!("Connect attempt failed: {error}");
        }
    });

    tracing::info!(endpoint = %manager.config().endpoint, "Probing");
    manager.connect();

    let outcome = tokio::time::timeout(deadline, async {
        while let Some(event) = rx.recv().await {
            match event {
                ClientEvent::ConnectionStatus(status) if status.connected => return Ok(()),
                ClientEvent::ReconnectFailed { attempts } => {
                    return Err(format!("gave up after {attempts} reconnect attempts"));
                },
                _ => {},
            }
        }
        Err("event stream closed".to_string())
    })
    .await
    .unwrap_or_else(|_| Err("timed out waiting for a connection".to_string()));
    for sub in subscriptions {
        sub.cancel();
    }
    if let Err(e) = outcome {
        print_diagnostics(&manager);
        manager.disconnect();
        return Err(e);
    }

    let username = args.username.clone().unwrap_or_else(|| "probe".to_string());
    let identity = PlayerIdentity::new(format!("probe-{}", std::process::id()), username, 1200);
    let result = run_session(&manager, identity, args.matchmaking).await;

    print_diagnostics(&manager);
    manager.disconnect();
    result
}

async fn run_session(
    manager: &ConnectionManager,
    identity: PlayerIdentity,
    matchmaking: bool,
) -> Result<(), String> {
    let profile = manager
        .authenticate_and_wait(identity)
        .await
        .map_err(|e| format!("authenticate: {e}"))?;
    tracing::info!(
        user_id = ?profile.user_id,
        username = ?profile.username,
        "Authenticated"
    );

    if matchmaking {
        manager
            .join_matchmaking(JoinMatchmakingMsg::new(TimeControl::blitz()))
            .map_err(|e| format!("join matchmaking: {e}"))?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        manager
            .leave_matchmaking()
            .map_err(|e| format!("leave matchmaking: {e}"))?;
    }
    Ok(())
}

fn print_diagnostics(manager: &ConnectionManager) {
    match serde_json::to_string_pretty(&manager.diagnostics()) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!("Failed to serialize diagnostics: {e}"),
    }
}
