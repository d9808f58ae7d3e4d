mod config;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use offroad_net::{
    Controller, ControllerHandle, FileCredentialStore, NetError, NmWirelessService,
};

use crate::config::{CliArgs, Config};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = CliArgs::parse();

    if cli.print_default_config {
        print!("{}", config::default_config_toml());
        return Ok(());
    }

    let config = config::load(&cli)?;
    let _log_guard = init_logging(&config.general.log_level, cli.log_file.as_deref())?;
    info!("offroad-net starting");

    let service = match NmWirelessService::new(config.interface().map(String::from)).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            eprintln!("Failed to connect to NetworkManager D-Bus: {}", e);
            eprintln!("Is NetworkManager running? Try: systemctl status NetworkManager");
            std::process::exit(1);
        }
    };

    let credentials_path = config.credentials_path();
    let store = FileCredentialStore::open(&credentials_path).wrap_err_with(|| {
        format!(
            "Failed to open credential store at {}",
            credentials_path.display()
        )
    })?;
    info!("Credential store at {}", store.path().display());

    let (handle, task) =
        Controller::spawn(service, Arc::new(store), config.controller_settings());

    // Every state change goes to stdout as one JSON line
    let mut snapshots = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            let line = serde_json::to_string(&*snapshots.borrow_and_update());
            match line {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode snapshot: {}", e),
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    });

    handle.set_visible(true)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.wrap_err("Failed to read stdin")? else {
                    break;
                };
                match run_command(&handle, line.trim()).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(e) => report(&e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown();
    task.await.wrap_err("Controller task panicked")?;
    printer.abort();

    info!("offroad-net exiting");
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

/// One stdin line:
///
/// ```text
/// show | hide | scan
/// connect <ssid> [password]
/// cancel
/// forget <ssid>
/// tether on|off
/// tether-password <password>
/// quit
/// ```
async fn run_command(handle: &ControllerHandle, line: &str) -> Result<Flow, NetError> {
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match verb {
        "" => {}
        "show" => handle.set_visible(true)?,
        "hide" => handle.set_visible(false)?,
        "scan" => handle.refresh_now()?,
        "connect" => {
            let (ssid, password) = split_ssid(rest);
            if ssid.is_empty() {
                return Err(NetError::InvalidState("usage: connect <ssid> [password]".into()));
            }
            handle.connect(ssid, password).await?;
        }
        "cancel" => handle.cancel().await?,
        "forget" => handle.forget(rest).await?,
        "tether" => match rest {
            "on" => handle.set_tethering_enabled(true).await?,
            "off" => handle.set_tethering_enabled(false).await?,
            _ => return Err(NetError::InvalidState("usage: tether on|off".into())),
        },
        "tether-password" => handle.set_tethering_password(rest).await?,
        "quit" | "exit" => return Ok(Flow::Quit),
        other => {
            return Err(NetError::InvalidState(format!("unknown command '{}'", other)));
        }
    }
    Ok(Flow::Continue)
}

/// `"My Net" secret` or `Cafe`: quotes allow spaces in the ssid
fn split_ssid(args: &str) -> (&str, Option<String>) {
    let (ssid, rest) = match args.strip_prefix('"').and_then(|s| s.split_once('"')) {
        Some((ssid, rest)) => (ssid, rest.trim()),
        None => match args.split_once(' ') {
            Some((ssid, rest)) => (ssid, rest.trim()),
            None => (args, ""),
        },
    };
    let password = (!rest.is_empty()).then(|| rest.to_string());
    (ssid, password)
}

fn report(e: &NetError) {
    let line = serde_json::json!({
        "error": e.to_string(),
        "actionable": e.is_user_actionable(),
    });
    println!("{}", line);
}

/// Initialize tracing to a log file; stdout belongs to the snapshot stream
fn init_logging(level: &str, log_file: Option<&Path>) -> Result<WorkerGuard> {
    let (dir, file_name) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            let name = path
                .file_name()
                .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?
                .to_os_string();
            (dir, name)
        }
        None => (Config::data_dir(), "offroad-net.log".into()),
    };

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssid_with_spaces_needs_quotes() {
        assert_eq!(
            split_ssid("\"My Net\" hunter22"),
            ("My Net", Some("hunter22".to_string()))
        );
        assert_eq!(split_ssid("Cafe"), ("Cafe", None));
        assert_eq!(split_ssid("Home pass word"), ("Home", Some("pass word".to_string())));
    }
}
