use tokio::fs;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process;

use shield_link_lib::command::{Command, Response};
use shield_link_lib::config::{self, Config};
use shield_link_lib::logging::{self, LogReloadHandle};
use shield_link_lib::socket;

use crate::routing::{RealShellOps, ShellOps, TrafficSplitter};

mod cli;
mod routing;

// Avoid musl's default allocator due to degraded performance
// https://nickb.dev/blog/default-musl-allocator-considered-harmful-to-performance
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Signal {
    Shutdown,
    Reload,
}

async fn signal_channel() -> Result<mpsc::Receiver<Signal>, exitcode::ExitCode> {
    let (sender, receiver) = mpsc::channel(32);
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
        tracing::error!(error = ?e, "error setting up SIGINT handler");
        exitcode::IOERR
    })?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        tracing::error!(error = ?e, "error setting up SIGTERM handler");
        exitcode::IOERR
    })?;
    let mut sighup = signal(SignalKind::hangup()).map_err(|e| {
        tracing::error!(error = ?e, "error setting up SIGHUP handler");
        exitcode::IOERR
    })?;

    tokio::spawn(async move {
        loop {
            let sig = tokio::select! {
                Some(_) = sigint.recv() => {
                    tracing::debug!("received SIGINT");
                    Signal::Shutdown
                },
                Some(_) = sigterm.recv() => {
                    tracing::debug!("received SIGTERM");
                    Signal::Shutdown
                },
                Some(_) = sighup.recv() => {
                    tracing::debug!("received SIGHUP");
                    Signal::Reload
                },
                else => {
                    tracing::warn!("signal streams closed");
                    break;
                }
            };
            if sender.send(sig).await.is_err() {
                tracing::warn!(?sig, "signal receiver closed");
                break;
            }
        }
    });

    Ok(receiver)
}

async fn socket_listener(socket_path: &Path) -> Result<UnixListener, exitcode::ExitCode> {
    match socket_path.try_exists() {
        Ok(true) => {
            tracing::info!("probing for running instance");
            match socket::process_cmd(socket_path, &Command::Ping).await {
                Ok(_) => {
                    tracing::error!("system service is already running - cannot start another instance");
                    return Err(exitcode::TEMPFAIL);
                }
                Err(e) => {
                    tracing::debug!(warn = ?e, "done probing for running instance");
                }
            };
            fs::remove_file(socket_path).await.map_err(|e| {
                tracing::error!(error = ?e, "error removing stale socket file");
                exitcode::IOERR
            })?;
        }
        Ok(false) => (),
        Err(e) => {
            tracing::error!(error = ?e, "error checking socket path");
            return Err(exitcode::IOERR);
        }
    };

    let socket_dir = socket_path.parent().ok_or_else(|| {
        tracing::error!("socket path has no parent");
        exitcode::UNAVAILABLE
    })?;
    fs::create_dir_all(socket_dir).await.map_err(|e| {
        tracing::error!(error = %e, "error creating socket directory");
        exitcode::IOERR
    })?;

    let listener = UnixListener::bind(socket_path).map_err(|e| {
        tracing::error!(error = ?e, "error binding socket");
        exitcode::OSFILE
    })?;

    // owner and group only, the socket changes firewall state
    fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o660))
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "error setting socket permissions");
            exitcode::NOPERM
        })?;

    Ok(listener)
}

async fn read_config(config_path: &Path) -> Result<Config, exitcode::ExitCode> {
    config::read(config_path).await.map_err(|err| {
        tracing::error!(error = %err, config_path = %config_path.display(), "unable to read initial configuration");
        exitcode::CONFIG
    })
}

/// Removes a classification table left behind by an earlier process.
async fn clear_previous_run<S: ShellOps>(splitter: &mut TrafficSplitter<S>) {
    match splitter.teardown_all().await {
        Ok(()) => tracing::info!("removed classification table of a previous run"),
        Err(err) => tracing::debug!(error = %err, "no previous classification table"),
    }
}

async fn apply_config<S: ShellOps>(splitter: &mut TrafficSplitter<S>, config: &Config) -> Result<(), routing::Error> {
    splitter.bootstrap_classifier().await?;
    splitter.add_bypass_addresses(&config.bypass_addresses).await?;
    splitter.register_ingress_interfaces(&config.ingress).await?;
    splitter.apply_weighted_split(&config.wan, &config.vpn).await
}

/// Classifier and ingress jumps survive a reload, only addresses and the split are refreshed.
async fn reapply_config<S: ShellOps>(splitter: &mut TrafficSplitter<S>, config: &Config) -> Result<(), routing::Error> {
    splitter.add_bypass_addresses(&config.bypass_addresses).await?;
    splitter.apply_weighted_split(&config.wan, &config.vpn).await
}

async fn reload<S: ShellOps>(
    splitter: &mut TrafficSplitter<S>,
    args: &cli::Cli,
    log_handle: Option<&LogReloadHandle>,
) {
    if let (Some(handle), Some(log_file)) = (log_handle, &args.log_file) {
        match logging::reopen_log_file(handle, log_file) {
            Ok(()) => tracing::info!(log_file = %log_file.display(), "reopened log file"),
            Err(e) => tracing::error!(error = ?e, "error reopening log file"),
        }
    }

    let config = match config::read(&args.config_path).await {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "unable to read configuration - keeping current routing");
            return;
        }
    };

    if config.egress != splitter.egress() {
        tracing::warn!(current = %splitter.egress(), configured = %config.egress, "egress change requires a restart");
    }

    match reapply_config(splitter, &config).await {
        Ok(()) => tracing::info!("configuration reloaded"),
        Err(err) => tracing::error!(error = %err, "error applying reloaded configuration"),
    }
}

async fn process_command<S: ShellOps>(cmd: Command, splitter: &mut TrafficSplitter<S>) -> Response {
    let res = match cmd {
        Command::Ping => return Response::Pong,
        Command::Status => return Response::Status(splitter.status()),
        Command::AddBypassDomainAddresses(addrs) => splitter.add_bypass_domain_addresses(&addrs).await,
        Command::RemoveBypassDomainAddresses(addrs) => splitter.remove_bypass_domain_addresses(&addrs).await,
        Command::FlushBypassDomainAddresses => splitter.flush_bypass_domain_addresses().await,
        Command::AddBypassAddresses(addrs) => splitter.add_bypass_addresses(&addrs).await,
        Command::RegisterIngress(names) => splitter.register_ingress_interfaces(&names).await,
        Command::ApplySplit { wan, vpn } => splitter.apply_weighted_split(&wan, &vpn).await,
    };
    match res {
        Ok(()) => Response::Done,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            Response::failed(err)
        }
    }
}

async fn handle_connection<S: ShellOps>(
    mut stream: UnixStream,
    splitter: &mut TrafficSplitter<S>,
) -> Result<(), socket::Error> {
    let msg = socket::pull_message(&mut stream).await?;
    let resp = match serde_json::from_str::<Command>(&msg) {
        Ok(cmd) => {
            tracing::debug!(command = %cmd, "incoming command");
            process_command(cmd, splitter).await
        }
        Err(e) => {
            tracing::error!(error = %e, %msg, "error parsing command");
            Response::failed(format!("invalid command: {e}"))
        }
    };
    let json = serde_json::to_string(&resp)?;
    socket::push_message(&mut stream, &json).await
}

async fn daemon(args: cli::Cli, log_handle: Option<LogReloadHandle>) -> Result<(), exitcode::ExitCode> {
    // set up signal handler
    let mut signals = signal_channel().await?;

    let config = read_config(&args.config_path).await?;

    // set up system socket
    let listener = socket_listener(&args.socket_path).await?;

    let mut splitter = TrafficSplitter::new(RealShellOps, config.egress);
    clear_previous_run(&mut splitter).await;

    let res = match apply_config(&mut splitter, &config).await {
        Ok(()) => {
            tracing::info!(status = %splitter.status(), "routing configured");
            loop_daemon(&mut signals, &listener, &mut splitter, &args, log_handle.as_ref()).await
        }
        Err(err) => {
            tracing::error!(error = %err, "error setting up routing");
            Err(exitcode::OSERR)
        }
    };

    tokio::select! {
        teardown = splitter.teardown_all() => {
            if let Err(err) = teardown {
                tracing::error!(error = %err, "error tearing down routing");
            }
        },
        Some(Signal::Shutdown) = signals.recv() => {
            tracing::info!("force shutdown immediately");
        }
    }
    let _ = fs::remove_file(&args.socket_path).await.map_err(|err| {
        tracing::error!(error = ?err, "failed removing socket");
    });
    res
}

async fn loop_daemon<S: ShellOps>(
    signals: &mut mpsc::Receiver<Signal>,
    listener: &UnixListener,
    splitter: &mut TrafficSplitter<S>,
    args: &cli::Cli,
    log_handle: Option<&LogReloadHandle>,
) -> Result<(), exitcode::ExitCode> {
    loop {
        tokio::select! {
            Some(sig) = signals.recv() => match sig {
                Signal::Shutdown => {
                    tracing::info!("initiate shutdown");
                    return Ok(());
                }
                Signal::Reload => reload(splitter, args, log_handle).await,
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    if let Err(err) = handle_connection(stream, splitter).await {
                        tracing::error!(error = %err, "error handling connection");
                    }
                }
                Err(err) => {
                    tracing::error!(error = ?err, "error accepting connection");
                    return Err(exitcode::IOERR);
                }
            },
        }
    }
}

/// Commands are handled one at a time, a single thread is plenty.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = cli::parse();

    let log_handle = match &args.log_file {
        Some(log_file) => match logging::setup_log_file(log_file) {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("error opening log file {}: {e}", log_file.display());
                process::exit(exitcode::CANTCREAT);
            }
        },
        None => {
            logging::setup_stdout();
            None
        }
    };
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting {}",
        env!("CARGO_PKG_NAME")
    );

    match daemon(args, log_handle).await {
        Ok(_) => (),
        Err(exitcode::OK) => (),
        Err(code) => {
            tracing::warn!("abnormal exit");
            process::exit(code);
        }
    }
}
