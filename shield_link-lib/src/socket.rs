//! Module for communicating with the shield_link root service over a Unix domain socket.
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use std::io;
use std::path::Path;

use crate::command::{Command, Response};

pub const DEFAULT_PATH: &str = "/var/run/shield_link.sock";
pub const ENV_VAR: &str = "SHIELD_LINK_SOCKET_PATH";

#[derive(Debug, Error)]
pub enum Error {
    #[error("service not running")]
    ServiceNotRunning,
    #[error("failed serializing command: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IO(#[from] io::Error),
}

pub async fn process_cmd(socket_path: &Path, cmd: &Command) -> Result<Response, Error> {
    check_path(socket_path)?;

    let mut stream = UnixStream::connect(socket_path).await?;

    let json_cmd = serde_json::to_string(cmd)?;
    push_message(&mut stream, &json_cmd).await?;
    let str_resp = pull_message(&mut stream).await?;
    serde_json::from_str::<Response>(&str_resp).map_err(Error::Serialization)
}

fn check_path(socket_path: &Path) -> Result<(), Error> {
    match socket_path.try_exists() {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::ServiceNotRunning),
        Err(x) => Err(x.into()),
    }
}

/// Writes `json` and shuts down the write half so the peer sees end of input.
pub async fn push_message(socket: &mut UnixStream, json: &str) -> Result<(), Error> {
    // flush is not enough to push the message
    // we need to shutdown the write channel to signal the other side that all data was transferred
    socket.write_all(json.as_bytes()).await?;
    socket.flush().await?;
    socket.shutdown().await.map_err(Error::from)
}

pub async fn pull_message(socket: &mut UnixStream) -> Result<String, Error> {
    let mut message = String::new();
    socket
        .read_to_string(&mut message)
        .await
        .map(|_size| message)
        .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn check_path_reports_service_not_running_when_socket_missing() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let missing = tmp.path().join("missing.sock");
        let err = check_path(&missing).expect_err("missing socket should error");
        assert!(matches!(err, Error::ServiceNotRunning));
        Ok(())
    }

    #[tokio::test]
    async fn push_and_pull_round_trip_frames() -> anyhow::Result<()> {
        let (mut server, mut client) = UnixStream::pair()?;
        let json = serde_json::to_string(&Command::Ping)?;
        let push = push_message(&mut client, &json);
        let pull = pull_message(&mut server);
        let (_, received) = tokio::try_join!(push, pull)?;
        assert_eq!(received, json);
        Ok(())
    }

    #[tokio::test]
    async fn process_cmd_serializes_request_and_parses_response() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("socket");
        let listener = tokio::net::UnixListener::bind(&path)?;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let buf = pull_message(&mut stream).await.expect("read");

            let cmd: Command = serde_json::from_str(&buf).expect("command");
            assert!(matches!(cmd, Command::FlushBypassDomainAddresses));

            let json = serde_json::to_string(&Response::Done).expect("json");
            push_message(&mut stream, &json).await.expect("write response");
        });

        let resp = process_cmd(path.as_path(), &Command::FlushBypassDomainAddresses).await?;

        assert_eq!(resp, Response::Done);
        server.await?;
        Ok(())
    }
}
