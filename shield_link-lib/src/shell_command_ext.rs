use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use std::future::Future;
use std::io;
use std::process::{Output, Stdio};

#[derive(Debug, Error)]
pub enum Error {
    #[error("command `{cmd}` failed with status {status:?}, output: {output}")]
    CommandFailed {
        cmd: String,
        status: Option<i32>,
        output: String,
    },
    #[error("IO error: {0}")]
    IO(#[from] io::Error),
}

pub trait ShellCommandExt {
    /// Run the command, optionally feeding `stdin`, and return stdout and stderr combined.
    fn run_combined(&mut self, stdin: Option<&str>) -> impl Future<Output = Result<String, Error>> + Send;
}

impl ShellCommandExt for Command {
    /// Unconditionally captures stdout and stderr regardless of command settings.
    async fn run_combined(&mut self, stdin: Option<&str>) -> Result<String, Error> {
        let cmd_debug = format!("{:?}", self.as_std());
        self.stdout(Stdio::piped()).stderr(Stdio::piped());
        match stdin {
            Some(_) => self.stdin(Stdio::piped()),
            None => self.stdin(Stdio::null()),
        };

        let mut child = self.spawn()?;
        let pipe = child.stdin.take();
        let feed = async move {
            if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
                // pipe is dropped here which closes the child's stdin
            }
            Ok::<(), io::Error>(())
        };

        // stdin is fed while stdout and stderr are drained
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let combined = combined_from_output(cmd_debug, output?)?;
        fed?;
        Ok(combined)
    }
}

pub fn combined_from_output(cmd: String, output: Output) -> Result<String, Error> {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let combined = combined.trim().to_string();

    if output.status.success() {
        if !output.stderr.is_empty() {
            tracing::warn!(cmd, output = %combined, "Non empty stderr on successful command");
        }
        Ok(combined)
    } else {
        tracing::error!(cmd, status_code = ?output.status.code(), output = %combined, "Error executing command");
        Err(Error::CommandFailed {
            cmd,
            status: output.status.code(),
            output: combined,
        })
    }
}
