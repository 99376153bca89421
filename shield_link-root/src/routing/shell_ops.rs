//! Abstraction over the external `nft` and `ip` command line tools.
//!
//! Every mutation of firewall or routing state is expressed as a [`CommandLine`]
//! and handed to a [`ShellOps`] implementation.
//! Production code uses [`RealShellOps`].
//! Tests use a stateful mock (see `mocks` module).

use async_trait::async_trait;
use tokio::process::Command;

use std::fmt;

use shield_link_lib::shell_command_ext::ShellCommandExt;

use super::Error;

/// Program, arguments and optional standard input of one external invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    program: &'static str,
    args: Vec<String>,
    stdin: Option<String>,
}

impl CommandLine {
    pub fn new(program: &'static str) -> Self {
        CommandLine {
            program,
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn program(&self) -> &'static str {
        self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    pub fn input(&self) -> Option<&str> {
        self.stdin.as_deref()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Narrow executor seam: run a command, return its combined output.
#[async_trait]
pub trait ShellOps: Send + Sync {
    /// Non-zero exit surfaces as an error carrying the captured output.
    async fn execute(&self, cmd: &CommandLine) -> Result<String, Error>;
}

/// Production [`ShellOps`] that spawns real processes.
#[derive(Clone, Debug, Default)]
pub struct RealShellOps;

#[async_trait]
impl ShellOps for RealShellOps {
    async fn execute(&self, cmd: &CommandLine) -> Result<String, Error> {
        let output = Command::new(cmd.program())
            .args(cmd.argv())
            .run_combined(cmd.input())
            .await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_display_joins_arguments() -> anyhow::Result<()> {
        let cmd = CommandLine::new("ip").args(["rule", "add", "fwmark", "0x65"]).arg("lookup").arg("1001");
        assert_eq!(cmd.to_string(), "ip rule add fwmark 0x65 lookup 1001");
        assert_eq!(cmd.input(), None);
        Ok(())
    }

    #[tokio::test]
    async fn real_shell_ops_returns_output() -> anyhow::Result<()> {
        let cmd = CommandLine::new("sh").args(["-c", "cat; echo done"]).stdin("fed ");
        let output = RealShellOps.execute(&cmd).await?;
        assert_eq!(output, "fed done");
        Ok(())
    }

    #[tokio::test]
    async fn real_shell_ops_wraps_failures() -> anyhow::Result<()> {
        let cmd = CommandLine::new("sh").args(["-c", "echo 'Error: No such file or directory' >&2; exit 1"]);
        let err = RealShellOps.execute(&cmd).await.expect_err("command fails");
        assert!(err.to_string().contains("No such file or directory"));
        Ok(())
    }
}
