use clap::{Parser, Subcommand};
use shield_link_lib::command::Command as LibCommand;
use shield_link_lib::interface::Interface;
use shield_link_lib::socket;

use std::net::Ipv4Addr;
use std::path::PathBuf;

/// shield_link control - steer the split-tunnel routing of a running service
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Specify socket path
    #[arg(
        short,
        long,
        env = socket::ENV_VAR,
        default_value = socket::DEFAULT_PATH
    )]
    pub socket_path: PathBuf,

    /// Format output as json
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check whether the service is responsive
    #[command()]
    Ping,

    /// Query installed weighted routes
    #[command()]
    Status,

    /// Exempt addresses resolved from bypass domains from the tunnel
    #[command()]
    AddDomainIps {
        #[arg(required = true)]
        addresses: Vec<Ipv4Addr>,
    },

    /// Stop exempting addresses resolved from bypass domains
    #[command()]
    RemoveDomainIps {
        #[arg(required = true)]
        addresses: Vec<Ipv4Addr>,
    },

    /// Stop exempting any address resolved from bypass domains
    #[command()]
    FlushDomainIps,

    /// Permanently exempt addresses from the tunnel
    #[command()]
    AddIps {
        #[arg(required = true)]
        addresses: Vec<Ipv4Addr>,
    },

    /// Classify traffic entering through these interfaces
    #[command()]
    RegisterIngress {
        #[arg(required = true)]
        interfaces: Vec<String>,
    },

    /// Replace the weighted split, pool members given as name[:weight]
    #[command()]
    Split {
        /// Uplink pool member, repeat or separate with commas
        #[arg(long, value_delimiter = ',')]
        wan: Vec<Interface>,

        /// Tunnel pool member, repeat or separate with commas
        #[arg(long, value_delimiter = ',')]
        vpn: Vec<Interface>,
    },
}

impl From<Command> for LibCommand {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Ping => LibCommand::Ping,
            Command::Status => LibCommand::Status,
            Command::AddDomainIps { addresses } => LibCommand::AddBypassDomainAddresses(addresses),
            Command::RemoveDomainIps { addresses } => LibCommand::RemoveBypassDomainAddresses(addresses),
            Command::FlushDomainIps => LibCommand::FlushBypassDomainAddresses,
            Command::AddIps { addresses } => LibCommand::AddBypassAddresses(addresses),
            Command::RegisterIngress { interfaces } => LibCommand::RegisterIngress(interfaces),
            Command::Split { wan, vpn } => LibCommand::ApplySplit { wan, vpn },
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib_command(args: &[&str]) -> anyhow::Result<LibCommand> {
        let cli = Cli::try_parse_from(std::iter::once("shield_link-ctl").chain(args.iter().copied()))?;
        Ok(cli.command.into())
    }

    #[test]
    fn split_accepts_repeated_and_comma_separated_members() -> anyhow::Result<()> {
        let cmd = lib_command(&["split", "--wan", "eth0", "--vpn", "wg0:1,wg1:3", "--vpn", "wg2"])?;
        assert_eq!(
            cmd,
            LibCommand::ApplySplit {
                wan: vec![Interface::new("eth0", 1)],
                vpn: vec![Interface::new("wg0", 1), Interface::new("wg1", 3), Interface::new("wg2", 1)],
            }
        );
        Ok(())
    }

    #[test]
    fn split_pools_may_be_empty() -> anyhow::Result<()> {
        let cmd = lib_command(&["split", "--vpn", "wg0"])?;
        assert_eq!(
            cmd,
            LibCommand::ApplySplit {
                wan: vec![],
                vpn: vec![Interface::new("wg0", 1)],
            }
        );
        Ok(())
    }

    #[test]
    fn split_rejects_invalid_member() -> anyhow::Result<()> {
        assert!(lib_command(&["split", "--vpn", "wg0:heavy"]).is_err());
        assert!(lib_command(&["split", "--wan", "a/b"]).is_err());
        Ok(())
    }

    #[test]
    fn address_commands_parse_ipv4() -> anyhow::Result<()> {
        let cmd = lib_command(&["add-domain-ips", "1.1.1.1", "8.8.8.8"])?;
        assert_eq!(
            cmd,
            LibCommand::AddBypassDomainAddresses(vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)])
        );
        assert_eq!(
            lib_command(&["add-ips", "10.0.0.1"])?,
            LibCommand::AddBypassAddresses(vec![Ipv4Addr::new(10, 0, 0, 1)])
        );
        assert!(lib_command(&["remove-domain-ips", "::1"]).is_err());
        assert!(lib_command(&["add-ips"]).is_err());
        Ok(())
    }

    #[test]
    fn json_flag_is_global() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["shield_link-ctl", "status", "--json"])?;
        assert!(cli.json);
        let cli = Cli::try_parse_from(["shield_link-ctl", "--json", "flush-domain-ips"])?;
        assert!(cli.json);
        assert_eq!(LibCommand::from(cli.command), LibCommand::FlushBypassDomainAddresses);
        Ok(())
    }
}
