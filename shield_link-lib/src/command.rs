use serde::{Deserialize, Serialize};

use std::fmt;
use std::net::Ipv4Addr;

use crate::interface::Interface;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Ping,
    Status,
    AddBypassDomainAddresses(Vec<Ipv4Addr>),
    RemoveBypassDomainAddresses(Vec<Ipv4Addr>),
    FlushBypassDomainAddresses,
    AddBypassAddresses(Vec<Ipv4Addr>),
    RegisterIngress(Vec<String>),
    ApplySplit { wan: Vec<Interface>, vpn: Vec<Interface> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Pong,
    Status(StatusResponse),
    Done,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub routes: Vec<MarkRoute>,
    pub pending_cleanup: usize,
}

/// Firewall mark together with the routing table it selects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkRoute {
    pub mark: u32,
    pub interface: String,
    pub table: u32,
}

impl Response {
    pub fn failed(err: impl fmt::Display) -> Self {
        Response::Failed(err.to_string())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => write!(f, "ping"),
            Command::Status => write!(f, "status"),
            Command::AddBypassDomainAddresses(addrs) => write!(f, "add {} domain bypass addresses", addrs.len()),
            Command::RemoveBypassDomainAddresses(addrs) => {
                write!(f, "remove {} domain bypass addresses", addrs.len())
            }
            Command::FlushBypassDomainAddresses => write!(f, "flush domain bypass addresses"),
            Command::AddBypassAddresses(addrs) => write!(f, "add {} bypass addresses", addrs.len()),
            Command::RegisterIngress(names) => write!(f, "register ingress {}", names.join(", ")),
            Command::ApplySplit { wan, vpn } => write!(
                f,
                "apply split wan [{}] vpn [{}]",
                join_interfaces(wan),
                join_interfaces(vpn)
            ),
        }
    }
}

fn join_interfaces(pool: &[Interface]) -> String {
    pool.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for MarkRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fwmark {:#x} -> table {} via {}", self.mark, self.table, self.interface)
    }
}

impl fmt::Display for StatusResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.routes.is_empty() {
            writeln!(f, "No weighted routes installed")?;
        } else {
            writeln!(f, "Weighted routes:")?;
            for route in &self.routes {
                writeln!(f, "  - {route}")?;
            }
        }
        write!(f, "Pending cleanup commands: {}", self.pending_cleanup)
    }
}
