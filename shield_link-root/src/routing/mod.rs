use thiserror::Error;

use shield_link_lib::{interface, shell_command_ext};

pub(crate) mod mocks;
mod nftables;
mod policy_route;
mod shell_ops;
mod splitter;
mod weighted;

pub use shell_ops::{RealShellOps, ShellOps};
pub use splitter::TrafficSplitter;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    ShellCommand(#[from] shell_command_ext::Error),
    #[error(transparent)]
    Interface(#[from] interface::Error),
    #[error("pool has {0} interfaces, at most {max} are supported", max = weighted::MAX_POOL_SIZE)]
    PoolTooLarge(usize),
}
