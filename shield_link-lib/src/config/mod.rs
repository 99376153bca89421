use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use tokio::fs;

use crate::interface::{self, Interface};

mod v1;

pub const DEFAULT_PATH: &str = "/etc/shield_link/config.toml";
pub const ENV_VAR: &str = "SHIELD_LINK_CONFIG_PATH";

/// Path locally generated traffic takes by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Egress {
    Wan,
    #[default]
    Vpn,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub egress: Egress,
    pub ingress: Vec<String>,
    pub bypass_addresses: Vec<Ipv4Addr>,
    pub wan: Vec<Interface>,
    pub vpn: Vec<Interface>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration file not found")]
    NoFile,
    #[error("Unable to determine configuration version")]
    VersionNotFound,
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    TomlDeserialization(#[from] toml::de::Error),
    #[error("Unsupported config version: {0}")]
    VersionMismatch(i64),
    #[error(transparent)]
    Interface(#[from] interface::Error),
}

impl fmt::Display for Egress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Egress::Wan => write!(f, "wan"),
            Egress::Vpn => write!(f, "vpn"),
        }
    }
}

pub async fn read(path: &Path) -> Result<Config, Error> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NoFile
        } else {
            Error::IO(e)
        }
    })?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Config, Error> {
    let table = content.parse::<toml::Table>()?;
    let version = table
        .get("version")
        .and_then(|v| v.as_integer())
        .ok_or(Error::VersionNotFound)?;

    match version {
        1 => {
            let res = toml::from_str::<v1::Config>(content)?;
            let wrong_keys = v1::wrong_keys(&table);
            for key in wrong_keys.iter() {
                tracing::warn!(%key, "ignoring unsupported key in configuration file");
            }
            res.try_into()
        }
        _ => Err(Error::VersionMismatch(version)),
    }
}
