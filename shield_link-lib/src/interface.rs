use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Linux limits interface names to `IFNAMSIZ - 1` bytes.
pub const MAX_NAME_LEN: usize = 15;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("invalid interface name: {0:?}")]
    InvalidName(String),
    #[error("invalid interface weight: {0:?}")]
    InvalidWeight(String),
}

/// Egress interface taking part in a weighted pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    /// Relative share of new connections, values below 1 count as 1.
    #[serde(default = "default_weight")]
    pub weight: i32,
}

fn default_weight() -> i32 {
    1
}

impl Interface {
    pub fn new(name: impl Into<String>, weight: i32) -> Self {
        Interface {
            name: name.into(),
            weight,
        }
    }

    pub fn effective_weight(&self) -> u32 {
        self.weight.max(1) as u32
    }
}

/// Checks that `name` can be used verbatim as an interface name inside `nft` and `ip` arguments.
pub fn validate_name(name: &str) -> Result<(), Error> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() && c != '/' && c != '"' && c != '\'');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.weight)
    }
}

/// Parses `name` or `name:weight`.
impl FromStr for Interface {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, weight) = match s.rsplit_once(':') {
            Some((name, weight)) => {
                let weight = weight
                    .parse::<i32>()
                    .map_err(|_| Error::InvalidWeight(weight.to_string()))?;
                (name, weight)
            }
            None => (s, default_weight()),
        };
        validate_name(name)?;
        Ok(Interface::new(name, weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_weight_clamps_below_one() -> anyhow::Result<()> {
        assert_eq!(Interface::new("wg0", 0).effective_weight(), 1);
        assert_eq!(Interface::new("wg0", -7).effective_weight(), 1);
        assert_eq!(Interface::new("wg0", 4).effective_weight(), 4);
        Ok(())
    }

    #[test]
    fn parses_name_with_and_without_weight() -> anyhow::Result<()> {
        assert_eq!("wg0:3".parse::<Interface>()?, Interface::new("wg0", 3));
        assert_eq!("eth0".parse::<Interface>()?, Interface::new("eth0", 1));
        assert_eq!("eth0:-2".parse::<Interface>()?, Interface::new("eth0", -2));
        Ok(())
    }

    #[test]
    fn rejects_malformed_interfaces() -> anyhow::Result<()> {
        assert_eq!(
            "wg0:heavy".parse::<Interface>(),
            Err(Error::InvalidWeight("heavy".to_string()))
        );
        assert!(matches!(":3".parse::<Interface>(), Err(Error::InvalidName(_))));
        assert!(matches!(
            "averyveryverylongname".parse::<Interface>(),
            Err(Error::InvalidName(_))
        ));
        Ok(())
    }

    #[test]
    fn validate_name_rejects_quotes_and_whitespace() -> anyhow::Result<()> {
        assert!(validate_name("br-lan").is_ok());
        assert!(validate_name("eth0.100").is_ok());
        assert!(validate_name("wg\"0").is_err());
        assert!(validate_name("wg 0").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("").is_err());
        Ok(())
    }

    #[test]
    fn weight_defaults_to_one_when_deserializing() -> anyhow::Result<()> {
        let iface: Interface = serde_json::from_str(r#"{"name":"wg1"}"#)?;
        assert_eq!(iface, Interface::new("wg1", 1));
        Ok(())
    }
}
