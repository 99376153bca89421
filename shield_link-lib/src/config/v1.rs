use serde::{Deserialize, Serialize};

use std::net::Ipv4Addr;

use crate::config::{self, Egress};
use crate::interface::{self, Interface};

const KNOWN_KEYS: [&str; 6] = ["version", "egress", "ingress", "bypass_addresses", "wan", "vpn"];
const INTERFACE_KEYS: [&str; 2] = ["name", "weight"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: u8,
    pub(super) egress: Option<Egress>,
    pub(super) ingress: Option<Vec<String>>,
    pub(super) bypass_addresses: Option<Vec<Ipv4Addr>>,
    pub(super) wan: Option<Vec<Interface>>,
    pub(super) vpn: Option<Vec<Interface>>,
}

pub fn wrong_keys(table: &toml::Table) -> Vec<String> {
    let mut wrong_keys = Vec::new();
    for (key, value) in table.iter() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            wrong_keys.push(key.clone());
            continue;
        }
        // pools are arrays of tables
        if key == "wan" || key == "vpn" {
            let Some(entries) = value.as_array() else {
                continue;
            };
            for (idx, entry) in entries.iter().enumerate() {
                let Some(entry) = entry.as_table() else {
                    continue;
                };
                for entry_key in entry.keys() {
                    if !INTERFACE_KEYS.contains(&entry_key.as_str()) {
                        wrong_keys.push(format!("{key}[{idx}].{entry_key}"));
                    }
                }
            }
        }
    }
    wrong_keys
}

impl TryFrom<Config> for config::Config {
    type Error = config::Error;

    fn try_from(value: Config) -> Result<Self, Self::Error> {
        let ingress = value.ingress.unwrap_or_default();
        let wan = value.wan.unwrap_or_default();
        let vpn = value.vpn.unwrap_or_default();

        for name in ingress.iter().chain(wan.iter().chain(vpn.iter()).map(|i| &i.name)) {
            interface::validate_name(name)?;
        }

        Ok(config::Config {
            egress: value.egress.unwrap_or_default(),
            ingress,
            bypass_addresses: value.bypass_addresses.unwrap_or_default(),
            wan,
            vpn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
version = 1
egress = "wan"
ingress = ["br-lan", "br-guest"]
bypass_addresses = ["192.0.2.10", "198.51.100.7"]

[[wan]]
name = "eth0"

[[vpn]]
name = "wg0"
weight = 1

[[vpn]]
name = "wg1"
weight = 3
"#;

    #[test]
    fn parses_full_configuration() -> anyhow::Result<()> {
        let config = config::parse(FULL)?;

        assert_eq!(config.egress, Egress::Wan);
        assert_eq!(config.ingress, vec!["br-lan".to_string(), "br-guest".to_string()]);
        assert_eq!(
            config.bypass_addresses,
            vec![Ipv4Addr::new(192, 0, 2, 10), Ipv4Addr::new(198, 51, 100, 7)]
        );
        assert_eq!(config.wan, vec![Interface::new("eth0", 1)]);
        assert_eq!(config.vpn, vec![Interface::new("wg0", 1), Interface::new("wg1", 3)]);
        Ok(())
    }

    #[test]
    fn minimal_configuration_uses_defaults() -> anyhow::Result<()> {
        let config = config::parse("version = 1")?;
        assert_eq!(config, config::Config::default());
        Ok(())
    }

    #[test]
    fn wrong_keys_reports_unknown_top_level_and_interface_keys() -> anyhow::Result<()> {
        let content = r#"
version = 1
flavour = "spicy"

[[vpn]]
name = "wg0"
metric = 10
"#;
        let table = content.parse::<toml::Table>()?;
        let mut keys = wrong_keys(&table);
        keys.sort();
        assert_eq!(keys, vec!["flavour".to_string(), "vpn[0].metric".to_string()]);
        Ok(())
    }

    #[test]
    fn rejects_invalid_interface_names() -> anyhow::Result<()> {
        let content = r#"
version = 1
ingress = ["br lan"]
"#;
        let res = config::parse(content);
        assert!(matches!(res, Err(config::Error::Interface(_))));
        Ok(())
    }

    #[test]
    fn rejects_invalid_addresses() -> anyhow::Result<()> {
        let res = config::parse("version = 1\nbypass_addresses = [\"not-an-ip\"]");
        assert!(matches!(res, Err(config::Error::TomlDeserialization(_))));
        Ok(())
    }
}
