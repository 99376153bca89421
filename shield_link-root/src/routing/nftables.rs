//! `nft` invocations against the `shield_link` classification table.

use std::net::Ipv4Addr;

use shield_link_lib::config::Egress;

use super::shell_ops::CommandLine;
use super::weighted::RANDOM_DOMAIN;

const NFT: &str = "nft";

pub(crate) const FAMILY: &str = "ip";
pub(crate) const TABLE: &str = "shield_link";

/// Filled from resolved bypass domains.
pub(crate) const DOMAIN_BYPASS_SET: &str = "no_vpn_domain_ip_set";
/// Filled with explicitly configured bypass addresses.
pub(crate) const BYPASS_SET: &str = "no_vpn_ip_set";

pub(crate) const PREROUTING_CHAIN: &str = "prerouting";
pub(crate) const SELECT_CHAIN: &str = "select_export";
pub(crate) const WAN_CHAIN: &str = "wan";
pub(crate) const VPN_CHAIN: &str = "vpn";

pub(crate) fn egress_chain(egress: Egress) -> &'static str {
    match egress {
        Egress::Wan => WAN_CHAIN,
        Egress::Vpn => VPN_CHAIN,
    }
}

/// Baseline table loaded once via `nft -f -`.
pub(crate) fn ruleset(egress: Egress) -> String {
    format!(
        r#"table {FAMILY} {TABLE} {{
    set {DOMAIN_BYPASS_SET} {{
        type ipv4_addr
    }}

    set {BYPASS_SET} {{
        type ipv4_addr
    }}

    chain {PREROUTING_CHAIN} {{
        type filter hook prerouting priority 0;
    }}

    chain {SELECT_CHAIN} {{
        ip daddr @{BYPASS_SET} jump {WAN_CHAIN}
        ip daddr @{DOMAIN_BYPASS_SET} jump {WAN_CHAIN}
        jump {VPN_CHAIN}
    }}

    chain {VPN_CHAIN} {{
    }}

    chain {WAN_CHAIN} {{
    }}

    chain output {{
        type filter hook output priority 0;
        jump {egress}
    }}
}}
"#,
        egress = egress_chain(egress)
    )
}

pub(crate) fn load_ruleset(egress: Egress) -> CommandLine {
    CommandLine::new(NFT).args(["-f", "-"]).stdin(ruleset(egress))
}

fn table_cmd(verb: &str, object: &str) -> CommandLine {
    CommandLine::new(NFT).args([verb, object, FAMILY, TABLE])
}

fn element_list(addrs: &[Ipv4Addr]) -> String {
    let joined = addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(",");
    format!("{{ {joined} }}")
}

pub(crate) fn add_elements(set: &str, addrs: &[Ipv4Addr]) -> CommandLine {
    table_cmd("add", "element").arg(set).arg(element_list(addrs))
}

pub(crate) fn delete_elements(set: &str, addrs: &[Ipv4Addr]) -> CommandLine {
    table_cmd("delete", "element").arg(set).arg(element_list(addrs))
}

pub(crate) fn flush_set(set: &str) -> CommandLine {
    table_cmd("flush", "set").arg(set)
}

/// Sends traffic entering on `if_name` through the classification chain.
pub(crate) fn ingress_jump(if_name: &str) -> CommandLine {
    table_cmd("add", "rule")
        .arg(PREROUTING_CHAIN)
        .arg("iifname")
        .arg(format!("\"{if_name}\""))
        .args(["jump", SELECT_CHAIN])
}

pub(crate) fn flush_chain(chain: &str) -> CommandLine {
    table_cmd("flush", "chain").arg(chain)
}

/// Marks new connections round robin through `verdict_map` and stores the mark on the connection.
///
/// Later packets of the flow take the stored mark from [`restore_conntrack_mark`].
pub(crate) fn mark_map_rule(chain: &str, verdict_map: &str) -> CommandLine {
    table_cmd("add", "rule")
        .arg(chain)
        .args(["ct", "state", "new"])
        .args(["meta", "mark", "set", "numgen", "inc", "mod"])
        .arg(RANDOM_DOMAIN.to_string())
        .arg("map")
        .arg(verdict_map)
        .args(["ct", "mark", "set", "meta", "mark"])
}

/// Keeps established flows on the interface their first packet was assigned to.
pub(crate) fn restore_conntrack_mark(chain: &str) -> CommandLine {
    table_cmd("add", "rule")
        .arg(chain)
        .args(["ct", "state", "established,related", "meta", "mark", "set", "ct", "mark"])
}

pub(crate) fn delete_table() -> CommandLine {
    CommandLine::new(NFT).args(["delete", "table", FAMILY, TABLE])
}
