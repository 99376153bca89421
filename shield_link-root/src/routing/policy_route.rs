//! Per-mark routing tables: one default route and one fwmark rule per table.

use shield_link_lib::command::MarkRoute;

use super::shell_ops::CommandLine;
use super::weighted::{FwMark, Slot};

const IP: &str = "ip";

/// Offset keeping generated table ids clear of `main`, `local` and `default`.
pub(crate) const TABLE_BASE: u32 = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PolicyRoute {
    pub(crate) mark: FwMark,
    pub(crate) interface: String,
    pub(crate) table: u32,
}

/// Gives every slot its own table, in slot order starting at `TABLE_BASE + 1`.
pub(crate) fn allocate(slots: impl IntoIterator<Item = Slot>) -> Vec<PolicyRoute> {
    slots
        .into_iter()
        .zip(1..)
        .map(|(slot, idx)| PolicyRoute {
            mark: slot.mark,
            interface: slot.interface,
            table: TABLE_BASE + idx,
        })
        .collect()
}

impl PolicyRoute {
    fn route(&self, verb: &str) -> CommandLine {
        CommandLine::new(IP)
            .args(["route", verb, "default", "dev"])
            .arg(self.interface.as_str())
            .arg("table")
            .arg(self.table.to_string())
    }

    fn rule(&self, verb: &str) -> CommandLine {
        CommandLine::new(IP)
            .args(["rule", verb, "fwmark"])
            .arg(self.mark.to_string())
            .arg("lookup")
            .arg(self.table.to_string())
    }

    pub(crate) fn route_add(&self) -> CommandLine {
        self.route("add")
    }

    pub(crate) fn route_del(&self) -> CommandLine {
        self.route("del")
    }

    pub(crate) fn rule_add(&self) -> CommandLine {
        self.rule("add")
    }

    pub(crate) fn rule_del(&self) -> CommandLine {
        self.rule("del")
    }
}

impl From<&PolicyRoute> for MarkRoute {
    fn from(route: &PolicyRoute) -> Self {
        MarkRoute {
            mark: route.mark.value(),
            interface: route.interface.clone(),
            table: route.table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::weighted::MarkAllocator;

    fn slot(interface: &str, marks: &mut MarkAllocator) -> Slot {
        Slot {
            interface: interface.to_string(),
            mark: marks.next_mark(),
            range: 0..=100,
        }
    }

    #[test]
    fn allocate_numbers_tables_in_slot_order() -> anyhow::Result<()> {
        let mut marks = MarkAllocator::default();
        let routes = allocate(vec![slot("eth0", &mut marks), slot("wg0", &mut marks)]);

        assert_eq!(routes.len(), 2);
        assert_eq!((routes[0].interface.as_str(), routes[0].table), ("eth0", 1001));
        assert_eq!((routes[1].interface.as_str(), routes[1].table), ("wg0", 1002));
        assert_eq!(routes[1].mark.value(), 102);
        Ok(())
    }

    #[test]
    fn install_and_reversal_commands_mirror_each_other() -> anyhow::Result<()> {
        let mut marks = MarkAllocator::default();
        let route = allocate(vec![slot("wg0", &mut marks)]).remove(0);

        assert_eq!(route.route_add().to_string(), "ip route add default dev wg0 table 1001");
        assert_eq!(route.route_del().to_string(), "ip route del default dev wg0 table 1001");
        assert_eq!(route.rule_add().to_string(), "ip rule add fwmark 0x65 lookup 1001");
        assert_eq!(route.rule_del().to_string(), "ip rule del fwmark 0x65 lookup 1001");
        Ok(())
    }

    #[test]
    fn converts_to_status_entry() -> anyhow::Result<()> {
        let mut marks = MarkAllocator::default();
        let route = allocate(vec![slot("wg1", &mut marks)]).remove(0);
        let entry = MarkRoute::from(&route);
        assert_eq!(
            entry,
            MarkRoute {
                mark: 0x65,
                interface: "wg1".into(),
                table: 1001
            }
        );
        Ok(())
    }
}
