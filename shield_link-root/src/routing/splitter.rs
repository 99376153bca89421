//! Split-tunnel orchestration over `nft` and `ip`.
//!
//! [`TrafficSplitter`] owns all bookkeeping of installed state:
//! - the policy routes (mark -> table -> interface) of the last weighted split
//! - the reversal commands for every route and rule it added
//!
//! Methods changing that bookkeeping take `&mut self`; callers serialize access.

use std::mem;
use std::net::Ipv4Addr;

use shield_link_lib::command::StatusResponse;
use shield_link_lib::config::Egress;
use shield_link_lib::interface::{self, Interface};

use super::Error;
use super::nftables;
use super::policy_route::{self, PolicyRoute};
use super::shell_ops::{CommandLine, ShellOps};
use super::weighted::{self, MarkAllocator, Slot};

pub struct TrafficSplitter<S: ShellOps> {
    shell: S,
    egress: Egress,
    routes: Vec<PolicyRoute>,
    /// Reversal commands, executed in reverse order.
    cleanup: Vec<CommandLine>,
}

impl<S: ShellOps> TrafficSplitter<S> {
    pub fn new(shell: S, egress: Egress) -> Self {
        Self {
            shell,
            egress,
            routes: Vec::new(),
            cleanup: Vec::new(),
        }
    }

    pub fn egress(&self) -> Egress {
        self.egress
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            routes: self.routes.iter().map(Into::into).collect(),
            pending_cleanup: self.cleanup.len(),
        }
    }

    /// Loads the classification table.
    ///
    /// Fails if the table already exists.
    pub async fn bootstrap_classifier(&self) -> Result<(), Error> {
        self.run(&nftables::load_ruleset(self.egress)).await?;
        tracing::info!(egress = %self.egress, "classification table installed");
        Ok(())
    }

    pub async fn add_bypass_domain_addresses(&self, addrs: &[Ipv4Addr]) -> Result<(), Error> {
        if addrs.is_empty() {
            return Ok(());
        }
        self.run(&nftables::add_elements(nftables::DOMAIN_BYPASS_SET, addrs))
            .await?;
        tracing::debug!(count = addrs.len(), "domain bypass addresses added");
        Ok(())
    }

    pub async fn remove_bypass_domain_addresses(&self, addrs: &[Ipv4Addr]) -> Result<(), Error> {
        if addrs.is_empty() {
            return Ok(());
        }
        self.run(&nftables::delete_elements(nftables::DOMAIN_BYPASS_SET, addrs))
            .await?;
        tracing::debug!(count = addrs.len(), "domain bypass addresses removed");
        Ok(())
    }

    pub async fn flush_bypass_domain_addresses(&self) -> Result<(), Error> {
        self.run(&nftables::flush_set(nftables::DOMAIN_BYPASS_SET)).await?;
        tracing::debug!("domain bypass addresses flushed");
        Ok(())
    }

    pub async fn add_bypass_addresses(&self, addrs: &[Ipv4Addr]) -> Result<(), Error> {
        if addrs.is_empty() {
            return Ok(());
        }
        self.run(&nftables::add_elements(nftables::BYPASS_SET, addrs)).await?;
        tracing::debug!(count = addrs.len(), "bypass addresses added");
        Ok(())
    }

    /// Stops at the first failing interface, earlier registrations stay in place.
    pub async fn register_ingress_interfaces(&self, names: &[String]) -> Result<(), Error> {
        for name in names {
            interface::validate_name(name)?;
        }
        for name in names {
            self.run(&nftables::ingress_jump(name)).await?;
            tracing::debug!(interface = %name, "ingress interface registered");
        }
        Ok(())
    }

    /// Replaces the weighted split of both pools.
    ///
    /// Phases run strictly in this order:
    /// 1. flush the `vpn` and `wan` chains
    /// 2. install mark rules per non-empty pool (WAN first)
    /// 3. reverse all routes and rules of the previous split
    /// 4. install one routing table and fwmark rule per mark
    pub async fn apply_weighted_split(&mut self, wan: &[Interface], vpn: &[Interface]) -> Result<(), Error> {
        for iface in wan.iter().chain(vpn) {
            interface::validate_name(&iface.name)?;
        }
        weighted::check_pool_size(wan)?;
        weighted::check_pool_size(vpn)?;

        self.run(&nftables::flush_chain(nftables::VPN_CHAIN)).await?;
        self.run(&nftables::flush_chain(nftables::WAN_CHAIN)).await?;

        let mut marks = MarkAllocator::default();
        let mut slots = self.install_pool(nftables::WAN_CHAIN, wan, &mut marks).await?;
        slots.extend(self.install_pool(nftables::VPN_CHAIN, vpn, &mut marks).await?);

        // previous tables reuse the same ids
        self.drain_cleanup().await;
        self.routes.clear();

        // a route is listed once both its route and its rule are in place
        for route in policy_route::allocate(slots) {
            self.run(&route.route_add()).await?;
            self.cleanup.push(route.route_del());
            self.run(&route.rule_add()).await?;
            self.cleanup.push(route.rule_del());
            tracing::debug!(mark = %route.mark, table = route.table, interface = %route.interface, "policy route installed");
            self.routes.push(route);
        }

        tracing::info!(
            wan = wan.len(),
            vpn = vpn.len(),
            routes = self.routes.len(),
            "weighted split applied"
        );
        Ok(())
    }

    /// Reverses all routes and rules, then deletes the classification table.
    ///
    /// Individual reversal failures are logged only; a failing table deletion is returned.
    pub async fn teardown_all(&mut self) -> Result<(), Error> {
        self.drain_cleanup().await;
        self.routes.clear();
        self.run(&nftables::delete_table()).await?;
        tracing::info!("classification table removed");
        Ok(())
    }

    async fn install_pool(&self, chain: &str, pool: &[Interface], marks: &mut MarkAllocator) -> Result<Vec<Slot>, Error> {
        if pool.is_empty() {
            return Ok(Vec::new());
        }
        let slots = weighted::assign(pool, marks)?;
        let verdict_map = weighted::verdict_map(&slots);
        self.run(&nftables::mark_map_rule(chain, &verdict_map)).await?;
        self.run(&nftables::restore_conntrack_mark(chain)).await?;
        tracing::debug!(chain, %verdict_map, "pool marks installed");
        Ok(slots)
    }

    async fn drain_cleanup(&mut self) {
        let pending = mem::take(&mut self.cleanup);
        for cmd in pending.iter().rev() {
            if let Err(error) = self.run(cmd).await {
                tracing::warn!(%error, %cmd, "failed to reverse routing state, continuing anyway");
            }
        }
        tracing::debug!(count = pending.len(), "routing cleanup attempted");
    }

    async fn run(&self, cmd: &CommandLine) -> Result<String, Error> {
        tracing::debug!(%cmd, "executing");
        self.shell.execute(cmd).await
    }
}
