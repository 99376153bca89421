//! Stateful mock for the [`ShellOps`] abstraction.
//!
//! The mock interprets the `nft` and `ip` argument vectors it receives and keeps
//! an in-memory model of the table, sets, chains, routes and rules they would
//! create. Tests assert on that _state_ after an operation, not just on which
//! commands were issued. Failures mirror the messages of the real tools.
//!
//! Uses `Arc<Mutex<_>>` for interior mutability in async contexts.

#![cfg(test)]

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use shield_link_lib::shell_command_ext;

use super::Error;
use super::nftables::{FAMILY, TABLE};
use super::shell_ops::{CommandLine, ShellOps};

const NO_SUCH_FILE: &str = "Error: Could not process rule: No such file or directory";

#[derive(Debug, Default)]
pub struct NftTable {
    pub sets: HashMap<String, BTreeSet<Ipv4Addr>>,
    pub chains: HashMap<String, Vec<String>>,
}

impl NftTable {
    /// Understands the subset of nft syntax used by the classification ruleset.
    fn from_ruleset(ruleset: &str) -> Self {
        let mut table = NftTable::default();
        let mut chain: Option<String> = None;
        for line in ruleset.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("set ") {
                let name = rest.trim_end_matches('{').trim();
                table.sets.insert(name.to_string(), BTreeSet::new());
                chain = None;
            } else if let Some(rest) = line.strip_prefix("chain ") {
                let name = rest.trim_end_matches('{').trim().to_string();
                table.chains.insert(name.clone(), Vec::new());
                chain = Some(name);
            } else if line == "}" {
                chain = None;
            } else if let Some(name) = &chain {
                if !line.is_empty() && !line.starts_with("type ") {
                    if let Some(rules) = table.chains.get_mut(name) {
                        rules.push(line.to_string());
                    }
                }
            }
        }
        table
    }
}

#[derive(Debug, Default)]
pub struct ShellState {
    /// Every command in execution order, rendered as a shell line.
    pub executed: Vec<String>,
    pub table: Option<NftTable>,
    /// (device, table id) of default routes.
    pub routes: Vec<(String, u32)>,
    /// (fwmark, table id) of policy rules.
    pub rules: Vec<(u32, u32)>,
    /// Command line prefix -> output of the simulated failure.
    pub fail_on: HashMap<String, String>,
}

impl ShellState {
    fn check_fail(&self, line: &str) -> Result<(), String> {
        match self.fail_on.iter().find(|(prefix, _)| line.starts_with(prefix.as_str())) {
            Some((_, output)) => Err(output.clone()),
            None => Ok(()),
        }
    }

    fn table_mut(&mut self, family: &str, name: &str) -> Result<&mut NftTable, String> {
        match &mut self.table {
            Some(table) if family == FAMILY && name == TABLE => Ok(table),
            _ => Err(NO_SUCH_FILE.to_string()),
        }
    }

    fn nft(&mut self, args: &[&str], input: Option<&str>) -> Result<(), String> {
        match args {
            ["-f", "-"] => {
                let ruleset = input.ok_or("Error: no input")?;
                if self.table.is_some() {
                    return Err("Error: Could not process rule: File exists".to_string());
                }
                self.table = Some(NftTable::from_ruleset(ruleset));
                Ok(())
            }
            ["add", "element", family, table, set, elements] => {
                let elements = parse_elements(elements)?;
                let set = self.table_mut(family, table)?.sets.get_mut(*set).ok_or(NO_SUCH_FILE)?;
                set.extend(elements);
                Ok(())
            }
            ["delete", "element", family, table, set, elements] => {
                let elements = parse_elements(elements)?;
                let set = self.table_mut(family, table)?.sets.get_mut(*set).ok_or(NO_SUCH_FILE)?;
                if !elements.iter().all(|e| set.contains(e)) {
                    return Err(NO_SUCH_FILE.to_string());
                }
                for element in &elements {
                    set.remove(element);
                }
                Ok(())
            }
            ["flush", "set", family, table, set] => {
                self.table_mut(family, table)?.sets.get_mut(*set).ok_or(NO_SUCH_FILE)?.clear();
                Ok(())
            }
            ["add", "rule", family, table, chain, rule @ ..] => {
                let chain = self.table_mut(family, table)?.chains.get_mut(*chain).ok_or(NO_SUCH_FILE)?;
                chain.push(rule.join(" "));
                Ok(())
            }
            ["flush", "chain", family, table, chain] => {
                self.table_mut(family, table)?.chains.get_mut(*chain).ok_or(NO_SUCH_FILE)?.clear();
                Ok(())
            }
            ["delete", "table", family, table] => {
                self.table_mut(family, table)?;
                self.table = None;
                Ok(())
            }
            _ => Err(format!("Error: syntax error, unexpected {}", args.join(" "))),
        }
    }

    fn ip(&mut self, args: &[&str]) -> Result<(), String> {
        match args {
            ["route", "add", "default", "dev", dev, "table", table] => {
                let route = (dev.to_string(), parse_table(table)?);
                if self.routes.contains(&route) {
                    return Err("RTNETLINK answers: File exists".to_string());
                }
                self.routes.push(route);
                Ok(())
            }
            ["route", "del", "default", "dev", dev, "table", table] => {
                let route = (dev.to_string(), parse_table(table)?);
                let idx = self
                    .routes
                    .iter()
                    .position(|r| *r == route)
                    .ok_or("RTNETLINK answers: No such process")?;
                self.routes.remove(idx);
                Ok(())
            }
            ["rule", "add", "fwmark", mark, "lookup", table] => {
                self.rules.push((parse_mark(mark)?, parse_table(table)?));
                Ok(())
            }
            ["rule", "del", "fwmark", mark, "lookup", table] => {
                let rule = (parse_mark(mark)?, parse_table(table)?);
                let idx = self
                    .rules
                    .iter()
                    .position(|r| *r == rule)
                    .ok_or("RTNETLINK answers: No such file or directory")?;
                self.rules.remove(idx);
                Ok(())
            }
            _ => Err(format!("Command \"{}\" is unknown, try \"ip help\".", args.join(" "))),
        }
    }
}

fn parse_elements(elements: &str) -> Result<Vec<Ipv4Addr>, String> {
    elements
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(|e| e.trim().parse::<Ipv4Addr>().map_err(|e| format!("Error: {e}")))
        .collect()
}

fn parse_table(table: &str) -> Result<u32, String> {
    table.parse().map_err(|_| format!("Error: argument \"{table}\" is wrong: invalid table ID"))
}

fn parse_mark(mark: &str) -> Result<u32, String> {
    let parsed = match mark.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => mark.parse(),
    };
    parsed.map_err(|_| format!("Error: argument \"{mark}\" is wrong: fwmark value is invalid"))
}

#[derive(Clone)]
pub struct MockShellOps {
    pub state: Arc<Mutex<ShellState>>,
}

impl MockShellOps {
    pub fn new() -> Self {
        Self::with_state(ShellState::default())
    }

    pub fn with_state(state: ShellState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Commands starting with `prefix` fail with `output` until cleared.
    pub fn fail_on(&self, prefix: &str, output: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_on
            .insert(prefix.to_string(), output.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_on.clear();
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn clear_executed(&self) {
        self.state.lock().unwrap().executed.clear();
    }

    pub fn set_members(&self, set: &str) -> Vec<Ipv4Addr> {
        let s = self.state.lock().unwrap();
        s.table
            .as_ref()
            .and_then(|t| t.sets.get(set))
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn chain_rules(&self, chain: &str) -> Vec<String> {
        let s = self.state.lock().unwrap();
        s.table
            .as_ref()
            .and_then(|t| t.chains.get(chain))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ShellOps for MockShellOps {
    async fn execute(&self, cmd: &CommandLine) -> Result<String, Error> {
        let mut s = self.state.lock().unwrap();
        let line = cmd.to_string();
        s.executed.push(line.clone());

        let args = cmd.argv().iter().map(String::as_str).collect::<Vec<_>>();
        let res = s.check_fail(&line).and_then(|_| match cmd.program() {
            "nft" => s.nft(&args, cmd.input()),
            "ip" => s.ip(&args),
            other => Err(format!("{other}: command not found")),
        });

        res.map(|_| String::new()).map_err(|output| {
            Error::ShellCommand(shell_command_ext::Error::CommandFailed {
                cmd: line,
                status: Some(1),
                output,
            })
        })
    }
}
