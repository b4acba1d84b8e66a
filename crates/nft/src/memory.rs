//! In-process stand-in for the nf_tables kernel state.
//!
//! [`MemoryTransport`] keeps tables, chains and rules in memory and applies
//! the semantics the reconciler depends on:
//!
//! - a commit applies the whole staged batch or nothing
//! - lookups of missing objects fail with `NotFound`
//! - deleting a chain that still has rules fails (EBUSY)
//! - deleting a table removes its chains and rules
//! - reading rules resets their counters
//!
//! Handles are cheap clones sharing one state, so a test can keep a handle
//! for inspection after moving another into a `Reconciler`. Counters move
//! either by [`MemoryTransport::bump`] or by running a synthetic
//! [`Packet`] through the installed rules with [`MemoryTransport::deliver`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use flowmon_core::types::{Protocol, TableFamily};

use crate::error::TransportError;
use crate::expr::{CmpOp, Expression, MetaKey, PayloadBase};
use crate::rule::{Chain, Hook, Rule, Table};
use crate::transport::{Batch, BatchOp, Transport};

/// A one-shot failure to inject into the next matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    ListTable,
    ListChain,
    ResetRules,
    Commit,
}

#[derive(Debug, Clone)]
struct ChainState {
    chain: Chain,
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
struct TableState {
    table: Table,
    chains: Vec<ChainState>,
}

#[derive(Debug, Default, Clone)]
struct Kernel {
    tables: Vec<TableState>,
    next_handle: u64,
}

#[derive(Debug, Default)]
struct Shared {
    kernel: Kernel,
    faults: HashMap<Fault, usize>,
    permission_denied: bool,
    commits: usize,
}

impl Kernel {
    fn table(&self, table: &Table) -> Option<&TableState> {
        self.tables.iter().find(|t| t.table == *table)
    }

    fn table_mut(&mut self, table: &Table) -> Result<&mut TableState, TransportError> {
        self.tables
            .iter_mut()
            .find(|t| t.table == *table)
            .ok_or_else(|| TransportError::NotFound(format!("table {table}")))
    }

    fn chain_mut(&mut self, table: &Table, name: &str) -> Result<&mut ChainState, TransportError> {
        self.table_mut(table)?
            .chains
            .iter_mut()
            .find(|c| c.chain.name == name)
            .ok_or_else(|| TransportError::NotFound(format!("chain {table} {name}")))
    }

    fn apply(&mut self, op: BatchOp) -> Result<(), TransportError> {
        match op {
            BatchOp::AddTable(table) => {
                if self.table(&table).is_none() {
                    self.tables.push(TableState {
                        table,
                        chains: Vec::new(),
                    });
                }
            }
            BatchOp::AddChain(chain) => {
                let table = self.table_mut(&chain.table)?;
                match table.chains.iter_mut().find(|c| c.chain.name == chain.name) {
                    Some(existing) => existing.chain = chain,
                    None => table.chains.push(ChainState {
                        chain,
                        rules: Vec::new(),
                    }),
                }
            }
            BatchOp::AddRule(mut rule) => {
                self.next_handle += 1;
                rule.handle = Some(self.next_handle);
                let table = rule.table.clone();
                let chain = rule.chain.clone();
                self.chain_mut(&table, &chain)?.rules.push(rule);
            }
            BatchOp::FlushChain(chain) => {
                self.chain_mut(&chain.table, &chain.name)?.rules.clear();
            }
            BatchOp::DelChain(chain) => {
                let table = self.table_mut(&chain.table)?;
                let idx = table
                    .chains
                    .iter()
                    .position(|c| c.chain.name == chain.name)
                    .ok_or_else(|| TransportError::NotFound(format!("chain {chain}")))?;
                if !table.chains[idx].rules.is_empty() {
                    return Err(TransportError::from_errno(
                        "delete chain",
                        libc::EBUSY,
                        &chain.name,
                    ));
                }
                table.chains.remove(idx);
            }
            BatchOp::FlushTable(table) => {
                for chain in &mut self.table_mut(&table)?.chains {
                    chain.rules.clear();
                }
            }
            BatchOp::DelTable(table) => {
                self.table_mut(&table)?;
                self.tables.retain(|t| t.table != table);
            }
        }
        Ok(())
    }
}

/// Shared-state in-memory transport. See the module docs.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
    batch: Batch,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes the next `count` calls of the given kind fail.
    pub fn fail_next(&self, fault: Fault, count: usize) {
        *self.shared().faults.entry(fault).or_default() += count;
    }

    /// Makes every call fail with `PermissionDenied` until switched off.
    pub fn set_permission_denied(&self, denied: bool) {
        self.shared().permission_denied = denied;
    }

    /// Successful commits so far.
    pub fn commits(&self) -> usize {
        self.shared().commits
    }

    pub fn tables(&self) -> Vec<Table> {
        self.shared()
            .kernel
            .tables
            .iter()
            .map(|t| t.table.clone())
            .collect()
    }

    pub fn chains(&self, table: &Table) -> Vec<Chain> {
        self.shared()
            .kernel
            .table(table)
            .map(|t| t.chains.iter().map(|c| c.chain.clone()).collect())
            .unwrap_or_default()
    }

    /// Rules of a chain, without resetting counters.
    pub fn rules(&self, table: &Table, chain: &str) -> Vec<Rule> {
        self.shared()
            .kernel
            .table(table)
            .and_then(|t| t.chains.iter().find(|c| c.chain.name == chain))
            .map(|c| c.rules.clone())
            .unwrap_or_default()
    }

    /// Appends a rule directly, outside any batch, as another process would.
    pub fn insert_rule(&self, rule: Rule) -> Result<(), TransportError> {
        self.shared().kernel.apply(BatchOp::AddRule(rule))
    }

    /// Adds to the counter of every rule labelled `label` in `chain`.
    /// Returns how many rules were bumped.
    pub fn bump(&self, table: &Table, chain: &str, label: &str, packets: u64, bytes: u64) -> usize {
        let mut shared = self.shared();
        let Ok(state) = shared.kernel.chain_mut(table, chain) else {
            return 0;
        };
        let mut bumped = 0;
        for rule in state
            .rules
            .iter_mut()
            .filter(|r| r.comment.as_deref() == Some(label))
        {
            for expr in &mut rule.exprs {
                if let Expression::Counter {
                    packets: p,
                    bytes: b,
                } = expr
                {
                    *p += packets;
                    *b += bytes;
                    bumped += 1;
                }
            }
        }
        bumped
    }

    /// Runs a packet through every base chain on its hook, in every table
    /// whose family carries it. Returns the number of counters incremented.
    pub fn deliver(&self, packet: &Packet) -> usize {
        let mut shared = self.shared();
        let mut hits = 0;
        for table in &mut shared.kernel.tables {
            if !packet.matches_family(table.table.family) {
                continue;
            }
            for chain in &mut table.chains {
                if chain.chain.hook.map(|h| h.hook) != Some(packet.hook) {
                    continue;
                }
                for rule in &mut chain.rules {
                    hits += packet.evaluate(rule);
                }
            }
        }
        hits
    }

    fn check(&self, fault: Fault) -> Result<(), TransportError> {
        let mut shared = self.shared();
        if shared.permission_denied {
            return Err(TransportError::PermissionDenied);
        }
        if let Some(remaining) = shared.faults.get_mut(&fault)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(TransportError::Netlink {
                op: format!("{fault:?}"),
                reason: "injected failure".to_owned(),
            });
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn list_table(&mut self, family: TableFamily, name: &str) -> Result<Table, TransportError> {
        self.check(Fault::ListTable)?;
        let wanted = Table::new(family, name);
        self.shared()
            .kernel
            .table(&wanted)
            .map(|t| t.table.clone())
            .ok_or_else(|| TransportError::NotFound(format!("table {wanted}")))
    }

    fn list_chain(&mut self, table: &Table, name: &str) -> Result<Chain, TransportError> {
        self.check(Fault::ListChain)?;
        let mut shared = self.shared();
        let chain = shared.kernel.chain_mut(table, name)?;
        Ok(chain.chain.clone())
    }

    fn reset_rules(&mut self, table: &Table, chain: &Chain) -> Result<Vec<Rule>, TransportError> {
        self.check(Fault::ResetRules)?;
        let mut shared = self.shared();
        let state = shared.kernel.chain_mut(table, &chain.name)?;
        let snapshot = state.rules.clone();
        for rule in &mut state.rules {
            for expr in &mut rule.exprs {
                if let Expression::Counter { packets, bytes } = expr {
                    *packets = 0;
                    *bytes = 0;
                }
            }
        }
        Ok(snapshot)
    }

    fn batch(&mut self) -> &mut Batch {
        &mut self.batch
    }

    fn commit(&mut self) -> Result<(), TransportError> {
        let ops = self.batch.take();
        self.check(Fault::Commit)?;
        let mut shared = self.shared();
        let mut next = shared.kernel.clone();
        for op in ops {
            next.apply(op)?;
        }
        shared.kernel = next;
        shared.commits += 1;
        Ok(())
    }
}

/// A synthetic packet as seen by a netfilter hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub hook: Hook,
    pub l4proto: u8,
    /// IPv4 or IPv6 header
    pub network: Vec<u8>,
    /// L4 header
    pub transport: Vec<u8>,
}

impl Packet {
    /// A TCP segment. `flags` is byte 13 of the TCP header.
    pub fn tcp(hook: Hook, src: IpAddr, dst: IpAddr, sport: u16, dport: u16, flags: u8) -> Self {
        let mut l4 = vec![0u8; 20];
        l4[0..2].copy_from_slice(&sport.to_be_bytes());
        l4[2..4].copy_from_slice(&dport.to_be_bytes());
        l4[12] = 5 << 4;
        l4[13] = flags;
        Self::build(hook, Protocol::Tcp, src, dst, l4)
    }

    pub fn udp(hook: Hook, src: IpAddr, dst: IpAddr, sport: u16, dport: u16) -> Self {
        let mut l4 = vec![0u8; 8];
        l4[0..2].copy_from_slice(&sport.to_be_bytes());
        l4[2..4].copy_from_slice(&dport.to_be_bytes());
        l4[4..6].copy_from_slice(&8u16.to_be_bytes());
        Self::build(hook, Protocol::Udp, src, dst, l4)
    }

    /// An echo request, ICMP or ICMPv6 depending on the address family.
    pub fn ping(hook: Hook, src: IpAddr, dst: IpAddr) -> Self {
        let protocol = if src.is_ipv4() {
            Protocol::Icmp
        } else {
            Protocol::Icmpv6
        };
        let mut l4 = vec![0u8; 8];
        l4[0] = if src.is_ipv4() { 8 } else { 128 };
        Self::build(hook, protocol, src, dst, l4)
    }

    fn build(hook: Hook, protocol: Protocol, src: IpAddr, dst: IpAddr, transport: Vec<u8>) -> Self {
        let network = match (src, dst) {
            (IpAddr::V4(s), IpAddr::V4(d)) => {
                let mut h = vec![0u8; 20];
                h[0] = 0x45;
                h[9] = protocol.number();
                h[12..16].copy_from_slice(&s.octets());
                h[16..20].copy_from_slice(&d.octets());
                h
            }
            (s, d) => {
                let mut h = vec![0u8; 40];
                h[0] = 0x60;
                h[6] = protocol.number();
                h[8..24].copy_from_slice(&v6_octets(s));
                h[24..40].copy_from_slice(&v6_octets(d));
                h
            }
        };
        Self {
            hook,
            l4proto: protocol.number(),
            network,
            transport,
        }
    }

    /// Bytes on the wire, as counted by the kernel.
    pub fn len(&self) -> u64 {
        (self.network.len() + self.transport.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_ipv4(&self) -> bool {
        self.network.first().is_some_and(|b| b >> 4 == 4)
    }

    fn matches_family(&self, family: TableFamily) -> bool {
        match family {
            TableFamily::Ipv4 => self.is_ipv4(),
            TableFamily::Ipv6 => !self.is_ipv4(),
            TableFamily::Inet => true,
        }
    }

    /// Runs one rule; returns the number of counters it incremented.
    fn evaluate(&self, rule: &mut Rule) -> usize {
        let mut regs: HashMap<u32, Vec<u8>> = HashMap::new();
        let mut hits = 0;
        for expr in &mut rule.exprs {
            match expr {
                Expression::Meta { key, dreg } => match key {
                    MetaKey::L4Proto => {
                        regs.insert(dreg.0, vec![self.l4proto]);
                    }
                    MetaKey::Other(_) => return hits,
                },
                Expression::Payload {
                    base,
                    offset,
                    len,
                    dreg,
                } => {
                    let header = match base {
                        PayloadBase::Network => &self.network,
                        PayloadBase::Transport => &self.transport,
                        _ => return hits,
                    };
                    let start = *offset as usize;
                    let Some(bytes) = header.get(start..start + *len as usize) else {
                        return hits;
                    };
                    regs.insert(dreg.0, bytes.to_vec());
                }
                Expression::Bitwise {
                    sreg,
                    dreg,
                    mask,
                    xor,
                    ..
                } => {
                    let Some(value) = regs.get(&sreg.0) else {
                        return hits;
                    };
                    let out = value
                        .iter()
                        .zip(mask.iter())
                        .zip(xor.iter())
                        .map(|((v, m), x)| (v & m) ^ x)
                        .collect();
                    regs.insert(dreg.0, out);
                }
                Expression::Cmp { sreg, op, data } => {
                    let loaded = regs.get(&sreg.0).map(Vec::as_slice);
                    if *op != CmpOp::Eq || loaded != Some(data.as_slice()) {
                        return hits;
                    }
                }
                Expression::Counter { packets, bytes } => {
                    *packets += 1;
                    *bytes += self.len();
                    hits += 1;
                }
                Expression::Other { .. } => return hits,
            }
        }
        hits
    }
}

fn v6_octets(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}
