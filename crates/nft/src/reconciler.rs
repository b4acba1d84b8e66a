//! Installs, reads back and removes the flowmon table.
//!
//! [`Reconciler`] owns one transport behind a mutex. Each of its three
//! operations holds the lock for its whole duration, so operations on the
//! same instance never interleave.
//!
//! Setup never diffs: existing chains are flushed, deleted and recreated in
//! the same batch that installs the new rules, and the batch commits as a
//! unit.

use std::sync::{Mutex, MutexGuard};

use flowmon_core::config::NftablesConfig;
use flowmon_core::types::{CounterSet, Direction, TableFamily};
use tracing::{debug, info, warn};

use crate::compiler::compile;
use crate::decoder::decode;
use crate::error::{ReconcileError, TransportError};
use crate::rule::{Chain, Hook, Table};
use crate::transport::Transport;

/// Table identity, chain names and hook priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub family: TableFamily,
    pub table_name: String,
    pub input_chain: String,
    pub output_chain: String,
    pub chain_priority: i32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&NftablesConfig::default())
    }
}

impl From<&NftablesConfig> for ReconcilerConfig {
    fn from(cfg: &NftablesConfig) -> Self {
        Self {
            family: cfg.family,
            table_name: cfg.table_name.clone(),
            input_chain: cfg.input_chain.clone(),
            output_chain: cfg.output_chain.clone(),
            chain_priority: cfg.chain_priority,
        }
    }
}

impl ReconcilerConfig {
    pub fn table(&self) -> Table {
        Table::new(self.family, self.table_name.clone())
    }

    pub fn chain_name(&self, direction: Direction) -> &str {
        match direction {
            Direction::Input => &self.input_chain,
            Direction::Output => &self.output_chain,
        }
    }

    /// The base chain for `direction`, hooked at the configured priority.
    pub fn chain(&self, direction: Direction) -> Chain {
        Chain::base(
            self.table(),
            self.chain_name(direction),
            Hook::from(direction),
            self.chain_priority,
        )
    }
}

/// Setup, ListCounters and Cleanup over one transport.
pub struct Reconciler<T: Transport> {
    config: ReconcilerConfig,
    transport: Mutex<T>,
}

impl<T: Transport> Reconciler<T> {
    pub fn new(config: ReconcilerConfig, transport: T) -> Self {
        Self {
            config,
            transport: Mutex::new(transport),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, T>, ReconcileError> {
        self.transport.lock().map_err(|_| ReconcileError::Poisoned)
    }

    /// Replaces whatever is installed with the rules for `set`.
    ///
    /// The table is reused when present. Both chains are rebuilt from
    /// scratch. Nothing is applied unless the final commit succeeds, and
    /// nothing staged by a failed call survives into the next one.
    pub fn setup(&self, set: &CounterSet) -> Result<(), ReconcileError> {
        let mut transport = self.lock()?;
        discard_staged(&mut *transport);

        if let Err(e) = self.stage_setup(&mut *transport, set) {
            discard_staged(&mut *transport);
            return Err(e);
        }

        transport.commit().map_err(ReconcileError::CommitFailed)?;
        info!(
            table = %self.config.table(),
            input = set.input.len(),
            output = set.output.len(),
            "counter rules installed"
        );
        Ok(())
    }

    fn stage_setup(&self, transport: &mut T, set: &CounterSet) -> Result<(), ReconcileError> {
        let table = self.config.table();

        match transport.list_table(table.family, &table.name) {
            Ok(_) => debug!(table = %table, "reusing existing table"),
            Err(e) if e.is_not_found() => transport.add_table(&table),
            Err(source) => {
                return Err(ReconcileError::SetupFailed {
                    stage: format!("looking up table {table}"),
                    source,
                });
            }
        }

        for direction in Direction::BOTH {
            let chain = self.config.chain(direction);
            match transport.list_chain(&table, &chain.name) {
                Ok(existing) => {
                    debug!(chain = %chain.name, "replacing existing chain");
                    transport.flush_chain(&existing);
                    transport.del_chain(&existing);
                }
                Err(e) if e.is_not_found() => {}
                Err(source) => {
                    return Err(ReconcileError::SetupFailed {
                        stage: format!("looking up chain {}", chain.name),
                        source,
                    });
                }
            }
            transport.add_chain(&chain);

            let specs = set.get(direction);
            for spec in specs {
                transport.add_rule(&compile(&chain, spec));
            }
            debug!(chain = %chain.name, rules = specs.len(), "chain staged");
        }
        Ok(())
    }

    /// Reads every counter rule back, zeroing the kernel counters.
    ///
    /// Fails on the first rule that is not a flowmon counter rule.
    pub fn list_counters(&self) -> Result<CounterSet, ReconcileError> {
        let mut transport = self.lock()?;
        let table = match transport.list_table(self.config.family, &self.config.table_name) {
            Ok(table) => table,
            Err(e) if e.is_not_found() => {
                return Err(ReconcileError::TableNotFound(self.config.table_name.clone()));
            }
            Err(source) => {
                return Err(ReconcileError::ListFailed {
                    chain: String::new(),
                    source,
                });
            }
        };

        let mut set = CounterSet::default();
        for direction in Direction::BOTH {
            let name = self.config.chain_name(direction);
            let chain = transport.list_chain(&table, name).map_err(|e| match e {
                TransportError::NotFound(_) => ReconcileError::ChainNotFound(name.to_owned()),
                source => ReconcileError::ListFailed {
                    chain: name.to_owned(),
                    source,
                },
            })?;
            let rules = transport
                .reset_rules(&table, &chain)
                .map_err(|source| ReconcileError::ListFailed {
                    chain: name.to_owned(),
                    source,
                })?;

            let specs = set.get_mut(direction);
            for (index, rule) in rules.iter().enumerate() {
                let mut spec = decode(rule).map_err(|source| {
                    warn!(chain = %name, index, error = %source, "foreign rule in monitored chain");
                    ReconcileError::MalformedRule {
                        chain: name.to_owned(),
                        index,
                        source,
                    }
                })?;
                spec.direction = Some(direction);
                specs.push(spec);
            }
            debug!(chain = %name, rules = rules.len(), "counters read");
        }
        Ok(set)
    }

    /// Removes the table and everything in it. A missing table is not an
    /// error.
    pub fn cleanup(&self) -> Result<(), ReconcileError> {
        let mut transport = self.lock()?;
        discard_staged(&mut *transport);
        let table = match transport.list_table(self.config.family, &self.config.table_name) {
            Ok(table) => table,
            Err(e) if e.is_not_found() => {
                debug!(table = %self.config.table_name, "nothing to clean up");
                return Ok(());
            }
            Err(source) => return Err(ReconcileError::CleanupFailed(source)),
        };

        transport.flush_table(&table);
        transport.del_table(&table);
        transport.commit().map_err(ReconcileError::CleanupFailed)?;
        info!(table = %table, "counter table removed");
        Ok(())
    }
}

/// Drops operations left in the batch by an earlier call.
fn discard_staged<T: Transport>(transport: &mut T) {
    let stale = transport.batch().take();
    if !stale.is_empty() {
        debug!(ops = stale.len(), "discarding uncommitted operations");
    }
}

#[cfg(test)]
mod tests {
    use flowmon_core::types::{CounterSpec, Protocol};

    use super::*;
    use crate::memory::{Fault, MemoryTransport};

    fn reconciler() -> (Reconciler<MemoryTransport>, MemoryTransport) {
        let kernel = MemoryTransport::new();
        (
            Reconciler::new(ReconcilerConfig::default(), kernel.clone()),
            kernel,
        )
    }

    fn tcp(label: &str, port: u16) -> CounterSpec {
        CounterSpec {
            label: label.to_owned(),
            protocol: Some(Protocol::Tcp),
            dst_port: Some(port),
            ..CounterSpec::default()
        }
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = ReconcilerConfig::default();
        assert_eq!(cfg.family, TableFamily::Ipv4);
        assert_eq!(cfg.table_name, "flowmon");
        assert_eq!(cfg.input_chain, "input");
        assert_eq!(cfg.output_chain, "output");
        assert_eq!(cfg.chain_priority, -300);
        assert_eq!(cfg.chain(Direction::Output).hook.map(|h| h.hook), Some(Hook::Output));
    }

    #[test]
    fn setup_commits_once() {
        let (r, kernel) = reconciler();
        let set = CounterSet {
            input: vec![tcp("ssh", 22)],
            output: vec![],
        };
        r.setup(&set).unwrap();
        assert_eq!(kernel.commits(), 1);
        assert_eq!(kernel.tables(), vec![r.config().table()]);
        assert_eq!(kernel.rules(&r.config().table(), "input").len(), 1);
    }

    #[test]
    fn setup_lookup_failure_is_setup_failed() {
        let (r, kernel) = reconciler();
        kernel.fail_next(Fault::ListTable, 1);
        let err = r.setup(&CounterSet::default()).unwrap_err();
        assert!(matches!(err, ReconcileError::SetupFailed { .. }), "{err}");
        assert_eq!(kernel.commits(), 0);
    }

    #[test]
    fn setup_chain_lookup_failure_is_setup_failed() {
        let (r, kernel) = reconciler();
        kernel.fail_next(Fault::ListChain, 1);
        let err = r.setup(&CounterSet::default()).unwrap_err();
        assert!(matches!(err, ReconcileError::SetupFailed { ref stage, .. } if stage.contains("input")));
    }

    /// Fails the output chain lookup a given number of times.
    struct FlakyOutputLookup {
        inner: MemoryTransport,
        failures: usize,
    }

    impl Transport for FlakyOutputLookup {
        fn list_table(&mut self, family: TableFamily, name: &str) -> Result<Table, TransportError> {
            self.inner.list_table(family, name)
        }

        fn list_chain(&mut self, table: &Table, name: &str) -> Result<Chain, TransportError> {
            if name == "output" && self.failures > 0 {
                self.failures -= 1;
                return Err(TransportError::Netlink {
                    op: "get chain".to_owned(),
                    reason: "injected failure".to_owned(),
                });
            }
            self.inner.list_chain(table, name)
        }

        fn reset_rules(
            &mut self,
            table: &Table,
            chain: &Chain,
        ) -> Result<Vec<crate::rule::Rule>, TransportError> {
            self.inner.reset_rules(table, chain)
        }

        fn batch(&mut self) -> &mut crate::transport::Batch {
            self.inner.batch()
        }

        fn commit(&mut self) -> Result<(), TransportError> {
            self.inner.commit()
        }
    }

    fn labels(kernel: &MemoryTransport, table: &Table, chain: &str) -> Vec<String> {
        kernel
            .rules(table, chain)
            .into_iter()
            .filter_map(|r| r.comment)
            .collect()
    }

    #[test]
    fn failed_setup_leaves_nothing_for_the_next_one() {
        // Given: an installed set and a transport whose output lookup fails once
        let kernel = MemoryTransport::new();
        let r = Reconciler::new(
            ReconcilerConfig::default(),
            FlakyOutputLookup {
                inner: kernel.clone(),
                failures: 0,
            },
        );
        let table = r.config().table();
        r.setup(&CounterSet {
            input: vec![tcp("seed", 1)],
            output: vec![],
        })
        .unwrap();
        r.lock().unwrap().failures = 1;

        // When: a setup fails after staging the input chain, then another succeeds
        let failed = r.setup(&CounterSet {
            input: vec![tcp("old_a", 22)],
            output: vec![],
        });
        assert!(matches!(failed, Err(ReconcileError::SetupFailed { ref stage, .. }) if stage.contains("output")));
        assert!(r.lock().unwrap().batch().is_empty());
        assert_eq!(labels(&kernel, &table, "input"), ["seed"]);

        r.setup(&CounterSet {
            input: vec![tcp("new_b", 80)],
            output: vec![],
        })
        .unwrap();

        // Then: only the last set is installed
        assert_eq!(labels(&kernel, &table, "input"), ["new_b"]);
        assert!(r.lock().unwrap().batch().is_empty());
    }

    #[test]
    fn commit_failure_is_reported_and_discards_batch() {
        let (r, kernel) = reconciler();
        kernel.fail_next(Fault::Commit, 1);
        let err = r.setup(&CounterSet::default()).unwrap_err();
        assert!(matches!(err, ReconcileError::CommitFailed(_)));
        assert!(kernel.tables().is_empty());
    }

    #[test]
    fn permission_denied_is_recognisable() {
        let (r, kernel) = reconciler();
        kernel.set_permission_denied(true);
        let err = r.setup(&CounterSet::default()).unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[test]
    fn list_without_table_is_table_not_found() {
        let (r, _) = reconciler();
        assert!(matches!(
            r.list_counters(),
            Err(ReconcileError::TableNotFound(name)) if name == "flowmon"
        ));
    }

    #[test]
    fn list_sets_direction_and_reads_counts() {
        let (r, kernel) = reconciler();
        let set = CounterSet {
            input: vec![tcp("web", 80)],
            output: vec![tcp("web", 443)],
        };
        r.setup(&set).unwrap();
        kernel.bump(&r.config().table(), "output", "web", 3, 180);

        let listed = r.list_counters().unwrap();
        assert_eq!(listed.input[0].direction, Some(Direction::Input));
        assert_eq!(listed.output[0].direction, Some(Direction::Output));
        assert_eq!((listed.input[0].packets, listed.input[0].bytes), (0, 0));
        assert_eq!((listed.output[0].packets, listed.output[0].bytes), (3, 180));
        assert_eq!(listed.output[0].dst_port, Some(443));
    }

    #[test]
    fn reset_failure_is_list_failed_with_chain() {
        let (r, kernel) = reconciler();
        r.setup(&CounterSet::default()).unwrap();
        kernel.fail_next(Fault::ResetRules, 1);
        assert!(matches!(
            r.list_counters(),
            Err(ReconcileError::ListFailed { chain, .. }) if chain == "input"
        ));
    }

    #[test]
    fn cleanup_without_table_is_noop() {
        let (r, kernel) = reconciler();
        r.cleanup().unwrap();
        assert_eq!(kernel.commits(), 0);
    }

    #[test]
    fn cleanup_lookup_failure_is_cleanup_failed() {
        let (r, kernel) = reconciler();
        kernel.fail_next(Fault::ListTable, 1);
        assert!(matches!(r.cleanup(), Err(ReconcileError::CleanupFailed(_))));
    }

    #[test]
    fn poisoned_lock_is_an_error_not_a_panic() {
        let (r, _) = reconciler();
        let r = std::sync::Arc::new(r);
        let clone = std::sync::Arc::clone(&r);
        let _ = std::thread::spawn(move || {
            let _guard = clone.transport.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(matches!(r.cleanup(), Err(ReconcileError::Poisoned)));
    }
}
