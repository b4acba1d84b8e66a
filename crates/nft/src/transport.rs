//! Kernel transport abstraction.
//!
//! The [`Transport`] trait is the CRUD surface the reconciler needs over
//! tables, chains and rules. Lookups are immediate round-trips; mutations
//! are staged into a [`Batch`] and applied by [`Transport::commit`] all at
//! once or not at all.
//!
//! # Implementations
//!
//! - [`NetlinkTransport`](crate::netlink::NetlinkTransport): the kernel,
//!   over `NETLINK_NETFILTER`
//! - [`MemoryTransport`](crate::memory::MemoryTransport): an in-process
//!   model of the same semantics, for tests and dry runs
//!
//! Every call blocks. A lookup for something that does not exist fails with
//! [`TransportError::NotFound`], which callers treat as "not created yet".

use crate::error::TransportError;
use crate::rule::{Chain, Rule, Table};
use flowmon_core::types::TableFamily;

/// One staged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    AddTable(Table),
    AddChain(Chain),
    AddRule(Rule),
    /// Delete every rule in a chain
    FlushChain(Chain),
    DelChain(Chain),
    /// Delete every rule in every chain of a table
    FlushTable(Table),
    DelTable(Table),
}

/// Mutations waiting for the next commit, in staging order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn push(&mut self, op: BatchOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Empties the batch, returning what was staged.
    pub fn take(&mut self) -> Vec<BatchOp> {
        std::mem::take(&mut self.ops)
    }
}

/// Table, chain and rule operations against one connection.
///
/// Staging methods never fail; errors surface from `commit`. A failed
/// commit discards the staged batch.
pub trait Transport: Send + 'static {
    /// Looks up a table by family and name.
    fn list_table(&mut self, family: TableFamily, name: &str) -> Result<Table, TransportError>;

    /// Looks up a chain by name.
    fn list_chain(&mut self, table: &Table, name: &str) -> Result<Chain, TransportError>;

    /// Reads every rule of a chain, zeroing their counters in the same step.
    fn reset_rules(&mut self, table: &Table, chain: &Chain) -> Result<Vec<Rule>, TransportError>;

    /// The staging area for the next commit.
    fn batch(&mut self) -> &mut Batch;

    /// Applies the staged batch atomically.
    fn commit(&mut self) -> Result<(), TransportError>;

    fn add_table(&mut self, table: &Table) {
        self.batch().push(BatchOp::AddTable(table.clone()));
    }

    fn add_chain(&mut self, chain: &Chain) {
        self.batch().push(BatchOp::AddChain(chain.clone()));
    }

    fn add_rule(&mut self, rule: &Rule) {
        self.batch().push(BatchOp::AddRule(rule.clone()));
    }

    fn flush_chain(&mut self, chain: &Chain) {
        self.batch().push(BatchOp::FlushChain(chain.clone()));
    }

    fn del_chain(&mut self, chain: &Chain) {
        self.batch().push(BatchOp::DelChain(chain.clone()));
    }

    fn flush_table(&mut self, table: &Table) {
        self.batch().push(BatchOp::FlushTable(table.clone()));
    }

    fn del_table(&mut self, table: &Table) {
        self.batch().push(BatchOp::DelTable(table.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        batch: Batch,
    }

    impl Transport for Recorder {
        fn list_table(&mut self, _: TableFamily, name: &str) -> Result<Table, TransportError> {
            Err(TransportError::NotFound(name.to_owned()))
        }

        fn list_chain(&mut self, _: &Table, name: &str) -> Result<Chain, TransportError> {
            Err(TransportError::NotFound(name.to_owned()))
        }

        fn reset_rules(&mut self, _: &Table, _: &Chain) -> Result<Vec<Rule>, TransportError> {
            Ok(Vec::new())
        }

        fn batch(&mut self) -> &mut Batch {
            &mut self.batch
        }

        fn commit(&mut self) -> Result<(), TransportError> {
            self.batch.take();
            Ok(())
        }
    }

    #[test]
    fn staging_keeps_order() {
        let mut t = Recorder {
            batch: Batch::default(),
        };
        let table = Table::new(TableFamily::Ipv4, "flowmon");
        t.add_table(&table);
        t.flush_table(&table);
        t.del_table(&table);
        assert_eq!(
            t.batch().ops(),
            &[
                BatchOp::AddTable(table.clone()),
                BatchOp::FlushTable(table.clone()),
                BatchOp::DelTable(table),
            ]
        );
        t.commit().unwrap();
        assert!(t.batch().is_empty());
    }
}
