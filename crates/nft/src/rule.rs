//! Kernel objects: tables, chains and rules.

use std::fmt;

use flowmon_core::types::{Direction, TableFamily};
use serde::Serialize;

use crate::expr::Expression;

/// A table, identified by family and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Table {
    pub family: TableFamily,
    pub name: String,
}

impl Table {
    pub fn new(family: TableFamily, name: impl Into<String>) -> Self {
        Self {
            family,
            name: name.into(),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.name)
    }
}

/// Netfilter hook a base chain is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    Input,
    Output,
}

impl Hook {
    /// `NF_INET_LOCAL_IN` / `NF_INET_LOCAL_OUT`
    pub fn hooknum(self) -> u32 {
        match self {
            Hook::Input => 1,
            Hook::Output => 3,
        }
    }

    pub fn from_hooknum(n: u32) -> Option<Self> {
        match n {
            1 => Some(Hook::Input),
            3 => Some(Hook::Output),
            _ => None,
        }
    }
}

impl From<Direction> for Hook {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Input => Hook::Input,
            Direction::Output => Hook::Output,
        }
    }
}

/// Hook attachment of a base chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainHook {
    pub hook: Hook,
    pub priority: i32,
}

/// A chain inside a table. `hook` is `None` for regular (non-base) chains
/// read back from the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chain {
    pub table: Table,
    pub name: String,
    pub hook: Option<ChainHook>,
}

impl Chain {
    /// A `filter` base chain with policy accept.
    pub fn base(table: Table, name: impl Into<String>, hook: Hook, priority: i32) -> Self {
        Self {
            table,
            name: name.into(),
            hook: Some(ChainHook { hook, priority }),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.table, self.name)
    }
}

/// A rule in a chain. `handle` is assigned by the kernel and is only set
/// on rules read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub table: Table,
    pub chain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<u64>,
    pub exprs: Vec<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Rule {
    pub fn new(chain: &Chain) -> Self {
        Self {
            table: chain.table.clone(),
            chain: chain.name.clone(),
            handle: None,
            exprs: Vec::new(),
            comment: None,
        }
    }

    /// Number of counter expressions in the rule.
    pub fn counter_count(&self) -> usize {
        self.exprs
            .iter()
            .filter(|e| matches!(e, Expression::Counter { .. }))
            .count()
    }

    /// Exactly one counter and a non-empty label.
    pub fn is_counter_rule(&self) -> bool {
        self.counter_count() == 1 && self.comment.as_deref().is_some_and(|c| !c.is_empty())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.table, self.chain)?;
        if let Some(handle) = self.handle {
            write!(f, " handle {handle}")?;
        }
        for expr in &self.exprs {
            write!(f, "\n  {expr}")?;
        }
        if let Some(comment) = &self.comment {
            write!(f, "\n  comment \"{comment}\"")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_numbers() {
        assert_eq!(Hook::from(Direction::Input).hooknum(), 1);
        assert_eq!(Hook::from(Direction::Output).hooknum(), 3);
        assert_eq!(Hook::from_hooknum(3), Some(Hook::Output));
        assert_eq!(Hook::from_hooknum(0), None);
    }

    #[test]
    fn counter_rule_needs_one_counter_and_label() {
        let table = Table::new(TableFamily::Ipv4, "flowmon");
        let chain = Chain::base(table, "input", Hook::Input, -300);
        let mut rule = Rule::new(&chain);
        rule.exprs.push(Expression::counter());
        assert!(!rule.is_counter_rule());

        rule.comment = Some("web".to_owned());
        assert!(rule.is_counter_rule());

        rule.exprs.push(Expression::counter());
        assert!(!rule.is_counter_rule());
    }
}
