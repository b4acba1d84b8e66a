//! CounterSpec → Rule.
//!
//! Predicates are emitted in a fixed order, each as a load into the scratch
//! register followed by an equality compare:
//!
//! | predicate | load                              | compare data       |
//! |-----------|-----------------------------------|--------------------|
//! | src addr  | network +12 (4b) / +8 (16b)       | address octets     |
//! | dst addr  | network +16 (4b) / +24 (16b)      | address octets     |
//! | protocol  | meta l4proto                      | protocol number    |
//! | src port  | transport +0 (2b)                 | big-endian port    |
//! | dst port  | transport +2 (2b)                 | big-endian port    |
//! | tcp flags | transport +13 (1b), masked 0x17   | requested bits     |
//!
//! A counter always closes the rule and the label becomes its comment.
//! Predicates that do not apply (ports without tcp/udp, flags without tcp)
//! are dropped rather than rejected; config validation catches them first.

use std::net::IpAddr;

use flowmon_core::types::{CounterSet, CounterSpec, Direction, Protocol, TcpFlags};

use crate::expr::{CmpOp, Expression, MetaKey, PayloadBase, Register};
use crate::rule::{Chain, Rule};

pub(crate) const V4_SRC_OFFSET: u32 = 12;
pub(crate) const V4_DST_OFFSET: u32 = 16;
pub(crate) const V6_SRC_OFFSET: u32 = 8;
pub(crate) const V6_DST_OFFSET: u32 = 24;
pub(crate) const SRC_PORT_OFFSET: u32 = 0;
pub(crate) const DST_PORT_OFFSET: u32 = 2;
pub(crate) const TCP_FLAGS_OFFSET: u32 = 13;

/// Compiles one spec into a rule for `chain`.
pub fn compile(chain: &Chain, spec: &CounterSpec) -> Rule {
    let mut rule = Rule::new(chain);
    let exprs = &mut rule.exprs;

    if let Some(addr) = spec.src_addr {
        let offset = match addr {
            IpAddr::V4(_) => V4_SRC_OFFSET,
            IpAddr::V6(_) => V6_SRC_OFFSET,
        };
        push_addr(exprs, offset, addr);
    }

    if let Some(addr) = spec.dst_addr {
        let offset = match addr {
            IpAddr::V4(_) => V4_DST_OFFSET,
            IpAddr::V6(_) => V6_DST_OFFSET,
        };
        push_addr(exprs, offset, addr);
    }

    if let Some(protocol) = spec.protocol {
        exprs.push(Expression::Meta {
            key: MetaKey::L4Proto,
            dreg: Register::SCRATCH,
        });
        exprs.push(cmp_eq(vec![protocol.number()]));
    }

    if spec.has_ports() {
        for (offset, port) in [
            (SRC_PORT_OFFSET, spec.src_port),
            (DST_PORT_OFFSET, spec.dst_port),
        ] {
            if let Some(port) = port.filter(|p| *p != 0) {
                exprs.push(load(PayloadBase::Transport, offset, 2));
                exprs.push(cmp_eq(port.to_be_bytes().to_vec()));
            }
        }
    }

    if spec.protocol == Some(Protocol::Tcp) && !spec.tcp_flags.is_empty() {
        exprs.push(load(PayloadBase::Transport, TCP_FLAGS_OFFSET, 1));
        exprs.push(Expression::Bitwise {
            sreg: Register::SCRATCH,
            dreg: Register::SCRATCH,
            len: 1,
            mask: vec![TcpFlags::MATCHABLE.bits()],
            xor: vec![0],
        });
        exprs.push(cmp_eq(vec![spec.tcp_flags.bits()]));
    }

    exprs.push(Expression::counter());
    rule.comment = Some(spec.label.clone());
    rule
}

/// Compiles a whole set, input rules first, each direction in order.
pub fn compile_set(input: &Chain, output: &Chain, set: &CounterSet) -> Vec<(Direction, Rule)> {
    set.iter()
        .map(|(direction, spec)| {
            let chain = match direction {
                Direction::Input => input,
                Direction::Output => output,
            };
            (direction, compile(chain, spec))
        })
        .collect()
}

fn load(base: PayloadBase, offset: u32, len: u32) -> Expression {
    Expression::Payload {
        base,
        offset,
        len,
        dreg: Register::SCRATCH,
    }
}

fn cmp_eq(data: Vec<u8>) -> Expression {
    Expression::Cmp {
        sreg: Register::SCRATCH,
        op: CmpOp::Eq,
        data,
    }
}

fn push_addr(exprs: &mut Vec<Expression>, offset: u32, addr: IpAddr) {
    let octets = match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    exprs.push(load(PayloadBase::Network, offset, octets.len() as u32));
    exprs.push(cmp_eq(octets));
}
