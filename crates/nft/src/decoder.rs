//! Rule → CounterSpec.
//!
//! A single forward pass tracks what each register currently holds. Loads
//! tag their destination register; a compare writes its data into the
//! spec field its register is tagged with. The payload offset table is the
//! compiler's, so anything the compiler emits decodes back to the same spec.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use flowmon_core::types::{CounterSpec, Protocol, TcpFlags};

use crate::compiler::{
    DST_PORT_OFFSET, SRC_PORT_OFFSET, TCP_FLAGS_OFFSET, V4_DST_OFFSET, V4_SRC_OFFSET,
    V6_DST_OFFSET, V6_SRC_OFFSET,
};
use crate::error::DecodeError;
use crate::expr::{CmpOp, Expression, MetaKey, PayloadBase, Register};
use crate::rule::Rule;

/// What a register was loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Protocol,
    SrcAddr { len: usize },
    DstAddr { len: usize },
    SrcPort,
    DstPort,
    TcpFlags,
}

impl Tag {
    fn from_payload(base: PayloadBase, offset: u32, len: u32) -> Option<Tag> {
        let tag = match (base, offset, len) {
            (PayloadBase::Network, V4_SRC_OFFSET, 4) => Tag::SrcAddr { len: 4 },
            (PayloadBase::Network, V6_SRC_OFFSET, 16) => Tag::SrcAddr { len: 16 },
            (PayloadBase::Network, V4_DST_OFFSET, 4) => Tag::DstAddr { len: 4 },
            (PayloadBase::Network, V6_DST_OFFSET, 16) => Tag::DstAddr { len: 16 },
            (PayloadBase::Transport, SRC_PORT_OFFSET, 2) => Tag::SrcPort,
            (PayloadBase::Transport, DST_PORT_OFFSET, 2) => Tag::DstPort,
            (PayloadBase::Transport, TCP_FLAGS_OFFSET, 1) => Tag::TcpFlags,
            _ => return None,
        };
        Some(tag)
    }

    fn field(self) -> &'static str {
        match self {
            Tag::Protocol => "protocol",
            Tag::SrcAddr { .. } => "src_addr",
            Tag::DstAddr { .. } => "dst_addr",
            Tag::SrcPort => "src_port",
            Tag::DstPort => "dst_port",
            Tag::TcpFlags => "tcp_flags",
        }
    }

    fn width(self) -> usize {
        match self {
            Tag::Protocol | Tag::TcpFlags => 1,
            Tag::SrcPort | Tag::DstPort => 2,
            Tag::SrcAddr { len } | Tag::DstAddr { len } => len,
        }
    }
}

/// Reconstructs the spec a counter rule was compiled from, plus its
/// counter values. `direction` is left unset.
pub fn decode(rule: &Rule) -> Result<CounterSpec, DecodeError> {
    let mut spec = CounterSpec::default();
    let mut regs: HashMap<Register, Tag> = HashMap::new();
    let mut counter_seen = false;

    for expr in &rule.exprs {
        match expr {
            Expression::Meta { key, dreg } => match key {
                MetaKey::L4Proto => {
                    regs.insert(*dreg, Tag::Protocol);
                }
                MetaKey::Other(raw) => return Err(DecodeError::UnsupportedMetaKey(*raw)),
            },
            Expression::Payload {
                base,
                offset,
                len,
                dreg,
            } => {
                let tag = Tag::from_payload(*base, *offset, *len).ok_or(
                    DecodeError::UnsupportedPayload {
                        base: *base,
                        offset: *offset,
                        len: *len,
                    },
                )?;
                regs.insert(*dreg, tag);
            }
            Expression::Bitwise { sreg, .. } => {
                // The flag mask is fixed; only its register is checked.
                if !regs.contains_key(sreg) {
                    return Err(DecodeError::UnknownRegister(sreg.0));
                }
            }
            Expression::Cmp { sreg, op, data } => {
                if let CmpOp::Other(raw) = op {
                    return Err(DecodeError::UnsupportedCmpOp(*raw));
                }
                let tag = regs
                    .get(sreg)
                    .copied()
                    .ok_or(DecodeError::UnknownRegister(sreg.0))?;
                apply(&mut spec, tag, data)?;
            }
            Expression::Counter { packets, bytes } => {
                if counter_seen {
                    return Err(DecodeError::DuplicateCounter);
                }
                counter_seen = true;
                spec.packets = *packets;
                spec.bytes = *bytes;
            }
            Expression::Other { name } => {
                return Err(DecodeError::UnsupportedExpression(name.clone()));
            }
        }
    }

    if !counter_seen {
        return Err(DecodeError::MissingCounter);
    }
    match rule.comment.as_deref() {
        Some(label) if !label.is_empty() => spec.label = label.to_owned(),
        _ => return Err(DecodeError::MissingLabel),
    }
    Ok(spec)
}

fn apply(spec: &mut CounterSpec, tag: Tag, data: &[u8]) -> Result<(), DecodeError> {
    if data.len() != tag.width() {
        return Err(DecodeError::BadDataLength {
            field: tag.field(),
            expected: tag.width(),
            actual: data.len(),
        });
    }
    match tag {
        Tag::Protocol => {
            let protocol =
                Protocol::from_number(data[0]).ok_or(DecodeError::UnknownProtocol(data[0]))?;
            spec.protocol = Some(protocol);
        }
        Tag::SrcAddr { .. } => spec.src_addr = Some(ip_from_slice(data)),
        Tag::DstAddr { .. } => spec.dst_addr = Some(ip_from_slice(data)),
        Tag::SrcPort => spec.src_port = Some(u16::from_be_bytes([data[0], data[1]])),
        Tag::DstPort => spec.dst_port = Some(u16::from_be_bytes([data[0], data[1]])),
        Tag::TcpFlags => spec.tcp_flags = TcpFlags::from_byte(data[0]),
    }
    Ok(())
}

/// `data` is 4 or 16 bytes; checked by the caller.
fn ip_from_slice(data: &[u8]) -> IpAddr {
    match <[u8; 4]>::try_from(data) {
        Ok(v4) => IpAddr::V4(Ipv4Addr::from(v4)),
        Err(_) => {
            let mut v6 = [0u8; 16];
            v6.copy_from_slice(data);
            IpAddr::V6(Ipv6Addr::from(v6))
        }
    }
}
