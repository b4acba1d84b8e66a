//! The match-and-count instruction vocabulary.
//!
//! Only the kernel expressions flowmon emits are modelled. Anything else
//! read back from the kernel becomes [`Expression::Other`], which the
//! decoder rejects.

use std::fmt;

use serde::Serialize;

/// A numbered scratch slot carrying a loaded value to the next comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Register(pub u32);

impl Register {
    /// The only register compiled rules use.
    pub const SCRATCH: Register = Register(1);
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg {}", self.0)
    }
}

/// `NFT_META_*` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaKey {
    L4Proto,
    Other(u32),
}

impl MetaKey {
    const L4PROTO: u32 = 16;

    pub fn from_raw(raw: u32) -> Self {
        match raw {
            Self::L4PROTO => MetaKey::L4Proto,
            other => MetaKey::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            MetaKey::L4Proto => Self::L4PROTO,
            MetaKey::Other(raw) => raw,
        }
    }
}

/// `NFT_PAYLOAD_*_HEADER` base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadBase {
    LinkLayer,
    Network,
    Transport,
    Other(u32),
}

impl PayloadBase {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => PayloadBase::LinkLayer,
            1 => PayloadBase::Network,
            2 => PayloadBase::Transport,
            other => PayloadBase::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            PayloadBase::LinkLayer => 0,
            PayloadBase::Network => 1,
            PayloadBase::Transport => 2,
            PayloadBase::Other(raw) => raw,
        }
    }
}

impl fmt::Display for PayloadBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadBase::LinkLayer => f.write_str("link"),
            PayloadBase::Network => f.write_str("network"),
            PayloadBase::Transport => f.write_str("transport"),
            PayloadBase::Other(raw) => write!(f, "base {raw}"),
        }
    }
}

/// `NFT_CMP_*` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq,
    Other(u32),
}

impl CmpOp {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => CmpOp::Eq,
            other => CmpOp::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            CmpOp::Eq => 0,
            CmpOp::Other(raw) => raw,
        }
    }
}

/// One instruction in a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Expression {
    /// Load packet metadata into `dreg`
    Meta { key: MetaKey, dreg: Register },
    /// Load `len` bytes at `offset` from a header into `dreg`
    Payload {
        base: PayloadBase,
        offset: u32,
        len: u32,
        dreg: Register,
    },
    /// Stop evaluating the rule unless `sreg` compares true against `data`
    Cmp {
        sreg: Register,
        op: CmpOp,
        data: Vec<u8>,
    },
    /// `dreg = (sreg & mask) ^ xor`
    Bitwise {
        sreg: Register,
        dreg: Register,
        len: u32,
        mask: Vec<u8>,
        xor: Vec<u8>,
    },
    /// Packet and byte counter, updated by the kernel
    Counter { packets: u64, bytes: u64 },
    /// Any kernel expression not listed above
    Other { name: String },
}

impl Expression {
    /// Kernel expression name (`NFTA_EXPR_NAME`).
    pub fn name(&self) -> &str {
        match self {
            Expression::Meta { .. } => "meta",
            Expression::Payload { .. } => "payload",
            Expression::Cmp { .. } => "cmp",
            Expression::Bitwise { .. } => "bitwise",
            Expression::Counter { .. } => "counter",
            Expression::Other { name } => name,
        }
    }

    pub fn counter() -> Self {
        Expression::Counter {
            packets: 0,
            bytes: 0,
        }
    }
}

fn hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(2 + data.len() * 2);
    out.push_str("0x");
    for b in data {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Renders in the `nft --debug=netlink` style.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Meta { key, dreg } => match key {
                MetaKey::L4Proto => write!(f, "[ meta load l4proto => {dreg} ]"),
                MetaKey::Other(raw) => write!(f, "[ meta load key {raw} => {dreg} ]"),
            },
            Expression::Payload {
                base,
                offset,
                len,
                dreg,
            } => write!(
                f,
                "[ payload load {len}b @ {base} header + {offset} => {dreg} ]"
            ),
            Expression::Cmp { sreg, op, data } => {
                let op = match op {
                    CmpOp::Eq => "eq".to_owned(),
                    CmpOp::Other(raw) => format!("op{raw}"),
                };
                write!(f, "[ cmp {op} {sreg} {} ]", hex(data))
            }
            Expression::Bitwise {
                sreg,
                dreg,
                mask,
                xor,
                ..
            } => write!(
                f,
                "[ bitwise {dreg} = ( {sreg} & {} ) ^ {} ]",
                hex(mask),
                hex(xor)
            ),
            Expression::Counter { packets, bytes } => {
                write!(f, "[ counter pkts {packets} bytes {bytes} ]")
            }
            Expression::Other { name } => write!(f, "[ {name} ]"),
        }
    }
}
