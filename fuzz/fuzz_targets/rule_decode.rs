#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use flowmon_core::types::{Direction, TableFamily};
use flowmon_nft::{
    decode, Chain, CmpOp, Expression, Hook, MetaKey, PayloadBase, Register, Rule, Table,
};

/// Structured rule input. Values are drawn near the ones the compiler
/// emits so the decoder gets past its first checks.
#[derive(Arbitrary, Debug)]
struct FuzzRule {
    family: FuzzFamily,
    exprs: Vec<FuzzExpr>,
    comment: Option<String>,
}

#[derive(Arbitrary, Debug)]
enum FuzzFamily {
    Ip,
    Ip6,
    Inet,
}

#[derive(Arbitrary, Debug)]
enum FuzzExpr {
    L4Proto { dreg: u8 },
    Meta { key: u32, dreg: u8 },
    Payload { base: u8, offset: u8, len: u8, dreg: u8 },
    Cmp { sreg: u8, eq: bool, data: Vec<u8> },
    Bitwise { sreg: u8, dreg: u8, mask: Vec<u8> },
    Counter { packets: u64, bytes: u64 },
    Other { name: String },
}

impl FuzzExpr {
    fn build(self) -> Expression {
        match self {
            FuzzExpr::L4Proto { dreg } => Expression::Meta {
                key: MetaKey::L4Proto,
                dreg: Register(u32::from(dreg % 4)),
            },
            FuzzExpr::Meta { key, dreg } => Expression::Meta {
                key: MetaKey::from_raw(key),
                dreg: Register(u32::from(dreg % 4)),
            },
            FuzzExpr::Payload {
                base,
                offset,
                len,
                dreg,
            } => Expression::Payload {
                base: PayloadBase::from_raw(u32::from(base % 4)),
                offset: u32::from(offset % 48),
                len: u32::from(len % 20),
                dreg: Register(u32::from(dreg % 4)),
            },
            FuzzExpr::Cmp { sreg, eq, data } => Expression::Cmp {
                sreg: Register(u32::from(sreg % 4)),
                op: if eq { CmpOp::Eq } else { CmpOp::Other(1) },
                data,
            },
            FuzzExpr::Bitwise { sreg, dreg, mask } => Expression::Bitwise {
                sreg: Register(u32::from(sreg % 4)),
                dreg: Register(u32::from(dreg % 4)),
                len: mask.len() as u32,
                xor: vec![0; mask.len()],
                mask,
            },
            FuzzExpr::Counter { packets, bytes } => Expression::Counter { packets, bytes },
            FuzzExpr::Other { name } => Expression::Other { name },
        }
    }
}

fuzz_target!(|input: FuzzRule| {
    let family = match input.family {
        FuzzFamily::Ip => TableFamily::Ipv4,
        FuzzFamily::Ip6 => TableFamily::Ipv6,
        FuzzFamily::Inet => TableFamily::Inet,
    };
    let table = Table::new(family, "flowmon");
    let chain = Chain::base(table, "input", Hook::from(Direction::Input), -300);
    let mut rule = Rule::new(&chain);
    rule.exprs = input.exprs.into_iter().take(16).map(FuzzExpr::build).collect();
    rule.comment = input.comment;

    if decode(&rule).is_ok() {
        assert!(rule.is_counter_rule(), "decoded a rule without one counter and a label");
    }
});
