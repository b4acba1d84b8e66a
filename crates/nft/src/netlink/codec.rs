//! nf_tables message encoding and parsing.
//!
//! Netlink headers (`nlmsghdr`, `nlattr`) are host byte order; every
//! integer carried inside an nf_tables attribute is big-endian. Strings are
//! NUL-terminated. Nothing here touches a socket, so it builds and is
//! tested on every platform.

use flowmon_core::types::TableFamily;

use crate::error::TransportError;
use crate::expr::{CmpOp, Expression, MetaKey, PayloadBase, Register};
use crate::rule::{Chain, ChainHook, Hook, Rule, Table};
use crate::transport::BatchOp;

pub(crate) const NLMSG_HDRLEN: usize = 16;
pub(crate) const NLMSG_ERROR: u16 = 2;
pub(crate) const NLMSG_DONE: u16 = 3;

pub(crate) const NLM_F_REQUEST: u16 = 0x01;
pub(crate) const NLM_F_MULTI: u16 = 0x02;
pub(crate) const NLM_F_ACK: u16 = 0x04;
const NLM_F_ROOT: u16 = 0x100;
const NLM_F_MATCH: u16 = 0x200;
pub(crate) const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;
const NLM_F_CREATE: u16 = 0x400;
const NLM_F_APPEND: u16 = 0x800;

const NLA_HDRLEN: usize = 4;
const NLA_F_NESTED: u16 = 1 << 15;
const NLA_F_NET_BYTEORDER: u16 = 1 << 14;

const NFNETLINK_V0: u8 = 0;
const NFPROTO_UNSPEC: u8 = 0;
const NFNL_SUBSYS_NFTABLES: u16 = 10;
const NFNL_MSG_BATCH_BEGIN: u16 = 0x10;
const NFNL_MSG_BATCH_END: u16 = 0x11;

pub(crate) const NFT_MSG_NEWTABLE: u16 = 0;
pub(crate) const NFT_MSG_GETTABLE: u16 = 1;
const NFT_MSG_DELTABLE: u16 = 2;
pub(crate) const NFT_MSG_NEWCHAIN: u16 = 3;
pub(crate) const NFT_MSG_GETCHAIN: u16 = 4;
const NFT_MSG_DELCHAIN: u16 = 5;
pub(crate) const NFT_MSG_NEWRULE: u16 = 6;
const NFT_MSG_DELRULE: u16 = 8;
pub(crate) const NFT_MSG_GETRULE_RESET: u16 = 25;

const NFTA_TABLE_NAME: u16 = 1;

const NFTA_CHAIN_TABLE: u16 = 1;
const NFTA_CHAIN_NAME: u16 = 3;
const NFTA_CHAIN_HOOK: u16 = 4;
const NFTA_CHAIN_POLICY: u16 = 5;
const NFTA_CHAIN_TYPE: u16 = 7;
const NFTA_HOOK_HOOKNUM: u16 = 1;
const NFTA_HOOK_PRIORITY: u16 = 2;
const NF_ACCEPT: u32 = 1;

const NFTA_RULE_TABLE: u16 = 1;
const NFTA_RULE_CHAIN: u16 = 2;
const NFTA_RULE_HANDLE: u16 = 3;
const NFTA_RULE_EXPRESSIONS: u16 = 4;
const NFTA_RULE_USERDATA: u16 = 7;

const NFTA_LIST_ELEM: u16 = 1;
const NFTA_EXPR_NAME: u16 = 1;
const NFTA_EXPR_DATA: u16 = 2;
const NFTA_DATA_VALUE: u16 = 1;

const NFTA_META_DREG: u16 = 1;
const NFTA_META_KEY: u16 = 2;

const NFTA_PAYLOAD_DREG: u16 = 1;
const NFTA_PAYLOAD_BASE: u16 = 2;
const NFTA_PAYLOAD_OFFSET: u16 = 3;
const NFTA_PAYLOAD_LEN: u16 = 4;

const NFTA_CMP_SREG: u16 = 1;
const NFTA_CMP_OP: u16 = 2;
const NFTA_CMP_DATA: u16 = 3;

const NFTA_BITWISE_SREG: u16 = 1;
const NFTA_BITWISE_DREG: u16 = 2;
const NFTA_BITWISE_LEN: u16 = 3;
const NFTA_BITWISE_MASK: u16 = 4;
const NFTA_BITWISE_XOR: u16 = 5;
const NFTA_BITWISE_OP: u16 = 6;

const NFTA_COUNTER_BYTES: u16 = 1;
const NFTA_COUNTER_PACKETS: u16 = 2;

/// `NFTNL_UDATA_RULE_COMMENT`
const UDATA_RULE_COMMENT: u8 = 0;
/// Longest comment libnftnl accepts, terminator included.
pub const COMMENT_MAXLEN: usize = 128;

/// `(NFNL_SUBSYS_NFTABLES << 8) | msg`
pub(crate) fn nft_msg_type(msg: u16) -> u16 {
    (NFNL_SUBSYS_NFTABLES << 8) | msg
}

fn align(len: usize) -> usize {
    (len + 3) & !3
}

// ─── Encoding ─────────────────────────────────────────────────────

/// Appends netlink attributes to a buffer.
#[derive(Debug, Default)]
pub(crate) struct AttrWriter {
    buf: Vec<u8>,
}

impl AttrWriter {
    /// Starts a message payload with an `nfgenmsg` header.
    pub(crate) fn nfgen(family: u8, res_id: u16) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.push(family);
        buf.push(NFNETLINK_V0);
        buf.extend_from_slice(&res_id.to_be_bytes());
        Self { buf }
    }

    pub(crate) fn bytes(&mut self, attr_type: u16, data: &[u8]) -> &mut Self {
        let len = NLA_HDRLEN + data.len();
        self.buf.extend_from_slice(&(len as u16).to_ne_bytes());
        self.buf.extend_from_slice(&attr_type.to_ne_bytes());
        self.buf.extend_from_slice(data);
        self.buf.resize(self.buf.len() + (align(len) - len), 0);
        self
    }

    pub(crate) fn string(&mut self, attr_type: u16, value: &str) -> Result<&mut Self, TransportError> {
        if value.as_bytes().contains(&0) {
            return Err(TransportError::Encode(format!(
                "'{}' contains a NUL byte",
                value.escape_debug()
            )));
        }
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        Ok(self.bytes(attr_type, &data))
    }

    pub(crate) fn be32(&mut self, attr_type: u16, value: u32) -> &mut Self {
        self.bytes(attr_type, &value.to_be_bytes())
    }

    pub(crate) fn be64(&mut self, attr_type: u16, value: u64) -> &mut Self {
        self.bytes(attr_type, &value.to_be_bytes())
    }

    pub(crate) fn nested<F>(&mut self, attr_type: u16, build: F) -> Result<&mut Self, TransportError>
    where
        F: FnOnce(&mut AttrWriter) -> Result<(), TransportError>,
    {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0u8; NLA_HDRLEN]);
        build(self)?;
        let len = self.buf.len() - start;
        self.buf[start..start + 2].copy_from_slice(&(len as u16).to_ne_bytes());
        self.buf[start + 2..start + 4].copy_from_slice(&(attr_type | NLA_F_NESTED).to_ne_bytes());
        Ok(self)
    }

    /// Nested `NFTA_DATA_VALUE` holding `data`.
    fn data_value(&mut self, attr_type: u16, data: &[u8]) -> Result<&mut Self, TransportError> {
        self.nested(attr_type, |w| {
            w.bytes(NFTA_DATA_VALUE, data);
            Ok(())
        })
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Appends one netlink message to `out`.
pub(crate) fn push_message(out: &mut Vec<u8>, msg_type: u16, flags: u16, seq: u32, payload: &[u8]) {
    let len = NLMSG_HDRLEN + payload.len();
    out.extend_from_slice(&(len as u32).to_ne_bytes());
    out.extend_from_slice(&msg_type.to_ne_bytes());
    out.extend_from_slice(&flags.to_ne_bytes());
    out.extend_from_slice(&seq.to_ne_bytes());
    out.extend_from_slice(&0u32.to_ne_bytes());
    out.extend_from_slice(payload);
    out.resize(out.len() + (align(len) - len), 0);
}

pub(crate) fn table_payload(table: &Table) -> Result<Vec<u8>, TransportError> {
    let mut w = AttrWriter::nfgen(table.family.nfproto(), 0);
    w.string(NFTA_TABLE_NAME, &table.name)?;
    Ok(w.into_inner())
}

/// GETTABLE request for one table.
pub(crate) fn get_table_payload(family: TableFamily, name: &str) -> Result<Vec<u8>, TransportError> {
    table_payload(&Table::new(family, name))
}

/// Identifies a chain by table and name; used by get and delete.
pub(crate) fn chain_id_payload(table: &Table, name: &str) -> Result<Vec<u8>, TransportError> {
    let mut w = AttrWriter::nfgen(table.family.nfproto(), 0);
    w.string(NFTA_CHAIN_TABLE, &table.name)?
        .string(NFTA_CHAIN_NAME, name)?;
    Ok(w.into_inner())
}

pub(crate) fn new_chain_payload(chain: &Chain) -> Result<Vec<u8>, TransportError> {
    let mut w = AttrWriter::nfgen(chain.table.family.nfproto(), 0);
    w.string(NFTA_CHAIN_TABLE, &chain.table.name)?
        .string(NFTA_CHAIN_NAME, &chain.name)?;
    if let Some(hook) = chain.hook {
        w.nested(NFTA_CHAIN_HOOK, |h| {
            h.be32(NFTA_HOOK_HOOKNUM, hook.hook.hooknum())
                .be32(NFTA_HOOK_PRIORITY, hook.priority as u32);
            Ok(())
        })?
        .be32(NFTA_CHAIN_POLICY, NF_ACCEPT)
        .string(NFTA_CHAIN_TYPE, "filter")?;
    }
    Ok(w.into_inner())
}

/// DELRULE for every rule in `chain`, or in the whole table when `None`.
pub(crate) fn flush_payload(table: &Table, chain: Option<&str>) -> Result<Vec<u8>, TransportError> {
    let mut w = AttrWriter::nfgen(table.family.nfproto(), 0);
    w.string(NFTA_RULE_TABLE, &table.name)?;
    if let Some(chain) = chain {
        w.string(NFTA_RULE_CHAIN, chain)?;
    }
    Ok(w.into_inner())
}

/// GETRULE_RESET dump filter. Same attributes as a chain flush.
pub(crate) fn rule_dump_payload(table: &Table, chain: &str) -> Result<Vec<u8>, TransportError> {
    flush_payload(table, Some(chain))
}

pub(crate) fn new_rule_payload(rule: &Rule) -> Result<Vec<u8>, TransportError> {
    let mut w = AttrWriter::nfgen(rule.table.family.nfproto(), 0);
    w.string(NFTA_RULE_TABLE, &rule.table.name)?
        .string(NFTA_RULE_CHAIN, &rule.chain)?;
    w.nested(NFTA_RULE_EXPRESSIONS, |list| {
        for expr in &rule.exprs {
            list.nested(NFTA_LIST_ELEM, |elem| encode_expr(elem, expr))?;
        }
        Ok(())
    })?;
    if let Some(comment) = &rule.comment {
        w.bytes(NFTA_RULE_USERDATA, &comment_udata(comment)?);
    }
    Ok(w.into_inner())
}

fn encode_expr(w: &mut AttrWriter, expr: &Expression) -> Result<(), TransportError> {
    w.string(NFTA_EXPR_NAME, expr.name())?;
    match expr {
        Expression::Meta { key, dreg } => {
            w.nested(NFTA_EXPR_DATA, |d| {
                d.be32(NFTA_META_DREG, dreg.0).be32(NFTA_META_KEY, key.raw());
                Ok(())
            })?;
        }
        Expression::Payload {
            base,
            offset,
            len,
            dreg,
        } => {
            w.nested(NFTA_EXPR_DATA, |d| {
                d.be32(NFTA_PAYLOAD_DREG, dreg.0)
                    .be32(NFTA_PAYLOAD_BASE, base.raw())
                    .be32(NFTA_PAYLOAD_OFFSET, *offset)
                    .be32(NFTA_PAYLOAD_LEN, *len);
                Ok(())
            })?;
        }
        Expression::Cmp { sreg, op, data } => {
            w.nested(NFTA_EXPR_DATA, |d| {
                d.be32(NFTA_CMP_SREG, sreg.0).be32(NFTA_CMP_OP, op.raw());
                d.data_value(NFTA_CMP_DATA, data)?;
                Ok(())
            })?;
        }
        Expression::Bitwise {
            sreg,
            dreg,
            len,
            mask,
            xor,
        } => {
            w.nested(NFTA_EXPR_DATA, |d| {
                d.be32(NFTA_BITWISE_SREG, sreg.0)
                    .be32(NFTA_BITWISE_DREG, dreg.0)
                    .be32(NFTA_BITWISE_LEN, *len);
                d.data_value(NFTA_BITWISE_MASK, mask)?
                    .data_value(NFTA_BITWISE_XOR, xor)?;
                Ok(())
            })?;
        }
        Expression::Counter { packets, bytes } => {
            w.nested(NFTA_EXPR_DATA, |d| {
                d.be64(NFTA_COUNTER_BYTES, *bytes)
                    .be64(NFTA_COUNTER_PACKETS, *packets);
                Ok(())
            })?;
        }
        Expression::Other { name } => {
            return Err(TransportError::Encode(format!(
                "cannot encode expression '{name}'"
            )));
        }
    }
    Ok(())
}

/// Rule userdata carrying a comment TLV.
pub(crate) fn comment_udata(comment: &str) -> Result<Vec<u8>, TransportError> {
    if comment.len() + 1 > COMMENT_MAXLEN {
        return Err(TransportError::Encode(format!(
            "comment longer than {} bytes",
            COMMENT_MAXLEN - 1
        )));
    }
    if comment.as_bytes().contains(&0) {
        return Err(TransportError::Encode("comment contains a NUL byte".to_owned()));
    }
    let mut out = Vec::with_capacity(comment.len() + 3);
    out.push(UDATA_RULE_COMMENT);
    out.push((comment.len() + 1) as u8);
    out.extend_from_slice(comment.as_bytes());
    out.push(0);
    Ok(out)
}

/// Encodes a staged batch between BEGIN and END markers.
///
/// Every inner message asks for an ACK; the returned list holds their
/// sequence numbers. `next_seq` is called once per message.
pub(crate) fn encode_batch(
    ops: &[BatchOp],
    mut next_seq: impl FnMut() -> u32,
) -> Result<(Vec<u8>, Vec<u32>), TransportError> {
    let mut out = Vec::new();
    let mut acks = Vec::with_capacity(ops.len());

    let marker = AttrWriter::nfgen(NFPROTO_UNSPEC, NFNL_SUBSYS_NFTABLES).into_inner();
    push_message(&mut out, NFNL_MSG_BATCH_BEGIN, NLM_F_REQUEST, next_seq(), &marker);

    for op in ops {
        let (msg, flags, payload) = match op {
            BatchOp::AddTable(table) => (
                NFT_MSG_NEWTABLE,
                NLM_F_CREATE,
                table_payload(table)?,
            ),
            BatchOp::AddChain(chain) => (
                NFT_MSG_NEWCHAIN,
                NLM_F_CREATE,
                new_chain_payload(chain)?,
            ),
            BatchOp::AddRule(rule) => (
                NFT_MSG_NEWRULE,
                NLM_F_CREATE | NLM_F_APPEND,
                new_rule_payload(rule)?,
            ),
            BatchOp::FlushChain(chain) => (
                NFT_MSG_DELRULE,
                0,
                flush_payload(&chain.table, Some(&chain.name))?,
            ),
            BatchOp::DelChain(chain) => (
                NFT_MSG_DELCHAIN,
                0,
                chain_id_payload(&chain.table, &chain.name)?,
            ),
            BatchOp::FlushTable(table) => (NFT_MSG_DELRULE, 0, flush_payload(table, None)?),
            BatchOp::DelTable(table) => (NFT_MSG_DELTABLE, 0, table_payload(table)?),
        };
        let seq = next_seq();
        push_message(
            &mut out,
            nft_msg_type(msg),
            NLM_F_REQUEST | NLM_F_ACK | flags,
            seq,
            &payload,
        );
        acks.push(seq);
    }

    push_message(&mut out, NFNL_MSG_BATCH_END, NLM_F_REQUEST, next_seq(), &marker);
    Ok((out, acks))
}

// ─── Parsing ──────────────────────────────────────────────────────

/// One received netlink message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NlMsg {
    pub(crate) msg_type: u16,
    pub(crate) flags: u16,
    pub(crate) seq: u32,
    pub(crate) payload: Vec<u8>,
}

impl NlMsg {
    /// For `NLMSG_ERROR`: the (positive) errno, 0 for an ACK.
    pub(crate) fn error_code(&self) -> Result<i32, TransportError> {
        let raw = self
            .payload
            .get(0..4)
            .ok_or_else(|| TransportError::Protocol("short NLMSG_ERROR".to_owned()))?;
        let code = i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Ok(-code)
    }

    /// Is this an nf_tables message of the given kind?
    pub(crate) fn is_nft(&self, msg: u16) -> bool {
        self.msg_type == nft_msg_type(msg)
    }
}

/// Splits a datagram into messages.
pub(crate) fn parse_messages(buf: &[u8]) -> Result<Vec<NlMsg>, TransportError> {
    let mut msgs = Vec::new();
    let mut offset = 0usize;
    while offset + NLMSG_HDRLEN <= buf.len() {
        let h = &buf[offset..offset + NLMSG_HDRLEN];
        let len = u32::from_ne_bytes([h[0], h[1], h[2], h[3]]) as usize;
        if len < NLMSG_HDRLEN || offset + len > buf.len() {
            return Err(TransportError::Protocol(format!(
                "netlink message length {len} at offset {offset} exceeds datagram of {}",
                buf.len()
            )));
        }
        msgs.push(NlMsg {
            msg_type: u16::from_ne_bytes([h[4], h[5]]),
            flags: u16::from_ne_bytes([h[6], h[7]]),
            seq: u32::from_ne_bytes([h[8], h[9], h[10], h[11]]),
            payload: buf[offset + NLMSG_HDRLEN..offset + len].to_vec(),
        });
        offset += align(len);
    }
    Ok(msgs)
}

/// Iterator over the attributes in a buffer.
pub(crate) struct Attrs<'a> {
    buf: &'a [u8],
}

impl<'a> Attrs<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Attributes of an nf_tables message, after the `nfgenmsg` header.
    fn of_message(payload: &'a [u8]) -> Result<(u8, Self), TransportError> {
        if payload.len() < 4 {
            return Err(TransportError::Protocol("short nfgenmsg".to_owned()));
        }
        Ok((payload[0], Self::new(&payload[4..])))
    }
}

impl<'a> Iterator for Attrs<'a> {
    type Item = Result<(u16, &'a [u8]), TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < NLA_HDRLEN {
            return None;
        }
        let len = u16::from_ne_bytes([self.buf[0], self.buf[1]]) as usize;
        let attr_type =
            u16::from_ne_bytes([self.buf[2], self.buf[3]]) & !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);
        if len < NLA_HDRLEN || len > self.buf.len() {
            self.buf = &[];
            return Some(Err(TransportError::Protocol(format!(
                "attribute {attr_type} has bad length {len}"
            ))));
        }
        let data = &self.buf[NLA_HDRLEN..len];
        self.buf = &self.buf[align(len).min(self.buf.len())..];
        Some(Ok((attr_type, data)))
    }
}

fn be32(data: &[u8]) -> Result<u32, TransportError> {
    let raw: [u8; 4] = data
        .try_into()
        .map_err(|_| TransportError::Protocol(format!("expected 4-byte integer, got {}", data.len())))?;
    Ok(u32::from_be_bytes(raw))
}

fn be64(data: &[u8]) -> Result<u64, TransportError> {
    let raw: [u8; 8] = data
        .try_into()
        .map_err(|_| TransportError::Protocol(format!("expected 8-byte integer, got {}", data.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn cstr(data: &[u8]) -> Result<String, TransportError> {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8(data[..end].to_vec())
        .map_err(|_| TransportError::Protocol("string attribute is not UTF-8".to_owned()))
}

fn family_from_nfproto(nfproto: u8) -> Result<TableFamily, TransportError> {
    [TableFamily::Ipv4, TableFamily::Ipv6, TableFamily::Inet]
        .into_iter()
        .find(|f| f.nfproto() == nfproto)
        .ok_or_else(|| TransportError::Protocol(format!("unsupported table family {nfproto}")))
}

/// Parses a NEWTABLE message.
pub(crate) fn parse_table(payload: &[u8]) -> Result<Table, TransportError> {
    let (nfproto, attrs) = Attrs::of_message(payload)?;
    let family = family_from_nfproto(nfproto)?;
    for attr in attrs {
        let (t, data) = attr?;
        if t == NFTA_TABLE_NAME {
            return Ok(Table::new(family, cstr(data)?));
        }
    }
    Err(TransportError::Protocol("table without a name".to_owned()))
}

/// Parses a NEWCHAIN message.
pub(crate) fn parse_chain(payload: &[u8]) -> Result<Chain, TransportError> {
    let (nfproto, attrs) = Attrs::of_message(payload)?;
    let family = family_from_nfproto(nfproto)?;
    let mut table = None;
    let mut name = None;
    let mut hook = None;
    for attr in attrs {
        let (t, data) = attr?;
        match t {
            NFTA_CHAIN_TABLE => table = Some(cstr(data)?),
            NFTA_CHAIN_NAME => name = Some(cstr(data)?),
            NFTA_CHAIN_HOOK => hook = parse_hook(data)?,
            _ => {}
        }
    }
    match (table, name) {
        (Some(table), Some(name)) => Ok(Chain {
            table: Table::new(family, table),
            name,
            hook,
        }),
        _ => Err(TransportError::Protocol("chain without table or name".to_owned())),
    }
}

fn parse_hook(data: &[u8]) -> Result<Option<ChainHook>, TransportError> {
    let mut hooknum = None;
    let mut priority = 0i32;
    for attr in Attrs::new(data) {
        let (t, data) = attr?;
        match t {
            NFTA_HOOK_HOOKNUM => hooknum = Some(be32(data)?),
            NFTA_HOOK_PRIORITY => priority = be32(data)? as i32,
            _ => {}
        }
    }
    Ok(hooknum
        .and_then(Hook::from_hooknum)
        .map(|hook| ChainHook { hook, priority }))
}

/// Parses a NEWRULE message.
pub(crate) fn parse_rule(payload: &[u8]) -> Result<Rule, TransportError> {
    let (nfproto, attrs) = Attrs::of_message(payload)?;
    let family = family_from_nfproto(nfproto)?;
    let mut table = None;
    let mut chain = None;
    let mut handle = None;
    let mut exprs = Vec::new();
    let mut comment = None;
    for attr in attrs {
        let (t, data) = attr?;
        match t {
            NFTA_RULE_TABLE => table = Some(cstr(data)?),
            NFTA_RULE_CHAIN => chain = Some(cstr(data)?),
            NFTA_RULE_HANDLE => handle = Some(be64(data)?),
            NFTA_RULE_EXPRESSIONS => {
                for elem in Attrs::new(data) {
                    let (t, data) = elem?;
                    if t == NFTA_LIST_ELEM {
                        exprs.push(parse_expr(data)?);
                    }
                }
            }
            NFTA_RULE_USERDATA => comment = parse_comment(data),
            _ => {}
        }
    }
    match (table, chain) {
        (Some(table), Some(chain)) => Ok(Rule {
            table: Table::new(family, table),
            chain,
            handle,
            exprs,
            comment,
        }),
        _ => Err(TransportError::Protocol("rule without table or chain".to_owned())),
    }
}

/// Finds the comment TLV in rule userdata.
pub(crate) fn parse_comment(udata: &[u8]) -> Option<String> {
    let mut rest = udata;
    while rest.len() >= 2 {
        let (kind, len) = (rest[0], rest[1] as usize);
        let value = rest.get(2..2 + len)?;
        if kind == UDATA_RULE_COMMENT {
            let end = value.iter().position(|b| *b == 0).unwrap_or(value.len());
            return String::from_utf8(value[..end].to_vec()).ok();
        }
        rest = &rest[2 + len..];
    }
    None
}

fn parse_expr(data: &[u8]) -> Result<Expression, TransportError> {
    let mut name = None;
    let mut body: &[u8] = &[];
    for attr in Attrs::new(data) {
        let (t, data) = attr?;
        match t {
            NFTA_EXPR_NAME => name = Some(cstr(data)?),
            NFTA_EXPR_DATA => body = data,
            _ => {}
        }
    }
    let name = name.ok_or_else(|| TransportError::Protocol("expression without a name".to_owned()))?;

    let mut fields: Vec<(u16, &[u8])> = Vec::new();
    for attr in Attrs::new(body) {
        fields.push(attr?);
    }
    let field = |t: u16| fields.iter().find(|(ft, _)| *ft == t).map(|(_, d)| *d);
    let reg = |t: u16| -> Result<Register, TransportError> {
        field(t).map(be32).transpose()?.map(Register).ok_or_else(|| {
            TransportError::Protocol(format!("{name}: missing register attribute {t}"))
        })
    };
    let int = |t: u16| -> Result<u32, TransportError> { Ok(field(t).map(be32).transpose()?.unwrap_or(0)) };
    let value = |t: u16| -> Result<Vec<u8>, TransportError> {
        let Some(nested) = field(t) else {
            return Ok(Vec::new());
        };
        for attr in Attrs::new(nested) {
            let (vt, data) = attr?;
            if vt == NFTA_DATA_VALUE {
                return Ok(data.to_vec());
            }
        }
        Ok(Vec::new())
    };

    let expr = match name.as_str() {
        "meta" => Expression::Meta {
            key: MetaKey::from_raw(int(NFTA_META_KEY)?),
            dreg: reg(NFTA_META_DREG)?,
        },
        "payload" => Expression::Payload {
            base: PayloadBase::from_raw(int(NFTA_PAYLOAD_BASE)?),
            offset: int(NFTA_PAYLOAD_OFFSET)?,
            len: int(NFTA_PAYLOAD_LEN)?,
            dreg: reg(NFTA_PAYLOAD_DREG)?,
        },
        "cmp" => Expression::Cmp {
            sreg: reg(NFTA_CMP_SREG)?,
            op: CmpOp::from_raw(int(NFTA_CMP_OP)?),
            data: value(NFTA_CMP_DATA)?,
        },
        // Shift operations (op != 0) are not mask/xor and fall through.
        "bitwise" if int(NFTA_BITWISE_OP)? == 0 => Expression::Bitwise {
            sreg: reg(NFTA_BITWISE_SREG)?,
            dreg: reg(NFTA_BITWISE_DREG)?,
            len: int(NFTA_BITWISE_LEN)?,
            mask: value(NFTA_BITWISE_MASK)?,
            xor: value(NFTA_BITWISE_XOR)?,
        },
        "counter" => Expression::Counter {
            packets: field(NFTA_COUNTER_PACKETS).map(be64).transpose()?.unwrap_or(0),
            bytes: field(NFTA_COUNTER_BYTES).map(be64).transpose()?.unwrap_or(0),
        },
        _ => Expression::Other { name: name.clone() },
    };
    Ok(expr)
}
