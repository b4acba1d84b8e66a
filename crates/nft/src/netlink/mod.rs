//! Kernel transport over `NETLINK_NETFILTER`.
//!
//! Lookups are single request/reply exchanges. A commit sends the whole
//! staged batch as one datagram between `BATCH_BEGIN`/`BATCH_END`; the
//! kernel applies it as one transaction and acknowledges every message.
//! Requires `CAP_NET_ADMIN`.

pub(crate) mod codec;
#[cfg(target_os = "linux")]
mod socket;

pub use codec::COMMENT_MAXLEN;

use crate::error::TransportError;
use crate::rule::Rule;

/// Parses the payload of one `NFT_MSG_NEWRULE` message: the nfgenmsg
/// header followed by the rule attributes.
pub fn parse_rule_message(payload: &[u8]) -> Result<Rule, TransportError> {
    codec::parse_rule(payload)
}

/// Encodes `rule` as the payload of an `NFT_MSG_NEWRULE` message.
pub fn encode_rule_message(rule: &Rule) -> Result<Vec<u8>, TransportError> {
    codec::new_rule_payload(rule)
}

#[cfg(target_os = "linux")]
pub use self::linux::NetlinkTransport;

#[cfg(target_os = "linux")]
mod linux {
    use std::io;

    use flowmon_core::types::TableFamily;
    use tracing::{debug, trace};

    use super::codec::{self, NlMsg};
    use super::socket::NetfilterSocket;
    use crate::error::TransportError;
    use crate::rule::{Chain, Rule, Table};
    use crate::transport::{Batch, BatchOp, Transport};

    /// [`Transport`] backed by the running kernel.
    pub struct NetlinkTransport {
        socket: NetfilterSocket,
        batch: Batch,
    }

    impl std::fmt::Debug for NetlinkTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("NetlinkTransport")
                .field("staged", &self.batch.len())
                .finish()
        }
    }

    impl NetlinkTransport {
        /// Opens and binds the socket. No request is sent yet.
        pub fn new() -> Result<Self, TransportError> {
            let socket = NetfilterSocket::open().map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => TransportError::PermissionDenied,
                _ => TransportError::Io(e),
            })?;
            debug!("netfilter netlink socket opened");
            Ok(Self {
                socket,
                batch: Batch::default(),
            })
        }

        /// Sends one request and gathers replies until its ACK or DONE.
        fn request(
            &mut self,
            msg: u16,
            flags: u16,
            payload: &[u8],
            what: &str,
        ) -> Result<Vec<NlMsg>, TransportError> {
            let seq = self.socket.next_seq();
            let mut datagram = Vec::with_capacity(codec::NLMSG_HDRLEN + payload.len());
            codec::push_message(
                &mut datagram,
                codec::nft_msg_type(msg),
                codec::NLM_F_REQUEST | flags,
                seq,
                payload,
            );
            self.socket.send(&datagram)?;

            let mut replies = Vec::new();
            loop {
                for reply in self.socket.recv()? {
                    if reply.seq != seq {
                        trace!(seq = reply.seq, "dropping stale netlink reply");
                        continue;
                    }
                    match reply.msg_type {
                        codec::NLMSG_ERROR => {
                            let code = reply.error_code()?;
                            if code == 0 {
                                return Ok(replies);
                            }
                            return Err(TransportError::from_errno(op_name(msg), code, what));
                        }
                        codec::NLMSG_DONE => return Ok(replies),
                        _ => {
                            let multi = reply.flags & codec::NLM_F_MULTI != 0;
                            replies.push(reply);
                            if !multi && flags & codec::NLM_F_ACK == 0 {
                                return Ok(replies);
                            }
                        }
                    }
                }
            }
        }
    }

    impl Transport for NetlinkTransport {
        fn list_table(&mut self, family: TableFamily, name: &str) -> Result<Table, TransportError> {
            let payload = codec::get_table_payload(family, name)?;
            let what = format!("table {family} {name}");
            self.request(codec::NFT_MSG_GETTABLE, codec::NLM_F_ACK, &payload, &what)?
                .iter()
                .find(|m| m.is_nft(codec::NFT_MSG_NEWTABLE))
                .map(|m| codec::parse_table(&m.payload))
                .unwrap_or(Err(TransportError::NotFound(what)))
        }

        fn list_chain(&mut self, table: &Table, name: &str) -> Result<Chain, TransportError> {
            let payload = codec::chain_id_payload(table, name)?;
            let what = format!("chain {table} {name}");
            self.request(codec::NFT_MSG_GETCHAIN, codec::NLM_F_ACK, &payload, &what)?
                .iter()
                .find(|m| m.is_nft(codec::NFT_MSG_NEWCHAIN))
                .map(|m| codec::parse_chain(&m.payload))
                .unwrap_or(Err(TransportError::NotFound(what)))
        }

        fn reset_rules(&mut self, table: &Table, chain: &Chain) -> Result<Vec<Rule>, TransportError> {
            let payload = codec::rule_dump_payload(table, &chain.name)?;
            let what = format!("chain {table} {}", chain.name);
            let replies = self.request(
                codec::NFT_MSG_GETRULE_RESET,
                codec::NLM_F_DUMP,
                &payload,
                &what,
            )?;
            let mut rules = Vec::with_capacity(replies.len());
            for reply in replies.iter().filter(|m| m.is_nft(codec::NFT_MSG_NEWRULE)) {
                let rule = codec::parse_rule(&reply.payload)?;
                // Older kernels ignore the dump filter.
                if rule.table.name == table.name && rule.chain == chain.name {
                    rules.push(rule);
                }
            }
            Ok(rules)
        }

        fn batch(&mut self) -> &mut Batch {
            &mut self.batch
        }

        fn commit(&mut self) -> Result<(), TransportError> {
            let ops = self.batch.take();
            if ops.is_empty() {
                return Ok(());
            }

            let socket = &mut self.socket;
            let mut issued = Vec::with_capacity(ops.len() + 2);
            let (datagram, acks) = codec::encode_batch(&ops, || {
                let seq = socket.next_seq();
                issued.push(seq);
                seq
            })?;
            debug!(messages = ops.len(), bytes = datagram.len(), "committing batch");
            self.socket.send(&datagram)?;

            let mut pending = acks.clone();
            while !pending.is_empty() {
                for reply in self.socket.recv()? {
                    if reply.msg_type != codec::NLMSG_ERROR || !issued.contains(&reply.seq) {
                        continue;
                    }
                    let code = reply.error_code()?;
                    if code != 0 {
                        let what = acks
                            .iter()
                            .position(|s| *s == reply.seq)
                            .map(|i| describe(&ops[i]))
                            .unwrap_or_else(|| "batch".to_owned());
                        return Err(TransportError::from_errno("commit", code, &what));
                    }
                    pending.retain(|s| *s != reply.seq);
                }
            }
            Ok(())
        }
    }

    fn op_name(msg: u16) -> &'static str {
        match msg {
            codec::NFT_MSG_GETTABLE => "get table",
            codec::NFT_MSG_GETCHAIN => "get chain",
            codec::NFT_MSG_GETRULE_RESET => "reset rules",
            _ => "request",
        }
    }

    fn describe(op: &BatchOp) -> String {
        match op {
            BatchOp::AddTable(t) => format!("add table {t}"),
            BatchOp::AddChain(c) => format!("add chain {} {}", c.table, c.name),
            BatchOp::AddRule(r) => format!(
                "add rule {} {} '{}'",
                r.table,
                r.chain,
                r.comment.as_deref().unwrap_or("")
            ),
            BatchOp::FlushChain(c) => format!("flush chain {} {}", c.table, c.name),
            BatchOp::DelChain(c) => format!("delete chain {} {}", c.table, c.name),
            BatchOp::FlushTable(t) => format!("flush table {t}"),
            BatchOp::DelTable(t) => format!("delete table {t}"),
        }
    }
}
