//! Domain types: counter specifications and the vocabulary they use.
//!
//! A [`CounterSpec`] describes one piece of traffic to count (addresses,
//! L4 protocol, ports, TCP flags) under an opaque label. Specs are grouped
//! per hook direction into a [`CounterSet`]; order inside each direction is
//! preserved because rules are installed, and therefore evaluated, in that
//! order.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// L4 protocols a counter can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
}

impl Protocol {
    /// IANA protocol number, as carried in the L4 protocol meta key.
    pub fn number(self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Icmp => 1,
            Protocol::Icmpv6 => 58,
        }
    }

    /// Reverse of [`Protocol::number`].
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            1 => Some(Protocol::Icmp),
            58 => Some(Protocol::Icmpv6),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Icmpv6 => "icmpv6",
        }
    }

    /// Whether the transport header carries source/destination ports.
    pub fn has_ports(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single TCP header flag. The discriminant is the bit in byte 13 of the
/// TCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum TcpFlag {
    Fin = 0x01,
    Syn = 0x02,
    Rst = 0x04,
    Psh = 0x08,
    Ack = 0x10,
    Urg = 0x20,
    Ece = 0x40,
    Cwr = 0x80,
}

impl TcpFlag {
    /// All flags in header bit order.
    pub const ALL: [TcpFlag; 8] = [
        TcpFlag::Fin,
        TcpFlag::Syn,
        TcpFlag::Rst,
        TcpFlag::Psh,
        TcpFlag::Ack,
        TcpFlag::Urg,
        TcpFlag::Ece,
        TcpFlag::Cwr,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TcpFlag::Fin => "fin",
            TcpFlag::Syn => "syn",
            TcpFlag::Rst => "rst",
            TcpFlag::Psh => "psh",
            TcpFlag::Ack => "ack",
            TcpFlag::Urg => "urg",
            TcpFlag::Ece => "ece",
            TcpFlag::Cwr => "cwr",
        }
    }
}

impl fmt::Display for TcpFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TcpFlag {
    type Err = String;

    /// Case-insensitive flag name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TcpFlag::ALL
            .into_iter()
            .find(|flag| flag.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("invalid TCP flag: {s}"))
    }
}

impl TryFrom<String> for TcpFlag {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A set of TCP flags, stored as the header byte.
///
/// Serialized as a list of flag names in header bit order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<TcpFlag>", into = "Vec<TcpFlag>")]
pub struct TcpFlags(u8);

impl TcpFlags {
    /// Flags the fixed match mask keeps when comparing against the packet.
    ///
    /// Any requested flag outside this set is zeroed on the packet side but
    /// kept on the comparison side, so such a rule never matches.
    pub const MATCHABLE: TcpFlags = TcpFlags(0x01 | 0x02 | 0x04 | 0x10);

    pub fn empty() -> Self {
        TcpFlags(0)
    }

    pub fn from_byte(b: u8) -> Self {
        TcpFlags(b)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, flag: TcpFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn insert(&mut self, flag: TcpFlag) {
        self.0 |= flag.bit();
    }

    /// Flags in header bit order.
    pub fn iter(self) -> impl Iterator<Item = TcpFlag> {
        TcpFlag::ALL.into_iter().filter(move |flag| self.contains(*flag))
    }

    /// Requested flags that the fixed match mask throws away.
    pub fn unmatchable(self) -> TcpFlags {
        TcpFlags(self.0 & !Self::MATCHABLE.0)
    }
}

impl FromIterator<TcpFlag> for TcpFlags {
    fn from_iter<I: IntoIterator<Item = TcpFlag>>(iter: I) -> Self {
        let mut flags = TcpFlags::empty();
        for flag in iter {
            flags.insert(flag);
        }
        flags
    }
}

impl From<Vec<TcpFlag>> for TcpFlags {
    fn from(flags: Vec<TcpFlag>) -> Self {
        flags.into_iter().collect()
    }
}

impl From<TcpFlags> for Vec<TcpFlag> {
    fn from(flags: TcpFlags) -> Self {
        flags.iter().collect()
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(TcpFlag::as_str).collect();
        f.write_str(&names.join(","))
    }
}

/// nftables table family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableFamily {
    #[default]
    #[serde(rename = "ip")]
    Ipv4,
    #[serde(rename = "ip6")]
    Ipv6,
    #[serde(rename = "inet")]
    Inet,
}

impl TableFamily {
    /// `nft` command-line spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            TableFamily::Ipv4 => "ip",
            TableFamily::Ipv6 => "ip6",
            TableFamily::Inet => "inet",
        }
    }

    /// `NFPROTO_*` value used in the netfilter message header.
    pub fn nfproto(self) -> u8 {
        match self {
            TableFamily::Ipv4 => 2,
            TableFamily::Ipv6 => 10,
            TableFamily::Inet => 1,
        }
    }

    /// Whether packets of this family can carry `addr`.
    pub fn accepts(self, addr: &IpAddr) -> bool {
        match self {
            TableFamily::Ipv4 => addr.is_ipv4(),
            TableFamily::Ipv6 => addr.is_ipv6(),
            TableFamily::Inet => true,
        }
    }
}

impl fmt::Display for TableFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(TableFamily::Ipv4),
            "ip6" => Ok(TableFamily::Ipv6),
            "inet" => Ok(TableFamily::Inet),
            other => Err(format!("unknown table family '{other}', expected ip, ip6 or inet")),
        }
    }
}

/// Hook direction a counter is attached to.
///
/// Not part of the installed rule: it is implied by the chain the rule
/// lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Input, Direction::Output];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared counter rule.
///
/// `direction`, `packets` and `bytes` are never read from configuration;
/// they are filled in when counters are read back from the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CounterSpec {
    /// Identifier stored as the rule comment
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_addr: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_addr: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    #[serde(skip_serializing_if = "TcpFlags::is_empty")]
    pub tcp_flags: TcpFlags,
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_deserializing, skip_serializing_if = "is_zero")]
    pub packets: u64,
    #[serde(skip_deserializing, skip_serializing_if = "is_zero")]
    pub bytes: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl CounterSpec {
    /// Creates an empty spec carrying only a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Whether port predicates apply to this spec.
    pub fn has_ports(&self) -> bool {
        self.protocol.is_some_and(Protocol::has_ports)
    }

    /// Whether the TCP flag predicate applies to this spec.
    pub fn is_tcp(&self) -> bool {
        self.protocol == Some(Protocol::Tcp)
    }

    /// Metric labels for this counter, in a stable order.
    ///
    /// Ports are only emitted for TCP/UDP and when non-zero; flags only
    /// when non-empty.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = Vec::with_capacity(8);
        if let Some(direction) = self.direction {
            attrs.push(("direction", direction.to_string()));
        }
        if !self.label.is_empty() {
            attrs.push(("label", self.label.clone()));
        }
        if let Some(addr) = self.src_addr {
            attrs.push(("src_addr", addr.to_string()));
        }
        if let Some(addr) = self.dst_addr {
            attrs.push(("dst_addr", addr.to_string()));
        }
        if let Some(protocol) = self.protocol {
            attrs.push(("protocol", protocol.to_string()));
        }
        if self.has_ports() {
            if let Some(port) = self.src_port.filter(|p| *p != 0) {
                attrs.push(("src_port", port.to_string()));
            }
            if let Some(port) = self.dst_port.filter(|p| *p != 0) {
                attrs.push(("dst_port", port.to_string()));
            }
        }
        if !self.tcp_flags.is_empty() {
            attrs.push(("flags", self.tcp_flags.to_string()));
        }
        attrs
    }
}

/// Counter specifications for both hook directions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CounterSet {
    pub input: Vec<CounterSpec>,
    pub output: Vec<CounterSpec>,
}

impl CounterSet {
    pub fn get(&self, direction: Direction) -> &[CounterSpec] {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut Vec<CounterSpec> {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    pub fn len(&self) -> usize {
        self.input.len() + self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    /// All specs with their direction, input first.
    pub fn iter(&self) -> impl Iterator<Item = (Direction, &CounterSpec)> {
        self.input
            .iter()
            .map(|spec| (Direction::Input, spec))
            .chain(self.output.iter().map(|spec| (Direction::Output, spec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_numbers_roundtrip() {
        for proto in [Protocol::Tcp, Protocol::Udp, Protocol::Icmp, Protocol::Icmpv6] {
            assert_eq!(Protocol::from_number(proto.number()), Some(proto));
        }
        assert_eq!(Protocol::from_number(47), None);
    }

    #[test]
    fn only_tcp_and_udp_have_ports() {
        assert!(Protocol::Tcp.has_ports());
        assert!(Protocol::Udp.has_ports());
        assert!(!Protocol::Icmp.has_ports());
        assert!(!Protocol::Icmpv6.has_ports());
    }

    #[test]
    fn tcp_flag_parse_is_case_insensitive() {
        assert_eq!("SYN".parse::<TcpFlag>().unwrap(), TcpFlag::Syn);
        assert_eq!("ack".parse::<TcpFlag>().unwrap(), TcpFlag::Ack);
        assert!("syn-ack".parse::<TcpFlag>().is_err());
    }

    #[test]
    fn tcp_flags_iterate_in_header_order() {
        let flags: TcpFlags = vec![TcpFlag::Ack, TcpFlag::Syn].into();
        assert_eq!(flags.bits(), 0x12);
        let order: Vec<TcpFlag> = flags.iter().collect();
        assert_eq!(order, vec![TcpFlag::Syn, TcpFlag::Ack]);
        assert_eq!(flags.to_string(), "syn,ack");
    }

    #[test]
    fn tcp_flags_from_byte_covers_all_bits() {
        let flags = TcpFlags::from_byte(0xff);
        assert_eq!(flags.iter().count(), 8);
        assert!(TcpFlags::from_byte(0).is_empty());
    }

    #[test]
    fn unmatchable_flags_are_outside_the_fixed_mask() {
        assert_eq!(TcpFlags::MATCHABLE.bits(), 0x17);
        let flags: TcpFlags = vec![TcpFlag::Syn, TcpFlag::Psh, TcpFlag::Cwr].into();
        let lost: Vec<TcpFlag> = flags.unmatchable().iter().collect();
        assert_eq!(lost, vec![TcpFlag::Psh, TcpFlag::Cwr]);
    }

    #[test]
    fn table_family_parse_and_accepts() {
        assert_eq!("ip6".parse::<TableFamily>().unwrap(), TableFamily::Ipv6);
        assert!("bridge".parse::<TableFamily>().is_err());

        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(TableFamily::Ipv4.accepts(&v4));
        assert!(!TableFamily::Ipv4.accepts(&v6));
        assert!(TableFamily::Ipv6.accepts(&v6));
        assert!(TableFamily::Inet.accepts(&v4) && TableFamily::Inet.accepts(&v6));
    }

    #[test]
    fn attributes_skip_ports_for_icmp() {
        let spec = CounterSpec {
            label: "ping".to_owned(),
            protocol: Some(Protocol::Icmp),
            dst_port: Some(80),
            direction: Some(Direction::Input),
            ..CounterSpec::default()
        };
        let keys: Vec<&str> = spec.attributes().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["direction", "label", "protocol"]);
    }

    #[test]
    fn attributes_full_tcp_spec() {
        let spec = CounterSpec {
            label: "syn_in".to_owned(),
            src_addr: Some("1.2.3.4".parse().unwrap()),
            protocol: Some(Protocol::Tcp),
            dst_port: Some(8080),
            tcp_flags: vec![TcpFlag::Syn].into(),
            direction: Some(Direction::Output),
            ..CounterSpec::default()
        };
        let attrs = spec.attributes();
        assert!(attrs.contains(&("src_addr", "1.2.3.4".to_owned())));
        assert!(attrs.contains(&("dst_port", "8080".to_owned())));
        assert!(attrs.contains(&("flags", "syn".to_owned())));
        assert!(attrs.contains(&("direction", "output".to_owned())));
        assert!(!attrs.iter().any(|(k, _)| *k == "src_port"));
    }

    #[test]
    fn attributes_skip_zero_ports() {
        let spec = CounterSpec {
            label: "any_port".to_owned(),
            protocol: Some(Protocol::Udp),
            src_port: Some(0),
            dst_port: Some(0),
            ..CounterSpec::default()
        };
        let keys: Vec<&str> = spec.attributes().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["label", "protocol"]);
    }

    #[test]
    fn counter_spec_deserializes_from_toml() {
        let spec: CounterSpec = toml::from_str(
            r#"
label = "rest_syn"
src_addr = "1.2.3.4"
protocol = "tcp"
dst_port = 8080
tcp_flags = ["SYN", "ack"]
"#,
        )
        .unwrap();
        assert_eq!(spec.label, "rest_syn");
        assert_eq!(spec.protocol, Some(Protocol::Tcp));
        assert_eq!(spec.tcp_flags.bits(), 0x12);
        assert_eq!(spec.direction, None);
        assert_eq!(spec.packets, 0);
    }

    #[test]
    fn counter_spec_rejects_read_back_fields() {
        let result: Result<CounterSpec, _> = toml::from_str("label = \"x\"\npackets = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn counter_set_iterates_input_first() {
        let set = CounterSet {
            input: vec![CounterSpec::new("a")],
            output: vec![CounterSpec::new("b"), CounterSpec::new("c")],
        };
        let labels: Vec<(Direction, &str)> =
            set.iter().map(|(d, s)| (d, s.label.as_str())).collect();
        assert_eq!(
            labels,
            vec![
                (Direction::Input, "a"),
                (Direction::Output, "b"),
                (Direction::Output, "c"),
            ]
        );
        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
    }
}
