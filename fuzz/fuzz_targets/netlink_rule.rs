#![no_main]

use libfuzzer_sys::fuzz_target;

use flowmon_nft::decode;
use flowmon_nft::netlink::{encode_rule_message, parse_rule_message};

// Raw NEWRULE payloads as a rule dump would deliver them.
fuzz_target!(|data: &[u8]| {
    let Ok(rule) = parse_rule_message(data) else {
        return;
    };
    let _ = decode(&rule);

    // Whatever parses and re-encodes must parse back to the same rule.
    if let Ok(bytes) = encode_rule_message(&rule) {
        let again = parse_rule_message(&bytes).expect("re-encoded rule must parse");
        let mut expected = rule;
        expected.handle = None;
        assert_eq!(again, expected);
    }
});
