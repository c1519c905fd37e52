use std::fmt::Debug;

use crate::node::MemberEntry;

pub(crate) fn pretty_debug<T: Debug>(label: &str, value: &T) -> String {
    format!("{} {:#?}", label, value)
}

/// One line per member, `addr hb=.. age=..`, for debug logs.
pub(crate) fn format_members(entries: &[MemberEntry], now: u64) -> String {
    entries
        .iter()
        .map(|entry| format!("{} hb={} age={}", entry.addr, entry.heartbeat, entry.age(now)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeAddr;

    #[test]
    fn test_format_members() {
        let entries = vec![
            MemberEntry::new(NodeAddr::new(1, 0), 4, 2),
            MemberEntry::new(NodeAddr::new(2, 7), 1, 0),
        ];
        assert_eq!(
            format_members(&entries, 3),
            "0.0.0.1:0 hb=4 age=1\n0.0.0.2:7 hb=1 age=3"
        );
        assert_eq!(pretty_debug("x", &1), "x 1");
    }
}
