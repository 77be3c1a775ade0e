//! Kernel command line handling: GRUB default merge and CPU list parsing.

use std::collections::BTreeSet;

/// Shell variable in `/etc/default/grub` holding the default boot parameters.
pub const GRUB_CMDLINE_VAR: &str = "GRUB_CMDLINE_LINUX_DEFAULT";

/// Boot parameters required for an isolated real-time partition, in fixed order.
pub fn required_params(isolated_cpus: Option<&str>, disable_mitigations: bool) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if disable_mitigations {
        params.push(("mitigations".to_string(), "off".to_string()));
    }
    if let Some(cpus) = isolated_cpus {
        for name in ["isolcpus", "rcu_nocbs", "nohz_full"] {
            params.push((name.to_string(), cpus.to_string()));
        }
        params.push(("irqaffinity".to_string(), "0".to_string()));
    }
    params
}

fn param_name(token: &str) -> &str {
    token.split_once('=').map(|(name, _)| name).unwrap_or(token)
}

/// Merge required parameters into an existing command line.
///
/// Tokens naming a required parameter are dropped, the rest keep their order,
/// and the required parameters follow in the given order. Merging an
/// already-merged line returns it unchanged.
pub fn merge_cmdline(existing: &str, required: &[(String, String)]) -> String {
    let mut tokens: Vec<String> = existing
        .split_whitespace()
        .filter(|token| !required.iter().any(|(name, _)| name == param_name(token)))
        .map(str::to_string)
        .collect();
    tokens.extend(required.iter().map(|(name, value)| format!("{}={}", name, value)));
    tokens.join(" ")
}

/// Strip one level of matching single or double quotes.
pub fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

pub fn quote(value: &str) -> String {
    format!("\"{}\"", value)
}

/// Value of `name=` on a kernel command line. For `isolcpus`, leading flags
/// such as `domain,managed_irq,` are skipped.
pub fn param_value<'a>(cmdline: &'a str, name: &str) -> Option<&'a str> {
    let value = cmdline
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .filter(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .last()?;

    if name == "isolcpus" {
        let start = value
            .split(',')
            .take_while(|part| !part.starts_with(|c: char| c.is_ascii_digit()))
            .map(|part| part.len() + 1)
            .sum::<usize>();
        return Some(value.get(start..).unwrap_or(""));
    }
    Some(value)
}

/// Expand a CPU list such as `1-3,5` into its members. `None` for malformed lists.
pub fn parse_cpu_list(list: &str) -> Option<BTreeSet<u32>> {
    let list = list.trim();
    let mut cpus = BTreeSet::new();
    if list.is_empty() {
        return Some(cpus);
    }
    for range in list.split(',') {
        match range.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().ok()?;
                let hi: u32 = hi.trim().parse().ok()?;
                if lo > hi {
                    return None;
                }
                cpus.extend(lo..=hi);
            }
            None => {
                cpus.insert(range.trim().parse().ok()?);
            }
        }
    }
    Some(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        required_params(Some("1-3"), true)
    }

    #[test]
    fn test_merge_keeps_foreign_tokens() {
        let merged = merge_cmdline("quiet splash isolcpus=2", &required());
        assert_eq!(
            merged,
            "quiet splash mitigations=off isolcpus=1-3 rcu_nocbs=1-3 nohz_full=1-3 irqaffinity=0"
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let once = merge_cmdline("quiet", &required());
        assert_eq!(merge_cmdline(&once, &required()), once);
    }

    #[test]
    fn test_single_cpu_host_only_disables_mitigations() {
        let params = required_params(None, true);
        assert_eq!(merge_cmdline("", &params), "mitigations=off");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(unquote("\"quiet splash\""), "quiet splash");
        assert_eq!(unquote("'quiet'"), "quiet");
        assert_eq!(unquote("quiet"), "quiet");
        assert_eq!(quote("a b"), "\"a b\"");
    }

    #[test]
    fn test_param_value() {
        let cmdline = "BOOT_IMAGE=/vmlinuz root=/dev/sda1 isolcpus=domain,managed_irq,2-5 nohz_full=2-5";
        assert_eq!(param_value(cmdline, "isolcpus"), Some("2-5"));
        assert_eq!(param_value(cmdline, "nohz_full"), Some("2-5"));
        assert_eq!(param_value(cmdline, "rcu_nocbs"), None);
    }

    #[test]
    fn test_parse_cpu_list() {
        let cpus = parse_cpu_list("1-3,7").unwrap();
        assert_eq!(cpus.into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 7]);
        assert_eq!(parse_cpu_list("").unwrap().len(), 0);
        assert!(parse_cpu_list("3-1").is_none());
        assert!(parse_cpu_list("x").is_none());
    }
}
