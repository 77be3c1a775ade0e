//! Property tests for the config patcher and command line merge.
//!
//! These verify, for arbitrary existing file content:
//! - Patching twice yields the same content as patching once
//! - Exactly one line encodes the key afterwards, with the desired value
//! - Lines for other keys keep their order

use proptest::prelude::*;
use rt_provision::kernel::cmdline;
use rt_provision::patcher::{patch_content, render_line, MutationOutcome};
use rt_provision::ConfigAssertion;

const TARGET: &str = "/etc/target.conf";

fn build_content(lines: &[String], trailing_newline: bool) -> String {
    let mut content = lines.join("\n");
    if trailing_newline && !content.is_empty() {
        content.push('\n');
    }
    content
}

// =============================================================================
// Kconfig
// =============================================================================

fn kconfig_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("CONFIG_EVL=y".to_string()),
        Just("CONFIG_EVL=m".to_string()),
        Just("# CONFIG_EVL is not set".to_string()),
        Just("CONFIG_EVL_LATMUS=y".to_string()),
        Just("# CONFIG_EVL_LATMUS is not set".to_string()),
        Just("#".to_string()),
        Just(String::new()),
        "CONFIG_[A-Z]{1,8}=[ymn]",
    ]
}

fn kconfig_value() -> impl Strategy<Value = String> {
    prop_oneof![Just("y"), Just("m"), Just("n"), Just("500")].prop_map(str::to_string)
}

fn is_evl_line(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("CONFIG_EVL=") || line == "# CONFIG_EVL is not set"
}

proptest! {
    /// Kconfig: a second patch changes nothing
    #[test]
    fn kconfig_patch_is_idempotent(
        lines in prop::collection::vec(kconfig_line(), 0..12),
        trailing in any::<bool>(),
        value in kconfig_value(),
    ) {
        let assertion = ConfigAssertion::kconfig("CONFIG_EVL", &value, TARGET);
        let content = build_content(&lines, trailing);

        let (once, _) = patch_content(&content, &assertion);
        let (twice, outcome) = patch_content(&once, &assertion);

        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(outcome, MutationOutcome::Unchanged);
    }

    /// Kconfig: exactly one line for the key remains, rendering the value
    #[test]
    fn kconfig_key_is_unique(
        lines in prop::collection::vec(kconfig_line(), 0..12),
        trailing in any::<bool>(),
        value in kconfig_value(),
    ) {
        let assertion = ConfigAssertion::kconfig("CONFIG_EVL", &value, TARGET);
        let (patched, _) = patch_content(&build_content(&lines, trailing), &assertion);

        let matching: Vec<&str> = patched.lines().filter(|l| is_evl_line(l)).collect();
        let expected = render_line(&assertion);
        prop_assert_eq!(matching, vec![expected.as_str()]);
    }

    /// Kconfig: unrelated lines survive in their original order
    #[test]
    fn kconfig_other_lines_preserved(
        lines in prop::collection::vec(kconfig_line(), 0..12),
        trailing in any::<bool>(),
        value in kconfig_value(),
    ) {
        let assertion = ConfigAssertion::kconfig("CONFIG_EVL", &value, TARGET);
        let content = build_content(&lines, trailing);
        let (patched, _) = patch_content(&content, &assertion);

        let before: Vec<&str> = content.lines().filter(|l| !is_evl_line(l)).collect();
        let after: Vec<&str> = patched.lines().filter(|l| !is_evl_line(l)).collect();
        prop_assert_eq!(before, after);
    }
}

// =============================================================================
// Sysctl
// =============================================================================

const SYSCTL_KEY: &str = "kernel.timer_migration";

fn sysctl_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("kernel.timer_migration = 1".to_string()),
        Just("kernel.timer_migration=0".to_string()),
        Just("  kernel.timer_migration   =   1".to_string()),
        Just("# kernel.timer_migration = 1".to_string()),
        Just("; kernel.timer_migration = 1".to_string()),
        Just("kernel.timer_migration_extra = 1".to_string()),
        Just(String::new()),
        "vm\\.[a-z_]{1,10} = [0-9]{1,3}",
    ]
}

fn is_sysctl_key_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.starts_with('#')
        && !trimmed.starts_with(';')
        && trimmed
            .split_once('=')
            .map(|(k, _)| k.trim() == SYSCTL_KEY)
            .unwrap_or(false)
}

proptest! {
    /// Sysctl: idempotent and unique, comments untouched
    #[test]
    fn sysctl_patch_is_idempotent_and_unique(
        lines in prop::collection::vec(sysctl_line(), 0..12),
        trailing in any::<bool>(),
        value in "[0-9]{1,3}",
    ) {
        let assertion = ConfigAssertion::sysctl(SYSCTL_KEY, &value, TARGET);
        let content = build_content(&lines, trailing);

        let (once, _) = patch_content(&content, &assertion);
        let (twice, outcome) = patch_content(&once, &assertion);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(outcome, MutationOutcome::Unchanged);

        let matching: Vec<&str> = once.lines().filter(|l| is_sysctl_key_line(l)).collect();
        let expected = format!("{} = {}", SYSCTL_KEY, value);
        prop_assert_eq!(matching, vec![expected.as_str()]);

        let comments_before = content.lines().filter(|l| l.trim_start().starts_with(|c: char| c == '#' || c == ';')).count();
        let comments_after = once.lines().filter(|l| l.trim_start().starts_with(|c: char| c == '#' || c == ';')).count();
        prop_assert_eq!(comments_before, comments_after);
    }
}

// =============================================================================
// Kernel command line
// =============================================================================

fn cmdline_token() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("quiet".to_string()),
        Just("splash".to_string()),
        Just("isolcpus=2".to_string()),
        Just("nohz_full=0-1".to_string()),
        Just("mitigations=auto".to_string()),
        "[a-z]{1,6}=[a-z0-9]{1,4}",
    ]
}

proptest! {
    /// Merging the required parameters twice equals merging once
    #[test]
    fn cmdline_merge_is_idempotent(
        tokens in prop::collection::vec(cmdline_token(), 0..10),
        cpus in 2usize..16,
        mitigations in any::<bool>(),
    ) {
        let isolated = format!("1-{}", cpus - 1);
        let required = cmdline::required_params(Some(isolated.as_str()), mitigations);
        let existing = tokens.join(" ");

        let once = cmdline::merge_cmdline(&existing, &required);
        let twice = cmdline::merge_cmdline(&once, &required);
        prop_assert_eq!(&once, &twice);

        prop_assert_eq!(cmdline::param_value(&once, "isolcpus"), Some(isolated.as_str()));
        prop_assert_eq!(once.split_whitespace().filter(|t| t.starts_with("nohz_full=")).count(), 1);
    }
}
