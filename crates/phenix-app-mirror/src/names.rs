//! Interface and mirror naming.
//!
//! Names are re-derived in every phase from the experiment and target
//! names, never stored, so cleanup finds what post-start created even if
//! the runtime state is gone.

/// Maximum length of a Linux interface name.
pub const IFNAME_MAX: usize = 16;

/// Experiment-name budget in the per-host mirror tap name.
pub const MIRROR_TAP_EXP_LEN: usize = 9;

/// Suffix of the per-host mirror tap.
pub const MIRROR_TAP_SUFFIX: &str = "-mirror";

/// Cuts `s` to at most `max` bytes.
///
/// Names are expected to be ASCII; a cut that would split a multi-byte
/// character backs off to the previous boundary.
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }

    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// Name of the mirror-network tap created on every cluster host.
pub fn mirror_tap_name(exp: &str) -> String {
    format!("{}{}", truncate(exp, MIRROR_TAP_EXP_LEN), MIRROR_TAP_SUFFIX)
}

/// Name shared by the GRE tunnel port and the mirror for one target.
pub fn tunnel_name(exp: &str, target: &str) -> String {
    let name = format!("{}-{}", exp, target);
    truncate(&name, IFNAME_MAX).to_string()
}
