//! Platform tokens and compatibility rules.
//!
//! Query metadata names platforms using the osquery vocabulary. The host
//! platform defaults to the compile target but can be overridden so callers
//! can simulate verification on another OS.

/// Platform tokens accepted in a `platform` field.
pub const KNOWN_PLATFORMS: [&str; 8] = [
    "darwin", "linux", "windows", "freebsd", "posix", "any", "all", "default",
];

const UNIVERSAL_PLATFORMS: [&str; 3] = ["any", "all", "default"];
const POSIX_PLATFORMS: [&str; 3] = ["darwin", "linux", "freebsd"];

/// Tables that only exist on one platform family.
const RESTRICTED_TABLES: &[(&str, &str)] = &[
    ("alf", "darwin"),
    ("apps", "darwin"),
    ("authorization_mechanisms", "darwin"),
    ("homebrew_packages", "darwin"),
    ("kernel_extensions", "darwin"),
    ("launchd", "darwin"),
    ("plist", "darwin"),
    ("signature", "darwin"),
    ("apt_sources", "linux"),
    ("deb_packages", "linux"),
    ("iptables", "linux"),
    ("portage_packages", "linux"),
    ("rpm_packages", "linux"),
    ("selinux_events", "linux"),
    ("systemd_units", "linux"),
    ("appcompat_shims", "windows"),
    ("bitlocker_info", "windows"),
    ("programs", "windows"),
    ("registry", "windows"),
    ("services", "windows"),
    ("wmi_cli_event_consumers", "windows"),
    ("pkg_packages", "freebsd"),
];

/// Platform token for the OS this binary was built for.
pub fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Split a comma-separated platform list into trimmed, non-empty tokens.
pub fn tokens(platform: &str) -> impl Iterator<Item = &str> {
    platform
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// First token in `platform` that is not a recognized platform.
pub fn unknown_token(platform: &str) -> Option<&str> {
    tokens(platform).find(|token| !KNOWN_PLATFORMS.contains(token))
}

/// Whether a query declaring `platform` may run on `host`.
///
/// An empty declaration means every platform.
pub fn is_compatible(platform: &str, host: &str) -> bool {
    let mut declared = tokens(platform).peekable();
    if declared.peek().is_none() {
        return true;
    }
    declared.any(|token| {
        UNIVERSAL_PLATFORMS.contains(&token)
            || token == host
            || (token == "posix" && POSIX_PLATFORMS.contains(&host))
    })
}

/// Platform a well-known table is restricted to, if any.
pub fn table_platform(table: &str) -> Option<&'static str> {
    RESTRICTED_TABLES
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, platform)| *platform)
}
