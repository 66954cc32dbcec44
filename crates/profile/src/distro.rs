//! Distro identification from `/etc/os-release`.

use crate::types::{DistroFamily, DistroInfo};

/// Map an os-release `ID` to its family.
///
/// The table covers the IDs the install recipes care about; everything
/// else lands in `Unknown` and restricts recipe method selection.
#[must_use]
pub fn family_for_id(id: &str) -> DistroFamily {
    match id {
        "debian" | "ubuntu" | "linuxmint" | "pop" | "raspbian" | "kali" | "elementary" => {
            DistroFamily::Debian
        }
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" | "ol" => DistroFamily::Rhel,
        "alpine" => DistroFamily::Alpine,
        "arch" | "manjaro" | "endeavouros" | "garuda" => DistroFamily::Arch,
        "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" => DistroFamily::Suse,
        _ => DistroFamily::Unknown,
    }
}

/// Parse the contents of `/etc/os-release`.
///
/// Only `ID` and `VERSION_ID` are consulted. Quoting per the os-release
/// format (values may be bare or double-quoted) is handled; malformed
/// lines are skipped.
#[must_use]
pub fn parse_os_release(contents: &str) -> DistroInfo {
    let mut id = None;
    let mut version = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "ID" => id = Some(value.to_ascii_lowercase()),
            "VERSION_ID" => version = Some(value.to_string()),
            _ => {}
        }
    }

    let id = id.unwrap_or_else(|| "unknown".to_string());
    let family = family_for_id(&id);
    let version_tuple = version.as_deref().map(version_tuple).unwrap_or_default();

    DistroInfo {
        id,
        family,
        version,
        version_tuple,
    }
}

/// Split a version string into its numeric components.
///
/// Non-numeric fragments terminate the tuple: `"22.04"` → `[22, 4]`,
/// `"12"` → `[12]`, `"tumbleweed"` → `[]`.
#[must_use]
pub fn version_tuple(version: &str) -> Vec<u32> {
    version
        .split('.')
        .map_while(|part| part.parse::<u32>().ok())
        .collect()
}
