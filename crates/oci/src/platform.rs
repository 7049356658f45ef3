//! Platform selection for multi-platform image indexes.
//!
//! OCI indexes describe platforms with GOARCH/GOOS names (`amd64`, `arm64`,
//! `linux`), which differ from Rust's `std::env::consts` names.

use std::fmt;

/// Architecture/OS pair used to pick one manifest out of an image index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    /// CPU architecture (amd64, arm64, ppc64le, ...).
    pub architecture: String,
    /// Operating system (linux, windows, ...).
    pub os: String,
}

impl Platform {
    /// Create a new platform.
    #[must_use]
    pub fn new(architecture: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
        }
    }

    /// Parse an OCI platform string (`os/arch`, e.g. "linux/arm64").
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (os, arch) = s.split_once('/')?;
        if os.is_empty() || arch.is_empty() || arch.contains('/') {
            return None;
        }
        Some(Self::new(normalize_arch(arch), os.to_lowercase()))
    }

    /// Whether an index entry's platform fields name this platform.
    #[must_use]
    pub fn matches(&self, architecture: &str, os: &str) -> bool {
        self.architecture == architecture && self.os == os
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Get the platform of the running host in OCI naming.
#[must_use]
pub fn current_platform() -> Platform {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    Platform::new(normalize_arch(std::env::consts::ARCH), os)
}

/// Normalize an architecture name to its OCI spelling.
///
/// - "x86_64" -> "amd64"
/// - "aarch64" -> "arm64"
/// - "AMD64" -> "amd64"
#[must_use]
pub fn normalize_arch(arch: &str) -> String {
    let arch = arch.to_lowercase();
    match arch.as_str() {
        "x86_64" | "x86-64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        "i686" | "i386" | "x86" => "386".to_string(),
        _ => arch,
    }
}
