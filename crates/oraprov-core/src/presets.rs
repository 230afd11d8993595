//! Built-in desired states for the base images we deploy on.
//!
//! The variants differ in package manager, the async I/O package name, the
//! libaio soname shipped by the distribution and the default listen port.

use crate::desired_state::{
    default_search_dirs, CompatLink, DesiredState, EnvironmentExport, InstantClient, OsPackages,
    PackageManager, PythonDeps, ServerSpec, WalletSpec,
};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Instant Client Basic Light 21.13, the last release validated against the app image.
pub const INSTANT_CLIENT_URL: &str = "https://download.oracle.com/otn_software/linux/instantclient/2113000/instantclient-basiclite-linux.x64-21.13.0.0.0dbru.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Debian bookworm / python:3.x-slim
    Debian,
    /// Ubuntu 24.04: libaio ships as `libaio.so.1t64`
    UbuntuNoble,
    /// Oracle Linux 8/9 slim images
    OracleLinux,
}

impl Variant {
    pub fn all() -> &'static [Variant] {
        &[Variant::Debian, Variant::UbuntuNoble, Variant::OracleLinux]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Debian => "debian",
            Variant::UbuntuNoble => "ubuntu-noble",
            Variant::OracleLinux => "oraclelinux",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debian" | "bookworm" | "slim" => Ok(Variant::Debian),
            "ubuntu-noble" | "ubuntu" | "noble" | "ubuntu-24.04" => Ok(Variant::UbuntuNoble),
            "oraclelinux" | "oracle-linux" | "ol" | "ol9" | "ol8" => Ok(Variant::OracleLinux),
            other => Err(format!(
                "unknown variant '{}' (expected one of: {})",
                other,
                Variant::all()
                    .iter()
                    .map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

/// Desired state for a variant. The archive checksum is left unpinned; `init`
/// reminds the operator to pin it.
pub fn preset(variant: Variant) -> DesiredState {
    let (manager, packages, compat_links, default_port) = match variant {
        Variant::Debian => (
            PackageManager::Apt,
            vec!["wget", "unzip", "libaio1"],
            Vec::new(),
            10000,
        ),
        Variant::UbuntuNoble => (
            PackageManager::Apt,
            vec!["wget", "unzip", "libaio1t64"],
            vec![CompatLink {
                expected: "libaio.so.1".to_string(),
                provided: "libaio.so.1t64".to_string(),
                search_dirs: default_search_dirs(),
                link_dir: None,
            }],
            10000,
        ),
        Variant::OracleLinux => (
            PackageManager::Microdnf,
            vec!["wget", "unzip", "libaio"],
            Vec::new(),
            5000,
        ),
    };

    DesiredState {
        os_packages: OsPackages {
            manager,
            packages: packages.into_iter().map(String::from).collect(),
            update_index: true,
        },
        instant_client: InstantClient {
            url: INSTANT_CLIENT_URL.to_string(),
            sha256: None,
            size: None,
            install_dir: PathBuf::from("/opt/oracle"),
            keep_archive: false,
            library_dir: None,
        },
        compat_links,
        environment: EnvironmentExport {
            export_path: true,
            profile_script: Some(PathBuf::from("/etc/profile.d/oracle-instantclient.sh")),
            ld_so_conf: None,
        },
        python: PythonDeps::default(),
        wallet: WalletSpec::default(),
        server: ServerSpec {
            default_port,
            ..ServerSpec::default()
        },
        base_dir: PathBuf::from("."),
    }
}
