//! Environment variable key constants and aliases.
//!
//! Primary variables use the `ORAPROV_*` prefix; the `OCI_PROVISION_*` names
//! from older build scripts are still honoured as aliases.

/// Desired-state file and working directories
pub mod paths {
    pub const ORAPROV_FILE: &str = "ORAPROV_FILE";
    pub const FILE_ALIASES: &[&str] = &["OCI_PROVISION_FILE"];

    pub const ORAPROV_STATE_DIR: &str = "ORAPROV_STATE_DIR";

    pub const ORAPROV_CACHE_DIR: &str = "ORAPROV_CACHE_DIR";
    pub const CACHE_DIR_ALIASES: &[&str] = &["OCI_PROVISION_CACHE_DIR"];
}

/// Logging and the provision journal
pub mod observability {
    pub const ORAPROV_QUIET: &str = "ORAPROV_QUIET";
    pub const QUIET_ALIASES: &[&str] = &["OCI_PROVISION_QUIET"];

    pub const ORAPROV_LOG_LEVEL: &str = "ORAPROV_LOG_LEVEL";
    pub const LOG_LEVEL_ALIASES: &[&str] = &["OCI_PROVISION_LOG_LEVEL"];

    pub const ORAPROV_LOG_JSON: &str = "ORAPROV_LOG_JSON";

    pub const ORAPROV_JOURNAL: &str = "ORAPROV_JOURNAL";
}

/// Variables consumed or produced for the served application.
pub mod runtime {
    pub const PORT: &str = "PORT";
    pub const LD_LIBRARY_PATH: &str = "LD_LIBRARY_PATH";
    pub const PATH: &str = "PATH";
    pub const TNS_ADMIN: &str = "TNS_ADMIN";
}

/// Base64-encoded wallet material. Each key maps to the file it produces
/// inside the wallet directory.
pub mod wallet {
    pub const CWALLET_SSO_B64: &str = "CWALLET_SSO_B64";
    pub const EWALLET_P12_B64: &str = "EWALLET_P12_B64";
    pub const TNSNAMES_ORA_B64: &str = "TNSNAMES_ORA_B64";
    pub const SQLNET_ORA_B64: &str = "SQLNET_ORA_B64";

    pub const FILES: &[(&str, &str)] = &[
        (CWALLET_SSO_B64, "cwallet.sso"),
        (EWALLET_P12_B64, "ewallet.p12"),
        (TNSNAMES_ORA_B64, "tnsnames.ora"),
        (SQLNET_ORA_B64, "sqlnet.ora"),
    ];
}
