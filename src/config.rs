//! Gateway configuration
//!
//! All tunables live in one typed structure populated once at startup from a
//! TOML file. Validation happens once in [`GateConfig::validate`]; components
//! receive the config by reference and never consult hidden global state.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::address::FidoAddress;
use crate::error::{GateError, Result};

/// Top-level gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Gateway identity and mode
    #[serde(default)]
    pub gateway: GatewaySection,
    /// FidoNet side: addresses and passwords
    pub fidonet: FidonetSection,
    /// News server connection
    pub nntp: NntpConfig,
    /// Directory and file layout
    pub paths: PathsSection,
    /// Spam filter settings and user pattern rules
    #[serde(default)]
    pub spam: SpamSection,
    /// Areafix protection limits and reply footer
    #[serde(default)]
    pub areafix: AreafixSection,
    /// Hold-for-review policy
    #[serde(default)]
    pub hold: HoldSection,
    /// Explicit area tag <-> newsgroup remappings
    #[serde(default)]
    pub remap: Vec<AreaRemap>,
}

/// Gateway identity and mode
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySection {
    /// Product name used in tear lines, PID/TID kludges and X-Gateway
    pub name: String,
    /// Origin line text (the address is appended automatically)
    pub origin_line: String,
    /// Sysop name, the recipient of hold notifications
    pub sysop: String,
    /// Textual domain for minted Message-IDs. Also the fallback whenever
    /// host-derived domain resolution yields an IPv6 literal, which must
    /// never appear in a minted identity.
    pub domain: String,
    /// Mailbox the gateway posts as (`From` domain, `Sender` header)
    pub gate_email: String,
    /// Client-only mode: subscription changes touch only the local list and
    /// never issue newsgroup create/remove commands to the server
    pub client_mode: bool,
    /// Per-phase wall clock budget in seconds; a stuck phase is abandoned
    pub phase_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            name: "ftn-gate".to_string(),
            origin_line: "ftn-gate".to_string(),
            sysop: "Sysop".to_string(),
            domain: "ftngate.local".to_string(),
            gate_email: "gate@ftngate.local".to_string(),
            client_mode: false,
            phase_timeout_secs: 600,
        }
    }
}

/// FidoNet side: addresses and passwords
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FidonetSection {
    /// Our own FidoNet address
    pub gateway_address: FidoAddress,
    /// The uplink all outbound packets are addressed to
    pub linked_address: FidoAddress,
    /// Packet password, at most 8 characters
    #[serde(default)]
    pub packet_password: String,
    /// Per-link areafix password carried in the request subject line
    #[serde(default)]
    pub areafix_password: String,
}

/// News server connection parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NntpConfig {
    /// Server hostname
    pub host: String,
    /// Server port (typically 119 plain, 563 TLS)
    #[serde(default = "default_nntp_port")]
    pub port: u16,
    /// Username for AUTHINFO; empty disables authentication
    #[serde(default)]
    pub username: String,
    /// Password for AUTHINFO
    #[serde(default)]
    pub password: String,
    /// Use TLS for the connection
    #[serde(default)]
    pub use_tls: bool,
    /// Per-operation socket timeout in seconds
    #[serde(default = "default_nntp_timeout")]
    pub timeout_secs: u64,
}

fn default_nntp_port() -> u16 {
    119
}

fn default_nntp_timeout() -> u64 {
    30
}

/// Directory and file layout
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    /// Inbound packet directory; processed/ and bad/ live underneath
    pub inbound_dir: PathBuf,
    /// Outbound packet directory
    pub outbound_dir: PathBuf,
    /// Subscription/watermark list file (`newsgroup: low-high` per line)
    pub areas_file: PathBuf,
    /// Hold store root; pending/, approved/, rejected/, backup/ underneath
    pub hold_dir: PathBuf,
    /// Run lock file
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("ftngate.lock")
}

/// Spam filter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpamSection {
    /// Master switch; disabled means every message passes
    pub enabled: bool,
    /// Cross-post ceiling: a message targeting more groups is blocked
    pub max_crosspost: usize,
    /// Article cap for the first fetch from a newly subscribed group
    pub initial_fetch: u64,
    /// Article cap per group per export run
    pub fetch_limit: u64,
    /// User pattern rules, applied case-insensitively to the named header
    pub patterns: Vec<PatternRule>,
}

impl Default for SpamSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_crosspost: 5,
            initial_fetch: 50,
            fetch_limit: 100,
            patterns: Vec::new(),
        }
    }
}

/// One user-supplied filter rule: a regex applied to a header value
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternRule {
    /// Header name the pattern applies to (e.g. "Subject", "From", "Path")
    pub header: String,
    /// Regular expression; a malformed pattern is skipped with a warning
    pub pattern: String,
}

/// Areafix protection limits and reply footer
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AreafixSection {
    /// Ceiling on subscribe/unsubscribe commands per request
    pub max_areas_per_request: usize,
    /// Optional footer appended to every areafix reply
    pub footer: Option<String>,
}

impl Default for AreafixSection {
    fn default() -> Self {
        Self {
            max_areas_per_request: 100,
            footer: None,
        }
    }
}

/// Hold-for-review policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HoldSection {
    /// Global hold switch; remapped areas without their own override use it
    pub enabled: bool,
    /// Send netmail notifications about newly held messages to the sysop
    pub notify_sysop: bool,
    /// Days resolved records and backups are kept before maintenance expiry
    pub retention_days: u32,
}

impl Default for HoldSection {
    fn default() -> Self {
        Self {
            enabled: false,
            notify_sysop: false,
            retention_days: 30,
        }
    }
}

/// Explicit area tag <-> newsgroup mapping, optionally with a hold override
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AreaRemap {
    /// FidoNet area tag
    pub area: String,
    /// Newsgroup name
    pub newsgroup: String,
    /// Per-area override of the global hold policy
    #[serde(default)]
    pub hold: Option<bool>,
}

impl GateConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GateError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: GateConfig = toml::from_str(&text)
            .map_err(|e| GateError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// One-shot validation; called from [`GateConfig::load`] and the check phase
    pub fn validate(&self) -> Result<()> {
        if self.nntp.host.is_empty() {
            return Err(GateError::Config("nntp.host is not set".to_string()));
        }
        if self.gateway.domain.is_empty() || self.gateway.domain.contains(':') {
            return Err(GateError::Config(
                "gateway.domain must be a textual domain, not an IP literal".to_string(),
            ));
        }
        if self.fidonet.packet_password.len() > 8 {
            return Err(GateError::Config(
                "fidonet.packet_password exceeds 8 characters".to_string(),
            ));
        }
        for remap in &self.remap {
            if remap.area.is_empty() || remap.newsgroup.is_empty() {
                return Err(GateError::Config(
                    "remap entries need both area and newsgroup".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Full origin line with the gateway address appended
    pub fn origin_text(&self) -> String {
        format!(
            "{} ({})",
            self.gateway.origin_line, self.fidonet.gateway_address
        )
    }
}
