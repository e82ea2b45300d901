use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Extension ids accepted on `/extension` when the config/CLI doesn't add any of its own.
/// One production id plus development ids, fixed at build time per the Auth & Origin Gate's
/// "must never wildcard silently" requirement.
pub const DEFAULT_EXTENSION_IDS: &[&str] = &[
    "jfeammnjpkecdekppnclgkkffahnhfhe", // production
    "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", // development (unpacked, default key)
];

const DEFAULT_PORT: u16 = 19988;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_LONG_COMMAND_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_CLIENT_QUEUE_BYTES: usize = 1_048_576;
const DEFAULT_MAX_CLIENT_QUEUE_FRAMES: usize = 1_000;

/// Default config file template with comments, used by `init-config`.
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# cdp-relay configuration file
# See: https://github.com/Nunley-Media-Group/cdp-relay

[server]
# host = "127.0.0.1"
# port = 19988
# token = "change-me"        # uncomment to require ?token= on /cdp

# extensionIds = ["jfeammnjpkecdekppnclgkkffahnhfhe"]

[timing]
# pingIntervalMs = 30000
# commandTimeoutMs = 30000
# longCommandTimeoutMs = 60000

[limits]
# maxClientQueueBytes = 1048576
# maxClientQueueFrames = 1000
"#;

// ---------------------------------------------------------------------------
// Config structs (parsed from TOML). All fields optional; CLI/env override.
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerConfig,
    pub timing: TimingConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub token: Option<String>,
    #[serde(rename = "extensionIds")]
    pub extension_ids: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    #[serde(rename = "pingIntervalMs")]
    pub ping_interval_ms: Option<u64>,
    #[serde(rename = "commandTimeoutMs")]
    pub command_timeout_ms: Option<u64>,
    #[serde(rename = "longCommandTimeoutMs")]
    pub long_command_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    #[serde(rename = "maxClientQueueBytes")]
    pub max_client_queue_bytes: Option<usize>,
    #[serde(rename = "maxClientQueueFrames")]
    pub max_client_queue_frames: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved config (all defaults filled in, CLI/env applied)
// ---------------------------------------------------------------------------

/// Fully resolved configuration with every value defaulted and validated.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub config_path: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub token: Option<String>,
    pub extension_ids: Vec<String>,
    pub ping_interval_ms: u64,
    pub command_timeout_ms: u64,
    pub long_command_timeout_ms: u64,
    pub max_client_queue_bytes: usize,
    pub max_client_queue_frames: usize,
}

/// CLI/env overrides layered on top of a loaded [`ConfigFile`]. Every field is `None` unless the
/// user actually passed the corresponding flag or set the corresponding environment variable —
/// precedence is CLI flag > env var > config file > built-in default, applied in
/// [`resolve_config`].
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub token: Option<String>,
    pub extension_ids: Vec<String>,
    pub ping_interval_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub max_client_queue_bytes: Option<usize>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    AlreadyExists(PathBuf),
    NoConfigDir,
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config file error: {e}"),
            Self::AlreadyExists(p) => write!(f, "config file already exists: {}", p.display()),
            Self::NoConfigDir => write!(f, "could not determine config directory"),
            Self::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::config(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Config file search
// ---------------------------------------------------------------------------

/// Search order: `--config` path, `$CDP_RELAY_CONFIG`, `./relay.toml`, platform config dir.
#[must_use]
pub fn find_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
    find_config_file_with(explicit_path, std::env::var("CDP_RELAY_CONFIG").ok())
}

#[must_use]
pub fn find_config_file_with(
    explicit_path: Option<&Path>,
    env_config: Option<String>,
) -> Option<PathBuf> {
    if let Some(p) = explicit_path
        && p.exists()
    {
        return Some(p.to_path_buf());
    }

    if let Some(env_path) = env_config {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Some(p);
        }
    }

    let local = PathBuf::from("relay.toml");
    if local.exists() {
        return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("cdp-relay").join("relay.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

#[must_use]
pub fn load_config(explicit_path: Option<&Path>) -> (Option<PathBuf>, ConfigFile) {
    let path = find_config_file(explicit_path);
    match &path {
        Some(p) => {
            let config = load_config_from(p);
            (path, config)
        }
        None => (None, ConfigFile::default()),
    }
}

#[must_use]
pub fn load_config_from(path: &Path) -> ConfigFile {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "warning: could not read config file {}: {e}",
                path.display()
            );
            return ConfigFile::default();
        }
    };

    parse_config(&contents, path)
}

/// Two-pass strategy: strict first (to detect unknown keys), lenient on strict failure.
#[must_use]
pub fn parse_config(contents: &str, path: &Path) -> ConfigFile {
    match toml::from_str::<StrictConfigFile>(contents) {
        Ok(strict) => strict.into(),
        Err(strict_err) => match toml::from_str::<ConfigFile>(contents) {
            Ok(config) => {
                eprintln!(
                    "warning: unknown keys in config file {}: {strict_err}",
                    path.display()
                );
                config
            }
            Err(parse_err) => {
                eprintln!(
                    "warning: could not parse config file {}: {parse_err}",
                    path.display()
                );
                ConfigFile::default()
            }
        },
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictConfigFile {
    #[serde(default)]
    server: StrictServerConfig,
    #[serde(default)]
    timing: StrictTimingConfig,
    #[serde(default)]
    limits: StrictLimitsConfig,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictServerConfig {
    host: Option<String>,
    port: Option<u16>,
    token: Option<String>,
    #[serde(rename = "extensionIds")]
    extension_ids: Option<Vec<String>>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictTimingConfig {
    #[serde(rename = "pingIntervalMs")]
    ping_interval_ms: Option<u64>,
    #[serde(rename = "commandTimeoutMs")]
    command_timeout_ms: Option<u64>,
    #[serde(rename = "longCommandTimeoutMs")]
    long_command_timeout_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictLimitsConfig {
    #[serde(rename = "maxClientQueueBytes")]
    max_client_queue_bytes: Option<usize>,
    #[serde(rename = "maxClientQueueFrames")]
    max_client_queue_frames: Option<usize>,
}

impl From<StrictConfigFile> for ConfigFile {
    fn from(s: StrictConfigFile) -> Self {
        Self {
            server: ServerConfig {
                host: s.server.host,
                port: s.server.port,
                token: s.server.token,
                extension_ids: s.server.extension_ids,
            },
            timing: TimingConfig {
                ping_interval_ms: s.timing.ping_interval_ms,
                command_timeout_ms: s.timing.command_timeout_ms,
                long_command_timeout_ms: s.timing.long_command_timeout_ms,
            },
            limits: LimitsConfig {
                max_client_queue_bytes: s.limits.max_client_queue_bytes,
                max_client_queue_frames: s.limits.max_client_queue_frames,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------------

/// Resolve a config file plus CLI/env [`Overrides`] into a fully-populated, validated
/// [`ResolvedConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the resolved port is `0`, or if the resolved
/// extension-id allowlist is empty.
pub fn resolve_config(
    file: &ConfigFile,
    overrides: &Overrides,
    config_path: Option<PathBuf>,
) -> Result<ResolvedConfig, ConfigError> {
    let port = overrides
        .port
        .or(file.server.port)
        .unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(ConfigError::Invalid(
            "port must be between 1 and 65535".to_string(),
        ));
    }

    let host = overrides
        .host
        .clone()
        .or_else(|| file.server.host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let token = overrides.token.clone().or_else(|| file.server.token.clone());

    let mut extension_ids = overrides.extension_ids.clone();
    extension_ids.extend(file.server.extension_ids.clone().unwrap_or_default());
    if extension_ids.is_empty() {
        extension_ids.extend(DEFAULT_EXTENSION_IDS.iter().map(|s| (*s).to_string()));
    }
    if extension_ids.is_empty() {
        return Err(ConfigError::Invalid(
            "extension-id allowlist must not be empty".to_string(),
        ));
    }

    let ping_interval_ms = overrides
        .ping_interval_ms
        .or(file.timing.ping_interval_ms)
        .unwrap_or(DEFAULT_PING_INTERVAL_MS);
    let command_timeout_ms = overrides
        .command_timeout_ms
        .or(file.timing.command_timeout_ms)
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS);
    let long_command_timeout_ms = file
        .timing
        .long_command_timeout_ms
        .unwrap_or(DEFAULT_LONG_COMMAND_TIMEOUT_MS);

    if ping_interval_ms == 0 || command_timeout_ms == 0 || long_command_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "timing values must be positive".to_string(),
        ));
    }

    let max_client_queue_bytes = overrides
        .max_client_queue_bytes
        .or(file.limits.max_client_queue_bytes)
        .unwrap_or(DEFAULT_MAX_CLIENT_QUEUE_BYTES);
    let max_client_queue_frames = file
        .limits
        .max_client_queue_frames
        .unwrap_or(DEFAULT_MAX_CLIENT_QUEUE_FRAMES);

    Ok(ResolvedConfig {
        config_path,
        host,
        port,
        token,
        extension_ids,
        ping_interval_ms,
        command_timeout_ms,
        long_command_timeout_ms,
        max_client_queue_bytes,
        max_client_queue_frames,
    })
}

/// A fully-defaulted [`ResolvedConfig`] for unit tests elsewhere in the crate that need one but
/// aren't exercising config resolution itself.
#[cfg(test)]
pub fn default_resolved_config_for_test() -> ResolvedConfig {
    resolve_config(&ConfigFile::default(), &Overrides::default(), None)
        .expect("built-in defaults are always valid")
}

// ---------------------------------------------------------------------------
// Config init
// ---------------------------------------------------------------------------

/// Default path for `init-config`: `<config_dir>/cdp-relay/relay.toml`.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] if the platform config directory cannot be determined.
pub fn default_init_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|d| d.join("cdp-relay").join("relay.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// # Errors
///
/// - [`ConfigError::AlreadyExists`] if the file already exists
/// - [`ConfigError::Io`] on I/O failure
/// - [`ConfigError::NoConfigDir`] if no target path and platform config dir unknown
pub fn init_config(target_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match target_path {
        Some(p) => p.to_path_buf(),
        None => default_init_path()?,
    };

    init_config_to(&path)
}

/// # Errors
///
/// - [`ConfigError::AlreadyExists`] if the file already exists
/// - [`ConfigError::Io`] on I/O failure
pub fn init_config_to(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
