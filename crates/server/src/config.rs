use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use mama_contracts::DottedName;
use mama_store::PgStoreOptions;

const DEFAULT_PORT: u16 = 4567;
const DEFAULT_RESPONSE_FIELD: &str = "dc.identifier.uri";

#[derive(Clone)]
pub struct MamaConfig {
    pub bind_addr: SocketAddr,
    pub db_url: String,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_read_only: bool,
    pub db_max_connections: u32,
    pub db_acquire_timeout_ms: u64,
    pub db_query_timeout_ms: u64,
    pub db_metrics: bool,
    pub shutdown_key: Option<String>,
    pub default_field: DottedName,
}

impl std::fmt::Debug for MamaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MamaConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_url", &self.db_url)
            .field("db_user", &self.db_user)
            .field("db_password", &self.db_password.as_ref().map(|_| "<redacted>"))
            .field("db_read_only", &self.db_read_only)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_acquire_timeout_ms", &self.db_acquire_timeout_ms)
            .field("db_query_timeout_ms", &self.db_query_timeout_ms)
            .field("db_metrics", &self.db_metrics)
            .field("shutdown_key", &self.shutdown_key.as_ref().map(|_| "<redacted>"))
            .field("default_field", &self.default_field)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl MamaConfig {
    pub fn load() -> Result<Self, StartupError> {
        let args = std::env::args().skip(1).collect::<Vec<_>>();
        Self::load_with_args(&args)
    }

    /// Env file, then process environment, then positional
    /// `<db_url> <user> <password>` arguments.
    pub fn load_with_args(args: &[String]) -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("MAMA_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());
        apply_positional_args(&mut merged, args)?;

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let mut bind_addr = parse_socket_addr(
            kv.get("MAMA_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            "MAMA_BIND_ADDR",
        )?;
        if let Some(port) = parse_port(kv.get("MAMA_SVC_PORT"))? {
            bind_addr.set_port(port);
        }

        let db_url = require_nonempty(kv, "MAMA_DB_URL")?;
        let db_user = optional_nonempty(kv, "MAMA_DB_USER");
        let db_password = optional_nonempty(kv, "MAMA_DB_PASSWD");

        let db_read_only = match kv.get("MAMA_DB_READ_ONLY").map(|v| v.trim()) {
            None | Some("") => true,
            Some(raw) => parse_bool(Some(raw)).ok_or_else(|| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "MAMA_DB_READ_ONLY must be a boolean".to_string(),
            })?,
        };

        let db_max_connections = parse_u32(
            kv.get("MAMA_DB_MAX_CONNECTIONS"),
            8,
            "MAMA_DB_MAX_CONNECTIONS",
        )?;
        if db_max_connections == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "MAMA_DB_MAX_CONNECTIONS must be >= 1".to_string(),
            });
        }

        let db_acquire_timeout_ms = parse_u64(
            kv.get("MAMA_DB_ACQUIRE_TIMEOUT_MS"),
            2000,
            "MAMA_DB_ACQUIRE_TIMEOUT_MS",
        )?;
        let db_query_timeout_ms = parse_u64(
            kv.get("MAMA_DB_QUERY_TIMEOUT_MS"),
            5000,
            "MAMA_DB_QUERY_TIMEOUT_MS",
        )?;

        // Presence switches store timing on; only an explicit false turns it off.
        let db_metrics = kv
            .get("MAMA_DB_METRICS")
            .map(|v| v.trim())
            .is_some_and(|v| parse_bool(Some(v)) != Some(false));

        let shutdown_key = optional_nonempty(kv, "MAMA_SHUTDOWN_KEY");

        let default_field = DottedName::new(
            kv.get("MAMA_DEFAULT_FIELD")
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_RESPONSE_FIELD),
        );
        if default_field.path().is_none() {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "MAMA_DEFAULT_FIELD must be schema.element[.qualifier]".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            db_url,
            db_user,
            db_password,
            db_read_only,
            db_max_connections,
            db_acquire_timeout_ms,
            db_query_timeout_ms,
            db_metrics,
            shutdown_key,
            default_field,
        })
    }

    pub fn store_options(&self) -> PgStoreOptions {
        PgStoreOptions {
            db_url: self.db_url.clone(),
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            read_only: self.db_read_only,
            max_connections: self.db_max_connections,
            acquire_timeout: Duration::from_millis(self.db_acquire_timeout_ms),
            query_timeout: Duration::from_millis(self.db_query_timeout_ms),
        }
    }
}

fn apply_positional_args(
    kv: &mut HashMap<String, String>,
    args: &[String],
) -> Result<(), StartupError> {
    match args {
        [] => Ok(()),
        [db_url, user, password] => {
            kv.insert("MAMA_DB_URL".to_string(), db_url.clone());
            kv.insert("MAMA_DB_USER".to_string(), user.clone());
            kv.insert("MAMA_DB_PASSWD".to_string(), password.clone());
            Ok(())
        }
        _ => Err(StartupError {
            code: "ERR_INVALID_ARGS",
            message: "usage: mama [<db_url> <user> <password>]".to_string(),
        }),
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    parse_env_contents(&contents)
}

fn parse_env_contents(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    optional_nonempty(kv, key).ok_or_else(|| StartupError {
        code: "ERR_MISSING_CONFIG",
        message: format!("missing required config key {}", key),
    })
}

fn optional_nonempty(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value.map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(v) => v.parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_port(value: Option<&String>) -> Result<Option<u16>, StartupError> {
    match value.map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(v) => v.parse::<u16>().map(Some).map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "MAMA_SVC_PORT must be a port number".to_string(),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_bool(value: Option<&str>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}
