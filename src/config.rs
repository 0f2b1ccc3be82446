//!
//! vaultgate configuration
//! -----------------------
//! Settings come from `VAULTGATE_*` environment variables, optionally
//! overridden by command-line flags. Unparseable values fall back to defaults
//! with a warning.

use std::env;

use tracing::warn;

pub const DEFAULT_HTTP_PORT: u16 = 7979;
pub const DEFAULT_SESSION_COOKIE: &str = "vaultgate_session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub bind: String,
    pub http_port: u16,
    pub session_cookie: String,
    pub secure_cookie: bool,
    /// Path parameter naming the access grant on grant-scoped routes.
    pub grant_param: String,
    /// Path parameter naming the vault resource URL.
    pub resource_param: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            secure_cookie: true,
            grant_param: "grant".to_string(),
            resource_param: "resource".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self { Self::from_lookup(|k| env::var(k).ok()) }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = non_empty(lookup("VAULTGATE_BIND")) { cfg.bind = v; }
        if let Some(v) = lookup("VAULTGATE_HTTP_PORT") {
            match v.parse::<u16>() {
                Ok(p) => cfg.http_port = p,
                Err(_) => warn!(target: "startup", value = %v, "ignoring invalid VAULTGATE_HTTP_PORT"),
            }
        }
        if let Some(v) = non_empty(lookup("VAULTGATE_SESSION_COOKIE")) { cfg.session_cookie = v; }
        if let Some(v) = lookup("VAULTGATE_SECURE_COOKIE") {
            match parse_bool(&v) {
                Some(b) => cfg.secure_cookie = b,
                None => warn!(target: "startup", value = %v, "ignoring invalid VAULTGATE_SECURE_COOKIE"),
            }
        }
        if let Some(v) = non_empty(lookup("VAULTGATE_GRANT_PARAM")) { cfg.grant_param = v; }
        if let Some(v) = non_empty(lookup("VAULTGATE_RESOURCE_PARAM")) { cfg.resource_param = v; }
        cfg
    }

    /// Apply `--port <n>`, `--bind <addr>` and `--insecure-cookie`.
    pub fn apply_args(mut self, args: &[String]) -> Self {
        if let Some(p) = parse_port_arg(args, "--port") { self.http_port = p; }
        if let Some(b) = arg_value(args, "--bind") { self.bind = b; }
        if has_flag(args, "--insecure-cookie") { self.secure_cookie = false; }
        self
    }

    pub fn listen_addr(&self) -> String { format!("{}:{}", self.bind, self.http_port) }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    arg_value(args, flag).and_then(|v| v.parse::<u16>().ok())
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
