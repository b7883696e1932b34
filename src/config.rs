//! Client configuration loading (§4.11, §6.3). A plain struct with
//! built-in defaults, overlaid in place by successively more authoritative
//! sources. Here the sources are, least to most authoritative: built-in
//! defaults, the parsed config file, an optional display-derived override,
//! then environment variables.

use std::collections::HashMap;
use std::env;
use std::io::Read;
use std::path::Path;

/// Length in bytes of the authentication cookie (matches the reference
/// implementation's 256-bit cookie).
pub const COOKIE_LENGTH: usize = 32;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub default_server: Option<String>,
    pub autospawn: bool,
    pub daemon_binary: String,
    pub extra_arguments: String,
    pub cookie: [u8; COOKIE_LENGTH],
    pub cookie_valid: bool,
    pub disable_shm: bool,
    pub shm_size: usize,
    pub auto_connect_localhost: bool,
    pub auto_connect_display: bool,
    pub legacy_runtime_dirs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            default_server: None,
            autospawn: true,
            daemon_binary: "pulseaudio".to_owned(),
            extra_arguments: "--log-target=syslog".to_owned(),
            cookie: [0u8; COOKIE_LENGTH],
            cookie_valid: false,
            disable_shm: false,
            shm_size: 0,
            auto_connect_localhost: false,
            auto_connect_display: false,
            legacy_runtime_dirs: cfg!(target_os = "linux"),
        }
    }
}

/// A desktop-display-derived property source (X11 root window properties
/// in the reference implementation). Out of scope for this core, which
/// only consumes it through this trait so it never links a display client
/// directly; `()` is a no-op implementation for builds without one.
pub trait DisplayPropertySource {
    fn apply(&self, config: &mut ClientConfig);
}

impl DisplayPropertySource for () {
    fn apply(&self, _config: &mut ClientConfig) {}
}

impl ClientConfig {
    pub fn enable_shm(&self) -> bool {
        !self.disable_shm
    }

    /// Load from `path` (if it exists), then `display_source`, then the
    /// environment. Never fails: a missing or malformed file just leaves
    /// the defaults in place, matching the reference loader's forgiving
    /// posture toward optional configuration.
    pub fn load(path: Option<&Path>, display_source: &dyn DisplayPropertySource) -> ClientConfig {
        let mut config = ClientConfig::default();
        if let Some(path) = path {
            if let Ok(mut file) = std::fs::File::open(path) {
                let mut contents = String::new();
                if file.read_to_string(&mut contents).is_ok() {
                    config.apply_file(&contents);
                }
            }
        }
        display_source.apply(&mut config);
        config.apply_env();
        config
    }

    /// Parse PulseAudio's `client.conf` format: `; `/`#` line comments,
    /// blank lines ignored, an optional `[section]` header ignored (there
    /// is only ever one implicit section), `key = value` pairs. Unknown
    /// keys are skipped, not an error (forward compatibility).
    pub fn apply_file(&mut self, contents: &str) {
        let pairs = parse_key_value_lines(contents);
        for (key, value) in pairs {
            self.apply_one(&key, &value);
        }
    }

    fn apply_one(&mut self, key: &str, value: &str) {
        match key {
            "default-server" => self.default_server = Some(value.to_owned()),
            "autospawn" => self.autospawn = parse_bool(value, self.autospawn),
            "daemon-binary" => self.daemon_binary = value.to_owned(),
            "extra-arguments" => self.extra_arguments = value.to_owned(),
            "cookie-valid" => self.cookie_valid = parse_bool(value, self.cookie_valid),
            "disable-shm" => self.disable_shm = parse_bool(value, self.disable_shm),
            "shm-size-bytes" => {
                if let Ok(n) = value.parse() {
                    self.shm_size = n;
                }
            }
            "auto-connect-localhost" => {
                self.auto_connect_localhost = parse_bool(value, self.auto_connect_localhost)
            }
            "auto-connect-display" => {
                self.auto_connect_display = parse_bool(value, self.auto_connect_display)
            }
            _ => { /* forward-compatible: unrecognised keys are skipped */ }
        }
    }

    /// Overlay `PULSE_SERVER`/`PULSE_COOKIE` style environment variables,
    /// the most authoritative source (§4.11).
    pub fn apply_env(&mut self) {
        if let Ok(server) = env::var("PULSE_SERVER") {
            if !server.is_empty() {
                self.default_server = Some(server);
            }
        }
        if let Ok(cookie_path) = env::var("PULSE_COOKIE") {
            if let Ok(bytes) = std::fs::read(&cookie_path) {
                self.load_cookie_bytes(&bytes);
            }
        }
    }

    pub fn load_cookie_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() >= COOKIE_LENGTH {
            self.cookie.copy_from_slice(&bytes[..COOKIE_LENGTH]);
            self.cookie_valid = true;
        }
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_key_value_lines(contents: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            continue;
        }
        if let Some(eq) = line.find('=') {
            let key = line[..eq].trim().to_owned();
            let value = line[eq + 1..].trim().to_owned();
            if !key.is_empty() {
                out.insert(key, value);
            }
        }
    }
    out
}
