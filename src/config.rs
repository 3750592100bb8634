#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::extractor::{DEFAULT_YTDLP_BIN, EngineConfig};
use crate::metadata::DEFAULT_METADATA_FILE;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_STATIC_ROOT: &str = "static";
pub const VIDEOS_SUBDIR: &str = "videos";
pub const DEFAULT_TUBEGRAB_PORT: u16 = 8000;
pub const DEFAULT_TUBEGRAB_HOST: &str = "127.0.0.1";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub static_root: PathBuf,
    pub metadata_file: PathBuf,
    pub tubegrab_port: u16,
    pub tubegrab_host: String,
    pub proxy: Option<String>,
    pub ytdlp_bin: PathBuf,
    pub max_concurrent_downloads: usize,
    pub verbose_engine: bool,
}

impl RuntimeSettings {
    /// Downloads live one directory per record below this folder.
    pub fn videos_root(&self) -> PathBuf {
        self.static_root.join(VIDEOS_SUBDIR)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            program: self.ytdlp_bin.clone(),
            proxy: self.proxy.clone(),
            verbose: self.verbose_engine,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub static_root: Option<PathBuf>,
    pub metadata_file: Option<PathBuf>,
    pub tubegrab_port: Option<u16>,
    pub tubegrab_host: Option<String>,
    pub proxy: Option<String>,
    pub ytdlp_bin: Option<PathBuf>,
    pub max_concurrent_downloads: Option<usize>,
    pub verbose_engine: Option<bool>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_runtime_settings_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeSettings {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let static_root = overrides
        .static_root
        .or_else(|| lookup_value("STATIC_ROOT", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_ROOT));
    let metadata_file = overrides
        .metadata_file
        .or_else(|| lookup_value("METADATA_FILE", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_METADATA_FILE));
    let tubegrab_port = overrides
        .tubegrab_port
        .or_else(|| {
            lookup_value("TUBEGRAB_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_TUBEGRAB_PORT);
    let tubegrab_host = overrides
        .tubegrab_host
        .and_then(non_blank)
        .or_else(|| lookup_value("TUBEGRAB_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TUBEGRAB_HOST.to_string());
    let proxy = overrides
        .proxy
        .or_else(|| lookup_value("TUBEGRAB_PROXY", file_vars, &env_lookup))
        .and_then(normalize_proxy);
    let ytdlp_bin = overrides
        .ytdlp_bin
        .or_else(|| lookup_value("YTDLP_BIN", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));
    let max_concurrent_downloads = overrides
        .max_concurrent_downloads
        .or_else(|| {
            lookup_value("MAX_CONCURRENT_DOWNLOADS", file_vars, &env_lookup)
                .and_then(|value| value.parse::<usize>().ok())
        })
        .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS)
        .max(1);
    let verbose_engine = overrides
        .verbose_engine
        .or_else(|| {
            lookup_value("YTDLP_VERBOSE", file_vars, &env_lookup)
                .and_then(|value| parse_flag(&value))
        })
        .unwrap_or(false);

    RuntimeSettings {
        static_root,
        metadata_file,
        tubegrab_port,
        tubegrab_host,
        proxy,
        ytdlp_bin,
        max_concurrent_downloads,
        verbose_engine,
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `none`, `off` and blank all mean "connect directly".
fn normalize_proxy(value: String) -> Option<String> {
    let value = non_blank(value)?;
    match value.to_ascii_lowercase().as_str() {
        "none" | "off" | "disabled" => None,
        _ => Some(value),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
