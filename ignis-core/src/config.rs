use std::collections::HashMap;

use serde_json::json;

use crate::error::IgnisError;

/// Conventional prefix for framework-recognized environment keys.
pub const ENV_PREFIX: &str = "APP_ENV_";

/// Build a recognized environment key name from its suffix.
pub fn env_key(suffix: &str) -> String {
    format!("{ENV_PREFIX}{}", suffix.to_ascii_uppercase())
}

/// A single recognized environment key.
#[derive(Debug, Clone)]
pub struct EnvKey {
    pub name: String,
    pub required: bool,
    pub default: Option<String>,
}

/// Registry of recognized environment keys, validated at boot.
#[derive(Debug, Clone, Default)]
pub struct EnvSpec {
    keys: Vec<EnvKey>,
}

impl EnvSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.keys.push(EnvKey {
            name: name.into(),
            required: true,
            default: None,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, default: Option<&str>) -> Self {
        self.keys.push(EnvKey {
            name: name.into(),
            required: false,
            default: default.map(str::to_string),
        });
        self
    }

    pub fn keys(&self) -> &[EnvKey] {
        &self.keys
    }
}

/// Validated snapshot of the recognized environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    values: HashMap<String, String>,
}

impl Environment {
    /// Load `.env` (if present) plus the process environment, then validate
    /// the recognized keys. Missing required keys fail fast with
    /// `kind=config-invalid`, listing every missing key.
    pub fn load(spec: &EnvSpec) -> Result<Self, IgnisError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(spec, |name| std::env::var(name).ok())
    }

    /// Validate against an explicit lookup function. Used by tests and by
    /// adapters that source configuration from elsewhere.
    pub fn from_lookup(
        spec: &EnvSpec,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, IgnisError> {
        let mut values = HashMap::new();
        let mut missing = Vec::new();

        for key in spec.keys() {
            match lookup(&key.name).or_else(|| key.default.clone()) {
                Some(value) => {
                    values.insert(key.name.clone(), value);
                }
                None if key.required => missing.push(key.name.clone()),
                None => {}
            }
        }

        if missing.is_empty() {
            Ok(Self { values })
        } else {
            Err(
                IgnisError::config_invalid(format!(
                    "Missing required environment keys: {}",
                    missing.join(", ")
                ))
                .with_details(json!({ "missing": missing })),
            )
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn get_or(&self, name: &str, fallback: &str) -> String {
        self.get(name).unwrap_or(fallback).to_string()
    }
}
