//! Named options for solvers and preconditioners.
//!
//! `OptionsDb` is a flat map from option names (`ksp_rtol`, `pc_type`, ...)
//! to string values with typed getters. Every object that reads options
//! takes a prefix, so `mg_levels_1_ksp_max_it` configures only the
//! smoother of multigrid level 1. The typed configuration structs
//! (`Tolerances`, `GmresConfig`, `SorConfig`, `MgConfig`) are the validated
//! form of what is read here.

use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::KError;

#[derive(Debug, Clone, Default)]
pub struct OptionsDb {
    values: BTreeMap<String, String>,
}

impl OptionsDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect `(name, value)` pairs. A leading `-` on names is dropped.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Display,
    {
        let mut db = Self::new();
        for (k, v) in pairs {
            db.set(k.as_ref(), v);
        }
        db
    }

    pub fn set(&mut self, name: &str, value: impl Display) -> &mut Self {
        self.values.insert(name.trim_start_matches('-').to_string(), value.to_string());
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn get_real(&self, name: &str, default: f64) -> Result<f64, KError> {
        match self.get_str(name) {
            None => Ok(default),
            Some(s) => s
                .trim()
                .parse()
                .map_err(|_| KError::InvalidArgument(format!("option {name}: '{s}' is not a real number"))),
        }
    }

    pub fn get_int(&self, name: &str, default: usize) -> Result<usize, KError> {
        match self.get_str(name) {
            None => Ok(default),
            Some(s) => s
                .trim()
                .parse()
                .map_err(|_| KError::InvalidArgument(format!("option {name}: '{s}' is not a count"))),
        }
    }

    /// A present option with an empty value counts as `true`.
    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool, KError> {
        match self.get_str(name).map(|s| s.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(s) => match s.as_str() {
                "" | "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(KError::InvalidArgument(format!("option {name}: '{s}' is not a boolean"))),
            },
        }
    }
}
