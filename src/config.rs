use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

const SETTINGS_FILE_NAME: &str = "settings.json";
const ATTRIBUTION_FILE_NAME: &str = "attribution.csv";

/// Scalar settings loaded from `settings.json`. Every field is required;
/// a missing key fails the load outright.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Length of one pay period in days.
    pub period_days: u32,
    /// Name of the partition duplicated to realize a new period.
    pub template_partition: String,
    /// Full cost factor applied to the entered half of a split, e.g. 1.0875.
    pub tax_multiplier: f64,
    /// Address whose mail is a forwarded copy needing origin resolution.
    /// Empty disables forward handling.
    pub forwarding_relay: String,
    /// Label used when a forwarded message's destination has no entry in
    /// the attribution map.
    pub default_attribution: String,
    /// Query handed to the mail store when selecting threads.
    pub search_query: String,
    /// First row of the transaction window inside each partition.
    pub window_start_row: usize,
    /// Number of rows in the transaction window.
    pub window_rows: usize,
    /// Column of the date cell; counterparty and cost follow contiguously.
    pub date_col: usize,
    /// Offset from the counterparty column to the category column.
    pub meta_offset: usize,
    /// Column holding the split trigger checkbox.
    pub checkbox_col: usize,
}

impl Settings {
    pub fn name_col(&self) -> usize {
        self.date_col + 1
    }

    pub fn cost_col(&self) -> usize {
        self.date_col + 2
    }

    pub fn category_col(&self) -> usize {
        self.name_col() + self.meta_offset
    }

    pub fn type_col(&self) -> usize {
        self.category_col() + 1
    }

    pub fn window_end_row(&self) -> usize {
        self.window_start_row + self.window_rows - 1
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    /// Forwarding destination address -> human label for attribution.
    pub attribution: HashMap<String, String>,
}

impl Config {
    /// Loads `settings.json` plus the optional `attribution.csv` from one
    /// directory. Lifecycle is one run; nothing is cached across calls.
    pub fn load(dir: &Path) -> Result<Config> {
        let settings_path = dir.join(SETTINGS_FILE_NAME);
        let raw = fs::read_to_string(&settings_path)
            .map_err(|e| Error::Config(format!("read {}: {e}", settings_path.display())))?;
        let settings: Settings = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parse {}: {e}", settings_path.display())))?;
        validate(&settings)?;
        let attribution = load_attribution(&dir.join(ATTRIBUTION_FILE_NAME));
        Ok(Config {
            settings,
            attribution,
        })
    }

    pub fn attribution_label(&self, destination: &str) -> &str {
        self.attribution
            .get(&destination.trim().to_lowercase())
            .map(String::as_str)
            .unwrap_or(self.settings.default_attribution.as_str())
    }
}

fn validate(settings: &Settings) -> Result<()> {
    if settings.period_days == 0 {
        return Err(Error::Config("period_days must be positive".to_string()));
    }
    if settings.window_rows == 0 {
        return Err(Error::Config("window_rows must be positive".to_string()));
    }
    // category/type must not collide with the cost column
    if settings.meta_offset < 2 {
        return Err(Error::Config("meta_offset must be at least 2".to_string()));
    }
    if settings.tax_multiplier <= 0.0 {
        return Err(Error::Config("tax_multiplier must be positive".to_string()));
    }
    Ok(())
}

fn load_attribution(path: &Path) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Ok(mut rdr) = csv::Reader::from_path(path) else {
        return out;
    };
    for row in rdr.deserialize::<HashMap<String, String>>().flatten() {
        let address = row
            .get("address")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default();
        let label = row
            .get("label")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if address.is_empty() || label.is_empty() {
            continue;
        }
        out.insert(address, label);
    }
    out
}
