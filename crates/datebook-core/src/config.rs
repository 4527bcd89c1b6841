use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Weekday;
use tracing::{debug, info, trace, warn};

const CATEGORY_COLOR_PREFIX: &str = "color.category.";

#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Config {
    #[tracing::instrument(skip(rc_override))]
    pub fn load(rc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config {
            map: HashMap::new(),
            loaded_files: vec![],
        };

        cfg.map.insert(
            "data.location".to_string(),
            "~/.datebook".to_string(),
        );
        cfg.map
            .insert("default.command".to_string(), "day".to_string());
        cfg.map.insert("color".to_string(), "on".to_string());
        cfg.map
            .insert("week.start".to_string(), "sunday".to_string());

        let rc_path = resolve_rc_path(rc_override)?;
        if let Some(path) = rc_path {
            info!(rc = %path.display(), "loading rc file");
            cfg.load_file(&path)?;
        } else {
            debug!("no rc file found; using defaults");
        }

        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.map.get(key).map(|v| parse_bool(v))
    }

    /// First weekday of the rendered week rows. Anything other than
    /// `monday` falls back to the default Sunday start.
    pub fn week_start(&self) -> Weekday {
        match self.get("week.start") {
            Some(raw) if raw.trim().eq_ignore_ascii_case("monday") => Weekday::Mon,
            Some(raw) if raw.trim().eq_ignore_ascii_case("sunday") => Weekday::Sun,
            Some(raw) => {
                warn!(value = %raw, "unrecognized week.start; using sunday");
                Weekday::Sun
            }
            None => Weekday::Sun,
        }
    }

    /// ANSI color codes per category name, from `color.category.<name>`
    /// keys. Lookup is by lowercased name.
    pub fn category_colors(&self) -> BTreeMap<String, String> {
        self.map
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(CATEGORY_COLOR_PREFIX)
                    .map(|name| (name.to_ascii_lowercase(), value.clone()))
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.map.iter()
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        self.loaded_files.push(path.clone());

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        for (line_num, raw_line) in text.lines().enumerate() {
            let mut line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((before, _)) = line.split_once('#') {
                line = before.trim();
            }

            if line.is_empty() {
                continue;
            }

            if let Some(include_rest) = line.strip_prefix("include ") {
                let include_path = resolve_include_path(&base_dir, include_rest.trim())?;
                debug!(
                    file = %path.display(),
                    include = %include_path.display(),
                    line = line_num + 1,
                    "processing include"
                );

                if include_path.exists() {
                    self.load_file(&include_path)?;
                } else {
                    warn!(include = %include_path.display(), "include file does not exist; skipping");
                }
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        Ok(())
    }
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(path) = override_dir {
        path.to_path_buf()
    } else if let Some(cfg_value) = cfg.get("data.location") {
        expand_tilde(Path::new(&cfg_value))
    } else {
        default_data_dir()?
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_rc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(rc_env) = std::env::var("DATEBOOKRC") {
        if rc_env == "/dev/null" {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(rc_env)));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let candidate = home.join(".datebookrc");
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".datebook"))
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.trim().is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let raw = PathBuf::from(include);
    let expanded = expand_tilde(&raw);
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "on" | "true"
    )
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::Config;

    fn bare_config() -> Config {
        Config {
            map: std::collections::HashMap::new(),
            loaded_files: vec![],
        }
    }

    #[test]
    fn week_start_defaults_to_sunday() {
        let mut cfg = bare_config();
        assert_eq!(cfg.week_start(), Weekday::Sun);

        cfg.apply_overrides([("week.start".to_string(), "monday".to_string())]);
        assert_eq!(cfg.week_start(), Weekday::Mon);

        cfg.apply_overrides([("week.start".to_string(), "thursday".to_string())]);
        assert_eq!(cfg.week_start(), Weekday::Sun);
    }

    #[test]
    fn category_colors_are_collected_by_lowercased_name() {
        let mut cfg = bare_config();
        cfg.apply_overrides([
            ("rc.color.category.Work".to_string(), "34".to_string()),
            ("color.category.home".to_string(), "32".to_string()),
            ("color".to_string(), "on".to_string()),
        ]);

        let colors = cfg.category_colors();
        assert_eq!(colors.get("work").map(String::as_str), Some("34"));
        assert_eq!(colors.get("home").map(String::as_str), Some("32"));
        assert_eq!(colors.len(), 2);
    }
}
