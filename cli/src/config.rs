use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use std::path::PathBuf;

use larder_core::jobs::JobSettings;

const DEFAULT_USER: &str = "default";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    /// User that commands act on when `--user` is not given.
    pub default_user: String,
    /// Webhook that receives prompt notifications. Unset means notifications
    /// are only logged.
    pub push_url: Option<String>,
    pub jobs: JobSettings,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "larder").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Self::from_env(data_dir, |name| std::env::var(name).ok())
    }

    /// Build the config for `data_dir`, applying `LARDER_*` overrides read
    /// through `var`.
    fn from_env(data_dir: PathBuf, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let set = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let db_path = set("LARDER_DB").map_or_else(|| data_dir.join("larder.db"), PathBuf::from);
        let default_user =
            set("LARDER_USER").map_or_else(|| DEFAULT_USER.to_string(), |u| u.trim().to_string());
        let push_url = set("LARDER_PUSH_URL");

        let defaults = JobSettings::default();
        let days = |name: &str, default: u32| -> Result<u32> {
            set(name).map_or(Ok(default), |v| {
                v.trim()
                    .parse()
                    .with_context(|| format!("{name} must be a whole number of days, got '{v}'"))
            })
        };
        let jobs = JobSettings {
            notify_after_days: days("LARDER_NOTIFY_AFTER_DAYS", defaults.notify_after_days)?,
            expire_after_days: days("LARDER_EXPIRE_AFTER_DAYS", defaults.expire_after_days)?,
            suggestion_recent_days: days("LARDER_RECENT_DAYS", defaults.suggestion_recent_days)?,
        };
        if let Err(e) = jobs.validate() {
            bail!("Invalid job settings: {e}");
        }

        Ok(Config {
            db_path,
            data_dir,
            default_user,
            push_url,
            jobs,
        })
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        tracing::info!(path = %path.display(), "generated new API key");
        eprintln!("Generated new API key: {key}");
        eprintln!("Include in requests: Authorization: Bearer {key}");
        Ok((key, true))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_env(PathBuf::from("/tmp/larder-test"), |name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/larder-test/larder.db"));
        assert_eq!(config.default_user, "default");
        assert!(config.push_url.is_none());
        assert_eq!(config.jobs, JobSettings::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = config_with(&[
            ("LARDER_DB", "/srv/larder.db"),
            ("LARDER_USER", " camille "),
            ("LARDER_PUSH_URL", "https://push.example/hook"),
            ("LARDER_NOTIFY_AFTER_DAYS", "2"),
            ("LARDER_EXPIRE_AFTER_DAYS", "10"),
            ("LARDER_RECENT_DAYS", "5"),
        ])
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/srv/larder.db"));
        assert_eq!(config.default_user, "camille");
        assert_eq!(config.push_url.as_deref(), Some("https://push.example/hook"));
        assert_eq!(config.jobs.notify_after_days, 2);
        assert_eq!(config.jobs.expire_after_days, 10);
        assert_eq!(config.jobs.suggestion_recent_days, 5);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_with(&[("LARDER_USER", "  "), ("LARDER_PUSH_URL", "")]).unwrap();
        assert_eq!(config.default_user, "default");
        assert!(config.push_url.is_none());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let err = config_with(&[("LARDER_NOTIFY_AFTER_DAYS", "soon")])
            .err()
            .unwrap();
        assert!(err.to_string().contains("LARDER_NOTIFY_AFTER_DAYS"));
    }

    #[test]
    fn test_expire_must_follow_notify() {
        assert!(
            config_with(&[
                ("LARDER_NOTIFY_AFTER_DAYS", "7"),
                ("LARDER_EXPIRE_AFTER_DAYS", "7"),
            ])
            .is_err()
        );
    }

    #[test]
    fn test_api_key_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_env(dir.path().to_path_buf(), |_| None).unwrap();
        let (key, created) = config.load_or_create_api_key().unwrap();
        assert!(created);
        assert_eq!(key.len(), 64);
        let (again, created) = config.load_or_create_api_key().unwrap();
        assert!(!created);
        assert_eq!(again, key);
    }
}
