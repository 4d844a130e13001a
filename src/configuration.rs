use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use gix_config::file::Section;
use gix_config::File;
use tracing::{debug, info};

use crate::credential_manager::{origin, CredentialManager};
use crate::storage::{StorageConfig, FTP_PROTOCOL, SWIFT_PROTOCOL};

const SECTION: &str = "remote-store";
const DEFAULT_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct Configuration {
    /// Base address objects are stored under, e.g. `gs://bucket/lfs`.
    pub url: String,
    /// Where downloads are written before git-lfs moves them into place.
    pub data_dir: PathBuf,
    pub retries: u32,
    pub storage: StorageConfig
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        other => Err(anyhow!("{} should be a boolean, found \"{}\".", key, other))
    }
}

/// Integers accept git's k/m/g suffixes.
fn parse_integer(key: &str, value: &str) -> Result<u64> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last().map(|suffix| suffix.to_ascii_lowercase()) {
        Some('k') => (&value[..value.len() - 1], 1024),
        Some('m') => (&value[..value.len() - 1], 1024 * 1024),
        Some('g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1)
    };

    let number: u64 = digits.trim().parse()
        .with_context(|| format!("{} should be an integer, found \"{}\".", key, value))?;

    number.checked_mul(multiplier)
        .with_context(|| format!("{} is too large, found \"{}\".", key, value))
}

fn string(section: &Section<'_>, key: &str) -> Option<String> {
    section.value(key).map(|value| value.to_string())
}

fn boolean(section: &Section<'_>, key: &str) -> Result<Option<bool>> {
    string(section, key).map(|value| parse_bool(key, &value)).transpose()
}

fn integer(section: &Section<'_>, key: &str) -> Result<Option<u64>> {
    string(section, key).map(|value| parse_integer(key, &value)).transpose()
}

impl Configuration {
    /// Reads `.lfsconfig` from the work tree of the repository containing
    /// the current directory, then fills in OpenStack environment variables
    /// and stored credentials.
    #[tracing::instrument]
    pub fn load() -> Result<Configuration> {
        let (repository, _trust) = gix_discover::upwards(Path::new("."))
            .context("Not inside a git repository.")?;
        let (git_dir, work_tree) = repository.into_repository_and_work_tree_directories();
        let work_tree = work_tree.unwrap_or_else(|| PathBuf::from("."));

        let mut configuration = Configuration::from_path(&work_tree.join(".lfsconfig"), &git_dir)?;

        configuration.storage.swift.apply_environment();
        let mut credential_manager = CredentialManager::new()?;
        configuration.apply_credentials(&mut credential_manager)?;

        info!(url = configuration.url.as_str(), "Configuration loaded.");
        Ok(configuration)
    }

    #[tracing::instrument]
    pub fn from_path(path: &Path, git_dir: &Path) -> Result<Configuration> {
        let config = File::from_path_no_includes(path.to_path_buf(), gix_config::Source::Local)
            .with_context(|| format!("Failed to read \"{}\".", path.display()))?;
        let section = config.section(SECTION, None)
            .with_context(|| format!("[{}] section should be set.", SECTION))?;

        let url = string(section, "url").context("Url should be set.")?;
        if url.is_empty() {
            bail!("Url should not be empty.");
        }
        debug!("Url found: {}", url);

        let data_dir = match string(section, "datadir") {
            Some(data_dir) => PathBuf::from(data_dir),
            None => git_dir.join("lfs").join("tmp").join(SECTION)
        };

        let retries = match integer(section, "retries")? {
            Some(retries) => u32::try_from(retries).context("retries is too large.")?,
            None => DEFAULT_RETRIES
        };

        let mut storage = StorageConfig::default();

        if let Ok(gcs) = config.section(SECTION, Some("gcs".into())) {
            storage.google_cloud.disabled = boolean(gcs, "disabled")?.unwrap_or(false);
            storage.google_cloud.credentials_file = string(gcs, "credentialsfile").map(PathBuf::from);
        }

        if let Ok(swift) = config.section(SECTION, Some("swift".into())) {
            let swift_config = &mut storage.swift;

            swift_config.disabled = boolean(swift, "disabled")?.unwrap_or(false);
            swift_config.user_name = string(swift, "user").unwrap_or_default();
            swift_config.password = string(swift, "password").unwrap_or_default();
            swift_config.auth_url = string(swift, "authurl").unwrap_or_default();
            swift_config.tenant_name = string(swift, "tenantname").unwrap_or_default();
            swift_config.tenant_id = string(swift, "tenantid").unwrap_or_default();
            swift_config.region_name = string(swift, "region").unwrap_or_default();
            if let Some(domain) = string(swift, "domain") {
                swift_config.domain_name = domain;
            }
            if let Some(chunk_size) = integer(swift, "chunksize")? {
                swift_config.chunk_size_bytes = chunk_size;
            }
            if let Some(max_retries) = integer(swift, "maxretries")? {
                swift_config.max_retries = u32::try_from(max_retries).context("maxretries is too large.")?;
            }
        }

        if let Ok(ftp) = config.section(SECTION, Some("ftp".into())) {
            let ftp_config = &mut storage.ftp;

            ftp_config.disabled = boolean(ftp, "disabled")?.unwrap_or(false);
            if let Some(user) = string(ftp, "user") {
                ftp_config.user = user;
            }
            if let Some(password) = string(ftp, "password") {
                ftp_config.password = password;
            }
            if let Some(timeout) = integer(ftp, "timeout")? {
                ftp_config.timeout = Duration::from_secs(timeout);
            }
        }

        Ok(Configuration {
            url,
            data_dir,
            retries,
            storage
        })
    }

    /// Uses stored logins where the configuration leaves the user unset.
    #[tracing::instrument(skip(credential_manager))]
    pub fn apply_credentials(&mut self, credential_manager: &mut CredentialManager) -> Result<()> {
        if self.url.starts_with(FTP_PROTOCOL) && self.storage.ftp.user == "anonymous" {
            if let Some(credential) = credential_manager.get_credential(&origin(&self.url)?)? {
                info!("Using stored FTP credential.");
                self.storage.ftp.user = credential.user;
                self.storage.ftp.password = credential.password;
            }
        }

        let swift = &mut self.storage.swift;
        if self.url.starts_with(SWIFT_PROTOCOL) && !swift.auth_url.is_empty() && (swift.user_name.is_empty() || swift.password.is_empty()) {
            if let Some(credential) = credential_manager.get_credential(&origin(&swift.auth_url)?)? {
                info!("Using stored Swift credential.");
                if swift.user_name.is_empty() {
                    swift.user_name = credential.user;
                }
                if swift.password.is_empty() {
                    swift.password = credential.password;
                }
            }
        }

        Ok(())
    }
}
