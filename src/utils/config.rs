use std::env;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, info};

use crate::database::provision::{ProvisionPlan, ServiceCredential};

/// Where the embedded store lives.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, env = "DB_PATH", default_value = "filevault.db")]
    pub db_path: PathBuf,
}

/// Server-side database and service account for the bootstrap script.
#[derive(Args, Clone)]
pub struct ServiceArgs {
    #[arg(long, env = "DB_NAME", default_value = "filevault")]
    pub db_name: String,

    #[arg(long, env = "DB_USER", default_value = "filevault_svc")]
    pub db_user: String,

    /// Host pattern the account may connect from.
    #[arg(long, env = "DB_HOST", default_value = "%")]
    pub db_host: String,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: String,
}

impl fmt::Debug for ServiceArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceArgs")
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_host", &self.db_host)
            .field("db_password", &"<redacted>")
            .finish()
    }
}

impl ServiceArgs {
    pub fn provision_plan(&self) -> Result<ProvisionPlan> {
        let credential = ServiceCredential::new(&self.db_user, &self.db_host, &self.db_password)
            .context("Invalid service credential")?;
        let plan = ProvisionPlan::new(&self.db_name)
            .context("Invalid database name")?
            .with_credential(credential);
        Ok(plan)
    }
}

/// Loads `KEY=VALUE` pairs from a `.env` file into the process environment.
/// Variables that are already set win. A missing file is not an error.
pub fn load_dotenv(path: &Path) -> Result<usize> {
    if !path.exists() {
        debug!("No {} file; using process environment only", path.display());
        return Ok(0);
    }

    let mut applied = 0;
    for (key, value) in read_env_file(path)? {
        if env::var_os(&key).is_none() {
            env::set_var(&key, value);
            applied += 1;
        }
    }

    info!("Loaded {} setting(s) from {}", applied, path.display());
    Ok(applied)
}

fn read_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut pairs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            pairs.push((key.to_string(), unquote(value.trim()).to_string()));
        }
    }
    Ok(pairs)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
