mod commands;
mod files;
mod info;
mod init;
mod share;
mod user;

pub use commands::{Commands, UserCommands, VaultArgs};
pub use files::{run_download, run_ls, run_mkdir, run_mv, run_rename, run_rm, run_upload};
pub use info::{run_reindex, run_stats};
pub use init::run_init;
pub use share::{run_publish, run_share, run_unshare};
pub use user::{run_user_add, run_user_list};

use crate::config::VaultConfig;
use crate::types::User;
use crate::vault::Vault;

impl VaultArgs {
    pub fn to_config(&self) -> anyhow::Result<VaultConfig> {
        match &self.config {
            Some(path) => Ok(VaultConfig::load(path)?),
            None => Ok(VaultConfig::new(&self.data_dir)),
        }
    }
}

/// Open an existing vault, refusing to create one implicitly
pub fn open_vault(args: &VaultArgs) -> anyhow::Result<Vault> {
    let config = args.to_config()?;
    let db_path = config.db_path();

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'filevault init' first.",
            db_path.display()
        );
    }

    Ok(Vault::open(config)?)
}

pub fn resolve_user(vault: &Vault, email: &str) -> anyhow::Result<User> {
    vault
        .user_by_email(email)?
        .ok_or_else(|| anyhow::anyhow!("No user with email '{email}'"))
}

pub fn confirm_action(message: &str, yes: bool, non_interactive: bool) -> anyhow::Result<bool> {
    if yes {
        Ok(true)
    } else if non_interactive {
        anyhow::bail!("--yes is required for destructive operations in non-interactive mode");
    } else {
        Ok(inquire::Confirm::new(message)
            .with_default(false)
            .prompt()?)
    }
}

pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
