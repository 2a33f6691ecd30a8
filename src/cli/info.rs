use serde::Serialize;

use super::{VaultArgs, format_size, open_vault};
use crate::types::StorageStats;

#[derive(Serialize)]
struct VaultInfo {
    users: usize,
    #[serde(flatten)]
    storage: StorageStats,
}

pub fn run_stats(args: VaultArgs, json: bool) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;

    let info = VaultInfo {
        users: vault.users()?.len(),
        storage: vault.storage_stats()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!();
    println!("Filevault Storage");
    println!("{}", "─".repeat(17));
    println!("Users:         {}", info.users);
    println!("Unique files:  {}", info.storage.unique_files);
    println!("On disk:       {}", format_size(info.storage.physical_bytes));
    println!("Logical:       {}", format_size(info.storage.logical_bytes));
    println!("Saved:         {}", format_size(info.storage.saved_bytes));
    println!();

    Ok(())
}

pub fn run_reindex(args: VaultArgs, check: bool) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;

    let drift = vault.index_drift()?;
    if check {
        if drift.is_clean() {
            println!("Ancestor index is consistent.");
        } else {
            println!(
                "Ancestor index drift: {} missing, {} stale row(s)",
                drift.missing, drift.stale
            );
        }
        return Ok(());
    }

    let rows = vault.reindex()?;
    println!(
        "Rebuilt ancestor index: {} row(s) ({} missing, {} stale before rebuild)",
        rows, drift.missing, drift.stale
    );
    Ok(())
}
