use std::path::PathBuf;

use serde::Serialize;
use tokio::fs::File;
use tokio::io::{self, AsyncWriteExt};

use super::{VaultArgs, confirm_action, format_size, open_vault, resolve_user};
use crate::types::ResourceEntry;
use crate::vault::Upload;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Serialize)]
struct Listing<'a> {
    folder: Option<i64>,
    entries: &'a [ResourceEntry],
}

pub fn run_mkdir(
    args: VaultArgs,
    email: String,
    name: String,
    parent: Option<i64>,
) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let user = resolve_user(&vault, &email)?;

    let folder = vault.create_folder(user.id, parent, &name)?;

    println!("Created folder '{}' (id {})", folder.name, folder.id);
    Ok(())
}

pub async fn run_upload(
    args: VaultArgs,
    email: String,
    path: PathBuf,
    parent: Option<i64>,
    name: Option<String>,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let user = resolve_user(&vault, &email)?;

    let filename = match name {
        Some(name) => name,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive a name from {}", path.display()))?,
    };

    let file = File::open(&path).await?;
    let size_hint = file.metadata().await?.len();

    let resource = vault
        .upload(
            Upload {
                owner_id: user.id,
                parent_id: parent,
                filename,
                content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                size_hint: Some(size_hint),
            },
            file,
        )
        .await?;

    println!(
        "Uploaded '{}' (id {}, {})",
        resource.name,
        resource.id,
        format_size(size_hint as i64)
    );
    Ok(())
}

pub fn run_ls(args: VaultArgs, email: String, folder: Option<i64>, json: bool) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let user = resolve_user(&vault, &email)?;

    let entries = vault.list_children(folder, user.id)?;

    if json {
        let listing = Listing {
            folder,
            entries: &entries,
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No resources found.");
        return Ok(());
    }

    for entry in &entries {
        let resource = &entry.resource;
        let size = entry
            .file
            .as_ref()
            .map_or_else(|| "-".to_string(), |f| format_size(f.size_bytes));
        let name = if resource.is_folder() {
            format!("{}/", resource.name)
        } else {
            resource.name.clone()
        };
        let visibility = if resource.is_public { "public" } else { "" };
        println!(
            "{:>6}  {:<6} {:>10}  {:<12} {} {}",
            resource.id, resource.kind, size, entry.owner.username, name, visibility
        );
    }

    Ok(())
}

pub fn run_rm(
    args: VaultArgs,
    email: String,
    id: i64,
    non_interactive: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let user = resolve_user(&vault, &email)?;

    let resource = vault
        .resource(id)?
        .ok_or_else(|| anyhow::anyhow!("Resource {id} not found"))?;

    let prompt = if resource.is_folder() {
        format!("Delete folder '{}' and everything in it?", resource.name)
    } else {
        format!("Delete '{}'?", resource.name)
    };
    if !confirm_action(&prompt, yes, non_interactive)? {
        println!("Cancelled.");
        return Ok(());
    }

    vault.delete(id, user.id)?;

    println!("Deleted '{}'", resource.name);
    Ok(())
}

pub fn run_mv(
    args: VaultArgs,
    email: String,
    id: i64,
    to: Option<i64>,
    root: bool,
) -> anyhow::Result<()> {
    if to.is_none() && !root {
        anyhow::bail!("Specify a destination with --to <folder-id> or --root");
    }

    let vault = open_vault(&args)?;
    let user = resolve_user(&vault, &email)?;

    let moved = vault.move_resource(id, user.id, to)?;

    match moved.parent_id {
        Some(parent) => println!("Moved '{}' into folder {}", moved.name, parent),
        None => println!("Moved '{}' to the root", moved.name),
    }
    Ok(())
}

pub fn run_rename(args: VaultArgs, email: String, id: i64, name: String) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let user = resolve_user(&vault, &email)?;

    let renamed = vault.rename(id, user.id, &name)?;

    println!("Renamed resource {} to '{}'", renamed.id, renamed.name);
    Ok(())
}

pub async fn run_download(
    args: VaultArgs,
    email: Option<String>,
    id: i64,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let user_id = match email {
        Some(email) => Some(resolve_user(&vault, &email)?.id),
        None => None,
    };

    let mut download = vault.download(id, user_id).await?;

    match output {
        Some(path) => {
            let mut file = File::create(&path).await?;
            let written = io::copy(&mut download.reader, &mut file).await?;
            file.flush().await?;
            eprintln!(
                "Wrote '{}' to {} ({})",
                download.resource.name,
                path.display(),
                format_size(written as i64)
            );
        }
        None => {
            let mut stdout = io::stdout();
            io::copy(&mut download.reader, &mut stdout).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}
