use super::{VaultArgs, open_vault, resolve_user};
use crate::types::Role;

pub fn run_share(
    args: VaultArgs,
    email: String,
    id: i64,
    with: String,
    role: Role,
) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let owner = resolve_user(&vault, &email)?;
    let target = resolve_user(&vault, &with)?;

    let permission = vault.grant(id, owner.id, target.id, role)?;

    println!(
        "Granted {} on resource {} to {}",
        permission.role, permission.resource_id, target.email
    );
    Ok(())
}

pub fn run_unshare(args: VaultArgs, email: String, id: i64, with: String) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let owner = resolve_user(&vault, &email)?;
    let target = resolve_user(&vault, &with)?;

    if vault.revoke(id, owner.id, target.id)? {
        println!("Revoked access to resource {} from {}", id, target.email);
    } else {
        println!("{} had no direct access to resource {}", target.email, id);
    }
    Ok(())
}

pub fn run_publish(args: VaultArgs, email: String, id: i64, public: bool) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let owner = resolve_user(&vault, &email)?;

    let resource = vault.set_public(id, owner.id, public)?;

    if resource.is_public {
        println!("'{}' is now public", resource.name);
        if let Some(token) = &resource.share_token {
            println!("  Share token: {token}");
        }
    } else {
        println!("'{}' is now private", resource.name);
    }
    Ok(())
}
