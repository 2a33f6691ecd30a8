use inquire::Text;

use super::{VaultArgs, format_size, open_vault};

pub fn run_user_add(
    args: VaultArgs,
    username: Option<String>,
    email: Option<String>,
    quota: Option<i64>,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;

    let username = if let Some(name) = username {
        name
    } else if non_interactive {
        anyhow::bail!("--username is required in non-interactive mode");
    } else {
        Text::new("Username:").prompt()?
    };

    let email = if let Some(email) = email {
        email
    } else if non_interactive {
        anyhow::bail!("--email is required in non-interactive mode");
    } else {
        Text::new("Email:").prompt()?
    };

    if vault.user_by_email(&email)?.is_some() {
        anyhow::bail!("A user with email '{}' already exists", email);
    }

    let user = vault.create_user(&username, &email, quota)?;

    println!();
    println!("Created user \"{}\" <{}> (id {})", user.username, user.email, user.id);
    if let Some(quota) = user.storage_quota_bytes {
        println!("  Quota: {}", format_size(quota));
    }
    println!();

    Ok(())
}

pub fn run_user_list(args: VaultArgs, json: bool) -> anyhow::Result<()> {
    let vault = open_vault(&args)?;
    let users = vault.users()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    if users.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    println!();
    for user in &users {
        let quota = user
            .storage_quota_bytes
            .map_or_else(|| "unlimited".to_string(), format_size);
        println!(
            "  {:>4}  {:<16} {:<28} {} / {}",
            user.id,
            user.username,
            user.email,
            format_size(user.storage_used_bytes),
            quota
        );
    }
    println!();

    Ok(())
}
