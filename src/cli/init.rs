use inquire::{Confirm, Text};

use super::VaultArgs;
use crate::vault::Vault;

pub fn run_init(args: VaultArgs, non_interactive: bool) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let db_path = config.db_path();

    if db_path.exists() {
        anyhow::bail!("Vault already initialized at {}", config.data_dir.display());
    }

    let vault = Vault::open(config)?;

    println!();
    println!("Initialized vault");
    println!("  Database: {}", db_path.display());
    println!("  Blobs:    {}", vault.blobs().root().display());
    println!();

    if !non_interactive {
        create_first_user_prompt(&vault)?;
    }

    Ok(())
}

fn create_first_user_prompt(vault: &Vault) -> anyhow::Result<()> {
    let create_user = Confirm::new("Would you like to create a user?")
        .with_default(false)
        .prompt()?;

    if !create_user {
        return Ok(());
    }

    let username = Text::new("Username:")
        .with_validator(|input: &str| {
            if input.trim().is_empty() {
                Err("Username cannot be empty".into())
            } else if input.contains(char::is_whitespace) {
                Err("Username cannot contain whitespace".into())
            } else {
                Ok(inquire::validator::Validation::Valid)
            }
        })
        .prompt()?;

    let email = Text::new("Email:")
        .with_validator(|input: &str| {
            if input.contains('@') {
                Ok(inquire::validator::Validation::Valid)
            } else {
                Err("Enter an email address".into())
            }
        })
        .prompt()?;

    let user = vault.create_user(&username, &email, None)?;

    println!();
    println!("Created user '{}' <{}> (id {})", user.username, user.email, user.id);
    println!();

    Ok(())
}
