use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::types::Role;

/// Where the vault lives. Shared by every command.
#[derive(Args, Debug, Clone)]
pub struct VaultArgs {
    /// Data directory for the database and blobs
    #[arg(long, default_value = "./data")]
    pub data_dir: String,

    /// TOML config file; its values take precedence over --data-dir
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the vault (create database and blob directory)
    Init {
        #[command(flatten)]
        vault: VaultArgs,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Create a folder
    Mkdir {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the acting user
        #[arg(long = "as")]
        user: String,

        /// Folder name
        name: String,

        /// Parent folder ID (omit for a root folder)
        #[arg(long)]
        parent: Option<i64>,
    },

    /// Upload a local file
    Upload {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the acting user
        #[arg(long = "as")]
        user: String,

        /// Local file to upload
        path: PathBuf,

        /// Parent folder ID (omit to upload at the root)
        #[arg(long)]
        parent: Option<i64>,

        /// Name to store the file under (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,

        /// Content type (defaults to application/octet-stream)
        #[arg(long)]
        content_type: Option<String>,
    },

    /// List a folder, or the user's roots
    Ls {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the acting user
        #[arg(long = "as")]
        user: String,

        /// Folder ID to list (omit for roots)
        folder: Option<i64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a file or folder
    Rm {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the acting user
        #[arg(long = "as")]
        user: String,

        /// Resource ID
        id: i64,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Move a resource to another folder or to the root
    Mv {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the acting user
        #[arg(long = "as")]
        user: String,

        /// Resource ID
        id: i64,

        /// Destination folder ID
        #[arg(long, conflicts_with = "root")]
        to: Option<i64>,

        /// Move to the root
        #[arg(long)]
        root: bool,
    },

    /// Rename a resource
    Rename {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the acting user
        #[arg(long = "as")]
        user: String,

        /// Resource ID
        id: i64,

        /// New name
        name: String,
    },

    /// Grant another user a role on a resource
    Share {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the owner
        #[arg(long = "as")]
        user: String,

        /// Resource ID
        id: i64,

        /// Email of the user to share with
        #[arg(long)]
        with: String,

        /// Role to grant
        #[arg(long, default_value = "viewer", value_parser = parse_role)]
        role: Role,
    },

    /// Revoke a user's role on a resource
    Unshare {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the owner
        #[arg(long = "as")]
        user: String,

        /// Resource ID
        id: i64,

        /// Email of the user to revoke
        #[arg(long)]
        with: String,
    },

    /// Make a resource and everything under it public
    Publish {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the owner
        #[arg(long = "as")]
        user: String,

        /// Resource ID
        id: i64,
    },

    /// Clear the public flag on a resource
    Unpublish {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the owner
        #[arg(long = "as")]
        user: String,

        /// Resource ID
        id: i64,
    },

    /// Download a file
    Download {
        #[command(flatten)]
        vault: VaultArgs,

        /// Email of the acting user (omit for anonymous access)
        #[arg(long = "as")]
        user: Option<String>,

        /// Resource ID
        id: i64,

        /// Output path (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show storage and deduplication statistics
    Stats {
        #[command(flatten)]
        vault: VaultArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the ancestor index from parent pointers
    Reindex {
        #[command(flatten)]
        vault: VaultArgs,

        /// Only report drift, do not rebuild
        #[arg(long)]
        check: bool,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Add a new user
    Add {
        #[command(flatten)]
        vault: VaultArgs,

        /// Username for the new user
        #[arg(long)]
        username: Option<String>,

        /// Email for the new user
        #[arg(long)]
        email: Option<String>,

        /// Storage quota in bytes (omit for the configured default)
        #[arg(long)]
        quota: Option<i64>,

        /// Skip interactive prompts (requires --username and --email)
        #[arg(long)]
        non_interactive: bool,
    },

    /// List users
    List {
        #[command(flatten)]
        vault: VaultArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::parse(s).ok_or_else(|| format!("unknown role '{s}' (expected viewer or editor)"))
}
