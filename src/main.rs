use clap::Parser;
use tracing_subscriber::EnvFilter;

use filevault::cli::{self, Commands, UserCommands};

#[derive(Parser)]
#[command(name = "filevault")]
#[command(about = "A deduplicating file vault", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("filevault=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    match args.command {
        Commands::Init {
            vault,
            non_interactive,
        } => cli::run_init(vault, non_interactive)?,
        Commands::User { command } => match command {
            UserCommands::Add {
                vault,
                username,
                email,
                quota,
                non_interactive,
            } => cli::run_user_add(vault, username, email, quota, non_interactive)?,
            UserCommands::List { vault, json } => cli::run_user_list(vault, json)?,
        },
        Commands::Mkdir {
            vault,
            user,
            name,
            parent,
        } => cli::run_mkdir(vault, user, name, parent)?,
        Commands::Upload {
            vault,
            user,
            path,
            parent,
            name,
            content_type,
        } => cli::run_upload(vault, user, path, parent, name, content_type).await?,
        Commands::Ls {
            vault,
            user,
            folder,
            json,
        } => cli::run_ls(vault, user, folder, json)?,
        Commands::Rm {
            vault,
            user,
            id,
            non_interactive,
            yes,
        } => cli::run_rm(vault, user, id, non_interactive, yes)?,
        Commands::Mv {
            vault,
            user,
            id,
            to,
            root,
        } => cli::run_mv(vault, user, id, to, root)?,
        Commands::Rename {
            vault,
            user,
            id,
            name,
        } => cli::run_rename(vault, user, id, name)?,
        Commands::Share {
            vault,
            user,
            id,
            with,
            role,
        } => cli::run_share(vault, user, id, with, role)?,
        Commands::Unshare {
            vault,
            user,
            id,
            with,
        } => cli::run_unshare(vault, user, id, with)?,
        Commands::Publish { vault, user, id } => cli::run_publish(vault, user, id, true)?,
        Commands::Unpublish { vault, user, id } => cli::run_publish(vault, user, id, false)?,
        Commands::Download {
            vault,
            user,
            id,
            output,
        } => cli::run_download(vault, user, id, output).await?,
        Commands::Stats { vault, json } => cli::run_stats(vault, json)?,
        Commands::Reindex { vault, check } => cli::run_reindex(vault, check)?,
    }

    Ok(())
}
