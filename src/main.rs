use anyhow::Result;
use clap::{crate_version, Arg, Command};
use tracing::error;
use users_dirs::get_config_dir;
use tracing_appender::rolling;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod configuration;
mod credential_manager;
mod git_lfs;
mod storage;
mod subcommands;
mod users_dirs;

use subcommands::{LoginSubcommand, LogoutSubcommand, MainSubcommand, Subcommand};

// stdout belongs to git-lfs, so logs only go to a file.
fn setup_logging() -> Result<()> {
    let config_path = get_config_dir()?;
    let log_file = rolling::daily(config_path, "log").with_max_level(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .pretty()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_writer(log_file)
        .init();

    Ok(())
}

#[tracing::instrument]
fn cli() -> Command {
    Command::new("git-lfs-remote-store")
        .version(crate_version!())
        .about("A git lfs custom transfer agent storing objects in Google Cloud Storage, OpenStack Swift or FTP. See https://github.com/git-lfs/git-lfs/blob/main/docs/custom-transfers.md for more information.")
        .allow_external_subcommands(true)
        .subcommand(
            Command::new("login")
                .about("Stores the password used for a storage server.")
                .args_conflicts_with_subcommands(true)
                .flatten_help(true)
                .arg(
                    Arg::new("USER")
                        .short('u')
                        .long("user")
                        .required(true)
                        .help("The user name for the server")
                )
                .arg(
                    Arg::new("URL")
                        .short('l')
                        .long("url")
                        .required(true)
                        .help("The URL of the server, for example ftp://files.example.com or the Swift auth URL")
                )
        )
        .subcommand(
            Command::new("logout")
            .about("Deletes the stored password for a storage server.")
            .args_conflicts_with_subcommands(true)
            .flatten_help(true)
            .arg(
                Arg::new("URL")
                    .short('l')
                    .long("url")
                    .required(true)
                    .help("The URL of the server")
            )
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let matches = cli().get_matches();

    let result: Result<()> = match matches.subcommand() {
        Some(("login", sub_matches)) => {
            let mut login_command = LoginSubcommand { };
            login_command.execute(sub_matches).await
        },
        Some(("logout", sub_matches)) => {
            let mut logout_command = LogoutSubcommand { };
            logout_command.execute(sub_matches).await
        }
        _ => {
            // This is the subcommand that handles being called from git.
            let mut main_command = MainSubcommand::new();
            main_command.execute(&matches).await
        }
    };

    match result {
        Ok(_) => Ok(()),
        Err(error) => {
            error!("An error bubbled to the main method: \"{:#}\".", error);

            Err(error)
        }
    }
}
