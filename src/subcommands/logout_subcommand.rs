use anyhow::{Context, Result};
use clap::ArgMatches;
use tracing::info;

use crate::credential_manager::{origin, CredentialManager};
use crate::subcommands::Subcommand;

#[derive(Debug)]
pub struct LogoutSubcommand {
}

impl Subcommand for LogoutSubcommand {
    #[tracing::instrument]
    async fn execute(&mut self, arg_matches: &ArgMatches) -> Result<()> {
        let url = arg_matches.get_one::<String>("URL").context("URL not provided.")?;
        let origin = origin(url)?;

        let mut credential_manager = CredentialManager::new()?;
        credential_manager.remove_credential(&origin)?;

        info!("Removed credential for \"{}\".", origin);
        Ok(())
    }
}
