use anyhow::{Context, Result};
use clap::ArgMatches;
use tracing::info;

use crate::credential_manager::{origin, Credential, CredentialManager};
use crate::subcommands::Subcommand;

/// Stores a user and password for a server, so the address in
/// `.lfsconfig` does not have to carry them.
#[derive(Debug)]
pub struct LoginSubcommand {
}

impl Subcommand for LoginSubcommand {
    #[tracing::instrument]
    async fn execute(&mut self, arg_matches: &ArgMatches) -> Result<()> {
        let url = arg_matches.get_one::<String>("URL").context("URL not provided.")?;
        let user = arg_matches.get_one::<String>("USER").context("USER not provided.")?;

        let origin = origin(url)?;
        let password = rpassword::prompt_password(format!("Password for {} at {}: ", user, origin))
            .context("Failed to read the password.")?;

        let mut credential_manager = CredentialManager::new()?;
        credential_manager.set_credential(&origin, &Credential::new(user.to_string(), password))?;

        info!("Stored credential for \"{}\".", origin);
        Ok(())
    }
}
