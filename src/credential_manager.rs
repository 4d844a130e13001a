use std::collections::HashMap;
use std::fs::create_dir_all;

use anyhow::{Context, Result};
use educe::Educe;
use keyring::Entry;
use rusqlite::Connection;
use tracing::{debug, info};
use url::Url;

use crate::users_dirs::get_config_dir;

/// The key credentials are stored under: `scheme://host[:port]`.
pub fn origin(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("\"{}\" is not a valid URL.", url))?;
    let host = parsed.host_str().filter(|host| !host.is_empty()).context("URL should have a host.")?;

    Ok(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host)
    })
}

#[derive(Educe)]
#[educe(Debug)]
pub struct Credential {
    pub user: String,
    #[educe(Debug(ignore))]
    pub password: String
}

impl Credential {
    pub fn new(user: String, password: String) -> Credential {
        Credential {
            user,
            password
        }
    }
}

#[derive(Debug)]
pub struct CredentialManager {
    connection: Connection,
    entry_cache: HashMap<(String, String), Entry>
}

impl CredentialManager {
    pub fn new() -> Result<CredentialManager> {
        Ok(CredentialManager {
            connection: CredentialManager::get_connection()?,
            entry_cache: HashMap::new()
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<CredentialManager> {
        Ok(CredentialManager {
            connection: Connection::open_in_memory()?,
            entry_cache: HashMap::new()
        })
    }

    #[tracing::instrument]
    fn get_connection() -> Result<Connection> {
        let mut path = get_config_dir()?;
        path.push("credential_store.db");
        let sqlite_path = path.as_path();

        // Create the folder if it doesn't already exist.
        if !sqlite_path.parent().context("No parent")?.exists() {
            debug!("Creating directories for sqlite database.");
            create_dir_all(sqlite_path.parent().context("No parent")?)?;
        }

        debug!("Creating sqlite database connection.");
        Ok(Connection::open(sqlite_path)?)
    }

    #[tracing::instrument]
    fn get_users(&self, origin: &str) -> Result<Vec<String>> {
        let database = self.get_database()?;

        info!("Selecting rows from user database.");
        let mut stmt = database.prepare("SELECT user FROM Credentials WHERE origin=:origin;")?;
        let rows = stmt.query_map(&[(":origin", origin)], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        debug!(count = rows.len(), "Found user rows.");
        Ok(rows)
    }

    #[tracing::instrument]
    fn get_database(&self) -> Result<&Connection> {
        debug!("Creating Credentials table in user database.");

        let conn = &self.connection;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS Credentials (
                id      INTEGER PRIMARY KEY,
                origin  TEXT NOT NULL,
                user    TEXT NOT NULL
            )",
            ()
        )?;

        Ok(conn)
    }

    #[tracing::instrument]
    fn get_entry(&mut self, origin: &str, user: &str) -> Result<&Entry> {
        let key = (origin.to_string(), user.to_string());

        if !self.entry_cache.contains_key(&key) {
            debug!(user = user, origin = origin, "Entry did not exist in cache.");

            let entry = Entry::new(origin, user)?;
            self.entry_cache.insert(key.clone(), entry);
        }

        self.entry_cache.get(&key).context("Entry does not exist in cache")
    }

    #[tracing::instrument]
    pub fn get_credential(&mut self, origin: &str) -> Result<Option<Credential>> {
        let users = self.get_users(origin)?;
        let Some(user) = users.first() else {
            debug!(origin = origin, "Entry did not exist in sqlite database.");
            return Ok(None);
        };

        info!("Getting password from operating system credential store.");
        let entry = self.get_entry(origin, user)?;
        let password = entry.get_password()?;

        Ok(Some(Credential::new(user.clone(), password)))
    }

    #[tracing::instrument]
    pub fn has_credential(&self, origin: &str) -> Result<bool> {
        Ok(!self.get_users(origin)?.is_empty())
    }

    #[tracing::instrument]
    pub fn remove_credential(&mut self, origin: &str) -> Result<()> {
        for user in self.get_users(origin)? {
            info!("Removing entry from operating system credential store.");
            let entry = self.get_entry(origin, &user)?;
            if let Err(error) = entry.delete_credential() {
                debug!("No keychain entry to remove: {}", error);
            }
            self.entry_cache.remove(&(origin.to_string(), user));
        }

        info!("Removing entry from sqlite database.");
        self.get_database()?.execute("DELETE FROM Credentials WHERE origin=?1", [origin])?;

        Ok(())
    }

    #[tracing::instrument]
    pub fn set_credential(&mut self, origin: &str, credential: &Credential) -> Result<()> {
        if self.has_credential(origin)? {
            debug!("Credential exists already.  Removing it before continuing.");
            self.remove_credential(origin)?;
        }

        info!("Storing credential into database.");
        self.get_database()?.execute(
            "INSERT INTO Credentials (origin, user) VALUES (?1, ?2)",
            (origin, credential.user.as_str())
        )?;

        info!("Storing the password into the operating system credential store.");
        let entry = self.get_entry(origin, &credential.user)?;
        entry.set_password(&credential.password)?;

        Ok(())
    }
}
