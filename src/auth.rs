/*!
 * Password gate.
 *
 * Users are admitted by sending the configured password once. Admitted
 * ids are appended to the users file (one id per line) so they survive
 * restarts.
 */

use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::errors::PersistenceError;
use crate::file_utils::FileManager;
use crate::transport::UserId;

pub const WELCOME_MESSAGE: &str = "✅ Password accepted! You are now authenticated. Please start with: add <min speakers> <max speakers (optional)> <language code (optional)>";
pub const LOCKED_MESSAGE: &str = "🔒 Please enter the password to use this bot.";

/// Allow-listed users and the password that admits new ones
#[derive(Debug)]
pub struct AllowList {
    path: PathBuf,
    users: RwLock<HashSet<UserId>>,
    password: String,
}

impl AllowList {
    /// Load the allow-list from `path`; a missing file is an empty list
    pub fn open<P: AsRef<Path>>(path: P, password: impl Into<String>) -> Self {
        let path = path.as_ref().to_path_buf();
        let users: HashSet<UserId> = std::fs::read_to_string(&path)
            .map(|content| {
                content
                    .lines()
                    .filter_map(|line| line.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        info!("Loaded {} authenticated user(s) from {:?}", users.len(), path);

        Self {
            path,
            users: RwLock::new(users),
            password: password.into(),
        }
    }

    pub fn is_allowed(&self, user: UserId) -> bool {
        self.users.read().contains(&user)
    }

    pub fn check_password(&self, text: &str) -> bool {
        !self.password.is_empty() && text.trim() == self.password
    }

    /// Admit `user`. A failed write is logged and the user stays admitted
    /// for the life of the process.
    pub fn admit(&self, user: UserId) {
        if !self.users.write().insert(user) {
            return;
        }
        let persisted = FileManager::append_line(&self.path, &user.to_string()).map_err(|source| {
            PersistenceError {
                path: self.path.display().to_string(),
                source,
            }
        });
        match persisted {
            Ok(()) => info!("User {} authenticated", user),
            Err(e) => warn!("User {} authenticated in memory only: {}", user, e),
        }
    }
}
