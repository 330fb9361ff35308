// Credential handling adapted from https://github.com/davidB/git2_credentials,
// which is based on cargo's git utilities (Apache-2.0).

use dirs::home_dir;
use git2::{Cred, CredentialType};
use log::trace;
use std::path::PathBuf;

const DEFAULT_SSH_KEYS: [&str; 6] = [
    ".ssh/id_dsa",
    ".ssh/id_ecdsa",
    ".ssh/id_ecdsa_sk",
    ".ssh/id_ed25519",
    ".ssh/id_ed25519_sk",
    ".ssh/id_rsa",
];

/// Username and password for HTTP(S) remotes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialAuth {
    pub username: String,
    pub password: String,
}

/// Offers every available credential to libgit2 once, in order.
///
/// libgit2 calls the credential callback until it gets a working credential or
/// an error, so every kind of credential keeps count of the attempts.
pub struct CredentialHandler {
    auth: Option<CredentialAuth>,
    username_attempts_count: usize,
    username_candidates: Vec<String>,
    password_attempted: bool,
    ssh_attempts_count: usize,
    ssh_key_candidates: Vec<PathBuf>,
    cred_helper_bad: Option<bool>,
    cfg: Option<git2::Config>,
}

impl CredentialHandler {
    pub fn new(auth: Option<CredentialAuth>) -> Self {
        let home = home_dir().unwrap_or(PathBuf::from("~"));
        let ssh_key_candidates: Vec<PathBuf> = DEFAULT_SSH_KEYS
            .into_iter()
            .map(|key_path| home.join(key_path))
            .filter(|key_path| key_path.exists())
            .collect();

        let mut username_candidates = vec![];
        if let Some(CredentialAuth { username, .. }) = &auth {
            username_candidates.push(username.clone());
        }
        username_candidates.push(String::from("git"));

        CredentialHandler {
            auth,
            username_attempts_count: 0,
            username_candidates,
            password_attempted: false,
            ssh_attempts_count: 0,
            ssh_key_candidates,
            cred_helper_bad: None,
            cfg: git2::Config::open_default().ok(),
        }
    }

    /// Return the next credential to try for the allowed credential types.
    ///
    /// - If only a username is asked (ssh without a user in the URL), try the
    ///   configured username, then `git`.
    /// - For ssh keys, try the ssh-agent first, then the default keys in `~/.ssh`.
    /// - For username and password, try the configured credentials first, then
    ///   the git credential helper.
    /// - Finally fall back to the default credentials.
    pub fn try_next_credential(
        &mut self,
        url: &str,
        username: Option<&str>,
        allowed: CredentialType,
    ) -> Result<Cred, git2::Error> {
        if allowed.contains(CredentialType::USERNAME) {
            let idx = self.username_attempts_count;
            self.username_attempts_count += 1;
            return match self.username_candidates.get(idx) {
                Some(candidate) => Cred::username(candidate),
                None => Err(git2::Error::from_str("no more usernames to try")),
            };
        }

        if allowed.contains(CredentialType::SSH_KEY) {
            self.ssh_attempts_count += 1;
            let user = username.unwrap_or("git");
            if self.ssh_attempts_count == 1 {
                trace!("Trying ssh-agent for {url}.");
                return Cred::ssh_key_from_agent(user);
            }

            return match self.ssh_key_candidates.get(self.ssh_attempts_count - 2) {
                Some(key) => {
                    trace!("Trying ssh key {} for {url}.", key.display());
                    Cred::ssh_key(user, None, key, None)
                }
                None => Err(git2::Error::from_str("no more ssh keys to try")),
            };
        }

        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let (Some(auth), false) = (&self.auth, self.password_attempted) {
                trace!("Trying the configured username and password for {url}.");
                self.password_attempted = true;
                return Cred::userpass_plaintext(&auth.username, &auth.password);
            }

            if let (Some(cfg), None) = (&self.cfg, self.cred_helper_bad) {
                trace!("Trying the git credential helper for {url}.");
                let result = Cred::credential_helper(cfg, url, username);
                self.cred_helper_bad = Some(result.is_err());
                return result;
            }
        }

        if allowed.contains(CredentialType::DEFAULT) {
            return Cred::default();
        }

        Err(git2::Error::from_str("no valid authentication available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> CredentialAuth {
        CredentialAuth {
            username: String::from("deploy"),
            password: String::from("hunter2"),
        }
    }

    #[test]
    fn it_should_try_the_configured_username_then_git() {
        let mut handler = CredentialHandler::new(Some(auth()));

        assert_eq!(vec!["deploy", "git"], handler.username_candidates);
        for _ in 0..2 {
            let result =
                handler.try_next_credential("ssh://host/repo", None, CredentialType::USERNAME);
            assert!(result.is_ok());
        }

        let result = handler.try_next_credential("ssh://host/repo", None, CredentialType::USERNAME);
        assert!(result.is_err());
    }

    #[test]
    fn it_should_offer_the_configured_password_first() {
        let mut handler = CredentialHandler::new(Some(auth()));

        let cred = handler
            .try_next_credential(
                "https://example.com/repo.git",
                None,
                CredentialType::USER_PASS_PLAINTEXT,
            )
            .unwrap();

        assert_eq!(
            CredentialType::USER_PASS_PLAINTEXT.bits(),
            cred.credtype() as u32
        );
        assert!(handler.password_attempted);
    }

    #[test]
    fn it_should_not_offer_a_password_without_configuration() {
        let mut handler = CredentialHandler::new(None);
        handler.cfg = None;

        let result = handler.try_next_credential(
            "https://example.com/repo.git",
            None,
            CredentialType::USER_PASS_PLAINTEXT,
        );

        assert!(result.is_err());
        assert!(!handler.password_attempted);
    }
}
