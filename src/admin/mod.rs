//! Account administration through an external admin tool.
//!
//! The tool (by default `ejabberdctl` inside the server container) is run
//! once per operation with a fixed argument vector:
//!
//! | Operation            | Arguments                                  |
//! |----------------------|--------------------------------------------|
//! | register             | `register <user> <domain> <password>`      |
//! | unregister           | `unregister <user> <domain>`               |
//! | list                 | `registered_users <domain>`                |
//! | change password      | `change_password <user> <domain> <pass>`   |
//!
//! The session client never calls into this module.

use std::process::Stdio;

use tokio::process::Command;

use crate::config::AdminConfig;
use crate::error::AdminError;
use crate::protocol::Credential;

/// One admin tool invocation
#[derive(Debug, Clone)]
pub enum AdminCommand {
    /// Create an account
    Register {
        /// Account name
        username: String,
        /// Domain
        domain: String,
        /// Initial password
        password: Credential,
    },
    /// Delete an account
    Unregister {
        /// Account name
        username: String,
        /// Domain
        domain: String,
    },
    /// List accounts on a domain
    RegisteredUsers {
        /// Domain
        domain: String,
    },
    /// Replace an account's password
    ChangePassword {
        /// Account name
        username: String,
        /// Domain
        domain: String,
        /// New password
        password: Credential,
    },
}

impl AdminCommand {
    /// Sub-command name as the tool expects it
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::RegisteredUsers { .. } => "registered_users",
            Self::ChangePassword { .. } => "change_password",
        }
    }

    /// Full argument vector, secrets included. Do not log.
    fn args(&self) -> Vec<&str> {
        match self {
            Self::Register {
                username,
                domain,
                password,
            }
            | Self::ChangePassword {
                username,
                domain,
                password,
            } => vec![
                self.name(),
                username.as_str(),
                domain.as_str(),
                password.expose_secret(),
            ],
            Self::Unregister { username, domain } => {
                vec![self.name(), username.as_str(), domain.as_str()]
            },
            Self::RegisteredUsers { domain } => vec![self.name(), domain.as_str()],
        }
    }
}

/// Result of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminOutcome {
    /// Tool exited with status 0
    pub success: bool,
    /// Trimmed stdout
    pub stdout: String,
    /// Trimmed stderr, or the spawn error
    pub stderr: String,
}

impl AdminOutcome {
    fn spawn_failed(reason: String) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: reason,
        }
    }

    /// Convert to a `Result`, keeping stdout on success.
    pub fn into_result(self, command: &'static str) -> Result<String, AdminError> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(AdminError {
                command,
                stderr: self.stderr,
            })
        }
    }
}

/// Split `registered_users` output into account names.
pub fn parse_user_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Dispatcher for account operations
#[derive(Debug, Clone)]
pub struct AccountAdmin {
    config: AdminConfig,
}

impl AccountAdmin {
    /// Create a dispatcher
    pub fn new(config: AdminConfig) -> Self {
        Self { config }
    }

    /// Domain used for every operation
    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// Use another domain
    pub fn with_domain(mut self, domain: &str) -> Self {
        self.config.domain = domain.to_string();
        self
    }

    /// Run one command. Never fails: spawn errors come back as an
    /// unsuccessful outcome.
    pub async fn run(&self, command: &AdminCommand) -> AdminOutcome {
        let Some((program, prefix)) = self.config.command.split_first() else {
            return AdminOutcome::spawn_failed("admin command is empty".to_string());
        };

        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .args(command.args())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!("Running {} {}", program, command.name());
        match cmd.output().await {
            Ok(output) => {
                let outcome = AdminOutcome {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                };
                if !outcome.success {
                    tracing::debug!("{} exited with {}", command.name(), output.status);
                }
                outcome
            },
            Err(e) => {
                tracing::warn!("Failed to run {}: {}", program, e);
                AdminOutcome::spawn_failed(e.to_string())
            },
        }
    }

    /// Register `username` with `password`
    pub async fn register(&self, username: &str, password: &Credential) -> AdminOutcome {
        self.run(&AdminCommand::Register {
            username: username.to_string(),
            domain: self.config.domain.clone(),
            password: password.clone(),
        })
        .await
    }

    /// Remove `username`
    pub async fn unregister(&self, username: &str) -> AdminOutcome {
        self.run(&AdminCommand::Unregister {
            username: username.to_string(),
            domain: self.config.domain.clone(),
        })
        .await
    }

    /// Change the password of `username`
    pub async fn change_password(&self, username: &str, password: &Credential) -> AdminOutcome {
        self.run(&AdminCommand::ChangePassword {
            username: username.to_string(),
            domain: self.config.domain.clone(),
            password: password.clone(),
        })
        .await
    }

    /// Account names on the domain
    pub async fn registered_users(&self) -> Result<Vec<String>, AdminError> {
        let command = AdminCommand::RegisteredUsers {
            domain: self.config.domain.clone(),
        };
        let stdout = self.run(&command).await.into_result(command.name())?;
        Ok(parse_user_list(&stdout))
    }

    /// Check whether `username` is registered
    pub async fn user_exists(&self, username: &str) -> Result<bool, AdminError> {
        Ok(self
            .registered_users()
            .await?
            .iter()
            .any(|user| user == username))
    }

    /// Register each `(username, password)` in order, continuing past
    /// failures. Returns how many succeeded.
    pub async fn bulk_register(&self, accounts: &[(String, Credential)]) -> usize {
        let mut registered = 0;
        for (username, password) in accounts {
            let outcome = self.register(username, password).await;
            if outcome.success {
                registered += 1;
            } else {
                tracing::warn!("Registering {} failed: {}", username, outcome.stderr);
            }
        }
        tracing::info!("Registered {}/{} accounts", registered, accounts.len());
        registered
    }
}
