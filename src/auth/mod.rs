//! Bearer-token providers.
//!
//! Acquiring and refreshing OAuth2 tokens is left to an external tool; the
//! providers here only hand a current token to the uploader and fetch a new one
//! when the server rejects the old one.

use std::process::Command;
use std::sync::Mutex;

use log::debug;
use thiserror::Error;

pub const TOKEN_ENV_VAR: &str = "YOUTUBE_ACCESS_TOKEN";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("token command failed: {0}")]
    Command(String),
    #[error("token provider returned an empty token")]
    EmptyToken,
    #[error("token cannot be refreshed: {0}")]
    RefreshUnsupported(String),
    #[error("token contains characters not allowed in a header")]
    InvalidToken,
    #[error("server rejected the refreshed token")]
    Rejected,
}

/// Supplies a valid bearer token.
pub trait CredentialProvider: Send + Sync {
    /// A token to use for the next request.
    fn bearer_token(&self) -> Result<String, AuthError>;

    /// Called when the server answered 401 to `rejected`. Returns a fresh token.
    fn refresh(&self, rejected: &str) -> Result<String, AuthError> {
        let _ = rejected;
        self.bearer_token()
    }
}

impl<P: CredentialProvider + ?Sized> CredentialProvider for Box<P> {
    fn bearer_token(&self) -> Result<String, AuthError> {
        (**self).bearer_token()
    }

    fn refresh(&self, rejected: &str) -> Result<String, AuthError> {
        (**self).refresh(rejected)
    }
}

fn non_empty(token: String) -> Result<String, AuthError> {
    let token = token.trim().to_string();
    if token.is_empty() {
        Err(AuthError::EmptyToken)
    } else {
        Ok(token)
    }
}

/// A fixed token. Refresh is impossible.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Result<String, AuthError> {
        non_empty(self.0.clone())
    }

    fn refresh(&self, _rejected: &str) -> Result<String, AuthError> {
        Err(AuthError::RefreshUnsupported("static token".to_string()))
    }
}

/// Reads the token from an environment variable on every call, so an external
/// refresher can rotate it while an upload runs.
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(TOKEN_ENV_VAR)
    }
}

impl CredentialProvider for EnvToken {
    fn bearer_token(&self) -> Result<String, AuthError> {
        let token = std::env::var(&self.var).map_err(|_| AuthError::MissingEnv(self.var.clone()))?;
        non_empty(token)
    }

    fn refresh(&self, rejected: &str) -> Result<String, AuthError> {
        let token = self.bearer_token()?;
        if token == rejected {
            return Err(AuthError::RefreshUnsupported(format!(
                "{} still holds the rejected token",
                self.var
            )));
        }
        Ok(token)
    }
}

/// Runs an external command (e.g. `gcloud auth print-access-token`) and uses
/// its trimmed stdout as the token. The result is cached until a refresh.
pub struct CommandToken {
    program: String,
    args: Vec<String>,
    cached: Mutex<Option<String>>,
}

impl CommandToken {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cached: Mutex::new(None),
        }
    }

    /// Split a shell-like command line on whitespace.
    pub fn from_command_line(line: &str) -> Result<Self, AuthError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| AuthError::Command("empty token command".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    fn run(&self) -> Result<String, AuthError> {
        debug!("running token command: {}", self.program);
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| AuthError::Command(format!("failed to spawn {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(AuthError::Command(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        non_empty(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl CredentialProvider for CommandToken {
    fn bearer_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.run()?;
        *cached = Some(token.clone());
        Ok(token)
    }

    fn refresh(&self, _rejected: &str) -> Result<String, AuthError> {
        let token = self.run()?;
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        Ok(token)
    }
}
