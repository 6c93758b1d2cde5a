use std::{
    fmt::{Debug, Formatter},
    fs,
    path::Path,
};

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::ArchError;

/// Secret handed to the remote archive. Never logged, never written to disk.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Token(String),
    Basic { username: String, password: String },
}

impl Credential {
    /// Read a bearer token from the first non-comment line of `path`.
    ///
    /// A `KEY=VALUE` line yields its value, anything else is taken verbatim.
    pub fn from_token_file<P: AsRef<Path>>(path: P) -> Result<Self, ArchError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| ArchError::Credential {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;

        let line = contents
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .ok_or_else(|| ArchError::Credential {
                path: path.to_owned(),
                reason: "no token line found".into(),
            })?;

        // Base64 padding is part of a bare token, not a KEY=VALUE separator.
        let token = match line.split_once('=') {
            Some((_key, value)) if !value.trim().trim_matches('=').is_empty() => value.trim(),
            _ => line,
        };

        if token.is_empty() {
            return Err(ArchError::Credential {
                path: path.to_owned(),
                reason: "token is empty".into(),
            });
        }

        Ok(Credential::Token(token.to_owned()))
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        match self {
            Credential::Token(token) => format!("Bearer {}", token),
            Credential::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
            }
        }
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        match self {
            Credential::Token(_) => write!(f, "Token(<redacted>)"),
            Credential::Basic { username, .. } => {
                write!(f, "Basic {{ username: {:?}, password: <redacted> }}", username)
            }
        }
    }
}

/// Per-run settings shared by every component.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub credential: Option<Credential>,
    pub user_agent: String,
    pub verbosity: u8,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            credential: None,
            user_agent: concat!("earthdata_arch/", env!("CARGO_PKG_VERSION")).to_owned(),
            verbosity: 0,
        }
    }
}

impl RunContext {
    pub fn new(credential: Option<Credential>, verbosity: u8) -> Self {
        Self {
            credential,
            verbosity,
            ..Self::default()
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn request(&self, url: &str) -> Request {
        let mut headers = vec![("User-Agent".to_owned(), self.user_agent.clone())];
        if let Some(cred) = &self.credential {
            headers.push(("Authorization".to_owned(), cred.authorization()));
        }

        Request {
            url: url.to_owned(),
            headers,
        }
    }

    pub(crate) fn shows_progress(&self) -> bool {
        self.verbosity > 0
    }

    pub(crate) fn shows_skips(&self) -> bool {
        self.verbosity > 1
    }
}

/// One GET: the target URL plus every header to send with it.
#[derive(Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Debug for Request {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        let names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("headers", &names)
            .finish()
    }
}
