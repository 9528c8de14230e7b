use std::fmt;

use crate::database::error::StoreError;

const MAX_IDENTIFIER_LEN: usize = 64;

/// The account the application connects with. Its privileges never reach
/// beyond the one database named in the surrounding [`ProvisionPlan`].
#[derive(Clone)]
pub struct ServiceCredential {
    user: String,
    host: String,
    password: String,
}

impl ServiceCredential {
    pub fn new(
        user: impl Into<String>,
        host: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let user = user.into();
        let host = host.into();
        let password = password.into();

        validate_identifier("user name", &user)?;
        validate_host(&host)?;
        if password.is_empty() {
            return Err(StoreError::InvalidInput("service password must not be empty"));
        }

        Ok(Self {
            user,
            host,
            password,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// `'user'@'host'` as MySQL account syntax.
    pub fn account(&self) -> String {
        format!("{}@{}", quote_literal(&self.user), quote_literal(&self.host))
    }
}

impl fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredential")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    database: String,
    credential: Option<ServiceCredential>,
}

impl ProvisionPlan {
    pub fn new(database: impl Into<String>) -> Result<Self, StoreError> {
        let database = database.into();
        validate_identifier("database name", &database)?;
        Ok(Self {
            database,
            credential: None,
        })
    }

    /// Plan for an embedded store: schema only, no accounts.
    pub fn embedded() -> Self {
        Self {
            database: "main".to_string(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: ServiceCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn credential(&self) -> Option<&ServiceCredential> {
        self.credential.as_ref()
    }
}

pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), StoreError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

fn validate_host(value: &str) -> Result<(), StoreError> {
    let valid = !value.is_empty()
        && value.len() <= 255
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '%' | '-' | ':'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier {
            kind: "host",
            value: value.to_string(),
        })
    }
}

pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn quote_ident(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}
