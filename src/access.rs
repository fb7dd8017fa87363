use std::fmt;

use crate::{
    config::{AuthMethod, Config},
    model::error::Error,
};

/// Authorization material every storage call is scoped by.
#[derive(Clone, PartialEq, Eq)]
pub enum Access {
    /// A serialized access grant, issued elsewhere.
    Grant(String),
    /// Satellite address plus API key and encryption secret. Missing key or
    /// secret are passed through for the service to reject.
    Explicit {
        satellite: String,
        api_key: Option<String>,
        secret: Option<String>,
    },
}

impl Access {
    pub fn build(config: &Config) -> Result<Self, Error> {
        match config.auth_method {
            AuthMethod::AccessGrant => {
                let grant = config
                    .shared_access
                    .as_deref()
                    .filter(|grant| !grant.is_empty())
                    .ok_or_else(|| {
                        Error::Configuration("access grant authentication needs a shared access".into())
                    })?;

                Ok(Access::Grant(grant.to_string()))
            }
            AuthMethod::ApiKey => {
                let satellite = config
                    .satellite
                    .as_deref()
                    .filter(|satellite| !satellite.is_empty())
                    .ok_or_else(|| {
                        Error::Configuration("API key authentication needs a satellite".into())
                    })?;

                Ok(Access::Explicit {
                    satellite: satellite.to_string(),
                    api_key: config.api_key.clone(),
                    secret: config.secret.clone(),
                })
            }
        }
    }

    pub fn auth_method(&self) -> AuthMethod {
        match self {
            Access::Grant(_) => AuthMethod::AccessGrant,
            Access::Explicit { .. } => AuthMethod::ApiKey,
        }
    }
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Grant(_) => f.debug_tuple("Grant").field(&"<redacted>").finish(),
            Access::Explicit { satellite, .. } => f
                .debug_struct("Explicit")
                .field("satellite", satellite)
                .field("api_key", &"<redacted>")
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}
