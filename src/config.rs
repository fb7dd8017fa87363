//! Backend options as handed over by the backup engine or the command line.

use std::collections::HashMap;

use crate::{model::error::Error, util};

pub const PROTOCOL_KEY: &str = "tardigrade";
pub const DISPLAY_NAME: &str = "Tardigrade Decentralized Cloud Storage";
pub const DESCRIPTION: &str =
    "This backend can read and write data to the Tardigrade Decentralized Cloud Storage.";

pub const AUTH_METHOD: &str = "tardigrade-auth-method";
pub const SATELLITE: &str = "tardigrade-satellite";
pub const API_KEY: &str = "tardigrade-api-key";
pub const SECRET: &str = "tardigrade-secret";
pub const SHARED_ACCESS: &str = "tardigrade-shared-access";
pub const BUCKET: &str = "tardigrade-bucket";
pub const FOLDER: &str = "tardigrade-folder";

pub const DEFAULT_BUCKET: &str = "duplicati";
pub const DEFAULT_SATELLITE: &str = "us-central-1.tardigrade.io:7777";

pub const KNOWN_SATELLITES: [(&str, &str); 3] = [
    ("US Central 1", "us-central-1.tardigrade.io:7777"),
    ("Asia East 1", "asia-east-1.tardigrade.io:7777"),
    ("Europe West 1", "europe-west-1.tardigrade.io:7777"),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMethod {
    #[default]
    ApiKey,
    AccessGrant,
}

impl AuthMethod {
    pub const KNOWN: [AuthMethod; 2] = [AuthMethod::ApiKey, AuthMethod::AccessGrant];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::ApiKey => "API key",
            AuthMethod::AccessGrant => "Access grant",
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        Self::KNOWN
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| Error::Configuration(format!("unknown authentication method: {}", value)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub auth_method: AuthMethod,
    pub satellite: Option<String>,
    pub api_key: Option<String>,
    pub secret: Option<String>,
    pub shared_access: Option<String>,
    pub bucket: String,
    pub folder: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_method: AuthMethod::default(),
            satellite: None,
            api_key: None,
            secret: None,
            shared_access: None,
            bucket: DEFAULT_BUCKET.to_string(),
            folder: None,
        }
    }
}

impl Config {
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, Error> {
        let get = |name: &str| options.get(name).cloned();

        let auth_method = match options.get(AUTH_METHOD) {
            Some(value) => AuthMethod::parse(value)?,
            None => AuthMethod::default(),
        };

        Ok(Self {
            auth_method,
            satellite: get(SATELLITE),
            api_key: get(API_KEY),
            secret: get(SECRET),
            shared_access: get(SHARED_ACCESS),
            bucket: get(BUCKET)
                .filter(|bucket| !bucket.is_empty())
                .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            folder: get(FOLDER),
        })
    }

    /// Options win over whatever the `tardigrade://bucket/folder` URL names.
    pub fn from_url(url: &str, options: &HashMap<String, String>) -> Result<Self, Error> {
        let target = util::object::parse_backend_url(url)?;
        let mut config = Self::from_options(options)?;

        if options.get(BUCKET).map_or(true, |bucket| bucket.is_empty()) {
            if let Some(bucket) = target.bucket {
                config.bucket = bucket;
            }
        }
        if config.folder.is_none() {
            config.folder = target.folder;
        }

        Ok(config)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Password,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionDescriptor {
    pub name: &'static str,
    pub kind: OptionKind,
    pub short: &'static str,
    pub long: &'static str,
    pub default: Option<&'static str>,
}

/// Options understood by this backend, for the engine's help output.
pub fn supported_options() -> Vec<OptionDescriptor> {
    vec![
        OptionDescriptor {
            name: AUTH_METHOD,
            kind: OptionKind::String,
            short: "Authentication method",
            long: "The authentication method describes which way to use to connect to the network - either via API key or via an access grant.",
            default: Some(AuthMethod::ApiKey.as_str()),
        },
        OptionDescriptor {
            name: SATELLITE,
            kind: OptionKind::String,
            short: "Satellite",
            long: "The satellite that keeps track of all metadata. Use a Tardigrade-grade server for high-performance SLA-backed connectivity or use a community server.",
            default: Some(DEFAULT_SATELLITE),
        },
        OptionDescriptor {
            name: API_KEY,
            kind: OptionKind::String,
            short: "API key",
            long: "The API key grants access to a specific project on your chosen satellite.",
            default: None,
        },
        OptionDescriptor {
            name: SECRET,
            kind: OptionKind::Password,
            short: "Encryption passphrase",
            long: "The encryption passphrase is used to encrypt your data before sending it to the network.",
            default: None,
        },
        OptionDescriptor {
            name: SHARED_ACCESS,
            kind: OptionKind::String,
            short: "Access grant",
            long: "An access grant contains all information in one encrypted string. You may use it instead of a satellite, API key and secret.",
            default: None,
        },
        OptionDescriptor {
            name: BUCKET,
            kind: OptionKind::String,
            short: "Bucket",
            long: "The bucket where the backup will reside in.",
            default: Some(DEFAULT_BUCKET),
        },
        OptionDescriptor {
            name: FOLDER,
            kind: OptionKind::String,
            short: "Folder",
            long: "The folder within the bucket where the backup will reside in.",
            default: None,
        },
    ]
}
