use std::collections::BTreeMap;

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const LAST_ACCESS_KEY: &str = "duplicati-last-access";
pub const LAST_MODIFICATION_KEY: &str = "duplicati-last-modification";

/// Handle to a bucket that is known to exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    name: String,
}

impl Bucket {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CustomMetadata {
    entries: BTreeMap<String, String>,
}

impl CustomMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata stamped on every upload: `now` as both last access and last modification.
    pub fn timestamps(now: OffsetDateTime) -> Self {
        let stamp = format_timestamp(now);
        let mut metadata = Self::new();
        metadata.insert(LAST_ACCESS_KEY, &stamp);
        metadata.insert(LAST_MODIFICATION_KEY, &stamp);
        metadata
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn timestamp(&self, key: &str) -> Option<OffsetDateTime> {
        self.get(key)
            .and_then(|value| OffsetDateTime::parse(value, &Rfc3339).ok())
    }
}

impl FromIterator<(String, String)> for CustomMetadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub fn format_timestamp(at: OffsetDateTime) -> String {
    // Rfc3339 only fails for years outside 0..=9999.
    at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListOptions {
    pub prefix: String,
    pub recursive: bool,
    pub system: bool,
    pub custom: bool,
}

impl ListOptions {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            recursive: true,
            system: true,
            custom: true,
        }
    }
}

/// An object (or common prefix) as reported by the object service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub is_prefix: bool,
    pub size: u64,
    pub created: Option<OffsetDateTime>,
    pub custom: CustomMetadata,
}

/// A listed backup file, named relative to the configured folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub last_access: Option<OffsetDateTime>,
    pub last_modification: Option<OffsetDateTime>,
    pub is_folder: bool,
}

impl RemoteEntry {
    pub fn from_object(info: ObjectInfo, name: String) -> Self {
        let last_access = info.custom.timestamp(LAST_ACCESS_KEY).or(info.created);
        let last_modification = info.custom.timestamp(LAST_MODIFICATION_KEY).or(info.created);

        Self {
            name,
            size: info.size,
            last_access,
            last_modification,
            is_folder: info.is_prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(custom: CustomMetadata) -> ObjectInfo {
        ObjectInfo {
            key: "folder/a.txt".to_string(),
            is_prefix: false,
            size: 12,
            created: Some(OffsetDateTime::UNIX_EPOCH),
            custom,
        }
    }

    #[test]
    fn test_timestamps_metadata() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let metadata = CustomMetadata::timestamps(now);

        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata.get(LAST_ACCESS_KEY), Some("2023-11-14T22:13:20Z"));
        assert_eq!(metadata.get(LAST_ACCESS_KEY), metadata.get(LAST_MODIFICATION_KEY));
    }

    #[test]
    fn test_entry_prefers_custom_timestamps() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let entry = RemoteEntry::from_object(object(CustomMetadata::timestamps(now)), "a.txt".into());

        assert_eq!(entry.name, "a.txt");
        assert_eq!(entry.size, 12);
        assert_eq!(entry.last_modification, Some(now));
        assert!(!entry.is_folder);
    }

    #[test]
    fn test_entry_falls_back_to_system_time() {
        let mut custom = CustomMetadata::new();
        custom.insert(LAST_MODIFICATION_KEY, "yesterday");
        let entry = RemoteEntry::from_object(object(custom), "a.txt".into());

        assert_eq!(entry.last_modification, Some(OffsetDateTime::UNIX_EPOCH));
        assert_eq!(entry.last_access, Some(OffsetDateTime::UNIX_EPOCH));
    }
}
