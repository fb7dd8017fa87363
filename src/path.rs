/// Maps backup file names onto object keys under an optional folder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathNamer {
    prefix: String,
}

impl PathNamer {
    pub fn new(folder: Option<&str>) -> Self {
        let prefix = match folder {
            Some(folder) if !folder.is_empty() => format!("{}/", folder),
            _ => String::new(),
        };

        Self { prefix }
    }

    /// `<folder>/` or the empty string.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn namespaced_key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Removes one leading `<folder>/`; names outside the folder come back unchanged.
    pub fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_folder() {
        for namer in [PathNamer::new(None), PathNamer::new(Some(""))] {
            assert_eq!(namer.prefix(), "");
            assert_eq!(namer.namespaced_key("a.txt"), "a.txt");
            assert_eq!(namer.strip_prefix("a.txt"), "a.txt");
            assert_eq!(namer.strip_prefix("x/a.txt"), "x/a.txt");
        }
    }

    #[test]
    fn test_with_folder() {
        let namer = PathNamer::new(Some("backups"));

        assert_eq!(namer.namespaced_key("a.txt"), "backups/a.txt");
        assert_eq!(namer.strip_prefix("backups/a.txt"), "a.txt");
    }

    #[test]
    fn test_round_trip() {
        let namer = PathNamer::new(Some("nested/dir"));
        for name in ["a.txt", "", "nested/dir/a.txt", "duplicati-b1.dblock.zip.aes"] {
            assert_eq!(namer.strip_prefix(&namer.namespaced_key(name)), name);
        }
    }

    #[test]
    fn test_strip_only_leading_occurrence() {
        let namer = PathNamer::new(Some("f"));

        assert_eq!(namer.strip_prefix("f/f/a"), "f/a");
        assert_eq!(namer.strip_prefix("other/f/a"), "other/f/a");
    }
}
