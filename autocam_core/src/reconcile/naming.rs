use std::fmt;

const SEPARATOR: char = '-';

/// Object-store key of a part's design artifact: `{prefix}-{part_name}-{filename}`.
///
/// Both the part name and the filename may contain `-`; [`ArtifactKey::parse`]
/// always splits on the last one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    prefix: String,
    part_name: String,
    filename: String,
}

impl ArtifactKey {
    pub fn new(
        prefix: impl Into<String>,
        part_name: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            part_name: part_name.into(),
            filename: filename.into(),
        }
    }

    /// Listing prefix for every artifact under `prefix` (`"Valor-"` by default).
    pub fn listing_prefix(prefix: &str) -> String {
        format!("{prefix}{SEPARATOR}")
    }

    /// Parse a stored key; `None` if it does not start with `{prefix}-` or has
    /// no `-` separating a non-empty part name from a non-empty filename.
    pub fn parse(prefix: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(&Self::listing_prefix(prefix))?;
        let (part_name, filename) = rest.rsplit_once(SEPARATOR)?;
        if part_name.is_empty() || filename.is_empty() {
            return None;
        }
        Some(Self::new(prefix, part_name, filename))
    }

    pub fn part_name(&self) -> &str {
        &self.part_name
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.prefix, self.part_name, self.filename
        )
    }
}
