use std::cmp::Ordering;
use std::fmt;

/// Hub release version (`YYYY.M.P`).
///
/// Parsing keeps the leading numeric components and ignores suffixes, so
/// `2024.2.0b3` and `2024.2.0.dev20240101` both compare as `2024.2.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HubVersion {
    pub year: u32,
    pub month: u32,
    pub patch: u32,
}

impl HubVersion {
    pub const fn new(year: u32, month: u32, patch: u32) -> Self {
        Self { year, month, patch }
    }

    /// Parse a version string reported in `auth_ok`; `None` if it has no
    /// numeric year and month.
    pub fn parse(raw: &str) -> Option<Self> {
        // ---
        let mut parts = raw.trim().split('.').map(leading_number);

        let year = parts.next()??;
        let month = parts.next()??;
        let patch = parts.next().flatten().unwrap_or(0);

        Some(Self { year, month, patch })
    }

    pub fn is_at_least(&self, other: &HubVersion) -> bool {
        // ---
        *self >= *other
    }
}

fn leading_number(part: &str) -> Option<u32> {
    // ---
    let digits: &str = {
        let end = part
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(part.len(), |(idx, _)| idx);
        &part[..end]
    };
    digits.parse().ok()
}

impl PartialOrd for HubVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HubVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year, self.month, self.patch).cmp(&(other.year, other.month, other.patch))
    }
}

impl fmt::Display for HubVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.year, self.month, self.patch)
    }
}
