//! Server group name parsing.
//!
//! Server groups are named `app[-stack[-detail...]][-vNNN]`. The application
//! and cluster a server group belongs to are recovered from the name alone,
//! so the server group loader can wire application and cluster relationships
//! without a second remote call.

use std::fmt;

/// The parts of a server group name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Moniker {
    application: String,
    stack: Option<String>,
    detail: Option<String>,
    cluster: String,
    sequence: Option<u32>,
}

impl Moniker {
    /// Parse a server group (or cluster) name.
    ///
    /// Returns `None` for an empty name or a name starting with `-`.
    ///
    /// ```rust
    /// use cloudsync_core::Moniker;
    ///
    /// let m = Moniker::parse("web-prod-canary-v003").unwrap();
    /// assert_eq!(m.application(), "web");
    /// assert_eq!(m.stack(), Some("prod"));
    /// assert_eq!(m.detail(), Some("canary"));
    /// assert_eq!(m.cluster(), "web-prod-canary");
    /// assert_eq!(m.sequence(), Some(3));
    /// ```
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() || name.starts_with('-') {
            return None;
        }

        let (cluster, sequence) = match name.rsplit_once('-') {
            Some((head, tail)) if !head.is_empty() => match parse_sequence(tail) {
                Some(seq) => (head, Some(seq)),
                None => (name, None),
            },
            _ => (name, None),
        };

        let mut parts = cluster.splitn(3, '-');
        let application = parts.next().unwrap_or_default().to_string();
        let stack = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let detail = parts.next().filter(|s| !s.is_empty()).map(str::to_string);

        Some(Self {
            application,
            stack,
            detail,
            cluster: cluster.to_string(),
            sequence,
        })
    }

    /// The application name.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    /// The stack, if present.
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// The free-form detail, if present.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// The cluster name (the server group name without its sequence).
    #[must_use]
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// The server group sequence number.
    #[must_use]
    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }
}

impl fmt::Display for Moniker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sequence {
            Some(seq) => write!(f, "{}-v{seq:03}", self.cluster),
            None => f.write_str(&self.cluster),
        }
    }
}

fn parse_sequence(tail: &str) -> Option<u32> {
    let digits = tail.strip_prefix('v')?;
    if digits.len() < 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
