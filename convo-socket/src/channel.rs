//! Bayeux channel pattern matching.

/// A subscription pattern such as `/sdk/apps/a1/appusers/u1` or `/foo/**`.
///
/// Matching is segment-wise. A trailing `**` matches whatever remains of the
/// channel, including nothing, so `/foo/**` also matches `/foo`. Every other
/// segment must match exactly and, without `**`, the channel must have the
/// same number of segments as the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPattern {
    raw: String,
    segments: Vec<String>,
}

impl ChannelPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let segments = raw.split('/').map(str::to_string).collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, channel: &str) -> bool {
        if self.raw.is_empty() || channel.is_empty() {
            return false;
        }

        let parts: Vec<&str> = channel.split('/').collect();
        let last = self.segments.len() - 1;
        for (i, segment) in self.segments.iter().enumerate() {
            if segment == "**" && i == last {
                return true;
            }
            match parts.get(i) {
                Some(part) if *part == segment => {}
                _ => return false,
            }
        }
        parts.len() == self.segments.len()
    }

    /// Whether `channel` is one of the reserved `/meta/*` channels.
    pub fn is_meta(channel: &str) -> bool {
        channel.starts_with("/meta/")
    }
}

impl std::fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
