use serde::{Deserialize, Serialize};

/// Delivery channel a message travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    WhatsApp,
}

impl ChannelKind {
    /// Returns the string representation of the channel.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::WhatsApp => "whatsapp",
        }
    }

    /// All channels, in registry iteration order.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Email, Self::Sms, Self::WhatsApp]
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "whatsapp" => Ok(Self::WhatsApp),
            _ => Err(anyhow::anyhow!("Invalid channel: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trip() {
        for kind in ChannelKind::all() {
            let parsed: ChannelKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_channel_rejects_unknown() {
        assert!("carrier-pigeon".parse::<ChannelKind>().is_err());
    }
}
