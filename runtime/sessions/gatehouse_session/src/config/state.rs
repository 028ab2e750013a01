use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how long sessions live on the server.
pub struct SessionStateConfig {
    /// How long a session may sit idle before it's considered expired.
    ///
    /// Every request that resolves the session pushes the deadline forward
    /// (sliding expiration).
    ///
    /// Expressed in whole seconds. Zero or a negative value disables expiry
    /// altogether: the session lives until it's explicitly invalidated.
    ///
    /// # Default
    ///
    /// 30 minutes.
    #[serde(
        rename = "max_inactive_interval_secs",
        default = "default_max_inactive_interval"
    )]
    pub max_inactive_interval: InactivityTimeout,
    /// How often the background sweeper should purge expired sessions,
    /// if it's running at all.
    ///
    /// # Default
    ///
    /// 60 seconds.
    #[serde(with = "humantime_serde", default = "default_sweep_period")]
    pub sweep_period: Duration,
}

impl Default for SessionStateConfig {
    fn default() -> Self {
        Self {
            max_inactive_interval: default_max_inactive_interval(),
            sweep_period: default_sweep_period(),
        }
    }
}

fn default_max_inactive_interval() -> InactivityTimeout {
    InactivityTimeout::from_secs(30 * 60)
}

fn default_sweep_period() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// How long a session may stay idle before it expires.
pub enum InactivityTimeout {
    /// The session never expires due to inactivity.
    Never,
    /// The session expires once this much time has elapsed since its last access.
    After(Duration),
}

impl InactivityTimeout {
    /// Interpret a number of seconds the way session timeouts are conventionally
    /// configured: a value `<= 0` means "never expire".
    pub fn from_secs(secs: i64) -> Self {
        if secs <= 0 {
            Self::Never
        } else {
            Self::After(Duration::from_secs(secs.unsigned_abs()))
        }
    }

    /// The timeout as a number of seconds, `-1` for [`InactivityTimeout::Never`].
    pub fn as_secs(&self) -> i64 {
        match self {
            Self::Never => -1,
            Self::After(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// The instant after which a session last accessed at `last_access` is stale.
    ///
    /// `None` if the session never expires.
    pub fn deadline(&self, last_access: jiff::Timestamp) -> Option<jiff::Timestamp> {
        match self {
            Self::Never => None,
            Self::After(d) => Some(
                last_access
                    .checked_add(*d)
                    .unwrap_or(jiff::Timestamp::MAX),
            ),
        }
    }
}

impl serde::Serialize for InactivityTimeout {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.as_secs())
    }
}

impl<'de> serde::Deserialize<'de> for InactivityTimeout {
    fn deserialize<D>(deserializer: D) -> Result<InactivityTimeout, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let secs = i64::deserialize(deserializer)?;
        Ok(InactivityTimeout::from_secs(secs))
    }
}
