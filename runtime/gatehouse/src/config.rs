//! Configuration for form-based login, and the loader that assembles it
//! from configuration files and environment variables.
use crate::constraint::ConstraintRuleConfig;
use crate::response::CachePolicy;
use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use gatehouse_session::SessionConfig;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;
use ubyte::{ByteUnit, ToByteUnit};

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Everything the authenticator needs to know, in one place.
pub struct GatehouseConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub login: FormLoginConfig,
    #[serde(default)]
    pub constraints: Vec<ConstraintRuleConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
/// How unauthenticated clients are asked for credentials.
pub enum ChallengeStyle {
    /// Answer the protected request with the login page itself.
    #[default]
    Render,
    /// Redirect the client to [`FormLoginConfig::login_page`].
    Redirect,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the login dialogue.
pub struct FormLoginConfig {
    /// Where the login page lives.
    ///
    /// Requests for it are never challenged. Clients are redirected here when
    /// [`challenge`](Self::challenge) is set to [`ChallengeStyle::Redirect`].
    ///
    /// Default is `/login`.
    #[serde(default = "default_login_page")]
    pub login_page: String,
    /// Where to send clients whose credentials were rejected.
    ///
    /// If unset, the login page is shown again, flagged as a failed attempt.
    #[serde(default)]
    pub error_page: Option<String>,
    /// Where to send clients that logged in without a pending request
    /// to return to.
    ///
    /// Default is `/`.
    #[serde(default = "default_landing_page")]
    pub landing_page: String,
    #[serde(default)]
    pub challenge: ChallengeStyle,
    /// Rotate the session identifier when the session becomes authenticated.
    ///
    /// It defeats session fixation attacks. Turn it off only if a downstream
    /// component can't cope with the identifier changing.
    ///
    /// Default is `true`.
    #[serde(default = "default_true")]
    pub change_session_id_on_authentication: bool,
    /// The last path segment of the credential submission endpoint.
    ///
    /// Default is `j_security_check`.
    #[serde(default = "default_action")]
    pub action: String,
    /// Default is `j_username`.
    #[serde(default = "default_username_field")]
    pub username_field: String,
    /// Default is `j_password`.
    #[serde(default = "default_password_field")]
    pub password_field: String,
    /// An upper bound on the time the realm may take to verify credentials.
    ///
    /// Default is 5 seconds.
    #[serde(with = "humantime_serde", default = "default_realm_timeout")]
    pub realm_timeout: Duration,
    /// The largest request body that can be kept aside while the client logs in.
    ///
    /// Larger requests get a `413 Payload Too Large`.
    ///
    /// Default is 4 KiB.
    #[serde(default = "default_max_saved_body_size")]
    pub max_saved_body_size: ByteUnit,
    /// Ask intermediaries not to cache access-controlled responses.
    ///
    /// Default is `true`.
    #[serde(default = "default_true")]
    pub disable_proxy_caching: bool,
    /// Use `Pragma: No-cache` rather than `Cache-Control: private` when
    /// [`disable_proxy_caching`](Self::disable_proxy_caching) is on.
    ///
    /// Default is `false`.
    #[serde(default)]
    pub secure_pages_with_pragma: bool,
}

impl Default for FormLoginConfig {
    fn default() -> Self {
        Self {
            login_page: default_login_page(),
            error_page: None,
            landing_page: default_landing_page(),
            challenge: ChallengeStyle::default(),
            change_session_id_on_authentication: true,
            action: default_action(),
            username_field: default_username_field(),
            password_field: default_password_field(),
            realm_timeout: default_realm_timeout(),
            max_saved_body_size: default_max_saved_body_size(),
            disable_proxy_caching: true,
            secure_pages_with_pragma: false,
        }
    }
}

impl FormLoginConfig {
    pub(crate) fn cache_policy(&self) -> CachePolicy {
        match (self.disable_proxy_caching, self.secure_pages_with_pragma) {
            (false, _) => CachePolicy::Unchanged,
            (true, false) => CachePolicy::Private,
            (true, true) => CachePolicy::NoCache,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_login_page() -> String {
    "/login".to_string()
}

fn default_landing_page() -> String {
    "/".to_string()
}

fn default_action() -> String {
    "j_security_check".to_string()
}

fn default_username_field() -> String {
    "j_username".to_string()
}

fn default_password_field() -> String {
    "j_password".to_string()
}

fn default_realm_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_saved_body_size() -> ByteUnit {
    4.kibibytes()
}

static PROFILE_ENV_VAR: &str = "GATEHOUSE_PROFILE";
static ENV_PREFIX: &str = "GATEHOUSE_";

#[derive(Clone, Debug, Default)]
/// Load hierarchical configuration.
///
/// Check out [`ConfigLoader::load`] for more information.
pub struct ConfigLoader {
    configuration_dir: Option<PathBuf>,
    profile: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Specify the profile manually, rather than loading it
    /// from the `GATEHOUSE_PROFILE` environment variable.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Specify the path to the directory where configuration files are stored.
    ///
    /// # Default value
    ///
    /// By default, configuration files are looked up under `configuration/`,
    /// relative to the current working directory.
    pub fn configuration_dir<Dir>(mut self, dir: Dir) -> Self
    where
        Dir: Into<PathBuf>,
    {
        self.configuration_dir = Some(dir.into());
        self
    }

    /// Load the configuration by merging together three sources:
    ///
    /// 1. Environment variables (`GATEHOUSE_*`, nested keys separated by `__`)
    /// 2. Profile-specific configuration file (`{configuration_dir}/{profile}.yml`)
    /// 3. Base configuration file (`{configuration_dir}/base.yml`)
    ///
    /// The list above is ordered by precedence: environment variables take precedence
    /// over profile-specific configuration files, which in turn take precedence
    /// over the base configuration file. Missing files are skipped.
    pub fn load<Config>(self) -> Result<Config, errors::ConfigLoadError>
    where
        Config: DeserializeOwned,
    {
        let profile = match self.profile {
            Some(profile) => profile,
            None => std::env::var(PROFILE_ENV_VAR)
                .context(
                    "Failed to load the configuration profile: the environment variable `GATEHOUSE_PROFILE` is either not set or set to a value that contains invalid UTF-8",
                )
                .map_err(errors::ConfigLoadError)?,
        };
        let configuration_dir = self
            .configuration_dir
            .unwrap_or_else(|| PathBuf::from("configuration"));
        let span = tracing::info_span!(
            "Loading configuration",
            configuration.directory = %configuration_dir.display(),
            configuration.profile = %profile,
        );
        let _guard = span.enter();
        let base_filepath = configuration_dir.join("base.yml");
        let profile_filepath = configuration_dir.join(format!("{profile}.yml"));

        let env_source = Env::prefixed(ENV_PREFIX)
            .split("__")
            // The profile selector is not part of the configuration.
            .ignore(&["PROFILE"]);
        let figment = Figment::new()
            .merge(Yaml::file(base_filepath))
            .merge(Yaml::file(profile_filepath))
            .merge(env_source);

        let configuration: Config = figment
            .extract()
            .context("Failed to load hierarchical configuration")
            .map_err(errors::ConfigLoadError)?;
        Ok(configuration)
    }
}

/// Errors that can occur when loading configuration.
pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[error("Failed to load configuration")]
    /// The error returned by [`ConfigLoader::load`](super::ConfigLoader::load).
    pub struct ConfigLoadError(#[source] pub(super) anyhow::Error);
}
