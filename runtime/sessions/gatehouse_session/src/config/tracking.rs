#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the channels used to carry the session identifier between
/// the client and the server.
pub struct SessionTrackingConfig {
    /// Whether the server emits and honours the session cookie.
    ///
    /// When disabled, incoming session cookies are ignored and the session
    /// identifier travels exclusively as a URL path parameter.
    ///
    /// Default is `true`.
    #[serde(default = "default_true")]
    pub cookies: bool,
    /// Whether outbound URLs are rewritten to carry the session identifier
    /// as a path parameter whenever the client hasn't (yet) proven that it
    /// echoes the session cookie back.
    ///
    /// Default is `true`.
    #[serde(default = "default_true")]
    pub url_rewriting: bool,
    /// The name of the path parameter carrying the session identifier,
    /// as in `/index;jsessionid=<id>?query`.
    ///
    /// Default is `jsessionid`.
    #[serde(default = "default_path_parameter_name")]
    pub path_parameter_name: String,
}

impl Default for SessionTrackingConfig {
    fn default() -> Self {
        Self {
            cookies: true,
            url_rewriting: true,
            path_parameter_name: default_path_parameter_name(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_path_parameter_name() -> String {
    "jsessionid".to_string()
}
