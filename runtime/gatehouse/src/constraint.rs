//! Decide which requests require an authenticated user, and which roles that user must hold.
//!
//! Rules bind a URL pattern and a set of HTTP methods to the roles that are allowed
//! through. Patterns follow the usual servlet conventions:
//!
//! - `/exact/path`, matching only that path;
//! - `/prefix/*`, matching `/prefix` and everything below it;
//! - `*.ext`, matching every path whose last segment ends with `.ext`;
//! - `/`, matching everything (the default pattern).
//!
//! For a given path only the most specific matching pattern is considered, in
//! the order above (longer prefixes beat shorter ones). The method filter is
//! then applied to the rules sharing that pattern: if none of them covers the
//! request method, the request is unprotected, even if a less specific pattern
//! would have protected it.
use errors::ConstraintMismatch;
use http::Method;
use std::collections::BTreeSet;
use std::str::FromStr;

/// The role granted to every authenticated user, for constraint purposes.
pub const ANY_AUTHENTICATED_ROLE: &str = "*";

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
/// A security constraint, as written in a configuration file.
///
/// ```yaml
/// constraints:
///   - patterns: ["/admin/*"]
///     roles: ["admin"]
///   - patterns: ["/test"]
///     methods: ["PUT"]
///     roles: ["tomcat"]
/// ```
pub struct ConstraintRuleConfig {
    /// The URL patterns covered by the constraint.
    pub patterns: Vec<String>,
    /// The methods covered by the constraint.
    ///
    /// If empty (and `omitted_methods` is empty too), every method is covered.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Methods excluded from the constraint: every other method is covered.
    ///
    /// It can't be combined with `methods`.
    #[serde(default)]
    pub omitted_methods: Vec<String>,
    /// The roles allowed through.
    ///
    /// - Missing: no authentication is required.
    /// - Empty: nobody is allowed through.
    /// - `["*"]`: any authenticated user is allowed through.
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A servlet-style URL pattern.
pub enum UrlPattern {
    /// Matches a single path.
    Exact(String),
    /// Matches a path and everything below it. The stored prefix has no trailing `/*`.
    Prefix(String),
    /// Matches every path whose last segment has the given extension.
    Extension(String),
    /// Matches every path.
    Default,
}

/// How closely a pattern matches a path. Greater is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Specificity {
    Default,
    Extension,
    Prefix(usize),
    Exact,
}

impl UrlPattern {
    fn specificity(&self, path: &str) -> Option<Specificity> {
        match self {
            UrlPattern::Exact(exact) => (exact == path).then_some(Specificity::Exact),
            UrlPattern::Prefix(prefix) => {
                let is_match = match path.strip_prefix(prefix.as_str()) {
                    Some(rest) => rest.is_empty() || rest.starts_with('/'),
                    None => false,
                };
                is_match.then_some(Specificity::Prefix(prefix.len()))
            }
            UrlPattern::Extension(extension) => {
                let last_segment = path.rsplit('/').next().unwrap_or(path);
                let is_match = last_segment
                    .rsplit_once('.')
                    .is_some_and(|(_, ext)| ext == extension);
                is_match.then_some(Specificity::Extension)
            }
            UrlPattern::Default => Some(Specificity::Default),
        }
    }
}

impl FromStr for UrlPattern {
    type Err = ConstraintMismatch;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &'static str| ConstraintMismatch::InvalidPattern {
            pattern: pattern.to_owned(),
            reason,
        };
        if pattern.is_empty() {
            // The empty string denotes the context root.
            return Ok(UrlPattern::Exact("/".into()));
        }
        if pattern == "/" {
            return Ok(UrlPattern::Default);
        }
        if let Some(extension) = pattern.strip_prefix("*.") {
            if extension.is_empty() || extension.contains(['/', '*']) {
                return Err(invalid("an extension pattern must look like `*.ext`"));
            }
            return Ok(UrlPattern::Extension(extension.to_owned()));
        }
        if !pattern.starts_with('/') {
            return Err(invalid("patterns must start with `/` or `*.`"));
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if prefix.contains('*') {
                return Err(invalid("`*` is only allowed as the last path segment"));
            }
            return Ok(UrlPattern::Prefix(prefix.to_owned()));
        }
        if pattern.contains('*') {
            return Err(invalid("`*` is only allowed as the last path segment"));
        }
        Ok(UrlPattern::Exact(pattern.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The methods a rule applies to.
pub enum MethodFilter {
    All,
    Only(Vec<Method>),
    AllExcept(Vec<Method>),
}

impl MethodFilter {
    pub fn covers(&self, method: &Method) -> bool {
        match self {
            MethodFilter::All => true,
            MethodFilter::Only(methods) => methods.contains(method),
            MethodFilter::AllExcept(methods) => !methods.contains(method),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Who may access the resources covered by a rule.
pub enum AuthConstraint {
    /// No authentication is required.
    None,
    /// Only principals holding one of these roles are allowed through.
    ///
    /// An empty set denies access to everybody,
    /// [`ANY_AUTHENTICATED_ROLE`] admits every authenticated principal.
    Roles(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A single security constraint.
pub struct ConstraintRule {
    pub pattern: UrlPattern,
    pub methods: MethodFilter,
    pub auth: AuthConstraint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The outcome of [`ConstraintSet::classify`].
pub enum Classification {
    /// Anybody may access the resource.
    Unprotected,
    /// The client must authenticate and satisfy the role requirement.
    Protected(RequiredRoles),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The role requirement for a protected resource.
pub enum RequiredRoles {
    /// Any authenticated principal.
    AnyAuthenticated,
    /// Principals holding at least one of these roles.
    AnyOf(BTreeSet<String>),
    /// No principal, however authenticated.
    Nobody,
}

impl RequiredRoles {
    /// Check the requirement against a principal, using `has_role` to check role membership.
    pub fn is_satisfied_by(&self, mut has_role: impl FnMut(&str) -> bool) -> bool {
        match self {
            RequiredRoles::AnyAuthenticated => true,
            RequiredRoles::AnyOf(roles) => roles.iter().any(|role| has_role(role)),
            RequiredRoles::Nobody => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// An immutable set of security constraints.
///
/// It is safe to share across any number of concurrent requests.
pub struct ConstraintSet {
    rules: Vec<ConstraintRule>,
}

impl ConstraintSet {
    pub fn new(rules: Vec<ConstraintRule>) -> Self {
        Self { rules }
    }

    /// Validate constraints coming from configuration.
    pub fn from_config(configs: &[ConstraintRuleConfig]) -> Result<Self, ConstraintMismatch> {
        let mut rules = Vec::new();
        for (index, config) in configs.iter().enumerate() {
            if config.patterns.is_empty() {
                return Err(ConstraintMismatch::NoPatterns { index });
            }
            if !config.methods.is_empty() && !config.omitted_methods.is_empty() {
                return Err(ConstraintMismatch::ConflictingMethodFilters { index });
            }
            let methods = if !config.methods.is_empty() {
                MethodFilter::Only(parse_methods(&config.methods)?)
            } else if !config.omitted_methods.is_empty() {
                MethodFilter::AllExcept(parse_methods(&config.omitted_methods)?)
            } else {
                MethodFilter::All
            };
            let auth = match &config.roles {
                None => AuthConstraint::None,
                Some(roles) => {
                    if let Some(role) = roles.iter().find(|role| role.trim().is_empty()) {
                        return Err(ConstraintMismatch::InvalidRole {
                            index,
                            role: role.clone(),
                        });
                    }
                    AuthConstraint::Roles(roles.iter().cloned().collect())
                }
            };
            for pattern in &config.patterns {
                rules.push(ConstraintRule {
                    pattern: pattern.parse()?,
                    methods: methods.clone(),
                    auth: auth.clone(),
                });
            }
        }
        Ok(Self { rules })
    }

    /// Determine whether `method` on `path` requires authentication.
    ///
    /// `path` must be percent-decoded and stripped of session path parameters.
    pub fn classify(&self, method: &Method, path: &str) -> Classification {
        let Some(best) = self
            .rules
            .iter()
            .filter_map(|rule| rule.pattern.specificity(path))
            .max()
        else {
            return Classification::Unprotected;
        };

        let mut any_rule = false;
        let mut public = false;
        let mut deny = false;
        let mut any_authenticated = false;
        let mut roles = BTreeSet::new();
        let applicable = self.rules.iter().filter(|rule| {
            rule.pattern.specificity(path) == Some(best) && rule.methods.covers(method)
        });
        for rule in applicable {
            any_rule = true;
            match &rule.auth {
                AuthConstraint::None => public = true,
                AuthConstraint::Roles(r) if r.is_empty() => deny = true,
                AuthConstraint::Roles(r) => {
                    for role in r {
                        if role == ANY_AUTHENTICATED_ROLE {
                            any_authenticated = true;
                        } else {
                            roles.insert(role.clone());
                        }
                    }
                }
            }
        }

        // An excluding rule beats everything, an unconstrained one beats role lists.
        if !any_rule {
            Classification::Unprotected
        } else if deny {
            Classification::Protected(RequiredRoles::Nobody)
        } else if public {
            Classification::Unprotected
        } else if any_authenticated {
            Classification::Protected(RequiredRoles::AnyAuthenticated)
        } else {
            Classification::Protected(RequiredRoles::AnyOf(roles))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn parse_methods(raw: &[String]) -> Result<Vec<Method>, ConstraintMismatch> {
    raw.iter()
        .map(|method| {
            Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
                ConstraintMismatch::InvalidMethod {
                    method: method.clone(),
                }
            })
        })
        .collect()
}

pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// A security constraint in the configuration is malformed.
    pub enum ConstraintMismatch {
        #[error("`{pattern}` is not a valid URL pattern: {reason}")]
        InvalidPattern {
            pattern: String,
            reason: &'static str,
        },
        #[error("`{method}` is not a valid HTTP method")]
        InvalidMethod { method: String },
        #[error("Constraint #{index} doesn't list any URL pattern")]
        NoPatterns { index: usize },
        #[error("Constraint #{index} sets both `methods` and `omitted_methods`, pick one")]
        ConflictingMethodFilters { index: usize },
        #[error("Constraint #{index} lists a blank role (`{role}`)")]
        InvalidRole { index: usize, role: String },
    }
}
