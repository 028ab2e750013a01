//! Extract the username and password from a credential submission.
use http::HeaderMap;
use secrecy::SecretString;
use std::collections::HashMap;

/// The credentials submitted by the client.
pub(crate) struct Credentials {
    pub(crate) username: String,
    pub(crate) password: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
/// The credential submission can't be interpreted.
pub(crate) enum MalformedCredentials {
    #[error("The `Content-Type` header is missing. Credentials must be submitted as `application/x-www-form-urlencoded`")]
    MissingContentType,
    #[error("The `Content-Type` header was set to `{actual}`. Credentials must be submitted as `application/x-www-form-urlencoded`")]
    ContentTypeMismatch { actual: String },
    #[error("Failed to parse the submitted form")]
    Deserialization(#[source] serde_html_form::de::Error),
    #[error("The `{field}` field is missing")]
    MissingField { field: String },
}

/// Parse a form submission, looking for the configured username and password fields.
pub(crate) fn extract(
    headers: &HeaderMap,
    body: &[u8],
    username_field: &str,
    password_field: &str,
) -> Result<Credentials, MalformedCredentials> {
    check_urlencoded_content_type(headers)?;
    let mut fields: HashMap<String, String> =
        serde_html_form::from_bytes(body).map_err(MalformedCredentials::Deserialization)?;
    let username = fields
        .remove(username_field)
        .ok_or_else(|| MalformedCredentials::MissingField {
            field: username_field.to_owned(),
        })?;
    let password = fields
        .remove(password_field)
        .map(SecretString::from)
        .ok_or_else(|| MalformedCredentials::MissingField {
            field: password_field.to_owned(),
        })?;
    Ok(Credentials { username, password })
}

/// Check that the `Content-Type` header is set to `application/x-www-form-urlencoded`.
fn check_urlencoded_content_type(headers: &HeaderMap) -> Result<(), MalformedCredentials> {
    let Some(content_type) = headers.get(http::header::CONTENT_TYPE) else {
        return Err(MalformedCredentials::MissingContentType);
    };
    let Ok(content_type) = content_type.to_str() else {
        return Err(MalformedCredentials::MissingContentType);
    };
    let mismatch = || MalformedCredentials::ContentTypeMismatch {
        actual: content_type.to_string(),
    };
    let Ok(mime) = content_type.parse::<mime::Mime>() else {
        return Err(mismatch());
    };
    if mime.type_() != mime::APPLICATION || mime.subtype() != mime::WWW_FORM_URLENCODED {
        return Err(mismatch());
    }
    Ok(())
}
