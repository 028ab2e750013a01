use bytes::Bytes;

#[derive(Debug, Clone)]
/// What a login page needs to know to render itself.
pub struct ChallengeContext<'a> {
    /// Where the form must be submitted.
    ///
    /// It already carries the session identifier as a path parameter
    /// when the client isn't known to return the session cookie.
    pub action: &'a str,
    /// The name of the username form field.
    pub username_field: &'a str,
    /// The name of the password form field.
    pub password_field: &'a str,
    /// `true` if the page is shown again after a rejected submission.
    pub failed: bool,
}

/// Renders the HTML login form shown to unauthenticated clients.
pub trait LoginPageRenderer: std::fmt::Debug + Send + Sync {
    fn render(&self, context: &ChallengeContext<'_>) -> Bytes;
}

#[derive(Debug, Clone, Copy, Default)]
/// A bare-bones login form.
pub struct DefaultLoginPage;

impl LoginPageRenderer for DefaultLoginPage {
    fn render(&self, context: &ChallengeContext<'_>) -> Bytes {
        let notice = if context.failed {
            "<p>Invalid username or password.</p>\n"
        } else {
            ""
        };
        format!(
            r#"<!DOCTYPE html>
<html>
<head><title>Login</title></head>
<body>
{notice}<form method="POST" action="{action}">
<label>Username <input type="text" name="{username}"></label>
<label>Password <input type="password" name="{password}"></label>
<input type="submit" value="Log in">
</form>
</body>
</html>
"#,
            action = escape(context.action),
            username = escape(context.username_field),
            password = escape(context.password_field),
        )
        .into()
    }
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
