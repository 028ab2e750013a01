/*!
Form-based login for HTTP services.

[`FormAuthenticator`] sits in front of your request handlers. For every
request it returns a [`Decision`]: either forward the request to the resource
(possibly a request saved before the login, restored in place of the one the
client just sent) or answer the client directly with a login challenge, a
redirect or an error.

```text
client                                gatehouse
  | PUT /test?x=1 ------------------>  | protected, no session: save the request
  | <------------- 200 login page ---  |   and create a session
  | POST /j_security_check ---------->  | verify with the Realm, rotate the session id
  | <-- 303 Location: /test?x=1 -----  |
  | GET /test?x=1 ------------------>  | restore the saved PUT and forward it
```

Sessions are tracked through the `JSESSIONID` cookie or, for clients that
don't return cookies, through a `;jsessionid=` path parameter. See
[`gatehouse_session`] for the details.

# Configuration

Everything is configured through [`GatehouseConfig`](config::GatehouseConfig),
which can be assembled from YAML files and environment variables using
[`ConfigLoader`](config::ConfigLoader). The authenticator receives its
configuration, session store and realm explicitly in [`FormAuthenticator::new`].
*/
pub mod config;
pub mod constraint;
pub mod errors;
mod login;
pub mod realm;
pub mod request;
pub mod response;
pub mod saved_request;

pub use login::{
    ChallengeContext, Decision, DefaultLoginPage, FormAuthenticator, Forward, LoginPageRenderer,
    Outbound,
};
pub use realm::{MemoryRealm, Realm};
pub use request::{Request, RequestHead};
pub use response::Response;
