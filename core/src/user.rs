//! Login, logout and the session snapshot kept by a `Service`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::HttpEngine;
use crate::error::ErrorCode;
use crate::http::{HttpResponse, CONTENT_TYPE_JSON, HEADER_CONTENT_TYPE};
use crate::result::BaasResult;
use crate::service::Service;
use crate::session::SessionToken;

const LOGIN_PATH: &str = "/login";

/// User fields as returned by the login endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserEntity {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    pub options: Map<String, Value>,
    pub groups: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

impl UserEntity {
    pub fn created_time(&self) -> Option<jiff::Timestamp> {
        parse_timestamp(&self.created_at)
    }

    pub fn updated_time(&self) -> Option<jiff::Timestamp> {
        parse_timestamp(&self.updated_at)
    }
}

pub(crate) fn parse_timestamp(text: &str) -> Option<jiff::Timestamp> {
    if text.is_empty() {
        return None;
    }
    text.parse()
        .inspect_err(|err| tracing::debug!(value = text, error = %err, "unparseable timestamp"))
        .ok()
}

/// Login response and export format: the user plus its session.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LoginState {
    #[serde(flatten)]
    user: UserEntity,
    #[serde(rename = "sessionToken")]
    session_token: String,
    expire: i64,
}

impl LoginState {
    /// `None` unless the body parses and carries a session token.
    fn from_response(response: &HttpResponse) -> Option<Self> {
        let state: Self = serde_json::from_value(Value::Object(response.json_object()))
            .inspect_err(|err| tracing::error!(error = %err, "malformed user in response"))
            .ok()?;
        if state.session_token.is_empty() {
            tracing::error!("login response carries no session token");
            return None;
        }
        Some(state)
    }

    fn into_session(self) -> SessionToken {
        SessionToken::new(self.session_token, self.expire).with_user(self.user)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    entity: UserEntity,
}

impl User {
    pub fn from_entity(entity: UserEntity) -> Self {
        Self { entity }
    }

    pub fn entity(&self) -> &UserEntity {
        &self.entity
    }

    pub fn user_id(&self) -> &str {
        &self.entity.id
    }

    pub fn username(&self) -> &str {
        &self.entity.username
    }

    pub fn email(&self) -> &str {
        &self.entity.email
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.entity.options
    }

    pub fn groups(&self) -> &[String] {
        &self.entity.groups
    }

    pub fn created_time(&self) -> Option<jiff::Timestamp> {
        self.entity.created_time()
    }

    pub fn updated_time(&self) -> Option<jiff::Timestamp> {
        self.entity.updated_time()
    }

    pub fn login_with_username<E: HttpEngine>(
        service: &Service<E>,
        username: &str,
        password: &str,
        timeout: i32,
    ) -> BaasResult<User> {
        Self::login(service, username, "", password, timeout)
    }

    pub fn login_with_email<E: HttpEngine>(
        service: &Service<E>,
        email: &str,
        password: &str,
        timeout: i32,
    ) -> BaasResult<User> {
        Self::login(service, "", email, password, timeout)
    }

    /// On success the service session is replaced by the one returned.
    fn login<E: HttpEngine>(
        service: &Service<E>,
        username: &str,
        email: &str,
        password: &str,
        timeout: i32,
    ) -> BaasResult<User> {
        if (username.is_empty() && email.is_empty()) || password.is_empty() {
            tracing::error!("account or password is empty");
            return BaasResult::FatalError(ErrorCode::InvalidArgument);
        }

        let mut body = Map::new();
        if !username.is_empty() {
            body.insert("username".to_string(), username.into());
        }
        if !email.is_empty() {
            body.insert("email".to_string(), email.into());
        }
        body.insert("password".to_string(), password.into());
        let body = Value::Object(body).to_string();

        let result = service.execute_request(
            |factory| {
                factory
                    .post(LOGIN_PATH)
                    .append_header(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON)
                    .body(body)
                    .session_none()
                    .build()
            },
            timeout,
        );

        result.and_then(|response| match LoginState::from_response(&response) {
            Some(state) => {
                tracing::debug!(user = %state.user.id, expire = state.expire, "logged in");
                service.set_session_token(state.into_session());
                BaasResult::Success(Self::current_user(service))
            }
            None => BaasResult::FatalError(ErrorCode::IncorrectResponse),
        })
    }

    /// The local session is cleared before the request is sent, so other
    /// threads see the logout immediately. The request still carries the
    /// old token.
    pub fn logout<E: HttpEngine>(service: &Service<E>, timeout: i32) -> BaasResult<User> {
        if !Self::is_logged_in(service) {
            tracing::error!("logout without a session");
            return BaasResult::FatalError(ErrorCode::NotLoggedIn);
        }

        let factory = service.request_factory();
        service.clear_session_token();

        service
            .execute_request_with(factory, |factory| factory.delete(LOGIN_PATH).build(), timeout)
            .map(|response| {
                let entity = serde_json::from_value(Value::Object(response.json_object())).unwrap_or_default();
                User::from_entity(entity)
            })
    }

    pub fn is_logged_in<E: HttpEngine>(service: &Service<E>) -> bool {
        service.session_token().is_valid()
    }

    /// Current token, or `""` when not logged in.
    pub fn session_token<E: HttpEngine>(service: &Service<E>) -> String {
        service.session_token().token().to_string()
    }

    /// Expiry in epoch seconds, or 0 when not logged in.
    pub fn session_token_expiration<E: HttpEngine>(service: &Service<E>) -> i64 {
        service.session_token().expire_at()
    }

    pub fn current_user<E: HttpEngine>(service: &Service<E>) -> User {
        User::from_entity(service.session_token().user())
    }

    /// Serialize the current login so another service (or process) can
    /// resume it. Empty when not logged in.
    pub fn export_current_login<E: HttpEngine>(service: &Service<E>) -> String {
        let session = service.session_token();
        if !session.is_valid() {
            tracing::error!("export without a session");
            return String::new();
        }
        let state = LoginState {
            user: session.user(),
            session_token: session.token().to_string(),
            expire: session.expire_at(),
        };
        serde_json::to_string(&state).unwrap_or_default()
    }

    pub fn import_current_login<E: HttpEngine>(service: &Service<E>, text: &str) -> Result<(), ErrorCode> {
        let state: LoginState = match serde_json::from_str(text) {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(error = %err, "import data is not a login");
                return Err(ErrorCode::InvalidArgument);
            }
        };
        if state.session_token.is_empty() {
            tracing::error!("import data has no session token");
            return Err(ErrorCode::InvalidArgument);
        }
        if SessionToken::is_expired(state.expire) {
            tracing::error!(expire = state.expire, "imported session already expired");
            return Err(ErrorCode::SessionExpired);
        }
        service.set_session_token(state.into_session());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, ServiceConfig};
    use crate::http::HttpMethod;
    use crate::session::now_epoch;
    use crate::testing::{FakeEngine, Script};

    fn service(script: Script) -> (Service<FakeEngine>, FakeEngine) {
        let engine = FakeEngine::new(script);
        let shared = engine.clone();
        let config = ServiceConfig::new(Credentials::new("http://localhost", "tenant", "app", "key"));
        (Service::with_engine(config, move || shared.clone()), engine)
    }

    fn login_body(expire: i64) -> String {
        serde_json::json!({
            "_id": "u1",
            "username": "alice",
            "email": "alice@example.com",
            "options": {"lang": "en"},
            "groups": ["g1", "g2"],
            "createdAt": "2017-03-07T08:49:58.000Z",
            "updatedAt": "2017-03-08T08:49:58.000Z",
            "sessionToken": "tok",
            "expire": expire,
        })
        .to_string()
    }

    #[test]
    fn login_stores_session_and_user() {
        let expire = now_epoch() + 3600;
        let (service, engine) = service(Script::ok(&login_body(expire)));
        service.set_session_token(SessionToken::new("old", now_epoch() + 3600));

        let user = User::login_with_username(&service, "alice", "secret", 5).success().cloned().unwrap();
        assert_eq!(user.user_id(), "u1");
        assert_eq!(user.groups(), ["g1", "g2"]);
        assert_eq!(user.options().get("lang"), Some(&Value::from("en")));
        assert_eq!(user.created_time().unwrap().to_string(), "2017-03-07T08:49:58Z");

        assert!(User::is_logged_in(&service));
        assert_eq!(User::session_token(&service), "tok");
        assert_eq!(User::session_token_expiration(&service), expire);
        assert_eq!(User::current_user(&service).email(), "alice@example.com");

        let sent = engine.last_request().unwrap();
        assert_eq!(sent.method, HttpMethod::Post);
        assert!(sent.url.ends_with("/1/tenant/login"));
        assert_eq!(sent.header("X-Session-Token"), None);
        assert_eq!(sent.header("Content-Type"), Some("application/json"));
        let body: Value = serde_json::from_slice(&sent.body).unwrap();
        assert_eq!(body, serde_json::json!({"username": "alice", "password": "secret"}));
    }

    #[test]
    fn login_with_email_sends_email() {
        let (service, engine) = service(Script::ok(&login_body(now_epoch() + 60)));
        assert!(User::login_with_email(&service, "a@example.com", "pw", 5).is_success());
        let body: Value = serde_json::from_slice(&engine.last_request().unwrap().body).unwrap();
        assert_eq!(body, serde_json::json!({"email": "a@example.com", "password": "pw"}));
    }

    #[test]
    fn login_rejects_missing_account_or_password() {
        let (service, engine) = service(Script::ok("{}"));
        assert_eq!(
            User::login_with_username(&service, "", "pw", 5).fatal_error(),
            Some(ErrorCode::InvalidArgument)
        );
        assert_eq!(
            User::login_with_email(&service, "a@example.com", "", 5).fatal_error(),
            Some(ErrorCode::InvalidArgument)
        );
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn failed_login_keeps_previous_session() {
        let (service, _) = service(Script::status(401, "Unauthorized").body(r#"{"error":"bad"}"#));
        service.set_session_token(SessionToken::new("old", now_epoch() + 3600));
        let result = User::login_with_username(&service, "alice", "wrong", 5);
        assert_eq!(result.rest_error().unwrap().status_code, 401);
        assert_eq!(User::session_token(&service), "old");
    }

    #[test]
    fn login_reply_without_token_is_incorrect_response() {
        let (service, _) = service(Script::ok(r#"{"_id":"u1","username":"alice"}"#));
        service.set_session_token(SessionToken::new("old", now_epoch() + 3600));

        let result = User::login_with_username(&service, "alice", "secret", 5);
        assert_eq!(result.fatal_error(), Some(ErrorCode::IncorrectResponse));
        assert_eq!(User::session_token(&service), "old");
    }

    #[test]
    fn login_reply_that_is_not_json_is_incorrect_response() {
        let (service, _) = service(Script::ok("not json"));
        let result = User::login_with_username(&service, "alice", "secret", 5);
        assert_eq!(result.fatal_error(), Some(ErrorCode::IncorrectResponse));
        assert!(!User::is_logged_in(&service));
    }

    #[test]
    fn logout_clears_session_and_sends_old_token() {
        let (service, engine) = service(Script::ok(r#"{"_id":"u1","username":"alice"}"#));
        service.set_session_token(SessionToken::new("tok", now_epoch() + 3600));

        let user = User::logout(&service, 5).success().cloned().unwrap();
        assert_eq!(user.username(), "alice");
        assert!(!User::is_logged_in(&service));

        let sent = engine.last_request().unwrap();
        assert_eq!(sent.method, HttpMethod::Delete);
        assert_eq!(sent.header("X-Session-Token"), Some("tok"));
    }

    #[test]
    fn logout_clears_session_even_when_request_fails() {
        let (service, _) = service(Script::status(500, "Internal Server Error"));
        service.set_session_token(SessionToken::new("tok", now_epoch() + 3600));
        assert!(User::logout(&service, 5).is_rest_error());
        assert!(!User::is_logged_in(&service));
    }

    #[test]
    fn logout_without_session_is_not_logged_in() {
        let (service, engine) = service(Script::ok("{}"));
        assert_eq!(User::logout(&service, 5).fatal_error(), Some(ErrorCode::NotLoggedIn));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn export_then_import_restores_login() {
        let expire = now_epoch() + 3600;
        let (source, _) = service(Script::ok(&login_body(expire)));
        assert!(User::login_with_username(&source, "alice", "secret", 5).is_success());
        let exported = User::export_current_login(&source);

        let (target, _) = service(Script::ok(""));
        assert_eq!(User::import_current_login(&target, &exported), Ok(()));
        assert_eq!(User::session_token(&target), "tok");
        assert_eq!(User::session_token_expiration(&target), expire);
        assert_eq!(User::current_user(&target), User::current_user(&source));
    }

    #[test]
    fn export_without_session_is_empty() {
        let (service, _) = service(Script::ok(""));
        assert_eq!(User::export_current_login(&service), "");
    }

    #[test]
    fn import_rejects_bad_input() {
        let (service, _) = service(Script::ok(""));
        assert_eq!(User::import_current_login(&service, "garbage"), Err(ErrorCode::InvalidArgument));
        assert_eq!(
            User::import_current_login(&service, r#"{"expire": 99999999999}"#),
            Err(ErrorCode::InvalidArgument)
        );
        let expired = format!(r#"{{"sessionToken":"tok","expire":{}}}"#, now_epoch() - 10);
        assert_eq!(User::import_current_login(&service, &expired), Err(ErrorCode::SessionExpired));
        assert!(!User::is_logged_in(&service));
    }
}
