//! HTTP endpoints for the authentication API

use std::convert::Infallible;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use warp::filters::BoxedFilter;
use warp::http::header::SET_COOKIE;
use warp::http::{HeaderValue, StatusCode};
use warp::hyper::body::Bytes;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::auth::token::{extract_bearer_token, TokenPair};
use crate::config::AuthConfig;
use crate::constants::{REFRESH_COOKIE_NAME, REFRESH_COOKIE_PATH};
use crate::core::gateway::AuthGateway;
use crate::error::QuillgateError;
use crate::security::add_api_security_headers;

/// Request bodies are small; anything bigger is rejected before parsing
const MAX_BODY_BYTES: u64 = 16 * 1024;

pub type SharedGateway = Arc<AuthGateway>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body carrying a provider identity token
#[derive(Debug, Deserialize)]
pub struct ProviderTokenRequest {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

impl From<&TokenPair> for TokenResponse {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access.token.clone(),
            refresh_token: pair.refresh.token.clone(),
            token_type: "bearer",
            expires_in: pair.expires_in(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevokedResponse {
    pub revoked: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Attributes of the refresh token cookie
#[derive(Debug, Clone)]
pub struct RefreshCookie {
    secure: bool,
    max_age_secs: i64,
}

impl RefreshCookie {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            secure: config.secure_cookies(),
            max_age_secs: config.refresh_token_ttl.num_seconds(),
        }
    }

    fn header(&self, value: &str, max_age_secs: i64) -> String {
        let mut cookie = format!(
            "{}={}; Max-Age={}; Path={}; HttpOnly; SameSite=Lax",
            REFRESH_COOKIE_NAME, value, max_age_secs, REFRESH_COOKIE_PATH
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub fn set(&self, token: &str) -> String {
        self.header(token, self.max_age_secs)
    }

    pub fn clear(&self) -> String {
        self.header("", 0)
    }
}

fn with_set_cookie(mut response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => log::error!("Refusing to send malformed cookie header: {}", e),
    }
    response
}

/// Translate a gateway error into its public JSON form
pub fn error_response(err: &QuillgateError) -> Response {
    let status = err.status_code();
    if status.is_server_error() && !err.is_retryable() {
        log::error!("Request failed: {}", err);
    } else {
        log::debug!("Request rejected: {}", err);
    }

    warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            error: err.public_code(),
        }),
        status,
    )
    .into_response()
}

fn json_response<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn token_response(pair: &TokenPair, cookie: &RefreshCookie) -> Response {
    let response = json_response(&TokenResponse::from(pair), StatusCode::OK);
    with_set_cookie(response, &cookie.set(&pair.refresh.token))
}

fn with_gateway(
    gateway: SharedGateway,
) -> impl Filter<Extract = (SharedGateway,), Error = Infallible> + Clone {
    warp::any().map(move || gateway.clone())
}

fn with_cookie(
    cookie: RefreshCookie,
) -> impl Filter<Extract = (RefreshCookie,), Error = Infallible> + Clone {
    warp::any().map(move || cookie.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Refresh token from a JSON body, falling back to the cookie
fn refresh_token_source() -> impl Filter<Extract = (Option<String>,), Error = Infallible> + Clone {
    // The body may be absent entirely when the token travels in the cookie
    let body = warp::body::content_length_limit(MAX_BODY_BYTES)
        .and(warp::body::bytes())
        .or(warp::any().map(Bytes::new))
        .unify();

    body.and(warp::cookie::optional::<String>(REFRESH_COOKIE_NAME))
        .map(|body: Bytes, cookie: Option<String>| {
            let from_body = if body.is_empty() {
                None
            } else {
                serde_json::from_slice::<RefreshRequest>(&body)
                    .unwrap_or_default()
                    .refresh_token
            };
            from_body
                .or(cookie)
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
        })
}

fn bearer_token() -> impl Filter<Extract = (Option<String>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .map(|header: Option<String>| header.as_deref().and_then(extract_bearer_token))
}

fn missing_bearer() -> Response {
    error_response(&QuillgateError::InvalidToken(
        "Missing bearer token".to_string(),
    ))
}

async fn handle_register(
    request: RegisterRequest,
    gateway: SharedGateway,
) -> Result<Response, Infallible> {
    Ok(
        match gateway
            .register(&request.email, &request.password, request.display_name)
            .await
        {
            Ok(user) => json_response(&user, StatusCode::CREATED),
            Err(e) => error_response(&e),
        },
    )
}

async fn handle_login(
    request: LoginRequest,
    gateway: SharedGateway,
    cookie: RefreshCookie,
) -> Result<Response, Infallible> {
    Ok(match gateway.login(&request.email, &request.password).await {
        Ok(pair) => token_response(&pair, &cookie),
        Err(e) => error_response(&e),
    })
}

async fn handle_google(
    request: ProviderTokenRequest,
    gateway: SharedGateway,
    cookie: RefreshCookie,
) -> Result<Response, Infallible> {
    Ok(match gateway.login_with_provider(&request.token).await {
        Ok(pair) => token_response(&pair, &cookie),
        Err(e) => error_response(&e),
    })
}

async fn handle_refresh(
    token: Option<String>,
    gateway: SharedGateway,
    cookie: RefreshCookie,
) -> Result<Response, Infallible> {
    let Some(token) = token else {
        return Ok(error_response(&QuillgateError::InvalidToken(
            "Missing refresh token".to_string(),
        )));
    };

    Ok(match gateway.refresh(&token).await {
        Ok(pair) => token_response(&pair, &cookie),
        Err(e) => {
            // A dead refresh token should not linger in the browser
            let response = error_response(&e);
            if e.is_auth_failure() {
                with_set_cookie(response, &cookie.clear())
            } else {
                response
            }
        }
    })
}

async fn handle_logout(
    token: Option<String>,
    gateway: SharedGateway,
    cookie: RefreshCookie,
) -> Result<Response, Infallible> {
    if let Some(token) = token {
        gateway.logout(&token).await;
    }
    let response = StatusCode::NO_CONTENT.into_response();
    Ok(with_set_cookie(response, &cookie.clear()))
}

async fn handle_me(token: Option<String>, gateway: SharedGateway) -> Result<Response, Infallible> {
    let Some(token) = token else {
        return Ok(missing_bearer());
    };
    Ok(match gateway.current_user(&token).await {
        Ok(user) => json_response(&user, StatusCode::OK),
        Err(e) => error_response(&e),
    })
}

async fn handle_logout_all(
    token: Option<String>,
    gateway: SharedGateway,
    cookie: RefreshCookie,
) -> Result<Response, Infallible> {
    let Some(token) = token else {
        return Ok(missing_bearer());
    };
    Ok(match gateway.logout_all(&token).await {
        Ok(revoked) => {
            let response = json_response(&RevokedResponse { revoked }, StatusCode::OK);
            with_set_cookie(response, &cookie.clear())
        }
        Err(e) => error_response(&e),
    })
}

async fn handle_link_google(
    token: Option<String>,
    request: ProviderTokenRequest,
    gateway: SharedGateway,
) -> Result<Response, Infallible> {
    let Some(token) = token else {
        return Ok(missing_bearer());
    };
    Ok(match gateway.link_provider(&token, &request.token).await {
        Ok(identity) => json_response(&identity, StatusCode::OK),
        Err(e) => error_response(&e),
    })
}

async fn handle_change_password(
    token: Option<String>,
    request: ChangePasswordRequest,
    gateway: SharedGateway,
    cookie: RefreshCookie,
) -> Result<Response, Infallible> {
    let Some(token) = token else {
        return Ok(missing_bearer());
    };
    Ok(
        match gateway
            .change_password(&token, &request.current_password, &request.new_password)
            .await
        {
            Ok(_) => with_set_cookie(StatusCode::NO_CONTENT.into_response(), &cookie.clear()),
            Err(e) => error_response(&e),
        },
    )
}

/// Map warp's own rejections onto the public error format
pub async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, code) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "invalid_request")
    } else if rejection.find::<warp::filters::body::BodyDeserializeError>().is_some()
        || rejection.find::<warp::reject::UnsupportedMediaType>().is_some()
        || rejection.find::<warp::reject::LengthRequired>().is_some()
        || rejection.find::<warp::reject::InvalidHeader>().is_some()
    {
        (StatusCode::BAD_REQUEST, "invalid_request")
    } else {
        log::error!("Unhandled rejection: {:?}", rejection);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
    };

    Ok(json_response(&ErrorBody { error: code }, status))
}

/// Liveness probe
pub fn health_route() -> BoxedFilter<(Response,)> {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| "OK".into_response())
        .boxed()
}

/// Every `/auth/*` endpoint plus the health probe
pub fn routes(gateway: SharedGateway, config: &AuthConfig) -> BoxedFilter<(Response,)> {
    let cookie = RefreshCookie::from_config(config);

    let register = warp::path!("auth" / "register")
        .and(warp::post())
        .and(json_body::<RegisterRequest>())
        .and(with_gateway(gateway.clone()))
        .and_then(handle_register);

    let login = warp::path!("auth" / "login")
        .and(warp::post())
        .and(json_body::<LoginRequest>())
        .and(with_gateway(gateway.clone()))
        .and(with_cookie(cookie.clone()))
        .and_then(handle_login);

    let google = warp::path!("auth" / "google")
        .and(warp::post())
        .and(json_body::<ProviderTokenRequest>())
        .and(with_gateway(gateway.clone()))
        .and(with_cookie(cookie.clone()))
        .and_then(handle_google);

    let refresh = warp::path!("auth" / "refresh")
        .and(warp::post())
        .and(refresh_token_source())
        .and(with_gateway(gateway.clone()))
        .and(with_cookie(cookie.clone()))
        .and_then(handle_refresh);

    let logout = warp::path!("auth" / "logout")
        .and(warp::post())
        .and(refresh_token_source())
        .and(with_gateway(gateway.clone()))
        .and(with_cookie(cookie.clone()))
        .and_then(handle_logout);

    let me = warp::path!("auth" / "me")
        .and(warp::get())
        .and(bearer_token())
        .and(with_gateway(gateway.clone()))
        .and_then(handle_me);

    let logout_all = warp::path!("auth" / "logout-all")
        .and(warp::post())
        .and(bearer_token())
        .and(with_gateway(gateway.clone()))
        .and(with_cookie(cookie.clone()))
        .and_then(handle_logout_all);

    let link_google = warp::path!("auth" / "link" / "google")
        .and(warp::post())
        .and(bearer_token())
        .and(json_body::<ProviderTokenRequest>())
        .and(with_gateway(gateway.clone()))
        .and_then(handle_link_google);

    let change_password = warp::path!("auth" / "password")
        .and(warp::post())
        .and(bearer_token())
        .and(json_body::<ChangePasswordRequest>())
        .and(with_gateway(gateway))
        .and(with_cookie(cookie))
        .and_then(handle_change_password);

    register
        .or(login)
        .unify()
        .or(google)
        .unify()
        .or(refresh)
        .unify()
        .or(logout)
        .unify()
        .or(me)
        .unify()
        .or(logout_all)
        .unify()
        .or(link_google)
        .unify()
        .or(change_password)
        .unify()
        .or(health_route())
        .unify()
        .recover(handle_rejection)
        .unify()
        .map(add_api_security_headers)
        .boxed()
}
