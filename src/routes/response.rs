//! JSON envelope and body helpers shared by the route handlers
//!
//! Every response is `{ success, data?, message, token?, isTokenExpired? }`.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::types::{PomodoroError, Result};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Maximum accepted JSON body
pub const MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_token_expired: Option<bool>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            token: None,
            is_token_expired: None,
        }
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// `{ success: true, data, message }`
pub fn success<T: Serialize>(status: StatusCode, data: T, message: &str) -> Response<BoxBody> {
    json_response(status, &Envelope::ok(data, message))
}

/// `{ success: true, message }` with no payload
pub fn message_only(status: StatusCode, message: &str) -> Response<BoxBody> {
    json_response(
        status,
        &Envelope::<()> {
            success: true,
            data: None,
            message: message.to_string(),
            token: None,
            is_token_expired: None,
        },
    )
}

/// Render an error as `{ success: false, message }`
pub fn error_response(err: PomodoroError) -> Response<BoxBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    let is_token_expired = err.is_token_expired().then_some(true);
    let (status, message) = err.into_status_code_and_body();

    json_response(
        status,
        &Envelope::<()> {
            success: false,
            data: None,
            message,
            token: None,
            is_token_expired,
        },
    )
}

/// Collect a request body, rejecting anything over [`MAX_BODY_BYTES`]
pub async fn read_body<B>(body: B) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| {
            if e.is::<http_body_util::LengthLimitError>() {
                PomodoroError::BadRequest("Request body too large".into())
            } else {
                PomodoroError::BadRequest(format!("Failed to read body: {}", e))
            }
        })
}

/// Parse a JSON body; an empty body is treated as `{}`
pub fn parse_json<T: DeserializeOwned>(bytes: &Bytes) -> Result<T> {
    let bytes: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes[..] };
    serde_json::from_slice(bytes)
        .map_err(|e| PomodoroError::BadRequest(format!("Invalid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    async fn body_json(response: Response<BoxBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response = error_response(PomodoroError::NotFound("Pomodoro task not found".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(
            json,
            serde_json::json!({ "success": false, "message": "Pomodoro task not found" })
        );
    }

    #[tokio::test]
    async fn test_expired_token_flag() {
        let json = body_json(error_response(PomodoroError::TokenExpired)).await;
        assert_eq!(json["isTokenExpired"], true);
        assert_eq!(json["message"], "Token expired, please login again");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let big = Full::new(Bytes::from(vec![b'a'; MAX_BODY_BYTES + 1]));
        let err = read_body(big).await.unwrap_err();
        assert_eq!(err.to_string(), "Bad request: Request body too large");

        let ok = read_body(Full::new(Bytes::from_static(b"{}"))).await.unwrap();
        assert_eq!(&ok[..], b"{}");
    }

    #[test]
    fn test_parse_json_empty_body() {
        #[derive(Deserialize, Default)]
        struct Anything {
            #[serde(default)]
            value: Option<i32>,
        }
        let parsed: Anything = parse_json(&Bytes::new()).unwrap();
        assert!(parsed.value.is_none());
        assert!(parse_json::<Anything>(&Bytes::from_static(b"{")).is_err());
    }
}
