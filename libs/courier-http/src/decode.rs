//! Turning a successful response into a typed value.

use crate::error::BackendError;
use crate::wire::ResponseEnvelope;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;

/// Converts a response into the request's result type
#[async_trait]
pub trait ResponseDecoder<R>: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BackendError::Decode`] or [`BackendError::Validation`] when
    /// the body does not fit `R`.
    async fn decode(&self, response: ResponseEnvelope) -> Result<R, BackendError>;
}

/// Deserialize the body as JSON
pub struct JsonDecoder<T>(PhantomData<fn() -> T>);

impl<T> JsonDecoder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonDecoder<{}>", std::any::type_name::<T>())
    }
}

#[async_trait]
impl<T> ResponseDecoder<T> for JsonDecoder<T>
where
    T: DeserializeOwned + Send,
{
    async fn decode(&self, response: ResponseEnvelope) -> Result<T, BackendError> {
        match serde_json::from_slice(&response.body) {
            Ok(value) => Ok(value),
            Err(err) => Err(BackendError::decode::<T>(response, err)),
        }
    }
}

/// Return the raw body
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesDecoder;

#[async_trait]
impl ResponseDecoder<Bytes> for BytesDecoder {
    async fn decode(&self, response: ResponseEnvelope) -> Result<Bytes, BackendError> {
        Ok(response.body)
    }
}

/// Return the body as UTF-8 text
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

#[async_trait]
impl ResponseDecoder<String> for TextDecoder {
    async fn decode(&self, response: ResponseEnvelope) -> Result<String, BackendError> {
        let text = std::str::from_utf8(&response.body).map(str::to_owned);
        match text {
            Ok(text) => Ok(text),
            Err(err) => Err(BackendError::decode::<String>(response, err)),
        }
    }
}

/// Expect no body at all
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyDecoder;

#[async_trait]
impl ResponseDecoder<()> for EmptyDecoder {
    async fn decode(&self, response: ResponseEnvelope) -> Result<(), BackendError> {
        if response.body.is_empty() {
            Ok(())
        } else {
            Err(BackendError::validation(format!(
                "expected an empty body, got {} bytes",
                response.body.len()
            )))
        }
    }
}

/// The keyed container was missing from the body
#[derive(Debug, thiserror::Error)]
#[error("response body has no \"{0}\" key")]
pub struct MissingKey(pub String);

/// Unwraps `{"<key>": payload}` and hands `payload` to the inner decoder.
///
/// ```ignore
/// // {"user": {"id": 7}}
/// let decoder = Enveloped::new("user", JsonDecoder::<User>::new());
/// ```
#[derive(Debug, Clone)]
pub struct Enveloped<D> {
    key: String,
    inner: D,
}

impl<D> Enveloped<D> {
    pub fn new(key: impl Into<String>, inner: D) -> Self {
        Self {
            key: key.into(),
            inner,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<R, D> ResponseDecoder<R> for Enveloped<D>
where
    D: ResponseDecoder<R>,
    R: Send,
{
    async fn decode(&self, mut response: ResponseEnvelope) -> Result<R, BackendError> {
        let mut container: serde_json::Value = match serde_json::from_slice(&response.body) {
            Ok(value) => value,
            Err(err) => return Err(BackendError::decode::<R>(response, err)),
        };
        let payload = match container.get_mut(&self.key) {
            Some(payload) => payload.take(),
            None => {
                return Err(BackendError::decode::<R>(
                    response,
                    MissingKey(self.key.clone()),
                ));
            }
        };
        match serde_json::to_vec(&payload) {
            Ok(body) => response.body = Bytes::from(body),
            Err(err) => return Err(BackendError::decode::<R>(response, err)),
        }
        self.inner.decode(response).await
    }
}

/// Decoder backed by a synchronous closure
pub struct FnDecoder<F>(F);

impl<F> fmt::Debug for FnDecoder<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnDecoder")
    }
}

/// Wrap a closure as a [`ResponseDecoder`]
pub fn decode_with<R, F>(f: F) -> FnDecoder<F>
where
    F: Fn(ResponseEnvelope) -> Result<R, BackendError> + Send + Sync,
{
    FnDecoder(f)
}

#[async_trait]
impl<R, F> ResponseDecoder<R> for FnDecoder<F>
where
    F: Fn(ResponseEnvelope) -> Result<R, BackendError> + Send + Sync,
    R: Send,
{
    async fn decode(&self, response: ResponseEnvelope) -> Result<R, BackendError> {
        (self.0)(response)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode, Uri};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    fn ok(body: &'static str) -> ResponseEnvelope {
        ResponseEnvelope::new(
            StatusCode::OK,
            HeaderMap::new(),
            Uri::from_static("http://localhost/users/7"),
            body,
        )
    }

    #[tokio::test]
    async fn test_json_decoder() {
        let user = JsonDecoder::<User>::new()
            .decode(ok(r#"{"id":7,"name":"ada"}"#))
            .await
            .unwrap();
        assert_eq!(
            user,
            User {
                id: 7,
                name: "ada".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn test_json_decoder_reports_target_type() {
        let err = JsonDecoder::<User>::new()
            .decode(ok("not json"))
            .await
            .unwrap_err();
        match err {
            BackendError::Decode {
                target, response, ..
            } => {
                assert!(target.ends_with("User"), "{target}");
                assert_eq!(response.body, "not json");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_text_and_bytes() {
        assert_eq!(TextDecoder.decode(ok("hello")).await.unwrap(), "hello");
        assert_eq!(BytesDecoder.decode(ok("hello")).await.unwrap(), "hello");

        let mut invalid = ok("");
        invalid.body = Bytes::from_static(&[0xff, 0xfe]);
        assert!(matches!(
            TextDecoder.decode(invalid).await,
            Err(BackendError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_decoder() {
        EmptyDecoder.decode(ok("")).await.unwrap();
        assert!(matches!(
            EmptyDecoder.decode(ok("{}")).await,
            Err(BackendError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_enveloped_unwraps_key() {
        let decoder = Enveloped::new("user", JsonDecoder::<User>::new());
        let user = decoder
            .decode(ok(r#"{"user":{"id":1,"name":"grace"},"meta":{}}"#))
            .await
            .unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(user.name, "grace");
    }

    #[tokio::test]
    async fn test_enveloped_missing_key() {
        let decoder = Enveloped::new("user", JsonDecoder::<User>::new());
        let err = decoder.decode(ok(r#"{"data":{}}"#)).await.unwrap_err();
        let BackendError::Decode { source, .. } = err else {
            panic!("expected decode error");
        };
        assert_eq!(source.to_string(), "response body has no \"user\" key");
    }

    #[tokio::test]
    async fn test_enveloped_composes() {
        let decoder = Enveloped::new("outer", Enveloped::new("inner", JsonDecoder::<u32>::new()));
        let value = decoder.decode(ok(r#"{"outer":{"inner":42}}"#)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_decode_with_closure() {
        let decoder = decode_with(|response: ResponseEnvelope| Ok(response.body.len()));
        assert_eq!(decoder.decode(ok("four")).await.unwrap(), 4);
    }
}
