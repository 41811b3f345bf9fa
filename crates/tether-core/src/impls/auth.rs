//! TokenSource - Google API 用の bearer token
//!
//! - None: emulator 向け。Authorization ヘッダを付けない
//! - Static: `GOOGLE_OAUTH_ACCESS_TOKEN` をそのまま使う
//! - Metadata: GCE / Cloud Run の metadata server から取得し、期限の少し前までキャッシュ

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ports::Clock;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
/// server が返す期限のこれだけ前に取り直す
const EXPIRY_MARGIN_SECS: i64 = 60;
/// metadata server の token は 1 時間で切れる。それ以上はキャッシュしない
const MAX_CACHE_SECS: i64 = 3600;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("metadata server unreachable: {0}")]
    Transport(String),

    #[error("metadata server returned {status}")]
    Status { status: u16 },

    #[error("metadata token response is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_at
    }
}

#[derive(Clone)]
pub enum TokenSource {
    None,
    Static(String),
    Metadata {
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
        cached: Arc<Mutex<Option<CachedToken>>>,
    },
}

impl TokenSource {
    pub fn metadata(http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        TokenSource::Metadata {
            http,
            clock,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// `None` は認証ヘッダなしで送るという意味
    pub async fn token(&self) -> Result<Option<String>, TokenError> {
        match self {
            TokenSource::None => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::Metadata {
                http,
                clock,
                cached,
            } => {
                let mut cached = cached.lock().await;
                let now = clock.now();
                if let Some(token) = cached.as_ref()
                    && token.is_fresh(now)
                {
                    return Ok(Some(token.value.clone()));
                }

                let fetched = fetch_metadata_token(http).await?;
                debug!(expires_in = fetched.expires_in, "fetched metadata token");
                let token = CachedToken {
                    value: fetched.access_token,
                    refresh_at: refresh_deadline(now, fetched.expires_in),
                };
                let value = token.value.clone();
                *cached = Some(token);
                Ok(Some(value))
            }
        }
    }
}

fn refresh_deadline(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    let lifetime = expires_in
        .saturating_sub(EXPIRY_MARGIN_SECS)
        .clamp(0, MAX_CACHE_SECS);
    TimeDelta::try_seconds(lifetime)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

async fn fetch_metadata_token(http: &reqwest::Client) -> Result<MetadataToken, TokenError> {
    let response = http
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .timeout(METADATA_TIMEOUT)
        .send()
        .await
        .map_err(|e| TokenError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TokenError::Status {
            status: status.as_u16(),
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| TokenError::Transport(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| TokenError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[tokio::test]
    async fn static_and_none_need_no_network() {
        assert_eq!(TokenSource::None.token().await, Ok(None));
        assert_eq!(
            TokenSource::Static("abc".into()).token().await,
            Ok(Some("abc".into()))
        );
    }

    #[test]
    fn cached_token_expires_before_the_server_deadline() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let token = CachedToken {
            value: "t".into(),
            refresh_at: refresh_deadline(now, 3600),
        };

        assert!(token.is_fresh(now));
        assert!(token.is_fresh(now + TimeDelta::seconds(3539)));
        assert!(!token.is_fresh(now + TimeDelta::seconds(3540)));
    }

    #[test]
    fn short_lived_token_is_refreshed_immediately() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(refresh_deadline(now, 30), now);
    }

    #[rstest]
    #[case::huge(i64::MAX)]
    #[case::negative(i64::MIN)]
    fn absurd_lifetimes_do_not_overflow(#[case] expires_in: i64) {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let deadline = refresh_deadline(now, expires_in);
        assert!(deadline >= now);
        assert!(deadline <= now + TimeDelta::seconds(MAX_CACHE_SECS));
    }

    #[test]
    fn deadline_near_the_end_of_time_falls_back_to_now() {
        let now = DateTime::<Utc>::MAX_UTC;
        assert_eq!(refresh_deadline(now, 3600), now);
    }

    #[test]
    fn metadata_response_parses() {
        let token: MetadataToken = serde_json::from_str(
            r#"{"access_token":"ya29.x","expires_in":3599,"token_type":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "ya29.x");
        assert_eq!(token.expires_in, 3599);
    }
}
