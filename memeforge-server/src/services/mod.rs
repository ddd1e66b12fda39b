//! External API clients
//!
//! - OpenAI: captions, optional image backend
//! - Stability AI: default image backend
//! - Imgflip: blank template list
//! - Giphy: trending and search GIFs
//!
//! Keys are read from the shared `ApiKeys` store per request.

pub mod giphy_client;
pub mod image_fetcher;
pub mod imgflip_client;
pub mod openai_client;
pub mod rate_limiter;
pub mod stability_client;

pub use giphy_client::GiphyClient;
pub use image_fetcher::HttpImageFetcher;
pub use imgflip_client::ImgflipClient;
pub use openai_client::OpenAiClient;
pub use rate_limiter::RateLimiter;
pub use stability_client::StabilityClient;

pub const USER_AGENT: &str = concat!("MemeForge/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in error messages
const MAX_ERROR_BODY: usize = 300;

/// Pull a readable message out of a provider error body
///
/// Understands `{"error": {"message": ..}}`, `{"message": ..}` and
/// `{"meta": {"msg": ..}}`; anything else is returned truncated.
pub(crate) fn api_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/error/message"),
            value.pointer("/message"),
            value.pointer("/meta/msg"),
            value.pointer("/error"),
        ];
        if let Some(msg) = candidates.into_iter().flatten().find_map(|v| v.as_str()) {
            return msg.to_string();
        }
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}
