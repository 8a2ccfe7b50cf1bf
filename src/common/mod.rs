//! Utilities shared across exchange access
//!
//! - Rate limiter pacing requests across concurrent scan workers
//! - Error body clipping for non-2xx HTTP responses

pub mod rate_limiter;

pub use rate_limiter::{RateLimiter, RateLimiterConfig};

/// Characters of an error response body kept in error messages
pub const ERROR_BODY_LIMIT: usize = 256;

/// First [`ERROR_BODY_LIMIT`] characters of `body`, cut on a char boundary
pub fn clip_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_body_keeps_short_bodies() {
        assert_eq!(clip_body("{\"msg\":\"banned\"}"), "{\"msg\":\"banned\"}");
    }

    #[test]
    fn test_clip_body_multibyte_at_limit() {
        // 'é' spans bytes 255..257: a byte cut at 256 would split it
        let body = format!("{}é tail", "x".repeat(255));
        let clipped = clip_body(&body);
        assert_eq!(clipped.chars().count(), ERROR_BODY_LIMIT);
        assert!(clipped.ends_with('é'));
    }
}
