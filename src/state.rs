//! Shared application state handed to every handler.

use crate::ratelimit::RateLimiter;
use crate::services::share_service::ShareService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub shares: ShareService,
    pub limiter: Arc<RateLimiter>,
}
