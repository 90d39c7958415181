//! The catch-all fallback handler: maps a sanitized request path onto a
//! file beneath the configured static root and lets the exchange's
//! cool-URL resolution take it from there.

use std::path::PathBuf;
use std::sync::Arc;

use siteforge_exchange::{Exchange, Handler, Next};

/// Builds a handler that serves files rooted at `static_root`. Registered
/// last, behind a `*` pattern, so application routes win on conflicts.
pub fn handler(static_root: PathBuf) -> Handler {
    Arc::new(move |exchange: Arc<Exchange>, _next: Next| {
        let static_root = static_root.clone();
        Box::pin(async move {
            if let Ok(parsed) = exchange.parsed_path() {
                let path = parsed.path();
                if parsed.had_trailing_slash() && path != "/" {
                    let without_slash = path.trim_end_matches('/');
                    exchange.redirect(without_slash, None).await;
                    return Ok(());
                }

                let relative = path.trim_start_matches('/');
                exchange.prepare_file(static_root.join(relative));
            }
            Ok(())
        })
    })
}
