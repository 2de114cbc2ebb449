//! Error reporting helpers with Sentry integration.
//!
//! Nothing in the cart is fatal: failures are recovered locally and reported
//! out of band. These helpers attach that out-of-band trail to Sentry so a
//! later error report shows what the cart fell back on.

use sentry::Level;

use buildify_core::UserId;

/// Breadcrumb category used for cart events.
pub const CART_CATEGORY: &str = "cart";

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &UserId) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added to cart", Some(&[("product_id", "65a1")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    push_breadcrumb(category, message, Level::Info, data);
}

/// Record a failure the cart recovered from.
///
/// Logged at `warn`, which the Sentry tracing layer keeps as a breadcrumb;
/// never raised to the caller.
pub fn report_recoverable(message: &str, error: &dyn std::error::Error) {
    tracing::warn!(error = %error, "{message}");
}

fn push_breadcrumb(category: &str, message: &str, level: Level, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
