//! Callback recognition and login error pages
//!
//! The IdP redirects the browser back to `redirect_uri` with either
//! `code` + `state` or `error` + `state`. Any path carrying those parameters
//! is treated as a callback.

use axum::extract::Query;
use axum::http::{StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;

/// OAuth callback query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter echoed by the IdP
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// What an inbound request looks like from the login protocol's side
#[derive(Debug, PartialEq, Eq)]
pub enum Callback {
    /// `code` present: the IdP completed a login
    Code {
        /// Authorization code to exchange
        code: String,
        /// State token, if echoed
        state: Option<String>,
    },
    /// `error` and `state` present: the IdP reports a failed login
    Denied {
        /// OAuth error code
        error: String,
        /// Optional human description
        description: Option<String>,
        /// State token of the abandoned login
        state: String,
    },
    /// Not a callback
    None,
}

impl CallbackParams {
    /// Parse the callback parameters from a request URI.
    ///
    /// A query that does not parse is treated as carrying no parameters.
    #[must_use]
    pub fn from_uri(uri: &Uri) -> Self {
        Query::<Self>::try_from_uri(uri)
            .map(|Query(params)| params)
            .unwrap_or_default()
    }

    /// Classify the parameters
    #[must_use]
    pub fn into_callback(self) -> Callback {
        if let Some(code) = self.code.filter(|c| !c.is_empty()) {
            return Callback::Code {
                code,
                state: self.state,
            };
        }

        match (self.error, self.state) {
            (Some(error), Some(state)) => Callback::Denied {
                error,
                description: self.error_description,
                state,
            },
            _ => Callback::None,
        }
    }
}

/// Build an HTML error response
pub fn error_response(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        [(header::CACHE_CONTROL, "no-store")],
        Html(error_page(status, error, description)),
    )
        .into_response()
}

fn error_page(status: StatusCode, error: &str, description: &str) -> String {
    let title = if status == StatusCode::UNAUTHORIZED {
        "Login Failed"
    } else {
        "Request Failed"
    };
    let error = escape_html(error);
    let description = escape_html(description);
    let code = status.as_u16();

    format!(r#"<!DOCTYPE html>
<html>
<head>
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f4f4f5;
            color: #27272a;
        }}
        .container {{
            text-align: center;
            padding: 2rem;
            background: white;
            border-radius: 12px;
            box-shadow: 0 2px 12px rgba(0,0,0,0.08);
            max-width: 420px;
        }}
        h1 {{ margin: 0 0 0.5rem 0; }}
        p {{ margin: 0; opacity: 0.9; }}
        .error-code {{ font-family: monospace; margin-top: 1rem; opacity: 0.6; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{title}</h1>
        <p>{description}</p>
        <p class="error-code">HTTP {code} &middot; {error}</p>
    </div>
</body>
</html>"#)
}

/// Values from the IdP's query string end up in the page body
fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
