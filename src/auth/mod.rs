use axum::http::HeaderMap;


/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, BearerError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(BearerError::Missing)?
        .to_str()
        .map_err(|_| BearerError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Check the request carries the configured admin token.
pub fn verify_admin_token(headers: &HeaderMap, expected: &str) -> Result<(), BearerError> {
    let token = extract_bearer_token(headers)?;
    if token != expected {
        return Err(BearerError::Rejected);
    }
    Ok(())
}

fn parse_bearer_token(header_value: &str) -> Result<String, BearerError> {
    let Some((scheme, token)) = header_value.split_once(' ') else {
        return Err(BearerError::InvalidFormat);
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(BearerError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(BearerError::Empty);
    }

    Ok(token.to_string())
}

/// Bearer extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum BearerError {
    /// Authorization header not present
    Missing,
    /// Not "Bearer <token>"
    InvalidFormat,
    /// Token is empty string
    Empty,
    /// Well-formed but not the expected token
    Rejected,
}

impl std::fmt::Display for BearerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BearerError::Missing => write!(f, "Authorization token not provided"),
            BearerError::InvalidFormat => write!(f, "Invalid authorization token format"),
            BearerError::Empty => write!(f, "Authorization token is empty"),
            BearerError::Rejected => write!(f, "Authorization token rejected"),
        }
    }
}

impl std::error::Error for BearerError {}
