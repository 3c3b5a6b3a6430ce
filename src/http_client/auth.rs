use crate::error::Error;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static WWW_AUTHENTICATE_HEADER_PARAMETER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).unwrap());

#[derive(Debug, PartialEq)]
pub enum AuthenticationScheme {
    Bearer(String, HashMap<String, String>),
    Basic,
}

impl AuthenticationScheme {
    pub fn from_www_authenticate_header(header: &str) -> Result<Self, Error> {
        if let Some(header_parameters) = header.strip_prefix("Bearer ") {
            let mut parameters = HashMap::new();

            for (_, [key, value]) in WWW_AUTHENTICATE_HEADER_PARAMETER
                .captures_iter(header_parameters.trim())
                .map(|c| c.extract())
            {
                parameters.insert(key.to_string(), value.to_string());
            }

            let realm = parameters.remove("realm").ok_or_else(|| {
                Error::Internal("Missing realm parameter in WWW-Authenticate header".to_string())
            })?;

            Ok(Self::Bearer(realm, parameters))
        } else if header.starts_with("Basic") {
            Ok(Self::Basic)
        } else {
            Err(Error::Internal(
                "Unsupported authentication scheme in WWW-Authenticate header".to_string(),
            ))
        }
    }
}
