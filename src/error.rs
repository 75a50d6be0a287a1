use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    // Configuration errors
    #[error("Missing environment variable '{name}'")]
    MissingEnv { name: String },

    #[error("Invalid value for {name}: {message}")]
    InvalidConfig { name: String, message: String },

    #[error("Unusable redirect URI '{uri}': {message}")]
    RedirectUri { uri: String, message: String },

    // Token store errors
    #[error("Failed to load tokens from '{path}': {source}")]
    TokenLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save tokens to '{path}': {source}")]
    TokenSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // Authorization errors
    #[error("OAuth callback carried no authorization code")]
    MissingCode,

    #[error("OAuth callback listener closed before a code arrived")]
    CallbackClosed,

    #[error("Token endpoint error: {message}")]
    TokenEndpoint { message: String },

    #[error("No refresh token on record; delete '{path}' and authorize again")]
    NoRefreshToken { path: String },

    // Spreadsheet errors
    #[error("Sheets API error: {message}")]
    Sheets { message: String },

    // Discord errors
    #[error("Discord API error: {message}")]
    Discord { message: String },

    #[error("Guild not found: {id}")]
    GuildNotFound { id: u64 },

    // Generic errors
    #[error("HTTP error: {message}")]
    Http { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serenity::Error> for TrackerError {
    fn from(err: serenity::Error) -> Self {
        TrackerError::Discord {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        TrackerError::Http {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    // Client build and start failures in main cross this mapping before
    // hitting the anyhow boundary.
    #[test]
    fn test_serenity_error_maps_to_discord() {
        let err: TrackerError = serenity::Error::Other("gateway closed").into();
        assert!(matches!(
            err,
            TrackerError::Discord { message } if message.contains("gateway closed")
        ));
    }
}
