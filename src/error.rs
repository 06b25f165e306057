use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T, E = ScrapeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("login page returned status {0}")]
    LoginPage(StatusCode),

    #[error("anti-forgery token not found on login page")]
    MissingToken,

    #[error("login rejected with status {0} (expected a redirect)")]
    LoginRejected(StatusCode),

    #[error("page {url} returned status {status}")]
    PageStatus { url: String, status: StatusCode },

    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("failed to build pdf: {0}")]
    Pdf(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ScrapeError {
    pub(crate) fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            source,
        }
    }
}
