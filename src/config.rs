use crate::error::{Result, ScrapeError};
use derive_builder::Builder;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use url::Url;

pub const DEFAULT_LOGIN_URL: &str = "https://m3e-medical.com/users/sign_in";
pub const DEFAULT_ORIGIN: &str = "https://m3e-medical.com";
pub const DEFAULT_PAGE_COUNT: usize = 26;

/// Everything one scraping run needs, read once at start-up.
#[derive(Debug, Clone, Builder, Deserialize)]
#[builder(setter(into))]
pub struct ScrapeConfig {
    #[builder(default = "DEFAULT_LOGIN_URL.to_string()")]
    #[serde(default = "default_login_url")]
    pub login_url: String,
    pub email: String,
    pub password: String,
    /// First question page of the chain.
    pub start_url: String,
    /// Upper bound on the number of pages walked.
    #[builder(default = "DEFAULT_PAGE_COUNT")]
    #[serde(default = "default_page_count")]
    pub page_count: usize,
    /// Output name without the `.pdf` extension.
    pub file_name: String,
    /// Prefix for relative "next" links.
    #[builder(default = "DEFAULT_ORIGIN.to_string()")]
    #[serde(default = "default_origin")]
    pub origin: String,
    #[builder(default = "PathBuf::from(\".\")")]
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// TrueType/OpenType font embedded as the document font. It must cover Japanese.
    pub font_path: PathBuf,
}

fn default_login_url() -> String {
    DEFAULT_LOGIN_URL.to_string()
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

fn default_page_count() -> usize {
    DEFAULT_PAGE_COUNT
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl ScrapeConfig {
    /// Read a TOML config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ScrapeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("login_url", &self.login_url),
            ("start_url", &self.start_url),
            ("origin", &self.origin),
        ] {
            if value.trim().is_empty() {
                return Err(ScrapeError::Config(format!("{name} must not be empty")));
            }
            Url::parse(value).map_err(|e| ScrapeError::invalid_url(value.as_str(), e))?;
        }

        if self.email.trim().is_empty() {
            return Err(ScrapeError::Config("email must not be empty".into()));
        }
        if self.password.trim().is_empty() {
            return Err(ScrapeError::Config("password must not be empty".into()));
        }
        if self.file_name.trim().is_empty() {
            return Err(ScrapeError::Config("file_name must not be empty".into()));
        }
        if self.page_count == 0 {
            return Err(ScrapeError::Config("page_count must be at least 1".into()));
        }
        if !self.font_path.is_file() {
            return Err(ScrapeError::Config(format!(
                "font_path {} is not a readable font file",
                self.font_path.display()
            )));
        }

        Ok(())
    }

    /// `<output_dir>/<file_name>.pdf`
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.pdf", self.file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FONT: &str = "fixtures/fonts/RobotoMedium.ttf";

    fn builder() -> ScrapeConfigBuilder {
        let mut builder = ScrapeConfigBuilder::default();
        builder
            .email("user@example.com")
            .password("secret")
            .start_url("https://m3e-medical.com/issues/1")
            .file_name("細胞生物学")
            .font_path(FONT);
        builder
    }

    #[test]
    fn builder_should_fill_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.login_url, DEFAULT_LOGIN_URL);
        assert_eq!(config.origin, DEFAULT_ORIGIN);
        assert_eq!(config.page_count, DEFAULT_PAGE_COUNT);
        assert!(config.validate().is_ok());
        assert_eq!(config.output_path(), PathBuf::from("./細胞生物学.pdf"));
    }

    #[test]
    fn validate_should_reject_blank_credentials() {
        let config = builder().password(" ").build().unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ScrapeError::Config(ref msg) if msg.contains("password")));

        let config = builder().email("").build().unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_should_reject_bad_urls_and_budget() {
        let config = builder().start_url(" ").build().unwrap();
        assert!(matches!(config.validate(), Err(ScrapeError::Config(_))));

        let config = builder().login_url("not a url").build().unwrap();
        assert!(matches!(
            config.validate(),
            Err(ScrapeError::InvalidUrl { .. })
        ));

        let config = builder().page_count(0usize).build().unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_should_deserialize_with_defaults() {
        let config: ScrapeConfig = toml::from_str(
            r#"
            email = "user@example.com"
            password = "secret"
            start_url = "https://m3e-medical.com/issues/1"
            file_name = "out"
            page_count = 3
            font_path = "fixtures/fonts/RobotoMedium.ttf"
            "#,
        )
        .unwrap();

        assert_eq!(config.page_count, 3);
        assert_eq!(config.login_url, DEFAULT_LOGIN_URL);
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.font_path, PathBuf::from(FONT));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn font_path_should_be_required() {
        let err = toml::from_str::<ScrapeConfig>(
            r#"
            email = "user@example.com"
            password = "secret"
            start_url = "https://m3e-medical.com/issues/1"
            file_name = "out"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("font_path"));

        let mut builder = ScrapeConfigBuilder::default();
        builder
            .email("user@example.com")
            .password("secret")
            .start_url("https://m3e-medical.com/issues/1")
            .file_name("out");
        assert!(builder.build().is_err());
    }

    #[test]
    fn validate_should_reject_a_missing_font_file() {
        let config = builder().font_path("fixtures/fonts/missing.ttf").build().unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ScrapeError::Config(ref msg) if msg.contains("missing.ttf")));

        let config = builder().font_path("fixtures").build().unwrap();
        assert!(config.validate().is_err());
    }
}
