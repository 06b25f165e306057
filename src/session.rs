use crate::error::{Result, ScrapeError};
use reqwest::{cookie::Jar, header::LOCATION, redirect::Policy, Client, StatusCode};
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

static TOKEN_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[name="authenticity_token"]"#).unwrap());

/// An authenticated client bound to one cookie store.
///
/// Two clients share the jar: the login POST must see the redirect itself, every other
/// request follows redirects as a browser would.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
}

impl Session {
    fn new(jar: Arc<Jar>) -> Result<Self> {
        let client = Client::builder().cookie_provider(jar).build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET `url` with the session cookies, failing on a non-success status.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let res = self.client.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(ScrapeError::PageStatus {
                url: url.to_string(),
                status,
            });
        }
        Ok(res.text().await?)
    }
}

/// Log into the site and return the session carrying its cookies.
///
/// Only a 302/303 answer to the login POST counts as success.
pub async fn authenticate(login_url: &str, email: &str, password: &str) -> Result<Session> {
    let jar = Arc::new(Jar::default());
    let session = Session::new(jar.clone())?;

    let res = session.client.get(login_url).send().await?;
    if !res.status().is_success() {
        return Err(ScrapeError::LoginPage(res.status()));
    }
    let html = res.text().await?;
    let token = parse_token(&html).ok_or(ScrapeError::MissingToken)?;
    debug!("found anti-forgery token on login page");

    let login_client = Client::builder()
        .cookie_provider(jar)
        .redirect(Policy::none())
        .build()?;
    let res = login_client
        .post(login_url)
        .form(&[
            ("authenticity_token", token.as_str()),
            ("user[email]", email),
            ("user[password]", password),
        ])
        .send()
        .await?;

    match res.status() {
        StatusCode::FOUND | StatusCode::SEE_OTHER => {
            let location = res
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            info!(%location, "login succeeded");
            Ok(session)
        }
        status => Err(ScrapeError::LoginRejected(status)),
    }
}

fn parse_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&TOKEN_INPUT)
        .next()
        .and_then(|input| input.value().attr("value"))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
