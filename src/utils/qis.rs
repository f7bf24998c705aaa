use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;
use reqwest::cookie::Jar;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;
use urlencoding::encode;

use crate::config::QisConfig;
use crate::errors::FetchError;
use crate::models::{Grade, GradeRecord, Snapshot};

/// Source of the current exam result listing.
#[async_trait]
pub trait GradeFetcher: Send + Sync {
    async fn fetch_current_grades(&self) -> Result<Snapshot, FetchError>;
}

/// Logs into an HIS-QIS portal and scrapes the "Notenspiegel" page.
pub struct QisFetcher {
    // Login must see the 302 itself, every other request follows redirects.
    login_client: Client,
    client: Client,
    base_url: Url,
    username: String,
    password: String,
    degree_node: String,
    asi_pattern: Regex,
}

impl QisFetcher {
    pub fn new(config: &QisConfig) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        let login_client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .redirect(Policy::none())
            .timeout(Duration::from_secs(30))
            .build()?;
        let client = Client::builder()
            .cookie_provider(jar)
            .timeout(Duration::from_secs(30))
            .build()?;
        let asi_pattern = Regex::new(r#"asi=([^";&]*)"#)
            .map_err(|e| FetchError::Markup(format!("invalid session token pattern: {e}")))?;

        Ok(Self {
            login_client,
            client,
            base_url: config.base_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            degree_node: config.degree_node.clone(),
            asi_pattern,
        })
    }

    fn with_query(&self, query: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(Some(query));
        url
    }

    async fn login(&self) -> Result<Url, FetchError> {
        let login_url = self.with_query(
            "state=user&type=1&category=auth.login&startpage=portal.vm&topitem=functions&breadCrumbSource=portal",
        );
        let login_data = HashMap::from([
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("stg_role", "S90"),
            ("submit", "Anmelden"),
        ]);

        let response = self.login_client.post(login_url).form(&login_data).send().await?;
        let status = response.status();
        if !status.is_redirection() {
            return Err(FetchError::Status { stage: "login", status });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(FetchError::MissingRedirect)?;
        self.base_url.join(location).map_err(|_| FetchError::MissingRedirect)
    }

    async fn get_page(&self, url: Url, stage: &'static str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { stage, status });
        }
        Ok(response.text().await?)
    }

    fn session_token<'a>(&self, html: &'a str) -> Result<&'a str, FetchError> {
        self.asi_pattern
            .captures(html)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str())
            .filter(|asi| !asi.is_empty())
            .ok_or(FetchError::MissingSessionToken)
    }
}

#[async_trait]
impl GradeFetcher for QisFetcher {
    async fn fetch_current_grades(&self) -> Result<Snapshot, FetchError> {
        let landing = self.login().await?;
        let portal = self.get_page(landing, "redirect").await?;
        let asi = self.session_token(&portal)?;
        debug!("asi: {}", asi);

        let overview = self.with_query(&format!(
            "state=notenspiegelStudent&next=list.vm&nextdir=qispos/notenspiegel/student&menuid=notenspiegelStudent\
             &createInfos=Y&struct=auswahlBaum&nodeID={}&expand=0&asi={}",
            encode(&self.degree_node),
            encode(asi)
        ));
        let html = self.get_page(overview, "grade overview").await?;

        let grades = parse_grades(&html)?;
        info!("Fetched {} exam results", grades.len());
        Ok(grades)
    }
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Markup(format!("selector {css}: {e:?}")))
}

fn cell_text(row: &ElementRef<'_>, selector: &Selector, what: &str) -> Result<String, FetchError> {
    row.select(selector)
        .next()
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .ok_or_else(|| FetchError::Markup(format!("exam row without {what}")))
}

/// Extracts one record per `tr.PL` row of the grade overview.
///
/// A row missing one of its cells, or with a blank exam name, fails the whole
/// fetch rather than being skipped. A page without any rows is a failed fetch.
pub fn parse_grades(html: &str) -> Result<Snapshot, FetchError> {
    let document = Html::parse_document(html);
    let row_selector = selector("tr.PL")?;
    let course_selector = selector(".examName")?;
    let exam_type_selector = selector(r##"a[href="#legende"]"##)?;
    let grade_selector = selector("td:nth-of-type(4)")?;

    let mut grades = Vec::new();
    for row in document.select(&row_selector) {
        let course = cell_text(&row, &course_selector, "exam name")?;
        if course.is_empty() {
            return Err(FetchError::Markup("exam row with empty exam name".to_string()));
        }
        let exam_type = cell_text(&row, &exam_type_selector, "exam type")?;
        let grade = cell_text(&row, &grade_selector, "grade cell")?;
        grades.push(GradeRecord::new(course, exam_type, Grade::from_cell(&grade)));
    }

    if grades.is_empty() {
        return Err(FetchError::EmptyListing);
    }
    Ok(grades)
}
