//! Bounded, same-site website fetcher.
//!
//! [`Fetcher::start`] fetches the root page of a company website. The returned
//! [`SiteCrawl`] then yields further internal pages one at a time, breadth
//! first, following the most relevant links first, until `max_pages` or
//! `max_depth` is reached.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use radar_shared::{FetchConfig, PageContent, RadarError, Result};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::extract::{extract_links, extract_text, extract_title, keyword_hits, truncate_chars};

/// File types never worth fetching as pages.
const SKIPPED_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".zip", ".doc", ".docx", ".xls",
    ".xlsx", ".mp4", ".mp3", ".ics",
];

/// Base delay of the linear backoff between root page attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// SiteSnapshot
// ---------------------------------------------------------------------------

/// Everything fetched from one website, ready for classification.
#[derive(Debug, Clone)]
pub struct SiteSnapshot {
    /// Root URL after redirects.
    pub root: Url,
    pub title: Option<String>,
    /// Root page first, then sub-pages in fetch order. Failed sub-pages are
    /// kept with `success == false`.
    pub pages: Vec<PageContent>,
    /// Text of all successful pages, capped at `max_text_chars`.
    pub text: String,
    /// Topic keywords found in the text.
    pub keyword_hits: Vec<String>,
}

impl SiteSnapshot {
    /// Sub-pages that could not be fetched, as non-fatal errors.
    pub fn partial_failures(&self) -> Vec<RadarError> {
        self.pages
            .iter()
            .filter(|p| !p.success)
            .map(|p| RadarError::PartialFetch {
                url: p.url.clone(),
                reason: p.error.clone().unwrap_or_default(),
            })
            .collect()
    }
}

/// Source of website snapshots. Implemented by [`Fetcher`]; tests substitute
/// canned content.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_site(&self, root: &Url) -> Result<SiteSnapshot>;
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// HTTP fetcher for company websites.
pub struct Fetcher {
    config: FetchConfig,
    client: Client,
}

impl Fetcher {
    /// Create a fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let allow_private = config.allow_private_hosts;
        let redirects = Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if !allow_private && is_ssrf_target(attempt.url()) {
                attempt.error("redirect to a private or loopback address")
            } else {
                attempt.follow()
            }
        });
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(redirects)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RadarError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Fetch the root page. Fails with [`RadarError::FetchFailed`] if the root
    /// is unreachable after all retries. Calling `start` again restarts the
    /// crawl from scratch.
    #[instrument(skip_all, fields(root = %root))]
    pub async fn start(&self, root: &Url) -> Result<SiteCrawl<'_>> {
        if !matches!(root.scheme(), "http" | "https") {
            return Err(RadarError::fetch_failed(root.as_str(), "not an http(s) URL"));
        }
        if !self.config.allow_private_hosts && is_ssrf_target(root) {
            warn!("SSRF protection: blocked");
            return Err(RadarError::fetch_failed(
                root.as_str(),
                "private or loopback address",
            ));
        }

        let mut attempt = 0;
        let (final_url, body) = loop {
            match self.fetch_html(root).await {
                Ok(fetched) => break fetched,
                Err(e) if e.retryable && attempt < self.config.retries => {
                    attempt += 1;
                    debug!(attempt, reason = %e.reason, "root fetch failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(RadarError::fetch_failed(root.as_str(), e.reason)),
            }
        };
        // The root may move to another domain, but never to a private host.
        if let Err(reason) = check_landing(None, &final_url, self.config.allow_private_hosts) {
            warn!(%final_url, "SSRF protection: redirect blocked");
            return Err(RadarError::fetch_failed(root.as_str(), reason));
        }

        let doc = Html::parse_document(&body);
        let title = extract_title(&doc);
        let text = extract_text(&doc);
        let links = extract_links(&doc, &final_url);

        let mut crawl = SiteCrawl {
            fetcher: self,
            root: final_url.clone(),
            title,
            pending_root: Some(PageContent::ok(final_url.as_str(), text)),
            queue: VecDeque::new(),
            visited: HashSet::from([normalize_url(&final_url)]),
            attempted: 1,
        };
        if self.config.max_depth > 0 {
            crawl.enqueue(links, 1);
        }

        Ok(crawl)
    }

    /// GET one page. Returns the final URL and the body.
    async fn fetch_html(&self, url: &Url) -> std::result::Result<(Url, String), PageError> {
        debug!(%url, "fetching page");

        let response = self.client.get(url.as_str()).send().await.map_err(|e| PageError {
            retryable: e.is_connect() || e.is_timeout(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PageError {
                retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
                reason: format!("HTTP {status}"),
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| PageError {
            retryable: e.is_timeout(),
            reason: format!("body read failed: {e}"),
        })?;

        Ok((final_url, body))
    }
}

#[async_trait]
impl PageSource for Fetcher {
    async fn fetch_site(&self, root: &Url) -> Result<SiteSnapshot> {
        let crawl = self.start(root).await?;
        Ok(crawl.collect().await)
    }
}

struct PageError {
    reason: String,
    retryable: bool,
}

// ---------------------------------------------------------------------------
// SiteCrawl
// ---------------------------------------------------------------------------

/// An in-progress crawl of one website.
pub struct SiteCrawl<'a> {
    fetcher: &'a Fetcher,
    root: Url,
    title: Option<String>,
    pending_root: Option<PageContent>,
    queue: VecDeque<(Url, u32)>,
    visited: HashSet<String>,
    /// Pages requested so far, root included.
    attempted: usize,
}

impl SiteCrawl<'_> {
    /// Yield the next page: the root first, then sub-pages. Returns `None`
    /// once the page budget is spent or no links are left.
    pub async fn next_page(&mut self) -> Option<PageContent> {
        if let Some(root) = self.pending_root.take() {
            return Some(root);
        }

        let fetcher = self.fetcher;
        let config = &fetcher.config;
        while self.attempted < config.max_pages {
            let (url, depth) = self.queue.pop_front()?;
            if !self.visited.insert(normalize_url(&url)) {
                continue;
            }
            self.attempted += 1;

            if config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
            }

            let fetched = fetcher.fetch_html(&url).await.and_then(|(final_url, body)| {
                check_landing(Some(&self.root), &final_url, config.allow_private_hosts)
                    .map(|()| (final_url, body))
                    .map_err(|reason| PageError {
                        reason,
                        retryable: false,
                    })
            });

            return Some(match fetched {
                Ok((final_url, body)) => {
                    self.visited.insert(normalize_url(&final_url));
                    let (text, links) = {
                        let doc = Html::parse_document(&body);
                        (extract_text(&doc), extract_links(&doc, &final_url))
                    };
                    if depth < config.max_depth {
                        self.enqueue(links, depth + 1);
                    }
                    PageContent::ok(url.as_str(), text)
                }
                Err(e) => {
                    warn!(%url, reason = %e.reason, "sub-page skipped");
                    PageContent::failed(url.as_str(), e.reason)
                }
            });
        }

        None
    }

    /// Drain the crawl into a [`SiteSnapshot`].
    pub async fn collect(mut self) -> SiteSnapshot {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await {
            pages.push(page);
        }

        let fetcher = self.fetcher;
        let config = &fetcher.config;
        let combined = pages
            .iter()
            .filter(|p| p.success && !p.text.is_empty())
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let hits = keyword_hits(&combined, &config.keywords);
        let text = truncate_chars(&combined, config.max_text_chars).to_string();

        info!(
            root = %self.root,
            pages = pages.len(),
            failed = pages.iter().filter(|p| !p.success).count(),
            chars = text.chars().count(),
            "site fetched"
        );

        SiteSnapshot {
            root: self.root,
            title: self.title,
            pages,
            text,
            keyword_hits: hits,
        }
    }

    /// Queue in-scope links found at `depth`, most relevant first. When link
    /// hints are configured, links matching none of them are dropped.
    fn enqueue(&mut self, links: Vec<Url>, depth: u32) {
        let fetcher = self.fetcher;
        let hints = &fetcher.config.link_hints;
        let allow_private = fetcher.config.allow_private_hosts;

        let mut ranked: Vec<(usize, Url)> = links
            .into_iter()
            .filter(|url| in_scope(&self.root, url))
            .filter(|url| allow_private || !is_ssrf_target(url))
            .filter(|url| !self.visited.contains(&normalize_url(url)))
            .map(|url| (hint_score(&url, hints), url))
            .filter(|(score, _)| hints.is_empty() || *score > 0)
            .collect();

        // stable: equal scores keep document order
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let mut seen = HashSet::new();
        for (_, url) in ranked {
            if seen.insert(normalize_url(&url)) {
                self.queue.push_back((url, depth));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scope checking
// ---------------------------------------------------------------------------

/// Same site (host without `www.`), http(s), and not an obvious download.
fn in_scope(root: &Url, url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    if bare_host(url) != bare_host(root) || bare_host(url).is_empty() {
        return false;
    }
    let path = url.path().to_ascii_lowercase();
    !SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Where a request ended up after redirects must pass the same checks as a
/// link: in scope of `root` (sub-pages only) and not a private host.
fn check_landing(
    root: Option<&Url>,
    landed: &Url,
    allow_private: bool,
) -> std::result::Result<(), String> {
    if let Some(root) = root {
        if !in_scope(root, landed) {
            return Err(format!("redirected off-site to {landed}"));
        }
    }
    if !allow_private && is_ssrf_target(landed) {
        return Err(format!("redirected to private or loopback address {landed}"));
    }
    Ok(())
}

fn bare_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

/// Number of hints found in the path and query of `url`.
fn hint_score(url: &Url, hints: &[String]) -> usize {
    let target = format!("{}?{}", url.path(), url.query().unwrap_or("")).to_lowercase();
    hints
        .iter()
        .filter(|hint| !hint.is_empty() && target.contains(hint.as_str()))
        .count()
}

/// Normalize a URL for deduplication (strip fragment, trailing slash, `www.`).
fn normalize_url(url: &Url) -> String {
    let path = url.path().trim_end_matches('/');
    match url.query() {
        Some(q) => format!("{}{path}?{q}", bare_host(url)),
        None => format!("{}{path}", bare_host(url)),
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> FetchConfig {
        FetchConfig {
            timeout_secs: 5,
            max_pages: 3,
            max_depth: 1,
            delay_ms: 0,
            retries: 2,
            max_text_chars: 8000,
            user_agent: "RadarBot/test".into(),
            link_hints: vec!["about".into(), "produkt".into(), "innovation".into()],
            keywords: vec!["Machine Learning".into(), "KI".into()],
            allow_private_hosts: true,
        }
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html; charset=utf-8")
            .set_body_string(format!("<html><head><title>T</title></head><body>{body}</body></html>"))
    }

    async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn ssrf_protection() {
        assert!(is_ssrf_target(&Url::parse("file:///etc/passwd").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://192.168.1.1/admin").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://127.0.0.1:8080/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://[::1]/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://localhost:3000/api").unwrap()));
        assert!(!is_ssrf_target(&Url::parse("https://acme-robotics.de/").unwrap()));
    }

    #[test]
    fn scope_ignores_www_and_downloads() {
        let root = Url::parse("https://www.acme.example/").unwrap();
        assert!(in_scope(&root, &Url::parse("https://acme.example/about").unwrap()));
        assert!(in_scope(&root, &Url::parse("http://www.acme.example/produkte").unwrap()));
        assert!(!in_scope(&root, &Url::parse("https://shop.acme.example/").unwrap()));
        assert!(!in_scope(&root, &Url::parse("https://other.example/about").unwrap()));
        assert!(!in_scope(&root, &Url::parse("https://acme.example/katalog.PDF").unwrap()));
    }

    #[test]
    fn redirect_landing_is_checked() {
        let root = Url::parse("https://www.acme.example/").unwrap();
        let loopback = Url::parse("http://127.0.0.1:8080/admin").unwrap();
        assert!(check_landing(None, &loopback, false).is_err());
        assert!(check_landing(None, &loopback, true).is_ok());

        let other = Url::parse("https://other.example/about").unwrap();
        let err = check_landing(Some(&root), &other, true).unwrap_err();
        assert!(err.contains("off-site"));
        let own = Url::parse("https://acme.example/about").unwrap();
        assert!(check_landing(Some(&root), &own, false).is_ok());
    }

    #[test]
    fn hints_rank_links() {
        let hints = vec!["about".to_string(), "produkt".to_string()];
        let about = Url::parse("https://a.example/about-us").unwrap();
        let both = Url::parse("https://a.example/about/produkte").unwrap();
        let none = Url::parse("https://a.example/impressum").unwrap();
        assert_eq!(hint_score(&about, &hints), 1);
        assert_eq!(hint_score(&both, &hints), 2);
        assert_eq!(hint_score(&none, &hints), 0);
    }

    #[tokio::test]
    async fn fetches_root_and_relevant_subpages() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/",
            html(
                r#"<main><p>Wir nutzen Machine Learning.</p>
                <a href="/impressum">Impressum</a>
                <a href="/about">About</a>
                <a href="/produkte">Produkte</a>
                <a href="/innovation/about-ki">KI</a>
                <a href="https://elsewhere.example/about">Partner</a></main>"#,
            ),
        )
        .await;
        mount(&server, "/about", html("<p>Familienunternehmen seit 1950.</p>")).await;
        mount(&server, "/produkte", html("<p>Greifer.</p>")).await;
        mount(&server, "/innovation/about-ki", html("<p>Unser KI-Labor.</p>")).await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let root = Url::parse(&server.uri()).unwrap();
        let snapshot = fetcher.fetch_site(&root).await.expect("fetch");

        // root + two best-ranked sub-pages
        assert_eq!(snapshot.pages.len(), 3);
        assert!(snapshot.pages.iter().all(|p| p.success));
        assert!(snapshot.pages[1].url.ends_with("/innovation/about-ki"));
        assert!(snapshot.text.contains("Unser KI-Labor."));
        assert!(!snapshot.pages.iter().any(|p| p.url.contains("impressum")));
        assert_eq!(
            snapshot.keyword_hits,
            vec!["Machine Learning".to_string(), "KI".to_string()]
        );
        assert_eq!(snapshot.title.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn subpage_redirected_off_site_is_not_read() {
        let elsewhere = MockServer::start().await;
        mount(&elsewhere, "/landing", html("<p>OFFDOMAIN secrets.</p>")).await;
        let landing = format!(
            "http://localhost:{}/landing",
            elsewhere.address().port()
        );

        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<p>Root.</p><a href="/about">About</a>"#)).await;
        mount(
            &server,
            "/about",
            ResponseTemplate::new(302).insert_header("location", landing.as_str()),
        )
        .await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let root = Url::parse(&server.uri()).unwrap();
        let snapshot = fetcher.fetch_site(&root).await.expect("root is fine");

        assert_eq!(snapshot.pages.len(), 2);
        assert!(!snapshot.pages[1].success);
        assert!(!snapshot.text.contains("OFFDOMAIN"));
        let failures = snapshot.partial_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("off-site"));
    }

    #[tokio::test]
    async fn same_content_same_text() {
        let server = MockServer::start().await;
        mount(&server, "/", html("<p>Stable content.</p>")).await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let root = Url::parse(&server.uri()).unwrap();
        let a = fetcher.fetch_site(&root).await.unwrap();
        let b = fetcher.fetch_site(&root).await.unwrap();
        assert_eq!(a.text, b.text);
    }

    #[tokio::test]
    async fn failed_subpage_is_partial() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/",
            html(r#"<p>Root.</p><a href="/about">About</a><a href="/produkte">Produkte</a>"#),
        )
        .await;
        mount(&server, "/about", ResponseTemplate::new(500)).await;
        mount(&server, "/produkte", html("<p>Greifer.</p>")).await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let root = Url::parse(&server.uri()).unwrap();
        let snapshot = fetcher.fetch_site(&root).await.expect("partial fetch is ok");

        assert_eq!(snapshot.pages.len(), 3);
        let failures = snapshot.partial_failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], RadarError::PartialFetch { .. }));
        assert!(snapshot.text.contains("Greifer."));
    }

    #[tokio::test]
    async fn unreachable_root_is_fatal() {
        let server = MockServer::start().await;
        mount(&server, "/", ResponseTemplate::new(404)).await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let root = Url::parse(&server.uri()).unwrap();
        let err = fetcher.start(&root).await.err().expect("must fail");
        assert!(matches!(err, RadarError::FetchFailed { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn root_retries_transient_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount(&server, "/", html("<p>Back online.</p>")).await;

        let fetcher = Fetcher::new(test_config()).unwrap();
        let root = Url::parse(&server.uri()).unwrap();
        let snapshot = fetcher.fetch_site(&root).await.expect("third attempt succeeds");
        assert!(snapshot.text.contains("Back online."));
    }

    #[tokio::test]
    async fn private_hosts_blocked_by_default() {
        let mut config = test_config();
        config.allow_private_hosts = false;
        let fetcher = Fetcher::new(config).unwrap();

        let err = fetcher
            .start(&Url::parse("http://127.0.0.1:9/").unwrap())
            .await
            .err()
            .expect("blocked");
        assert!(err.to_string().contains("private"));
    }

    #[tokio::test]
    async fn depth_zero_fetches_root_only() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<p>Root.</p><a href="/about">About</a>"#)).await;
        mount(&server, "/about", html("<p>About.</p>")).await;

        let mut config = test_config();
        config.max_depth = 0;
        let fetcher = Fetcher::new(config).unwrap();
        let root = Url::parse(&server.uri()).unwrap();

        let mut crawl = fetcher.start(&root).await.unwrap();
        assert!(crawl.next_page().await.is_some());
        assert!(crawl.next_page().await.is_none());
    }
}
