//! The daily-margin scrape, end to end, for one date.
//!
//! Every failure inside the flow becomes a [`FetchOutcome`]; nothing escapes as an
//! error, and the browser session is closed on every path.

use chrono::NaiveDate;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{SiteSettings, TimeoutSettings};
use crate::scrape::adapters::{BrowserLauncher, PageDriver};
use crate::scrape::response::parse_api_response;
use crate::scrape::types::{BlockedAt, DateQuery, FetchOutcome, RawRow, ScrapeResult};

/// Anything that can produce margin rows for a date.
#[async_trait::async_trait]
pub trait MarginSource: Send + Sync {
    async fn fetch(&self, date: NaiveDate) -> FetchOutcome;

    /// The plain contract: rows, or empty for every kind of failure.
    async fn fetch_rows(&self, date: NaiveDate) -> Vec<RawRow> {
        self.fetch(date).await.into_rows()
    }
}

pub struct MarginFetcher<L> {
    launcher: L,
    site: SiteSettings,
    timeouts: TimeoutSettings,
}

impl<L: BrowserLauncher> MarginFetcher<L> {
    pub fn new(launcher: L, site: SiteSettings, timeouts: TimeoutSettings) -> Self {
        Self { launcher, site, timeouts }
    }

    fn is_blocked(&self, title: &str) -> bool {
        title.contains(&self.site.blocked_title_marker)
    }

    async fn drive(&self, page: &mut L::Page, query: &DateQuery) -> ScrapeResult<FetchOutcome> {
        let site = &self.site;
        let timeouts = &self.timeouts;

        // The edge protection only hands out its trust cookie to sessions that came
        // through the homepage; going straight to the margin page gets rejected.
        info!(url = %site.home_url, "visiting homepage");
        page.goto(&site.home_url, timeouts.navigation()).await?;
        let title = page.title().await?;
        info!(%title, "homepage loaded");
        if self.is_blocked(&title) {
            warn!("homepage blocked");
            return Ok(FetchOutcome::Blocked(BlockedAt::Homepage));
        }
        page.sleep(timeouts.home_settle()).await;

        info!(url = %site.margin_url, "navigating to daily margin page");
        page.goto(&site.margin_url, timeouts.navigation()).await?;
        let title = page.title().await?;
        info!(%title, "daily margin page loaded");
        if self.is_blocked(&title) {
            warn!("daily margin page blocked");
            return Ok(FetchOutcome::Blocked(BlockedAt::TargetPage));
        }
        page.sleep(timeouts.page_settle()).await;

        page.wait_for_selector(&site.date_input, timeouts.date_input()).await?;
        page.fill(&site.date_input, &query.display).await?;
        debug!(display = %query.display, "filled display date");

        // The page script builds its request from the hidden field, not the visible one.
        match page.set_value_by_id(&site.hidden_date_input_id, &query.hidden).await? {
            Some(value) => debug!(%value, "hidden date field set"),
            None => warn!(id = %site.hidden_date_input_id, "hidden date field not found"),
        }

        let capture = page.capture_response(&site.api_url_fragment).await?;

        page.wait_for_selector(&site.submit_button, timeouts.submit_button()).await?;
        page.click(&site.submit_button).await?;
        debug!("submitted date query");

        let body = match tokio::time::timeout(timeouts.api_response(), capture).await {
            Ok(Ok(body)) => {
                info!(len = body.len(), "API response received");
                Some(body)
            }
            Ok(Err(_)) => {
                warn!("API response matched but its body could not be read");
                None
            }
            Err(_) => {
                warn!(timeout_ms = timeouts.api_response_ms, "timeout waiting for API response");
                return Ok(self.settle_overlay(page, FetchOutcome::Timeout).await);
            }
        };

        let outcome = match body {
            Some(body) => outcome_from_body(&body),
            None => FetchOutcome::Failed("API response body unavailable".into()),
        };
        Ok(self.settle_overlay(page, outcome).await)
    }

    /// A stuck overlay does not change the result.
    async fn settle_overlay(&self, page: &mut L::Page, outcome: FetchOutcome) -> FetchOutcome {
        match page.wait_until_hidden(&self.site.loading_overlay, self.timeouts.overlay()).await {
            Ok(()) => debug!("loading overlay hidden"),
            Err(e) => debug!(error = %e, "ignoring loading overlay wait failure"),
        }
        outcome
    }
}

fn outcome_from_body(body: &str) -> FetchOutcome {
    match parse_api_response(body) {
        Ok(rows) if rows.is_empty() => FetchOutcome::NoData,
        Ok(rows) => {
            info!(rows = rows.len(), "parsed margin rows");
            FetchOutcome::Success(rows)
        }
        Err(e) => {
            let preview: String = body.chars().take(200).collect();
            warn!(error = %e, %preview, "could not parse API response");
            FetchOutcome::ParseError(e.to_string())
        }
    }
}

#[async_trait::async_trait]
impl<L: BrowserLauncher> MarginSource for MarginFetcher<L> {
    #[instrument(skip(self))]
    async fn fetch(&self, date: NaiveDate) -> FetchOutcome {
        let query = DateQuery::new(date);
        info!(hidden = %query.hidden, display = %query.display, "fetching daily margins");

        let mut page = match self.launcher.launch().await {
            Ok(page) => page,
            Err(e) => {
                error!(error = ?e, "failed to launch browser session");
                return FetchOutcome::Failed(e.to_string());
            }
        };

        let outcome = match self.drive(&mut page, &query).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = ?e, "margin scrape aborted");
                FetchOutcome::Failed(e.to_string())
            }
        };

        if let Err(e) = page.close().await {
            warn!(error = %e, "failed to close browser session cleanly");
        }
        info!(outcome = outcome.label(), "fetch finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::types::{ScrapeError, ScrapeResult};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[derive(Clone, Default)]
    struct Script {
        home_title: String,
        margin_title: String,
        body: Option<String>,
        missing_date_input: bool,
    }

    #[derive(Default)]
    struct Journal {
        calls: Vec<String>,
        closed: bool,
    }

    struct FakeLauncher {
        script: Script,
        journal: Arc<Mutex<Journal>>,
    }

    struct FakePage {
        script: Script,
        journal: Arc<Mutex<Journal>>,
        pending: Option<oneshot::Sender<String>>,
        held: Option<oneshot::Sender<String>>,
    }

    impl FakePage {
        fn log(&self, call: String) {
            self.journal.lock().unwrap().calls.push(call);
        }
    }

    #[async_trait::async_trait]
    impl BrowserLauncher for FakeLauncher {
        type Page = FakePage;

        async fn launch(&self) -> ScrapeResult<FakePage> {
            Ok(FakePage {
                script: self.script.clone(),
                journal: Arc::clone(&self.journal),
                pending: None,
                held: None,
            })
        }
    }

    #[async_trait::async_trait]
    impl PageDriver for FakePage {
        async fn goto(&mut self, url: &str, _timeout: Duration) -> ScrapeResult<()> {
            self.log(format!("goto {url}"));
            Ok(())
        }

        async fn title(&mut self) -> ScrapeResult<String> {
            let visited_margin = self
                .journal
                .lock()
                .unwrap()
                .calls
                .iter()
                .any(|c| c.contains("daily-margin"));
            Ok(if visited_margin { self.script.margin_title.clone() } else { self.script.home_title.clone() })
        }

        async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> ScrapeResult<()> {
            if self.script.missing_date_input && selector == "#txtDate" {
                return Err(ScrapeError::Timeout { what: selector.into(), millis: timeout.as_millis() });
            }
            Ok(())
        }

        async fn fill(&mut self, selector: &str, value: &str) -> ScrapeResult<()> {
            self.log(format!("fill {selector}={value}"));
            Ok(())
        }

        async fn set_value_by_id(&mut self, id: &str, value: &str) -> ScrapeResult<Option<String>> {
            self.log(format!("set {id}={value}"));
            Ok(Some(value.to_string()))
        }

        async fn click(&mut self, selector: &str) -> ScrapeResult<()> {
            self.log(format!("click {selector}"));
            if let Some(tx) = self.pending.take() {
                match self.script.body.clone() {
                    Some(body) => {
                        let _ = tx.send(body);
                    }
                    // Keep the sender alive so the receiver times out instead of closing.
                    None => self.held = Some(tx),
                }
            }
            Ok(())
        }

        async fn capture_response(&mut self, url_fragment: &str) -> ScrapeResult<oneshot::Receiver<String>> {
            self.log(format!("capture {url_fragment}"));
            let (tx, rx) = oneshot::channel();
            self.pending = Some(tx);
            Ok(rx)
        }

        async fn wait_until_hidden(&mut self, selector: &str, timeout: Duration) -> ScrapeResult<()> {
            Err(ScrapeError::Timeout { what: selector.into(), millis: timeout.as_millis() })
        }

        async fn close(self) -> ScrapeResult<()> {
            self.journal.lock().unwrap().closed = true;
            Ok(())
        }
    }

    fn fast_timeouts() -> TimeoutSettings {
        TimeoutSettings {
            navigation_ms: 50,
            date_input_ms: 50,
            submit_button_ms: 50,
            api_response_ms: 50,
            overlay_ms: 10,
            home_settle_ms: 0,
            page_settle_ms: 0,
        }
    }

    fn fetcher(script: Script) -> (MarginFetcher<FakeLauncher>, Arc<Mutex<Journal>>) {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let launcher = FakeLauncher { script, journal: Arc::clone(&journal) };
        (MarginFetcher::new(launcher, SiteSettings::default(), fast_timeouts()), journal)
    }

    fn ok_script(body: Option<&str>) -> Script {
        Script {
            home_title: "MCXCCL".into(),
            margin_title: "Daily Margin".into(),
            body: body.map(str::to_string),
            missing_date_input: false,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[tokio::test]
    async fn test_success_flow() {
        let body = r#"{"d":{"Summary":{"Count":1},"Data":[{"Symbol":"NATURALGAS","InitialMargin":5.25}]}}"#;
        let (fetcher, journal) = fetcher(ok_script(Some(body)));

        let rows = fetcher.fetch_rows(day()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Symbol"], "NATURALGAS");

        let journal = journal.lock().unwrap();
        assert!(journal.closed);
        let calls = &journal.calls;
        assert_eq!(calls[0], "goto https://www.mcxccl.com/");
        assert_eq!(calls[1], "goto https://www.mcxccl.com/risk-management/daily-margin");
        assert!(calls.contains(&"fill #txtDate=01/03/2024".to_string()));
        assert!(calls.contains(&"set cph_InnerContainerRight_C001_txtDate_hid_val=20240301".to_string()));
        let capture = calls.iter().position(|c| c == "capture GetDailyMargin").unwrap();
        let click = calls.iter().position(|c| c == "click #btnShow").unwrap();
        assert!(capture < click);
    }

    #[tokio::test]
    async fn test_blocked_homepage_skips_target() {
        let mut script = ok_script(Some("[]"));
        script.home_title = "Access Denied".into();
        let (fetcher, journal) = fetcher(script);

        assert_eq!(fetcher.fetch(day()).await, FetchOutcome::Blocked(BlockedAt::Homepage));
        let journal = journal.lock().unwrap();
        assert_eq!(journal.calls, vec!["goto https://www.mcxccl.com/".to_string()]);
        assert!(journal.closed);
    }

    #[tokio::test]
    async fn test_blocked_target_page() {
        let mut script = ok_script(Some("[]"));
        script.margin_title = "Access Denied - Reference #18".into();
        let (fetcher, journal) = fetcher(script);

        assert_eq!(fetcher.fetch(day()).await, FetchOutcome::Blocked(BlockedAt::TargetPage));
        assert!(fetcher.fetch_rows(day()).await.is_empty());
        assert!(!journal.lock().unwrap().calls.iter().any(|c| c.starts_with("click")));
    }

    #[tokio::test]
    async fn test_null_data_is_no_data() {
        let (fetcher, _) = fetcher(ok_script(Some(r#"{"d": {"Summary":{"Count":0}, "Data": null}}"#)));
        assert_eq!(fetcher.fetch(day()).await, FetchOutcome::NoData);
        assert!(fetcher.fetch_rows(day()).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let (fetcher, journal) = fetcher(ok_script(Some("<html>oops</html>")));
        assert!(matches!(fetcher.fetch(day()).await, FetchOutcome::ParseError(_)));
        assert!(fetcher.fetch_rows(day()).await.is_empty());
        assert!(journal.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_api_timeout() {
        let (fetcher, journal) = fetcher(ok_script(None));
        assert_eq!(fetcher.fetch(day()).await, FetchOutcome::Timeout);
        assert!(journal.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_flow_error_still_closes_session() {
        let mut script = ok_script(Some("[]"));
        script.missing_date_input = true;
        let (fetcher, journal) = fetcher(script);

        assert!(matches!(fetcher.fetch(day()).await, FetchOutcome::Failed(_)));
        assert!(journal.lock().unwrap().closed);
    }
}
