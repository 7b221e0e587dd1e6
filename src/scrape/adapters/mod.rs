// Browser seam: the fetcher drives a page through these traits so the flow can run
// against a real Chromium or a scripted stand-in.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::scrape::types::ScrapeResult;

#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Page: PageDriver;

    /// Start an isolated session with the stealth profile already installed,
    /// so it is active for every document the page loads afterwards.
    async fn launch(&self) -> ScrapeResult<Self::Page>;
}

#[async_trait::async_trait]
pub trait PageDriver: Send {
    async fn goto(&mut self, url: &str, timeout: Duration) -> ScrapeResult<()>;

    async fn title(&mut self) -> ScrapeResult<String>;

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> ScrapeResult<()>;

    /// Replace the value of a visible input, firing the usual input/change events.
    async fn fill(&mut self, selector: &str, value: &str) -> ScrapeResult<()>;

    /// Set an input by element id and read it back; `None` when the element is missing.
    async fn set_value_by_id(&mut self, id: &str, value: &str) -> ScrapeResult<Option<String>>;

    async fn click(&mut self, selector: &str) -> ScrapeResult<()>;

    /// Resolves with the body of the first response whose URL contains `url_fragment`.
    /// The sender is dropped without a value if that body cannot be read.
    async fn capture_response(&mut self, url_fragment: &str) -> ScrapeResult<oneshot::Receiver<String>>;

    async fn wait_until_hidden(&mut self, selector: &str, timeout: Duration) -> ScrapeResult<()>;

    async fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    async fn close(self) -> ScrapeResult<()>;
}

pub mod chromium;
