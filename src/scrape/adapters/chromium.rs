// Chromium over CDP via chromiumoxide.

use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFinished, EventResponseReceived, GetResponseBodyParams, Headers,
    SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserLauncher, PageDriver};
use crate::config::BrowserSettings;
use crate::scrape::types::{ScrapeError, ScrapeResult};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long Chrome gets to exit after `Browser.close` before it is killed.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Replaces chromiumoxide's defaults, which carry `--enable-automation`.
const LAUNCH_ARGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-extensions-with-background-pages",
    "--disable-default-apps",
    "--disable-extensions",
    "--disable-features=TranslateUI",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-renderer-backgrounding",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-first-run",
    "--password-store=basic",
    "--use-mock-keychain",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-blink-features=AutomationControlled",
    "--disable-gpu",
    "--window-size=1920,1080",
];

/// True once the element is gone, not rendered, or has no box. `offsetParent`
/// is null for visible `position: fixed` overlays, so it is not used.
const HIDDEN_CHECK: &str = "(() => {
    const el = document.querySelector(__SELECTOR__);
    if (!el) return true;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden') return true;
    const rect = el.getBoundingClientRect();
    return rect.width === 0 || rect.height === 0;
})()";

/// Runs before any page script: hides the usual automation fingerprints.
const STEALTH_SCRIPT: &str = r#"
    delete Object.getPrototypeOf(navigator).webdriver;
    Object.defineProperty(navigator, 'webdriver', {get: () => undefined});
    window.chrome = {runtime: {}, loadTimes: function(){}, csi: function(){}, app: {}};
    Object.defineProperty(navigator, 'languages', {get: () => ['en-US', 'en']});
    Object.defineProperty(navigator, 'hardwareConcurrency', {get: () => 8});
"#;

pub struct ChromiumLauncher {
    settings: BrowserSettings,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self) -> ScrapeResult<BrowserConfig> {
        let s = &self.settings;
        let mut builder = BrowserConfig::builder()
            .disable_default_args()
            .no_sandbox()
            .window_size(s.viewport_width, s.viewport_height)
            .viewport(Viewport {
                width: s.viewport_width,
                height: s.viewport_height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .args(LAUNCH_ARGS.iter().copied());
        if !s.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &s.executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(ScrapeError::Browser)
    }

    fn extra_headers(&self) -> Headers {
        Headers::new(serde_json::json!({
            "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,\
                       image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
            "Accept-Language": self.settings.accept_language,
            "sec-ch-ua": "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
            "sec-ch-ua-mobile": "?0",
            "sec-ch-ua-platform": "\"Windows\"",
            "Upgrade-Insecure-Requests": "1",
        }))
    }

    async fn prepare_page(&self, page: &Page) -> ScrapeResult<()> {
        let s = &self.settings;

        let mut user_agent = SetUserAgentOverrideParams::new(s.user_agent.clone());
        user_agent.accept_language = Some(s.accept_language.clone());
        user_agent.platform = Some("Win32".into());
        page.execute(user_agent).await?;

        page.execute(SetExtraHttpHeadersParams::new(self.extra_headers())).await?;
        page.execute(SetLocaleOverrideParams { locale: Some(s.locale.clone()) }).await?;
        page.execute(SetTimezoneOverrideParams::new(s.timezone.clone())).await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for ChromiumLauncher {
    type Page = ChromiumPage;

    async fn launch(&self) -> ScrapeResult<ChromiumPage> {
        let (browser, mut handler) = Browser::launch(self.browser_config()?).await?;

        // CDP messages only flow while the handler is polled. Once it stops,
        // `close` falls back to killing the process.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });

        let mut session = ChromiumPage { browser, page: None, handler_task, capture_tasks: Vec::new() };
        let page = match session.browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = session.close().await;
                return Err(e.into());
            }
        };
        if let Err(e) = self.prepare_page(&page).await {
            let _ = session.close().await;
            return Err(e);
        }
        session.page = Some(page);
        info!(headless = self.settings.headless, "browser session ready");
        Ok(session)
    }
}

pub struct ChromiumPage {
    browser: Browser,
    page: Option<Page>,
    handler_task: JoinHandle<()>,
    capture_tasks: Vec<JoinHandle<()>>,
}

impl ChromiumPage {
    fn page(&self) -> ScrapeResult<&Page> {
        self.page.as_ref().ok_or_else(|| ScrapeError::Browser("page not open".into()))
    }
}

async fn eval_value<T: serde::de::DeserializeOwned>(page: &Page, expression: String) -> ScrapeResult<T> {
    page.evaluate(expression)
        .await?
        .into_value::<T>()
        .map_err(|e| ScrapeError::Script(e.to_string()))
}

#[derive(serde::Deserialize)]
struct ReadBack {
    found: bool,
    value: String,
}

/// JSON-encode a string so it can be spliced into a script as a literal.
fn js_literal(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

fn timeout_error(what: impl Into<String>, timeout: Duration) -> ScrapeError {
    ScrapeError::Timeout { what: what.into(), millis: timeout.as_millis() }
}

#[async_trait::async_trait]
impl PageDriver for ChromiumPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> ScrapeResult<()> {
        let page = self.page()?;
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(timeout_error(format!("navigation to {url}"), timeout)),
        }
    }

    async fn title(&mut self) -> ScrapeResult<String> {
        Ok(self.page()?.get_title().await?.unwrap_or_default())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> ScrapeResult<()> {
        let page = self.page()?;
        let poll = async {
            loop {
                if page.find_element(selector).await.is_ok() {
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| timeout_error(format!("selector {selector}"), timeout))
    }

    async fn fill(&mut self, selector: &str, value: &str) -> ScrapeResult<()> {
        let script = format!(
            "(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.focus();
                el.value = {val};
                el.dispatchEvent(new Event('input', {{bubbles: true}}));
                el.dispatchEvent(new Event('change', {{bubbles: true}}));
                return true;
            }})()",
            sel = js_literal(selector),
            val = js_literal(value),
        );
        if eval_value::<bool>(self.page()?, script).await? {
            Ok(())
        } else {
            Err(ScrapeError::ElementNotFound(selector.to_string()))
        }
    }

    async fn set_value_by_id(&mut self, id: &str, value: &str) -> ScrapeResult<Option<String>> {
        let script = format!(
            "(() => {{
                const el = document.getElementById({id});
                if (!el) return {{found: false, value: ''}};
                el.value = {val};
                return {{found: true, value: String(el.value)}};
            }})()",
            id = js_literal(id),
            val = js_literal(value),
        );
        let read_back: ReadBack = eval_value(self.page()?, script).await?;
        Ok(read_back.found.then_some(read_back.value))
    }

    async fn click(&mut self, selector: &str) -> ScrapeResult<()> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|_| ScrapeError::ElementNotFound(selector.to_string()))?;
        element.click().await?;
        Ok(())
    }

    async fn capture_response(&mut self, url_fragment: &str) -> ScrapeResult<oneshot::Receiver<String>> {
        let page = self.page()?.clone();
        let mut received = page.event_listener::<EventResponseReceived>().await?;
        let mut finished = page.event_listener::<EventLoadingFinished>().await?;
        let fragment = url_fragment.to_string();
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let request_id = loop {
                match received.next().await {
                    Some(event) if event.response.url.contains(&fragment) => {
                        info!(status = event.response.status, url = %event.response.url, "matched API response");
                        break event.request_id.clone();
                    }
                    Some(_) => continue,
                    None => return,
                }
            };

            // The body is only retrievable once loading has finished.
            while let Some(event) = finished.next().await {
                if event.request_id != request_id {
                    continue;
                }
                match page.execute(GetResponseBodyParams::new(request_id.clone())).await {
                    Ok(resp) if resp.result.base64_encoded => {
                        warn!("API response body is base64-encoded, ignoring it");
                    }
                    Ok(resp) => {
                        debug!(len = resp.result.body.len(), "captured API response body");
                        let _ = tx.send(resp.result.body.clone());
                    }
                    Err(e) => warn!(error = %e, "failed to read API response body"),
                }
                return;
            }
        });
        self.capture_tasks.push(task);
        Ok(rx)
    }

    async fn wait_until_hidden(&mut self, selector: &str, timeout: Duration) -> ScrapeResult<()> {
        let script = HIDDEN_CHECK.replace("__SELECTOR__", &js_literal(selector));
        let page = self.page()?;
        let poll = async {
            loop {
                if eval_value::<bool>(page, script.clone()).await.unwrap_or(false) {
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| timeout_error(format!("{selector} to hide"), timeout))
    }

    async fn close(mut self) -> ScrapeResult<()> {
        for task in self.capture_tasks.drain(..) {
            task.abort();
        }
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!(error = %e, "page close failed");
            }
        }
        let result = shut_down(&mut self.browser, CLOSE_GRACE).await;
        self.handler_task.abort();
        result?;
        info!("browser session closed");
        Ok(())
    }
}

/// The parts of a running browser that shutdown needs.
#[async_trait::async_trait]
trait BrowserProcess: Send {
    /// Ask the browser to quit over CDP.
    async fn request_close(&mut self) -> ScrapeResult<()>;
    async fn kill_process(&mut self) -> ScrapeResult<()>;
    /// Resolves once the child process has exited.
    async fn wait_exit(&mut self) -> ScrapeResult<()>;
}

#[async_trait::async_trait]
impl BrowserProcess for Browser {
    async fn request_close(&mut self) -> ScrapeResult<()> {
        self.close().await?;
        Ok(())
    }

    async fn kill_process(&mut self) -> ScrapeResult<()> {
        match self.kill().await {
            Some(Err(e)) => Err(ScrapeError::Browser(e.to_string())),
            _ => Ok(()),
        }
    }

    async fn wait_exit(&mut self) -> ScrapeResult<()> {
        self.wait().await.map_err(|e| ScrapeError::Browser(e.to_string()))?;
        Ok(())
    }
}

/// Ask politely, then kill. A dead handler makes `Browser.close` fail at once
/// and leaves Chrome running, so the exit wait is always bounded.
async fn shut_down<B: BrowserProcess>(process: &mut B, grace: Duration) -> ScrapeResult<()> {
    let requested = tokio::time::timeout(grace, process.request_close())
        .await
        .unwrap_or_else(|_| Err(timeout_error("browser close", grace)));
    if let Err(e) = requested {
        warn!(error = %e, "browser refused to close, killing it");
        process.kill_process().await?;
    }

    if tokio::time::timeout(grace, process.wait_exit()).await.is_err() {
        warn!(grace_ms = grace.as_millis() as u64, "browser still running, killing it");
        process.kill_process().await?;
        tokio::time::timeout(grace, process.wait_exit())
            .await
            .map_err(|_| timeout_error("browser exit after kill", grace))??;
    }
    Ok(())
}
