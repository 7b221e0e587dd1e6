// Layered settings: built-in defaults <- optional mcx_margin.{toml,yaml,json} <- MCX__* env vars.
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub const CONFIG_FILE_STEM: &str = "mcx_margin";
pub const ENV_PREFIX: &str = "MCX";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub site: SiteSettings,
    pub browser: BrowserSettings,
    pub timeouts: TimeoutSettings,
    pub backfill: BackfillSettings,
    pub export: ExportSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Load settings, reading `.env` first so it can feed the `MCX__` variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE_STEM).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("backfill.symbols")
                    .with_list_parse_key("export.symbols")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: PathBuf::from("data/margins.db") }
    }
}

/// Where the margin page lives and how its form is wired.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteSettings {
    pub home_url: String,
    pub margin_url: String,
    pub api_url_fragment: String,
    pub date_input: String,
    pub hidden_date_input_id: String,
    pub submit_button: String,
    pub loading_overlay: String,
    pub blocked_title_marker: String,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            home_url: "https://www.mcxccl.com/".into(),
            margin_url: "https://www.mcxccl.com/risk-management/daily-margin".into(),
            api_url_fragment: "GetDailyMargin".into(),
            date_input: "#txtDate".into(),
            hidden_date_input_id: "cph_InnerContainerRight_C001_txtDate_hid_val".into(),
            submit_button: "#btnShow".into(),
            loading_overlay: ".overlay2".into(),
            blocked_title_marker: "Access Denied".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub user_agent: String,
    pub locale: String,
    pub accept_language: String,
    pub timezone: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
            locale: "en-US".into(),
            accept_language: "en-US,en;q=0.9".into(),
            timezone: "Asia/Kolkata".into(),
            viewport_width: 1920,
            viewport_height: 1080,
        }
    }
}

/// All values in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub navigation_ms: u64,
    pub date_input_ms: u64,
    pub submit_button_ms: u64,
    pub api_response_ms: u64,
    pub overlay_ms: u64,
    pub home_settle_ms: u64,
    pub page_settle_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            date_input_ms: 15_000,
            submit_button_ms: 10_000,
            api_response_ms: 30_000,
            overlay_ms: 15_000,
            home_settle_ms: 1_000,
            page_settle_ms: 2_000,
        }
    }
}

impl TimeoutSettings {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn date_input(&self) -> Duration {
        Duration::from_millis(self.date_input_ms)
    }

    pub fn submit_button(&self) -> Duration {
        Duration::from_millis(self.submit_button_ms)
    }

    pub fn api_response(&self) -> Duration {
        Duration::from_millis(self.api_response_ms)
    }

    pub fn overlay(&self) -> Duration {
        Duration::from_millis(self.overlay_ms)
    }

    pub fn home_settle(&self) -> Duration {
        Duration::from_millis(self.home_settle_ms)
    }

    pub fn page_settle(&self) -> Duration {
        Duration::from_millis(self.page_settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackfillSettings {
    pub request_delay_secs: u64,
    pub symbols: Vec<String>,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            request_delay_secs: 3,
            symbols: vec!["NATURALGAS".into(), "NATGASMINI".into()],
        }
    }
}

impl BackfillSettings {
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs(self.request_delay_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One workbook, margins and summary sheets.
    #[default]
    Xlsx,
    /// A CSV file per sheet.
    Csv,
}

/// An empty `symbols` list exports every symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub dir: PathBuf,
    pub symbols: Vec<String>,
    pub format: ExportFormat,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("exports"),
            symbols: vec!["NATURALGAS".into(), "NATGASMINI".into()],
            format: ExportFormat::Xlsx,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub filter: String,
    pub ansi: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { filter: "info,chromiumoxide=warn".into(), ansi: true }
    }
}
