use std::{collections::HashSet, sync::LazyLock};

use chrono::Datelike;
use regex::Regex;

use crate::{
    context::RunContext,
    error::ArchError,
    product::ProductSpec,
    remote::{ListingProvider, Location, RemoteFile, TimeRange},
    retry::BackoffRetry,
    transport::Transport,
};

pub const GES_DISC_OMI_L2: &str = "https://aura.gesdisc.eosdis.nasa.gov/data/Aura_OMI_Level2";

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["']"#).expect("static regex")
});

/// Which `<year>/<day of year>/` index pages cover a time range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DayWindow {
    /// Only the calendar days inside the range.
    #[default]
    Exact,
    /// Every year of the range crossed with the start..=end day-of-year span.
    /// Over-fetches across year boundaries and misses days when the end day
    /// of year is smaller than the start day of year.
    PerYearOrdinal,
}

/// Listing scraped from web server directory indexes laid out as
/// `<base>/<product>/<yyyy>/<ddd>/`.
#[derive(Clone, Debug)]
pub struct HtmlDirectoryListing {
    base_url: String,
    suffix: String,
    window: DayWindow,
    retry: BackoffRetry,
}

impl HtmlDirectoryListing {
    pub fn new(base_url: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            suffix: suffix.into(),
            window: DayWindow::default(),
            retry: BackoffRetry::default(),
        }
    }

    pub fn with_window(mut self, window: DayWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_retry(mut self, retry: BackoffRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn page_urls(&self, product_id: &str, range: &TimeRange) -> Vec<String> {
        let pairs: Vec<(i32, u32)> = match self.window {
            DayWindow::Exact => range
                .days()
                .into_iter()
                .map(|day| (day.year(), day.ordinal()))
                .collect(),
            DayWindow::PerYearOrdinal => range.year_ordinal_grid(),
        };

        let base = self.base_url.trim_end_matches('/');
        pairs
            .into_iter()
            .map(|(year, doy)| format!("{}/{}/{}/{:03}/", base, product_id, year, doy))
            .collect()
    }

    fn scrape(
        &self,
        ctx: &RunContext,
        transport: &dyn Transport,
        pages: &[String],
    ) -> Result<Vec<RemoteFile>, ArchError> {
        let mut files = vec![];

        for page in pages {
            log::debug!("Reading listing page {}", page);
            let body = transport.get(&ctx.request(page))?;
            let html = String::from_utf8_lossy(&body);

            files.extend(
                extract_names(&html, &self.suffix)
                    .into_iter()
                    .map(|filename| RemoteFile {
                        filename,
                        location: Location::Page(page.clone()),
                    }),
            );
        }

        Ok(files)
    }
}

/// Names of the anchors on one page ending with `suffix`, each once, in page order.
pub fn extract_names(html: &str, suffix: &str) -> Vec<String> {
    let mut seen = HashSet::new();

    HREF_RE
        .captures_iter(html)
        .filter_map(|caps| {
            let href = caps.get(1)?.as_str();
            let name = href.rsplit('/').next().unwrap_or(href);
            if !name.is_empty() && name.ends_with(suffix) {
                Some(name.to_owned())
            } else {
                None
            }
        })
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

impl ListingProvider for HtmlDirectoryListing {
    fn list(
        &self,
        ctx: &RunContext,
        transport: &dyn Transport,
        product: &ProductSpec,
        range: &TimeRange,
    ) -> Result<Vec<RemoteFile>, ArchError> {
        let pages = self.page_urls(&product.product_id, range);

        if ctx.shows_progress() {
            log::info!("Retrieving file URLs from {} listing pages", pages.len());
        }

        let files = self
            .retry
            .run("file URLs", || self.scrape(ctx, transport, &pages))?;

        if ctx.shows_progress() {
            log::info!("fileURLs has length {}", files.len());
        }

        Ok(files)
    }
}
