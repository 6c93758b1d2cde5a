use chrono::{
    naive::{NaiveDate, NaiveDateTime},
    Datelike,
};

use crate::{
    context::RunContext, error::ArchError, layout::DateScheme, product::ProductSpec,
    transport::Transport,
};

/// Inclusive window of acquisition times. A reversed window is empty, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        if end < start {
            log::warn!("End before start: start - {} end - {}", start, end);
        }
        Self { start, end }
    }

    /// From the first second of `start` through the last second of `end`.
    pub fn whole_days(start: NaiveDate, end: NaiveDate) -> Self {
        let start = start.and_hms_opt(0, 0, 0).unwrap_or_default();
        let end = end.and_hms_opt(23, 59, 59).unwrap_or_default();
        Self::new(start, end)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Every calendar day touched by the range, in order.
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days = vec![];
        if self.is_empty() {
            return days;
        }

        let last = self.end.date();
        let mut day = self.start.date();
        while day <= last {
            days.push(day);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        days
    }

    /// `(year, day of year)` pairs for every year in the range crossed with the
    /// start through end day-of-year span. Coarser than [`TimeRange::days`].
    pub fn year_ordinal_grid(&self) -> Vec<(i32, u32)> {
        if self.is_empty() {
            return vec![];
        }

        let (sday, eday) = (self.start.ordinal(), self.end.ordinal());
        (self.start.year()..=self.end.year())
            .flat_map(|year| (sday..=eday).map(move |day| (year, day)))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    /// Absolute URL of the file itself.
    Direct(String),
    /// URL of the directory index page that lists the file.
    Page(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteFile {
    pub filename: String,
    pub location: Location,
}

impl RemoteFile {
    pub fn url(&self) -> String {
        match &self.location {
            Location::Direct(url) => url.clone(),
            Location::Page(page) => format!("{}{}", page, self.filename),
        }
    }
}

/// A listed file together with the date its name encodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReference {
    pub remote: RemoteFile,
    pub embedded_date: NaiveDate,
}

impl FileReference {
    pub fn parse(remote: RemoteFile, scheme: DateScheme) -> Result<Self, ArchError> {
        let embedded_date = scheme.parse(&remote.filename)?;
        Ok(Self {
            remote,
            embedded_date,
        })
    }
}

/// Source of the remote file list for a product and time range.
pub trait ListingProvider {
    fn list(
        &self,
        ctx: &RunContext,
        transport: &dyn Transport,
        product: &ProductSpec,
        range: &TimeRange,
    ) -> Result<Vec<RemoteFile>, ArchError>;
}

impl<L: ListingProvider + ?Sized> ListingProvider for Box<L> {
    fn list(
        &self,
        ctx: &RunContext,
        transport: &dyn Transport,
        product: &ProductSpec,
        range: &TimeRange,
    ) -> Result<Vec<RemoteFile>, ArchError> {
        (**self).list(ctx, transport, product, range)
    }
}
