use std::{
    path::PathBuf,
    process::{Command, Stdio},
};

use chrono::naive::NaiveDateTime;
use strum::IntoStaticStr;
use url::Url;

use crate::{
    context::RunContext,
    error::ArchError,
    product::ProductSpec,
    remote::{ListingProvider, Location, RemoteFile, TimeRange},
    transport::Transport,
};

const QUERY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, IntoStaticStr)]
pub enum DayNightFilter {
    #[strum(serialize = "D")]
    Day,
    #[strum(serialize = "N")]
    Night,
    #[default]
    #[strum(serialize = "DB")]
    Both,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryParams<'a> {
    pub product: &'a str,
    pub collection: &'a str,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub filter: DayNightFilter,
}

/// External search capability that answers with absolute file URLs.
pub trait UrlQuery {
    fn query(&self, params: &QueryParams) -> Result<Vec<String>, ArchError>;
}

/// Runs an external program and reads one URL per line from its stdout.
///
/// The program receives `--product`, `--collection`, `--start`, `--end` and
/// `--day-night` after any fixed arguments. Blank lines and `#` comments are ignored.
#[derive(Clone, Debug)]
pub struct CommandQuery {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandQuery {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl UrlQuery for CommandQuery {
    fn query(&self, params: &QueryParams) -> Result<Vec<String>, ArchError> {
        let filter: &'static str = params.filter.into();
        let query_err = |reason: String| ArchError::Query {
            product: params.product.to_owned(),
            reason,
        };

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--product")
            .arg(params.product)
            .arg("--collection")
            .arg(params.collection)
            .arg("--start")
            .arg(params.start.format(QUERY_TIME_FORMAT).to_string())
            .arg("--end")
            .arg(params.end.format(QUERY_TIME_FORMAT).to_string())
            .arg("--day-night")
            .arg(filter)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| query_err(format!("unable to run {:?}: {}", self.program, err)))?;

        if !output.status.success() {
            return Err(query_err(format!(
                "{:?} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_owned)
            .collect())
    }
}

/// Listing backed by a [`UrlQuery`]. An empty answer is a hard failure.
pub struct ApiQueryListing<Q: UrlQuery> {
    query: Q,
    filter: DayNightFilter,
}

impl<Q: UrlQuery> ApiQueryListing<Q> {
    pub fn new(query: Q) -> Self {
        Self {
            query,
            filter: DayNightFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: DayNightFilter) -> Self {
        self.filter = filter;
        self
    }
}

fn basename(product: &str, link: &str) -> Result<String, ArchError> {
    let url = Url::parse(link).map_err(|err| ArchError::Query {
        product: product.to_owned(),
        reason: format!("invalid URL {}: {}", link, err),
    })?;

    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ArchError::Query {
            product: product.to_owned(),
            reason: format!("URL {} does not name a file", link),
        })
}

impl<Q: UrlQuery> ListingProvider for ApiQueryListing<Q> {
    fn list(
        &self,
        _ctx: &RunContext,
        _transport: &dyn Transport,
        product: &ProductSpec,
        range: &TimeRange,
    ) -> Result<Vec<RemoteFile>, ArchError> {
        let urls = if range.is_empty() {
            vec![]
        } else {
            self.query.query(&QueryParams {
                product: &product.product_id,
                collection: &product.collection,
                start: range.start,
                end: range.end,
                filter: self.filter,
            })?
        };

        if urls.is_empty() {
            return Err(ArchError::NoListingResult {
                product: product.product_id.clone(),
            });
        }

        urls.into_iter()
            .map(|link| {
                Ok(RemoteFile {
                    filename: basename(&product.product_id, &link)?,
                    location: Location::Direct(link),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Request, error::TransportError, product::Product};
    use chrono::NaiveDate;
    use std::{cell::RefCell, io::Write};

    struct Offline;

    impl Transport for Offline {
        fn name(&self) -> &'static str {
            "offline"
        }
        fn get(&self, _: &Request) -> Result<Vec<u8>, TransportError> {
            panic!("api listing must not touch the transport")
        }
        fn get_to_writer(&self, _: &Request, _: &mut dyn Write) -> Result<u64, TransportError> {
            panic!("api listing must not touch the transport")
        }
    }

    fn range() -> TimeRange {
        TimeRange::whole_days(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
        )
    }

    /// Answers with a fixed list and remembers what it was asked.
    struct Recording {
        urls: Vec<String>,
        seen: RefCell<Vec<(String, String, NaiveDateTime, NaiveDateTime, DayNightFilter)>>,
    }

    impl Recording {
        fn answering(urls: &[&str]) -> Self {
            Self {
                urls: urls.iter().map(|u| u.to_string()).collect(),
                seen: RefCell::new(vec![]),
            }
        }
    }

    impl UrlQuery for Recording {
        fn query(&self, params: &QueryParams) -> Result<Vec<String>, ArchError> {
            self.seen.borrow_mut().push((
                params.product.to_owned(),
                params.collection.to_owned(),
                params.start,
                params.end,
                params.filter,
            ));
            Ok(self.urls.clone())
        }
    }

    #[test]
    fn query_receives_product_and_window() {
        let listing = ApiQueryListing::new(Recording::answering(&[
            "https://ladsweb.example/archive/6/MCD43D07/2020/001/MCD43D07.A2020001.006.hdf",
        ]));
        let spec = ProductSpec::known(Product::MCD43D07, "/tmp/MCD43D");
        let files = listing
            .list(&RunContext::default(), &Offline, &spec, &range())
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "MCD43D07.A2020001.006.hdf");
        assert_eq!(
            files[0].url(),
            "https://ladsweb.example/archive/6/MCD43D07/2020/001/MCD43D07.A2020001.006.hdf"
        );

        let seen = listing.query.seen.borrow();
        assert_eq!(
            seen.as_slice(),
            &[(
                "MCD43D07".to_owned(),
                "6".to_owned(),
                range().start,
                range().end,
                DayNightFilter::Both
            )]
        );
    }

    #[test]
    fn empty_answer_is_no_listing_result() {
        let listing = ApiQueryListing::new(Recording::answering(&[]));
        let spec = ProductSpec::known(Product::MYD06L2, "/tmp/MYD06_L2");

        let err = listing
            .list(&RunContext::default(), &Offline, &spec, &range())
            .unwrap_err();

        assert!(matches!(err, ArchError::NoListingResult { ref product } if product == "MYD06_L2"));
        assert_eq!(listing.query.seen.borrow().len(), 1);
    }

    #[test]
    fn reversed_range_skips_the_query() {
        let listing = ApiQueryListing::new(Recording::answering(&["https://host/a.A2020001.hdf"]));
        let spec = ProductSpec::known(Product::MYD06L2, "/tmp/MYD06_L2");
        let reversed = TimeRange::new(range().end, range().start);

        let err = listing
            .list(&RunContext::default(), &Offline, &spec, &reversed)
            .unwrap_err();

        assert!(matches!(err, ArchError::NoListingResult { .. }));
        assert!(listing.query.seen.borrow().is_empty());
    }

    #[test]
    fn url_without_file_name_is_rejected() {
        let listing = ApiQueryListing::new(Recording::answering(&["https://host/dir/"]));
        let spec = ProductSpec::known(Product::MYD06L2, "/tmp/MYD06_L2");

        let err = listing
            .list(&RunContext::default(), &Offline, &spec, &range())
            .unwrap_err();
        assert!(matches!(err, ArchError::Query { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn command_query_reads_stdout_lines() {
        let query = CommandQuery::new("sh").with_args([
            "-c",
            "echo '# header'; echo; echo \"https://host/$2.A2020001.hdf\"",
            "query",
        ]);
        let params = QueryParams {
            product: "MYD06_L2",
            collection: "61",
            start: range().start,
            end: range().end,
            filter: DayNightFilter::Both,
        };

        let urls = query.query(&params).unwrap();
        assert_eq!(urls, vec!["https://host/MYD06_L2.A2020001.hdf".to_owned()]);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_a_query_error() {
        let query = CommandQuery::new("sh").with_args(["-c", "echo boom >&2; exit 3", "query"]);
        let params = QueryParams {
            product: "MYD06_L2",
            collection: "61",
            start: range().start,
            end: range().end,
            filter: DayNightFilter::Day,
        };

        let err = query.query(&params).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
