use std::{
    collections::HashSet,
    ffi::OsString,
    fs::{self, File},
    path::{Path, PathBuf},
};

use crate::{
    context::RunContext,
    error::ArchError,
    layout::ArchivePath,
    product::ProductSpec,
    remote::{ListingProvider, TimeRange},
    retry::{ImmediateRetry, RetryingFetcher},
    transport::Transport,
};

/// What to do when one file runs out of download attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExhaustedPolicy {
    /// Stop the whole run with the error.
    #[default]
    Abort,
    /// Record the failure in the report and carry on with the next file.
    SkipAndContinue,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductReport {
    pub product_id: String,
    pub downloaded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    /// `(url, reason)` for files given up on under [`ExhaustedPolicy::SkipAndContinue`].
    pub failed: Vec<(String, String)>,
}

impl ProductReport {
    fn new(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_owned(),
            ..Self::default()
        }
    }
}

/// Drives list, skip-if-present, fetch and write for a sequence of products.
pub struct Archive<L, T> {
    ctx: RunContext,
    listing: L,
    transport: T,
    retry: ImmediateRetry,
    on_exhausted: ExhaustedPolicy,
}

impl<L, T> Archive<L, T>
where
    L: ListingProvider,
    T: Transport,
{
    pub fn connect(ctx: RunContext, listing: L, transport: T) -> Self {
        log::info!("Connected to remote archive via {} transport", transport.name());
        Self {
            ctx,
            listing,
            transport,
            retry: ImmediateRetry::default(),
            on_exhausted: ExhaustedPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: ImmediateRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_exhausted_policy(mut self, policy: ExhaustedPolicy) -> Self {
        self.on_exhausted = policy;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Products are handled one after the other in the given order. The first
    /// fatal error ends the run.
    pub fn download_products(
        &self,
        products: &[ProductSpec],
        range: &TimeRange,
    ) -> Result<Vec<ProductReport>, ArchError> {
        log::info!("start - {} end {}", range.start, range.end);

        products
            .iter()
            .map(|product| self.download_product(product, range))
            .collect()
    }

    pub fn download_product(
        &self,
        product: &ProductSpec,
        range: &TimeRange,
    ) -> Result<ProductReport, ArchError> {
        if self.ctx.shows_progress() {
            log::info!(
                "Now downloading the {} (collection {}) product",
                product.product_id,
                product.collection
            );
        }

        let root = &product.local_root;
        let layout = &product.layout;
        layout.prepare_root(root)?;

        let listed = self
            .listing
            .list(&self.ctx, &self.transport, product, range)?;
        if listed.is_empty() {
            return Err(ArchError::NoListingResult {
                product: product.product_id.clone(),
            });
        }

        let fetcher = RetryingFetcher::new(&self.transport, self.retry);
        let mut report = ProductReport::new(&product.product_id);
        let mut visited = HashSet::new();

        for remote in listed {
            let reference = layout.reference(remote)?;
            let path = layout.resolve_path(root, &reference);

            if !visited.insert(path.file.clone()) {
                log::debug!("Listed twice, ignoring: {:?}", path.file);
                continue;
            }

            layout.prepare(root, &path)?;

            if Self::is_present(&path.file) {
                if self.ctx.shows_skips() {
                    log::info!(
                        "File {:?} already exists and size is > 0; not re-downloaded",
                        path.file
                    );
                }
                report.skipped.push(path.file);
                continue;
            }

            let url = reference.remote.url();
            if self.ctx.shows_progress() {
                log::info!("Downloading {} to {:?}", url, path.dir);
            }

            match self.fetch_to(&fetcher, &url, &path) {
                Ok(bytes) => {
                    log::debug!("Saved {:?} ({} bytes)", path.file, bytes);
                    report.downloaded.push(path.file);
                }
                Err(err @ ArchError::DownloadExhausted { .. })
                    if self.on_exhausted == ExhaustedPolicy::SkipAndContinue =>
                {
                    log::error!("Giving up on {}: {}", url, err);
                    report.failed.push((url, err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }
}

// Private methods and associated functions.

const PARTIAL_SUFFIX: &str = ".part";

impl<L, T> Archive<L, T>
where
    L: ListingProvider,
    T: Transport,
{
    /// Present means a regular file with at least one byte. Contents are not checked.
    fn is_present(pth: &Path) -> bool {
        fs::metadata(pth)
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Stream into `<name>.part` and rename over the final name once complete,
    /// so an interrupted download never leaves a non-empty file at `path.file`.
    fn fetch_to(
        &self,
        fetcher: &RetryingFetcher<'_, T>,
        url: &str,
        path: &ArchivePath,
    ) -> Result<u64, ArchError> {
        let partial = partial_path(&path.file);

        let mut f = File::create(&partial).map_err(|err| ArchError::io(&partial, err))?;
        let bytes = fetcher.fetch_with_retry_into(&self.ctx, url, &mut f)?;

        f.set_len(bytes)
            .and_then(|()| f.sync_all())
            .map_err(|err| ArchError::io(&partial, err))?;
        drop(f);

        fs::rename(&partial, &path.file).map_err(|err| ArchError::io(&path.file, err))?;

        Ok(bytes)
    }
}

fn partial_path(file: &Path) -> PathBuf {
    let mut name: OsString = file.file_name().map(OsString::from).unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    file.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::Request,
        error::TransportError,
        product::{Product, ProductSpec},
        remote::{Location, RemoteFile},
    };
    use chrono::NaiveDate;
    use std::{cell::Cell, io::Write};

    struct Fixed(Vec<&'static str>);

    impl ListingProvider for Fixed {
        fn list(
            &self,
            _: &RunContext,
            _: &dyn Transport,
            _: &ProductSpec,
            _: &TimeRange,
        ) -> Result<Vec<RemoteFile>, ArchError> {
            Ok(self
                .0
                .iter()
                .map(|name| RemoteFile {
                    filename: name.to_string(),
                    location: Location::Direct(format!("https://host/{}", name)),
                })
                .collect())
        }
    }

    /// Writes some bytes and then fails, every time, for URLs containing "bad".
    struct HalfBroken {
        calls: Cell<u32>,
    }

    impl Transport for HalfBroken {
        fn name(&self) -> &'static str {
            "half-broken"
        }

        fn get(&self, _: &Request) -> Result<Vec<u8>, TransportError> {
            unreachable!()
        }

        fn get_to_writer(
            &self,
            request: &Request,
            sink: &mut dyn Write,
        ) -> Result<u64, TransportError> {
            self.calls.set(self.calls.get() + 1);
            sink.write_all(b"some bytes").unwrap();
            if request.url.contains("bad") {
                Err(TransportError::Connection {
                    url: request.url.clone(),
                    reason: "connection reset by peer".into(),
                })
            } else {
                Ok(10)
            }
        }
    }

    fn range() -> TimeRange {
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        TimeRange::whole_days(day, day)
    }

    #[test]
    fn partial_name() {
        assert_eq!(
            partial_path(Path::new("/a/2020/x.hdf")),
            PathBuf::from("/a/2020/x.hdf.part")
        );
    }

    #[test]
    fn exhausted_download_aborts_by_default_and_leaves_no_final_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("MYD06_L2");
        let spec = ProductSpec::known(Product::MYD06L2, &root);
        let archive = Archive::connect(
            RunContext::default(),
            Fixed(vec!["MYD06_L2.A2020001.bad.hdf", "MYD06_L2.A2020001.good.hdf"]),
            HalfBroken {
                calls: Cell::new(0),
            },
        )
        .with_retry(ImmediateRetry::new(3));

        let err = archive.download_product(&spec, &range()).unwrap_err();

        assert!(matches!(err, ArchError::DownloadExhausted { attempts: 3, .. }));
        assert_eq!(archive.transport.calls.get(), 3);
        let year = root.join("2020");
        assert!(!year.join("MYD06_L2.A2020001.bad.hdf").exists());
        assert!(year.join("MYD06_L2.A2020001.bad.hdf.part").exists());
        assert!(!year.join("MYD06_L2.A2020001.good.hdf").exists());
    }

    #[test]
    fn skip_and_continue_records_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("MYD06_L2");
        let spec = ProductSpec::known(Product::MYD06L2, &root);
        let archive = Archive::connect(
            RunContext::default(),
            Fixed(vec!["MYD06_L2.A2020001.bad.hdf", "MYD06_L2.A2020001.good.hdf"]),
            HalfBroken {
                calls: Cell::new(0),
            },
        )
        .with_retry(ImmediateRetry::new(2))
        .with_exhausted_policy(ExhaustedPolicy::SkipAndContinue);

        let report = archive.download_product(&spec, &range()).unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "https://host/MYD06_L2.A2020001.bad.hdf");
        assert_eq!(
            report.downloaded,
            vec![root.join("2020").join("MYD06_L2.A2020001.good.hdf")]
        );
        assert_eq!(
            fs::read(&report.downloaded[0]).unwrap(),
            b"some bytes".to_vec()
        );
    }

    #[test]
    fn malformed_name_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ProductSpec::known(Product::MYD06L2, tmp.path().join("MYD06_L2"));
        let archive = Archive::connect(
            RunContext::default(),
            Fixed(vec!["MYD06_L2.2020001.hdf"]),
            HalfBroken {
                calls: Cell::new(0),
            },
        );

        let err = archive.download_product(&spec, &range()).unwrap_err();

        assert!(matches!(err, ArchError::MalformedFilename { .. }));
        assert_eq!(archive.transport.calls.get(), 0);
    }

    #[test]
    fn duplicate_listing_entries_are_fetched_once() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ProductSpec::known(Product::MYD06L2, tmp.path().join("MYD06_L2"));
        let archive = Archive::connect(
            RunContext::default(),
            Fixed(vec!["MYD06_L2.A2020001.x.hdf", "MYD06_L2.A2020001.x.hdf"]),
            HalfBroken {
                calls: Cell::new(0),
            },
        );

        let report = archive.download_product(&spec, &range()).unwrap();

        assert_eq!(report.downloaded.len(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(archive.transport.calls.get(), 1);
    }

    #[test]
    fn empty_listing_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ProductSpec::known(Product::MYD06L2, tmp.path().join("MYD06_L2"));
        let archive = Archive::connect(
            RunContext::default(),
            Fixed(vec![]),
            HalfBroken {
                calls: Cell::new(0),
            },
        );

        let err = archive.download_product(&spec, &range()).unwrap_err();
        assert!(matches!(err, ArchError::NoListingResult { ref product } if product == "MYD06_L2"));
    }
}
