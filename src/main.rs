use std::{error::Error, path::PathBuf, process, str::FromStr};

use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use earthdata_arch::{
    select_transport, ApiQueryListing, Archive, CommandQuery, Credential, DayWindow,
    ExhaustedPolicy, HtmlDirectoryListing, ImmediateRetry, ListingProvider, Product,
    ProductFamily, ProductReport, ProductSpec, RunContext, TimeRange, Transport, GES_DISC_OMI_L2,
};

const TOKEN_FILE_NAME: &str = ".earthdata-app-key";
const OMI_SUFFIX: &str = "he5";

#[derive(Debug, Parser)]
#[command(
    name = "earthdata-arch",
    version,
    about = "Download MODIS and OMI granules into a date organised local archive"
)]
struct Cli {
    #[command(subcommand)]
    source: Source,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// First day to download, yyyy-mm-dd
    #[arg(short = 's', long, value_parser = parse_date)]
    start_date: NaiveDate,

    /// Last day to download, yyyy-mm-dd
    #[arg(short = 'e', long, value_parser = parse_date)]
    end_date: NaiveDate,

    /// Increase verbosity to the terminal
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only these products (comma separated), default is every product of the family
    #[arg(long, value_delimiter = ',')]
    products: Vec<String>,

    /// Download attempts per file
    #[arg(long, default_value_t = 10)]
    max_attempts: u32,

    /// Move on to the next file when one runs out of attempts instead of stopping
    #[arg(long)]
    keep_going: bool,
}

#[derive(Debug, Subcommand)]
enum Source {
    /// MODIS albedo and cloud products listed through an external URL query
    Modis {
        #[command(flatten)]
        run: RunArgs,

        /// MODIS archive root
        #[arg(long, env = "MODDIR")]
        moddir: PathBuf,

        /// Bearer token file, default ~/.earthdata-app-key
        #[arg(long)]
        token_file: Option<PathBuf>,

        /// Program that prints one file URL per line for a product query
        #[arg(long, env = "MODIS_QUERY_COMMAND")]
        query_command: PathBuf,
    },
    /// OMI level 2 products scraped from the GES DISC directory listings
    Omi {
        #[command(flatten)]
        run: RunArgs,

        #[arg(long, env = "OMNO2DIR")]
        omno2_dir: PathBuf,

        #[arg(long, env = "OMPIXCORDIR")]
        ompixcor_dir: PathBuf,

        #[arg(long, env = "EARTHDATA_USER")]
        user: Option<String>,

        #[arg(long, env = "EARTHDATA_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        #[arg(long, default_value = GES_DISC_OMI_L2)]
        base_url: String,

        /// List every year x start..=end day-of-year page instead of the exact days
        #[arg(long)]
        per_year_ordinal: bool,
    },
}

impl Source {
    fn run_args(&self) -> &RunArgs {
        match self {
            Source::Modis { run, .. } | Source::Omi { run, .. } => run,
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = format!("warn,earthdata_arch={}", level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}

fn select_products(
    family: ProductFamily,
    names: &[String],
) -> Result<Vec<Product>, Box<dyn Error>> {
    if names.is_empty() {
        return Ok(family.products());
    }

    let mut wanted = vec![];
    for name in names {
        let product = Product::from_str(name).map_err(|_| format!("unknown product {}", name))?;
        if product.family() != family {
            let family_name: &'static str = family.into();
            return Err(format!("{} is not a {} product", name, family_name).into());
        }
        wanted.push(product);
    }

    Ok(family
        .products()
        .into_iter()
        .filter(|p| wanted.contains(p))
        .collect())
}

fn download<L: ListingProvider>(
    ctx: RunContext,
    listing: L,
    transport: Box<dyn Transport>,
    run: &RunArgs,
    specs: &[ProductSpec],
) -> Result<Vec<ProductReport>, Box<dyn Error>> {
    let policy = if run.keep_going {
        ExhaustedPolicy::SkipAndContinue
    } else {
        ExhaustedPolicy::Abort
    };

    let archive = Archive::connect(ctx, listing, transport)
        .with_retry(ImmediateRetry::new(run.max_attempts))
        .with_exhausted_policy(policy);

    let range = TimeRange::whole_days(run.start_date, run.end_date);
    Ok(archive.download_products(specs, &range)?)
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let transport = select_transport()?;

    let reports = match &cli.source {
        Source::Modis {
            run,
            moddir,
            token_file,
            query_command,
        } => {
            let token_file = match token_file {
                Some(path) => path.clone(),
                None => dirs::home_dir()
                    .ok_or("unable to locate the home directory")?
                    .join(TOKEN_FILE_NAME),
            };
            let credential = Credential::from_token_file(&token_file)?;
            let ctx = RunContext::new(Some(credential), run.verbose);

            let specs: Vec<ProductSpec> = select_products(ProductFamily::Modis, &run.products)?
                .into_iter()
                .map(|p| {
                    let root = p
                        .archive_dir()
                        .map_or_else(|| moddir.clone(), |dir| moddir.join(dir));
                    ProductSpec::known(p, root)
                })
                .collect();

            let listing = ApiQueryListing::new(CommandQuery::new(query_command));
            download(ctx, listing, transport, run, &specs)?
        }
        Source::Omi {
            run,
            omno2_dir,
            ompixcor_dir,
            user,
            password,
            base_url,
            per_year_ordinal,
        } => {
            let credential = match (user, password) {
                (Some(user), Some(password)) => Some(Credential::basic(user, password)),
                _ => {
                    log::warn!(
                        "EARTHDATA_USER/EARTHDATA_PASSWORD not set, downloading anonymously"
                    );
                    None
                }
            };
            let ctx = RunContext::new(credential, run.verbose);

            let specs: Vec<ProductSpec> = select_products(ProductFamily::Omi, &run.products)?
                .into_iter()
                .map(|p| {
                    let root = match p {
                        Product::OMPIXCOR => ompixcor_dir.clone(),
                        _ => omno2_dir.clone(),
                    };
                    ProductSpec::known(p, root)
                })
                .collect();

            let window = if *per_year_ordinal {
                DayWindow::PerYearOrdinal
            } else {
                DayWindow::Exact
            };
            let listing =
                HtmlDirectoryListing::new(base_url.as_str(), OMI_SUFFIX).with_window(window);
            download(ctx, listing, transport, run, &specs)?
        }
    };

    for report in &reports {
        log::info!(
            "{}: {} downloaded, {} already present, {} failed",
            report.product_id,
            report.downloaded.len(),
            report.skipped.len(),
            report.failed.len()
        );
        for (url, reason) in &report.failed {
            log::error!("Failed {}: {}", url, reason);
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.source.run_args().verbose);

    if let Err(err) = run(cli) {
        eprintln!("earthdata-arch: {}", err);
        process::exit(1);
    }
}
