/**************************************************************************************************
 *                                           Public API
 *************************************************************************************************/
pub use crate::{
    api_listing::{ApiQueryListing, CommandQuery, DayNightFilter, QueryParams, UrlQuery},
    archive::{Archive, ExhaustedPolicy, ProductReport},
    context::{Credential, Request, RunContext},
    error::{ArchError, TransportError},
    layout::{ArchiveLayout, ArchivePath, CreatePolicy, DateScheme, DirPolicy},
    product::{Product, ProductFamily, ProductSpec},
    remote::{FileReference, ListingProvider, Location, RemoteFile, TimeRange},
    retry::{BackoffRetry, ImmediateRetry, RetryingFetcher},
    scrape_listing::{extract_names, DayWindow, HtmlDirectoryListing, GES_DISC_OMI_L2},
    transport::{select_transport, CurlTransport, HttpsTransport, Transport},
};
/**************************************************************************************************
 *                                      Private Implementation
 *************************************************************************************************/
mod api_listing;
mod archive;
mod context;
mod error;
mod layout;
mod product;
mod remote;
mod retry;
mod scrape_listing;
mod transport;
