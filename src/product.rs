use std::path::PathBuf;

use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::layout::{ArchiveLayout, CreatePolicy, DateScheme, DirPolicy};

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, EnumString, IntoStaticStr)]
pub enum Product {
    #[strum(serialize = "MCD43D07")]
    MCD43D07,
    #[strum(serialize = "MCD43D08")]
    MCD43D08,
    #[strum(serialize = "MCD43D09")]
    MCD43D09,
    #[strum(serialize = "MCD43D31")]
    MCD43D31,
    #[strum(serialize = "MYD06_L2")]
    MYD06L2,
    #[strum(serialize = "OMNO2.003")]
    OMNO2,
    #[strum(serialize = "OMPIXCOR.003")]
    OMPIXCOR,
}

impl Product {
    pub fn family(&self) -> ProductFamily {
        match *self {
            Product::MCD43D07
            | Product::MCD43D08
            | Product::MCD43D09
            | Product::MCD43D31
            | Product::MYD06L2 => ProductFamily::Modis,
            Product::OMNO2 | Product::OMPIXCOR => ProductFamily::Omi,
        }
    }

    pub fn default_collection(&self) -> &'static str {
        match *self {
            Product::MCD43D07 | Product::MCD43D08 | Product::MCD43D09 | Product::MCD43D31 => "6",
            Product::MYD06L2 => "61",
            Product::OMNO2 | Product::OMPIXCOR => "003",
        }
    }

    /// Sub-directory under `MODDIR`. The MCD43D albedo bands share one. OMI
    /// products have their own roots and no sub-directory.
    pub fn archive_dir(&self) -> Option<&'static str> {
        match *self {
            Product::MCD43D07 | Product::MCD43D08 | Product::MCD43D09 | Product::MCD43D31 => {
                Some("MCD43D")
            }
            Product::MYD06L2 => Some("MYD06_L2"),
            Product::OMNO2 | Product::OMPIXCOR => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoStaticStr)]
pub enum ProductFamily {
    #[strum(serialize = "modis")]
    Modis,
    #[strum(serialize = "omi")]
    Omi,
}

impl ProductFamily {
    pub fn layout(&self) -> ArchiveLayout {
        match *self {
            ProductFamily::Modis => ArchiveLayout::new(
                DateScheme::YearDayOfYear,
                DirPolicy::Year,
                CreatePolicy::SingleLevel,
            ),
            ProductFamily::Omi => ArchiveLayout::new(
                DateScheme::UnderscoreYearMonth,
                DirPolicy::YearMonth,
                CreatePolicy::Recursive,
            ),
        }
    }

    /// Known products of this family, in download order.
    pub fn products(&self) -> Vec<Product> {
        Product::iter().filter(|p| p.family() == *self).collect()
    }
}

/// Everything needed to list and file one product.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductSpec {
    pub product_id: String,
    pub collection: String,
    pub local_root: PathBuf,
    pub layout: ArchiveLayout,
}

impl ProductSpec {
    pub fn new<S, C, P>(product_id: S, collection: C, local_root: P, layout: ArchiveLayout) -> Self
    where
        S: Into<String>,
        C: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            product_id: product_id.into(),
            collection: collection.into(),
            local_root: local_root.into(),
            layout,
        }
    }

    pub fn known<P: Into<PathBuf>>(product: Product, local_root: P) -> Self {
        let id: &'static str = product.into();
        Self::new(
            id,
            product.default_collection(),
            local_root,
            product.family().layout(),
        )
    }
}
