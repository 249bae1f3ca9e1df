//! Template-section normalization for Ecomus storefront templates.
//!
//! Component names from the catalog are classified into section types,
//! expanded into ordered section records, and written onto template
//! documents through a [`store::TemplateStore`].

pub mod audit;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod migrate;
pub mod model;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod pipeline;
pub mod runtime;
pub mod section;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

pub(crate) fn unix_timestamp() -> Result<i64> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock error")?
        .as_secs();
    i64::try_from(seconds).context("timestamp does not fit into i64")
}
