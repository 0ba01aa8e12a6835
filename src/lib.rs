//! Disaster/export panel pipeline.
//!
//! Collects Comtrade export flows and EM-DAT/GeoMet disaster data, merges
//! them with World Bank and UN DESA indicators into country-product-year
//! panels, and estimates fixed-effects models of disasters on exports.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod countries;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod products;
pub mod report;
pub mod table;
pub mod verify;
