/// Dataset construction and econometric analysis.
///
/// Submodules:
/// - `significance`: per-year quantile flags and the normalized disaster index.
/// - `disasters`: country-year disaster panel (step 2).
/// - `panel`: econometric and country datasets (step 3).
/// - `frame`, `fixed_effects`, `regression`, `stats`: estimation core.
/// - `specs`: the three result tables (step 4).

pub mod disasters;
pub mod fixed_effects;
pub mod frame;
pub mod panel;
pub mod regression;
pub mod significance;
pub mod specs;
pub mod stats;
