pub mod comtrade;
pub mod coverage;
pub mod emdat;
pub mod geomet;
pub mod worldbank;
