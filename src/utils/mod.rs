pub mod listing;
pub mod logging;
