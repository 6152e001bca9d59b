pub mod config;
pub mod denylist;
pub mod types;
pub mod url_norm;

pub use config::Config;
pub use denylist::UrlDenylist;
pub use types::*;
pub use url_norm::{normalize, same_resource, try_normalize};
