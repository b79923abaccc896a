pub mod http_page_source;

pub use http_page_source::{HttpPageSource, PageSourceError};
