pub mod parser;
pub mod transport;

pub use parser::HtmlListingParser;
pub use transport::ReqwestTransport;
