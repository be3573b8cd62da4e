mod api;
mod pages;

pub use api::{check_status, download_all, download_certificate, download_file, retry_review};
pub use pages::{index, upload_handler, view_results};
