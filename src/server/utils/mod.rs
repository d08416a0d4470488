pub mod extraction_utils;
pub mod reference_utils;
pub mod rewrite_utils;
pub mod response_utils;
