pub mod clock;
pub mod extractor;
pub mod jwt;
pub mod notify;
pub mod state;
pub mod test_utils;
