pub mod json_extractor;
pub mod threads;
pub mod token_estimator;
pub mod truncation;
