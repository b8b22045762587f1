pub mod classification;
pub mod search;
pub mod session;
pub mod utterance;
