pub mod keyword;


pub use keyword::KeywordClassifier;
