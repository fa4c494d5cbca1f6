//! Robots.txt rules
//!
//! Parsing and rule checks for robots.txt, including crawl-delay
//! extraction. Caching of fetched snapshots lives with the politeness
//! controller; this module only knows how to interpret the file.

mod parser;

pub use parser::RobotsRules;
