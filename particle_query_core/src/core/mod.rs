pub mod error;
pub mod quantity;
pub mod predicate;
pub mod column;
pub mod catalog;
pub mod planner;
pub mod filter;
pub mod tracker;
pub mod reader;
pub mod query;
