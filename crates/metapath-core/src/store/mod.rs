pub mod results;
pub mod schema;
