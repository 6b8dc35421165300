pub mod dispatcher;
pub mod error;
pub mod model;
