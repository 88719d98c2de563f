pub mod repository;
pub mod rows;

pub use repository::PgFeedRepository;
