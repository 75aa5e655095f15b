mod error;
mod handlers;
mod router;

pub use router::router;
