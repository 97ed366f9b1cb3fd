//! HTTP surface for PerfView.
//!
//! Query parameters are bound into engine requests by [`requests`], range
//! responses are assembled by [`content`] and served through the
//! single-flight stale-while-revalidate [`cache`], and [`handlers`] wires
//! it all into an axum router.

pub mod cache;
pub mod content;
pub mod handlers;
pub mod requests;

pub use cache::{CacheConfig, ResponseCache};
pub use handlers::{build_cache, create_router, AppState};
pub use requests::BinderDefaults;
