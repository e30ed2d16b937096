//! Content collections served over HTTP.
//!
//! Every collection in [`Collection::ALL`](crate::documents::Collection::ALL)
//! gets the same six routes under `/api/{slug}`; the schema registry decides
//! what a valid body looks like and which relations can be populated. On top
//! of those, languages and versions are addressable by code, prayers and
//! daily manna answer on their root path, and verses can be looked up by the
//! names of what they belong to.

pub mod routes;

pub use routes::{collection_routes, content_routes};
