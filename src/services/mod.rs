// Linkmirror services
// Services talk to the backend or compute pure projections: backends, search, settings.

pub mod backend;
#[cfg(feature = "http")]
pub mod http_backend;
pub mod local_backend;
pub mod search_filter;
pub mod settings_engine;
