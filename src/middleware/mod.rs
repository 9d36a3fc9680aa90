// HTTP middleware layers
//
// Cross-origin policy for browser frontends served from localhost

pub mod cors;

pub use cors::{is_localhost_origin, localhost_cors};
