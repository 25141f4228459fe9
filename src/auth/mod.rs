//! Authentication: bearer token verification

pub mod jwt;

pub use jwt::{extract_token_from_header, Claims, JwtValidator};
