//! Authentication core for Ignis.
//!
//! A strategy registry plus the `authenticate({strategies, mode})`
//! middleware, with a JWT strategy whose non-standard claims travel
//! AES-encrypted.

pub mod authenticate;
pub mod crypto;
pub mod jwt;
pub mod strategy;

pub use authenticate::{authenticate, install};
pub use crypto::{AesCipher, AesMode};
pub use jwt::{JwtConfig, JwtStrategy, JwtTokenService, Role, STANDARD_CLAIMS};
pub use strategy::{AuthStrategy, StrategyRegistry, TAG_AUTH_STRATEGY};
