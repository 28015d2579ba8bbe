pub mod client;
pub mod code;
pub mod error;
pub mod pkce;
pub mod server;
pub mod token;

pub use client::{GrantType, OAuthClient};
pub use code::AuthCode;
pub use error::OAuthError;
pub use server::{OAuthServer, ServerMetadata};
pub use token::{Token, TokenKind, TokenPair, ValidatedToken};
