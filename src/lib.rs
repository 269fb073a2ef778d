pub mod account;
pub mod anchor;
pub mod configure;
pub mod crypto;
pub mod errors;
pub mod logging;
pub mod models;
pub mod observer;
pub mod signer;
pub mod store;
pub mod strkey;
pub mod xdr;
