#![deny(missing_docs)]

//! # Payrelay Models
//!
//! Wire-level data types shared between the payrelay gateway and the
//! private preference-creation service it fronts.
//!
//! ## Request flow
//!
//! ```text
//! CheckoutRequest            (browser → gateway)
//!   └── InvocationEnvelope   (gateway → private destination)
//!         └── CheckoutSuccess / {ok:false, error}   (gateway → browser)
//! ```
//!
//! ## Module layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`checkout`] | Inbound request, outbound invocation envelope, success reply |
//! | [`consulta`] | Time-based correlation identifier (`ConsultaId`) |
//! | [`error`] | Machine-readable error discriminators (`ErrorCode`) |

pub mod checkout;
pub mod consulta;
pub mod error;

// Re-export all public types at crate root for convenience.
// Downstream crates can use `payrelay_models::ConsultaId` directly.
pub use checkout::*;
pub use consulta::*;
pub use error::*;
