#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

//! Portable encrypted-box (ebox) containers.
//!
//! An ebox seals a short secret (canonically a 32-byte symmetric key) under
//! one or more access policies described by a [`template::Tpl`]. Each
//! policy configuration is either PRIMARY (one PIV token that unlocks the
//! ebox on its own) or RECOVERY (a threshold N out of M tokens assembled
//! through a challenge/response protocol with their remote holders).
//!
//! # Flows
//!
//! ```text
//! Seal:     Tpl + payload            → Ebox::seal           → Ebox
//! Unlock:   PIV unseal of a primary  → Ebox::unlock         → payload key
//! Recover:  Ebox::begin_recovery
//!             → RecoverySession::challenge   (issuer, per part)
//!             → Challenge::decode / respond  (remote token holder)
//!             → RecoverySession::accept_response
//!             → RecoverySession::recover     → payload key
//! ```
//!
//! The crate is single-threaded and performs no I/O; transports, card
//! sessions, and persistence are the caller's responsibility. Templates and
//! eboxes encode to a tagged binary form (base64-armoured on request) that
//! skips unknown tags for forward compatibility. Every buffer holding key
//! material, shares, or challenge state is zeroized on release.

pub mod challenge;
pub mod ebox;
pub mod ecdh_box;
pub mod error;
pub mod format;
pub mod recovery;
pub mod shamir;
pub mod template;
pub mod words;

mod wire;

pub use challenge::Challenge;
pub use ebox::{Ebox, EboxConfig, EboxPart};
pub use ecdh_box::EcdhBox;
pub use error::{Error, Result};
pub use recovery::{PartStatus, RecoverySession};
pub use shamir::KeyShare;
pub use template::{ConfigType, Guid, Tpl, TplConfig, TplPart};

pub use p256;
