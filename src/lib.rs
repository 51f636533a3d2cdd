// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Pure Rust TPM 2.0 authorization and command layer
//!
//! This crate provides client-side TPM 2.0 authorization plumbing and a
//! command gateway, communicating directly with the TPM device without C
//! library dependencies.
//!
//! ## Features
//!
//! - **Handle classification**: Parse and validate handles from text
//!   (`owner`, `platform`, `0x81000001`, raw offsets) against a caller
//!   capability mask
//! - **Session resolution**: Per-object authorization that picks password
//!   or session semantics without the caller marshaling auth areas
//! - **Policy sessions**: Trial and real policy sessions with the full set
//!   of assertions (`PolicyPCR`, `PolicyOR`, `PolicySecret`,
//!   `PolicyAuthorize`, ...)
//! - **Direct device communication**: Talks directly to `/dev/tpmrm0` or
//!   `/dev/tpm0`
//!
//! ## Example
//!
//! ```no_run
//! use tpm2_auth::{HandleFlags, LoadedObject, TpmContext, hierarchy_from_text};
//!
//! let mut ctx = TpmContext::new(None)?; // Auto-detect TPM device
//! let hierarchy = hierarchy_from_text(
//!     "lockout",
//!     HandleFlags::new(HandleFlags::LOCKOUT | HandleFlags::PLATFORM),
//! )?;
//! let auth = LoadedObject::new(hierarchy);
//! ctx.clear(&auth)?;
//! # Ok::<(), tpm2_auth::ToolError>(())
//! ```

mod constants;
mod device;
mod error;
mod gateway;
mod handle;
mod marshal;
mod pcr;
mod policy;
mod session;
mod types;

pub use constants::*;
pub use error::{ToolError, ToolResult};
pub use gateway::{EncryptDecryptVersion, TpmContext};
pub use handle::{
    classify_and_validate, hierarchy_from_text, string_to_u32, HandleFlags,
};
pub use pcr::{pcr_get_id, PcrList};
pub use policy::{compute_pcr_digest, read_pcr_values};
pub use session::{LoadedObject, Session, SessionParameter};
pub use types::*;

// Re-export device for advanced usage
pub use device::{TpmCommand, TpmDevice, TpmResponse, TpmTransport};
pub use marshal::{CommandBuffer, Marshal, ResponseBuffer, Unmarshal};
