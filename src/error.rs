// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Tool-level result taxonomy.
//!
//! Every operation in this crate yields a [`ToolResult`]. Handle
//! classification and session resolution fail before any wire exchange is
//! attempted; protocol failures keep the raw response code and the name of
//! the verb that produced them.

use thiserror::Error;

pub type ToolResult<T> = std::result::Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    /// Handle classification failure: namespace not permitted, out-of-range
    /// index, or an ambiguous implicit index.
    #[error("invalid handle: {0}")]
    Handle(String),

    /// The TPM rejected the presented authorization.
    #[error("authorization failure during {op} (rc=0x{rc:08x})")]
    Auth { op: &'static str, rc: u32 },

    /// The TPM does not implement the requested command code.
    #[error("{op} is not supported by this TPM (rc=0x{rc:08x})")]
    NotSupported { op: &'static str, rc: u32 },

    /// Any other non-success protocol status, tagged with the verb that
    /// actually produced it.
    #[error("{op} failed (rc=0x{rc:08x})")]
    Tpm { op: &'static str, rc: u32 },

    /// A PCR bank allocation request exceeded the available space.
    #[error("PCR allocation failed: max PCRs {max_pcr}, needed {size_needed}, available {size_available}")]
    Capacity {
        max_pcr: u32,
        size_needed: u32,
        size_available: u32,
    },

    /// Malformed or truncated wire data.
    #[error("malformed TPM data: {0}")]
    Parse(String),

    /// Transport-level failure talking to the device.
    #[error("TPM transport failure: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Classify a raw non-success response code for the given verb.
    pub fn from_tpm(op: &'static str, rc: u32) -> Self {
        use crate::constants::tpm_rc;

        match tpm_rc::error_get(rc) {
            tpm_rc::AUTH_FAIL | tpm_rc::POLICY_FAIL | tpm_rc::BAD_AUTH => {
                ToolError::Auth { op, rc }
            }
            tpm_rc::COMMAND_CODE => ToolError::NotSupported { op, rc },
            _ => ToolError::Tpm { op, rc },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_classify_regardless_of_session_slot() {
        // 0x98E carries the session-one tag already; higher bits are noise.
        match ToolError::from_tpm("Unseal", 0x0000_098E) {
            ToolError::Auth { op: "Unseal", rc: 0x98E } => {}
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn command_code_maps_to_not_supported() {
        match ToolError::from_tpm("EncryptDecrypt2", 0x0143) {
            ToolError::NotSupported { .. } => {}
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn unknown_codes_keep_the_originating_verb() {
        let err = ToolError::from_tpm("Load", 0x0184);
        assert_eq!(err.to_string(), "Load failed (rc=0x00000184)");
    }
}
