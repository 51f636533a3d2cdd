// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 constants: command codes, response codes, handle ranges

/// TPM 2.0 Command Codes (TPM_CC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmCc {
    EvictControl = 0x00000120,
    HierarchyControl = 0x00000121,
    NvUndefineSpace = 0x00000122,
    Clear = 0x00000126,
    ClearControl = 0x00000127,
    HierarchyChangeAuth = 0x00000129,
    NvDefineSpace = 0x0000012A,
    PcrAllocate = 0x0000012B,
    CreatePrimary = 0x00000131,
    NvIncrement = 0x00000134,
    NvWrite = 0x00000137,
    DictionaryAttackLockReset = 0x00000139,
    DictionaryAttackParameters = 0x0000013A,
    PcrReset = 0x0000013D,
    Certify = 0x00000148,
    Duplicate = 0x0000014B,
    NvRead = 0x0000014E,
    NvReadLock = 0x0000014F,
    PolicySecret = 0x00000151,
    Create = 0x00000153,
    Load = 0x00000157,
    Quote = 0x00000158,
    Sign = 0x0000015D,
    Unseal = 0x0000015E,
    EncryptDecrypt = 0x00000164,
    FlushContext = 0x00000165,
    NvReadPublic = 0x00000169,
    PolicyAuthorize = 0x0000016A,
    PolicyCommandCode = 0x0000016C,
    PolicyDuplicationSelect = 0x00000188,
    PolicyLocality = 0x0000016F,
    PolicyOr = 0x00000171,
    ReadPublic = 0x00000173,
    StartAuthSession = 0x00000176,
    PcrRead = 0x0000017E,
    PolicyPcr = 0x0000017F,
    PolicyRestart = 0x00000180,
    PcrExtend = 0x00000182,
    PolicyGetDigest = 0x00000189,
    PolicyPassword = 0x0000018C,
    EncryptDecrypt2 = 0x00000193,
}

impl TpmCc {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// Well-known TPM 2.0 response-code values, compared against the low 16 bits
/// of the raw status (TPM2_ERROR_TSS2_RC_ERROR_MASK in the original tooling).
pub mod tpm_rc {
    /// Mask selecting the portion of a response code that identifies the error.
    pub const ERROR_MASK: u32 = 0xFFFF;

    pub const SUCCESS: u32 = 0x0000;
    /// TPM_RC_INITIALIZE: already initialized / already in requested state.
    pub const INITIALIZE: u32 = 0x0100;
    /// TPM_RC_COMMAND_CODE: the command code is not supported by this TPM.
    pub const COMMAND_CODE: u32 = 0x0143;
    /// TPM_RC_AUTH_FAIL as reported for session slot 1.
    pub const AUTH_FAIL: u32 = 0x098E;
    /// TPM_RC_POLICY_FAIL as reported for session slot 1.
    pub const POLICY_FAIL: u32 = 0x099D;
    /// TPM_RC_BAD_AUTH as reported for session slot 1.
    pub const BAD_AUTH: u32 = 0x09A2;

    /// The error portion of a raw response code.
    pub fn error_get(rc: u32) -> u32 {
        rc & ERROR_MASK
    }
}

/// TPM 2.0 Algorithm IDs (TPM_ALG_ID)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmAlgId {
    Null = 0x0010,
    Sha1 = 0x0004,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
    Aes = 0x0006,
    Cfb = 0x0043,
}

impl TpmAlgId {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0010 => Some(TpmAlgId::Null),
            0x0004 => Some(TpmAlgId::Sha1),
            0x000B => Some(TpmAlgId::Sha256),
            0x000C => Some(TpmAlgId::Sha384),
            0x000D => Some(TpmAlgId::Sha512),
            0x0006 => Some(TpmAlgId::Aes),
            0x0043 => Some(TpmAlgId::Cfb),
            _ => None,
        }
    }

    pub fn digest_size(self) -> usize {
        match self {
            TpmAlgId::Sha1 => 20,
            TpmAlgId::Sha256 => 32,
            TpmAlgId::Sha384 => 48,
            TpmAlgId::Sha512 => 64,
            _ => 0,
        }
    }
}

/// Handle-range arithmetic (TPM2_HR_*). The top byte of a handle selects its
/// namespace; the remainder is an index within that namespace.
pub mod tpm_hr {
    pub const SHIFT: u32 = 24;
    pub const RANGE_MASK: u32 = 0xFF00_0000;

    pub const PCR: u32 = 0x0000_0000;
    pub const NV_INDEX: u32 = 0x0100_0000;
    pub const HMAC_SESSION: u32 = 0x0200_0000;
    pub const POLICY_SESSION: u32 = 0x0300_0000;
    pub const PERMANENT: u32 = 0x4000_0000;
    pub const TRANSIENT: u32 = 0x8000_0000;
    pub const PERSISTENT: u32 = 0x8100_0000;
}

/// Namespace bounds (protocol constants, not configuration).
pub const TPM2_MAX_PCRS: u32 = 32;
pub const TPM2_PCR_FIRST: u32 = 0;
pub const TPM2_PCR_LAST: u32 = TPM2_PCR_FIRST + TPM2_MAX_PCRS - 1;
pub const TPM2_NV_INDEX_FIRST: u32 = tpm_hr::NV_INDEX;
pub const TPM2_NV_INDEX_LAST: u32 = tpm_hr::NV_INDEX + 0x00FF_FFFF;
pub const TPM2_PERSISTENT_FIRST: u32 = tpm_hr::PERSISTENT;
pub const TPM2_PERSISTENT_LAST: u32 = tpm_hr::PERSISTENT + 0x00FF_FFFF;

/// TPM 2.0 Permanent Handles
pub mod tpm_rh {
    pub const OWNER: u32 = 0x40000001;
    pub const NULL: u32 = 0x40000007;
    /// Password authorization sentinel (TPM_RS_PW). Never a real session.
    pub const PW: u32 = 0x40000009;
    pub const LOCKOUT: u32 = 0x4000000A;
    pub const ENDORSEMENT: u32 = 0x4000000B;
    pub const PLATFORM: u32 = 0x4000000C;
}

/// TPM 2.0 Session Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TpmSe {
    Hmac = 0x00,
    Policy = 0x01,
    Trial = 0x03,
}

/// TPM 2.0 Session Attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TpmaSa(pub u8);

impl TpmaSa {
    pub const CONTINUE_SESSION: u8 = 1 << 0;
    pub const AUDIT_EXCLUSIVE: u8 = 1 << 1;
    pub const AUDIT_RESET: u8 = 1 << 2;
    pub const DECRYPT: u8 = 1 << 5;
    pub const ENCRYPT: u8 = 1 << 6;
    pub const AUDIT: u8 = 1 << 7;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_continue_session(mut self) -> Self {
        self.0 |= Self::CONTINUE_SESSION;
        self
    }

    pub fn with_audit(mut self) -> Self {
        self.0 |= Self::AUDIT;
        self
    }
}

/// TPM 2.0 NV Attributes
#[derive(Debug, Clone, Copy, Default)]
pub struct TpmaNv(pub u32);

impl TpmaNv {
    pub const PP_WRITE: u32 = 1 << 0;
    pub const OWNER_WRITE: u32 = 1 << 1;
    pub const AUTH_WRITE: u32 = 1 << 2;
    pub const POLICY_WRITE: u32 = 1 << 3;
    pub const PP_READ: u32 = 1 << 16;
    pub const OWNER_READ: u32 = 1 << 17;
    pub const AUTH_READ: u32 = 1 << 18;
    pub const POLICY_READ: u32 = 1 << 19;
    pub const NO_DA: u32 = 1 << 25;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_owner_write(mut self) -> Self {
        self.0 |= Self::OWNER_WRITE;
        self
    }

    pub fn with_owner_read(mut self) -> Self {
        self.0 |= Self::OWNER_READ;
        self
    }

    pub fn with_auth_write(mut self) -> Self {
        self.0 |= Self::AUTH_WRITE;
        self
    }

    pub fn with_auth_read(mut self) -> Self {
        self.0 |= Self::AUTH_READ;
        self
    }
}

/// TPM command header tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSt {
    NoSessions = 0x8001,
    Sessions = 0x8002,
    VerifiedTicket = 0x8022,
}

impl TpmSt {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x8001 => Some(TpmSt::NoSessions),
            0x8002 => Some(TpmSt::Sessions),
            0x8022 => Some(TpmSt::VerifiedTicket),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_windows_cover_their_range_byte() {
        // Every handle whose top byte is 0x01 lies inside the NV window, and
        // likewise for persistent handles; the explicit bound checks in the
        // classifier rely on the windows being exactly one range byte wide.
        assert_eq!(TPM2_NV_INDEX_FIRST & tpm_hr::RANGE_MASK, tpm_hr::NV_INDEX);
        assert_eq!(TPM2_NV_INDEX_LAST & tpm_hr::RANGE_MASK, tpm_hr::NV_INDEX);
        assert_eq!(TPM2_PERSISTENT_FIRST & tpm_hr::RANGE_MASK, tpm_hr::PERSISTENT);
        assert_eq!(TPM2_PERSISTENT_LAST & tpm_hr::RANGE_MASK, tpm_hr::PERSISTENT);
    }

    #[test]
    fn error_mask_strips_session_numbering() {
        assert_eq!(tpm_rc::error_get(0x0001_0143), tpm_rc::COMMAND_CODE);
        assert_eq!(tpm_rc::error_get(0x0000_098E), tpm_rc::AUTH_FAIL);
    }
}
