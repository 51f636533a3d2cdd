// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 data types

use crate::constants::*;
use crate::error::{ToolError, ToolResult};
use crate::marshal::*;

/// TPM2B_DIGEST - Variable length digest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tpm2bDigest {
    pub buffer: Vec<u8>,
}

impl Tpm2bDigest {
    pub fn new(data: Vec<u8>) -> Self {
        Self { buffer: data }
    }

    pub fn empty() -> Self {
        Self { buffer: Vec::new() }
    }
}

impl Marshal for Tpm2bDigest {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_tpm2b(&self.buffer);
    }
}

impl Unmarshal for Tpm2bDigest {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        Ok(Self {
            buffer: buf.get_tpm2b()?,
        })
    }
}

/// TPM2B_NONCE - Nonce value
pub type Tpm2bNonce = Tpm2bDigest;

/// TPM2B_NAME - Object or NV name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tpm2bName {
    pub name: Vec<u8>,
}

impl Tpm2bName {
    pub fn new(name: Vec<u8>) -> Self {
        Self { name }
    }
}

impl Marshal for Tpm2bName {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_tpm2b(&self.name);
    }
}

impl Unmarshal for Tpm2bName {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        Ok(Self {
            name: buf.get_tpm2b()?,
        })
    }
}

/// TPMS_PCR_SELECTION - PCR selection for a single hash algorithm
#[derive(Debug, Clone)]
pub struct TpmsPcrSelection {
    pub hash: TpmAlgId,
    pub pcr_select: Vec<u8>, // Bitmap of selected PCRs
}

impl TpmsPcrSelection {
    pub fn new(hash: TpmAlgId, pcrs: &[u32]) -> Self {
        // Calculate required size (at least 3 bytes for PCR 0-23)
        let max_pcr = pcrs.iter().max().copied().unwrap_or(0);
        let size = ((max_pcr / 8) + 1).max(3) as usize;
        let mut pcr_select = vec![0u8; size];

        for &pcr in pcrs {
            let byte_idx = (pcr / 8) as usize;
            let bit_idx = pcr % 8;
            if byte_idx < pcr_select.len() {
                pcr_select[byte_idx] |= 1 << bit_idx;
            }
        }

        Self { hash, pcr_select }
    }

    pub fn sha256(pcrs: &[u32]) -> Self {
        Self::new(TpmAlgId::Sha256, pcrs)
    }
}

impl Marshal for TpmsPcrSelection {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.hash.to_u16());
        buf.put_u8(self.pcr_select.len() as u8);
        buf.put_bytes(&self.pcr_select);
    }
}

impl Unmarshal for TpmsPcrSelection {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        let hash_alg = buf.get_u16()?;
        let hash = TpmAlgId::from_u16(hash_alg)
            .ok_or_else(|| ToolError::Parse(format!("unknown hash algorithm: 0x{hash_alg:04x}")))?;
        let size = buf.get_u8()? as usize;
        let pcr_select = buf.get_bytes(size)?;
        Ok(Self { hash, pcr_select })
    }
}

/// TPML_PCR_SELECTION - List of PCR selections
#[derive(Debug, Clone, Default)]
pub struct TpmlPcrSelection {
    pub pcr_selections: Vec<TpmsPcrSelection>,
}

impl TpmlPcrSelection {
    pub fn new(selections: Vec<TpmsPcrSelection>) -> Self {
        Self {
            pcr_selections: selections,
        }
    }

    pub fn single(hash: TpmAlgId, pcrs: &[u32]) -> Self {
        Self {
            pcr_selections: vec![TpmsPcrSelection::new(hash, pcrs)],
        }
    }
}

impl Marshal for TpmlPcrSelection {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.pcr_selections.len() as u32);
        for sel in &self.pcr_selections {
            sel.marshal(buf);
        }
    }
}

impl Unmarshal for TpmlPcrSelection {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        let count = buf.get_u32()? as usize;
        let mut pcr_selections = Vec::with_capacity(count);
        for _ in 0..count {
            pcr_selections.push(TpmsPcrSelection::unmarshal(buf)?);
        }
        Ok(Self { pcr_selections })
    }
}

/// TPML_DIGEST - List of digests (2 to 8 entries when used with PolicyOR)
#[derive(Debug, Clone, Default)]
pub struct TpmlDigest {
    pub digests: Vec<Tpm2bDigest>,
}

impl TpmlDigest {
    pub fn new(digests: Vec<Tpm2bDigest>) -> Self {
        Self { digests }
    }
}

impl Marshal for TpmlDigest {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.digests.len() as u32);
        for digest in &self.digests {
            digest.marshal(buf);
        }
    }
}

impl Unmarshal for TpmlDigest {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        let count = buf.get_u32()? as usize;
        let mut digests = Vec::with_capacity(count);
        for _ in 0..count {
            digests.push(Tpm2bDigest::unmarshal(buf)?);
        }
        Ok(Self { digests })
    }
}

/// TPMT_HA - Hash agile digest
#[derive(Debug, Clone)]
pub struct TpmtHa {
    pub hash_alg: TpmAlgId,
    pub digest: Vec<u8>,
}

impl Marshal for TpmtHa {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.hash_alg.to_u16());
        // Fixed-size digest, no length prefix
        buf.put_bytes(&self.digest);
    }
}

/// TPML_DIGEST_VALUES - Digests for PCR_Extend
#[derive(Debug, Clone, Default)]
pub struct TpmlDigestValues {
    pub digests: Vec<TpmtHa>,
}

impl TpmlDigestValues {
    pub fn single(digest: TpmtHa) -> Self {
        Self {
            digests: vec![digest],
        }
    }
}

impl Marshal for TpmlDigestValues {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.digests.len() as u32);
        for digest in &self.digests {
            digest.marshal(buf);
        }
    }
}

/// TPMT_SYM_DEF - Symmetric algorithm for session encryption
#[derive(Debug, Clone, Copy)]
pub struct TpmtSymDef {
    pub algorithm: TpmAlgId,
    pub key_bits: u16,
    pub mode: TpmAlgId,
}

impl TpmtSymDef {
    pub fn null() -> Self {
        Self {
            algorithm: TpmAlgId::Null,
            key_bits: 0,
            mode: TpmAlgId::Null,
        }
    }

    pub fn aes_128_cfb() -> Self {
        Self {
            algorithm: TpmAlgId::Aes,
            key_bits: 128,
            mode: TpmAlgId::Cfb,
        }
    }
}

impl Marshal for TpmtSymDef {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.algorithm.to_u16());
        if self.algorithm != TpmAlgId::Null {
            buf.put_u16(self.key_bits);
            buf.put_u16(self.mode.to_u16());
        }
    }
}

/// TPMT_SIG_SCHEME - Signature scheme selector
#[derive(Debug, Clone, Copy)]
pub struct TpmtSigScheme {
    pub scheme: TpmAlgId,
    pub hash_alg: TpmAlgId,
}

impl TpmtSigScheme {
    /// TPM_ALG_NULL: use the key's own scheme.
    pub fn null() -> Self {
        Self {
            scheme: TpmAlgId::Null,
            hash_alg: TpmAlgId::Null,
        }
    }
}

impl Marshal for TpmtSigScheme {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.scheme.to_u16());
        if self.scheme != TpmAlgId::Null {
            buf.put_u16(self.hash_alg.to_u16());
        }
    }
}

/// TPMT_TK_VERIFIED - Ticket proving a signature was checked by the TPM
#[derive(Debug, Clone, Default)]
pub struct TpmtTkVerified {
    pub hierarchy: u32,
    pub digest: Vec<u8>,
}

impl TpmtTkVerified {
    /// The null ticket, accepted when the approval was verified externally
    /// against a trial-policy digest rather than by this TPM.
    pub fn null() -> Self {
        Self {
            hierarchy: tpm_rh::NULL,
            digest: Vec::new(),
        }
    }
}

impl Marshal for TpmtTkVerified {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(TpmSt::VerifiedTicket.to_u16());
        buf.put_u32(self.hierarchy);
        buf.put_tpm2b(&self.digest);
    }
}

impl Unmarshal for TpmtTkVerified {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        let tag = buf.get_u16()?;
        if tag != TpmSt::VerifiedTicket.to_u16() {
            return Err(ToolError::Parse(format!(
                "expected TPM_ST_VERIFIED ticket, got tag 0x{tag:04x}"
            )));
        }
        let hierarchy = buf.get_u32()?;
        let digest = buf.get_tpm2b()?;
        Ok(Self { hierarchy, digest })
    }
}

/// TPMT_TK_HASHCHECK - Ticket asserting a digest was not produced from
/// TPM-restricted data
#[derive(Debug, Clone)]
pub struct TpmtTkHashcheck {
    pub hierarchy: u32,
    pub digest: Vec<u8>,
}

impl TpmtTkHashcheck {
    pub fn null() -> Self {
        Self {
            hierarchy: tpm_rh::NULL,
            digest: Vec::new(),
        }
    }
}

impl Marshal for TpmtTkHashcheck {
    fn marshal(&self, buf: &mut CommandBuffer) {
        const TPM_ST_HASHCHECK: u16 = 0x8024;
        buf.put_u16(TPM_ST_HASHCHECK);
        buf.put_u32(self.hierarchy);
        buf.put_tpm2b(&self.digest);
    }
}

/// TPM2B_SENSITIVE_CREATE - Secret parts of a new object
#[derive(Debug, Clone, Default)]
pub struct Tpm2bSensitiveCreate {
    pub user_auth: Vec<u8>,
    pub data: Vec<u8>,
}

impl Tpm2bSensitiveCreate {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            user_auth: Vec::new(),
            data,
        }
    }

    pub fn with_auth_and_data(user_auth: Vec<u8>, data: Vec<u8>) -> Self {
        Self { user_auth, data }
    }
}

impl Marshal for Tpm2bSensitiveCreate {
    fn marshal(&self, buf: &mut CommandBuffer) {
        let mut inner = CommandBuffer::new();
        inner.put_tpm2b(&self.user_auth);
        inner.put_tpm2b(&self.data);
        buf.put_tpm2b(inner.as_bytes());
    }
}

/// TPMS_NV_PUBLIC - NV index public area
#[derive(Debug, Clone)]
pub struct TpmsNvPublic {
    pub nv_index: u32,
    pub name_alg: TpmAlgId,
    pub attributes: TpmaNv,
    pub auth_policy: Vec<u8>,
    pub data_size: u16,
}

impl TpmsNvPublic {
    pub fn new(nv_index: u32, data_size: u16, attributes: TpmaNv) -> Self {
        Self {
            nv_index,
            name_alg: TpmAlgId::Sha256,
            attributes,
            auth_policy: Vec::new(),
            data_size,
        }
    }
}

impl Marshal for TpmsNvPublic {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.nv_index);
        buf.put_u16(self.name_alg.to_u16());
        buf.put_u32(self.attributes.0);
        buf.put_tpm2b(&self.auth_policy);
        buf.put_u16(self.data_size);
    }
}

impl Unmarshal for TpmsNvPublic {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        let nv_index = buf.get_u32()?;
        let name_alg_raw = buf.get_u16()?;
        let name_alg = TpmAlgId::from_u16(name_alg_raw)
            .ok_or_else(|| ToolError::Parse(format!("unknown name alg: 0x{name_alg_raw:04x}")))?;
        let attributes = TpmaNv(buf.get_u32()?);
        let auth_policy = buf.get_tpm2b()?;
        let data_size = buf.get_u16()?;
        Ok(Self {
            nv_index,
            name_alg,
            attributes,
            auth_policy,
            data_size,
        })
    }
}

/// TPM2B_NV_PUBLIC - Sized wrapper for TPMS_NV_PUBLIC
#[derive(Debug, Clone)]
pub struct Tpm2bNvPublic {
    pub nv_public: TpmsNvPublic,
}

impl Marshal for Tpm2bNvPublic {
    fn marshal(&self, buf: &mut CommandBuffer) {
        let inner = self.nv_public.to_bytes();
        buf.put_tpm2b(&inner);
    }
}

impl Unmarshal for Tpm2bNvPublic {
    fn unmarshal(buf: &mut ResponseBuffer) -> ToolResult<Self> {
        let inner = buf.get_tpm2b()?;
        let nv_public = TpmsNvPublic::from_bytes(&inner)?;
        Ok(Self { nv_public })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcr_selection_bitmap() {
        let sel = TpmsPcrSelection::sha256(&[0, 1, 2, 7]);
        assert_eq!(sel.hash, TpmAlgId::Sha256);
        // PCR 0, 1, 2, 7 = bits 0, 1, 2, 7 = 0b10000111 = 0x87
        assert_eq!(sel.pcr_select[0], 0x87);
        assert_eq!(sel.pcr_select.len(), 3);
    }

    #[test]
    fn null_sym_def_is_two_bytes() {
        assert_eq!(TpmtSymDef::null().to_bytes(), vec![0x00, 0x10]);
        assert_eq!(
            TpmtSymDef::aes_128_cfb().to_bytes(),
            vec![0x00, 0x06, 0x00, 0x80, 0x00, 0x43]
        );
    }

    #[test]
    fn verified_ticket_round_trip() {
        let ticket = TpmtTkVerified {
            hierarchy: tpm_rh::OWNER,
            digest: vec![0xAB; 4],
        };
        let parsed = TpmtTkVerified::from_bytes(&ticket.to_bytes()).unwrap();
        assert_eq!(parsed.hierarchy, tpm_rh::OWNER);
        assert_eq!(parsed.digest, vec![0xAB; 4]);
    }

    #[test]
    fn nv_public_round_trip() {
        let public = Tpm2bNvPublic {
            nv_public: TpmsNvPublic::new(
                0x0100_0022,
                64,
                TpmaNv::new().with_owner_read().with_owner_write(),
            ),
        };
        let parsed = Tpm2bNvPublic::from_bytes(&public.to_bytes()).unwrap();
        assert_eq!(parsed.nv_public.nv_index, 0x0100_0022);
        assert_eq!(parsed.nv_public.data_size, 64);
    }
}
