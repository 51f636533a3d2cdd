// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Command gateway: one method per TPM verb.
//!
//! Each method resolves the authorization for the objects involved, issues
//! exactly one wire exchange (two only for the documented EncryptDecrypt
//! fallback), and maps the outcome to a [`ToolResult`]. Protocol failures
//! are never retried except the fallback and the idempotent-tolerant
//! administrative verbs; output parameters are never partially populated on
//! failure.

use tracing::{debug, warn};

use crate::constants::*;
use crate::device::{TpmCommand, TpmDevice, TpmTransport};
use crate::error::{ToolError, ToolResult};
use crate::marshal::Unmarshal;
use crate::pcr::PcrList;
use crate::session::{LoadedObject, SessionParameter};
use crate::types::*;

/// Which wire encoding of the symmetric-cipher command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptDecryptVersion {
    /// TPM2_EncryptDecrypt2 (data first, preferred)
    Two,
    /// TPM2_EncryptDecrypt (legacy parameter order)
    Legacy,
}

impl EncryptDecryptVersion {
    pub fn verb(self) -> &'static str {
        match self {
            EncryptDecryptVersion::Two => "EncryptDecrypt2",
            EncryptDecryptVersion::Legacy => "EncryptDecrypt",
        }
    }
}

/// TPM command gateway over a transport.
pub struct TpmContext<T: TpmTransport = TpmDevice> {
    tpm: T,
}

impl TpmContext<TpmDevice> {
    /// Open a gateway over the given device path, or auto-detect one.
    pub fn new(tcti_path: Option<&str>) -> ToolResult<Self> {
        let tpm = match tcti_path {
            Some(path) => TpmDevice::open(path)?,
            None => TpmDevice::detect()?,
        };
        Ok(Self { tpm })
    }

    /// Get the device path
    pub fn device_path(&self) -> &str {
        self.tpm.path()
    }
}

impl<T: TpmTransport> TpmContext<T> {
    /// Wrap an already-open transport.
    pub fn with_transport(tpm: T) -> Self {
        Self { tpm }
    }

    /// Borrow the transport, e.g. to start sessions or apply policy
    /// assertions against it.
    pub fn transport(&mut self) -> &mut T {
        &mut self.tpm
    }

    // ==================== Object lifecycle ====================

    /// Create a primary key under the given hierarchy from a raw public
    /// template (with its own size prefix).
    pub fn create_primary(
        &mut self,
        hierarchy: &LoadedObject,
        template: &[u8],
    ) -> ToolResult<(u32, Vec<u8>)> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::CreatePrimary);
        cmd.add_handle(hierarchy.handle);
        cmd.add_auth(&hierarchy.resolve_auth());
        cmd.add(&Tpm2bSensitiveCreate::empty());
        cmd.add_tpm2b(template);
        // outsideInfo, creationPCR: empty
        cmd.add_tpm2b_empty();
        cmd.add(&TpmlPcrSelection::default());

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("CreatePrimary")?;

        // For commands with sessions the created handle precedes the
        // parameter size field.
        let mut buf = response.data_buffer();
        let handle = buf.get_u32()?;
        let _param_size = buf.get_u32()?;
        let out_public = buf.get_tpm2b()?;

        debug!("created primary key with handle 0x{:08x}", handle);
        Ok((handle, out_public))
    }

    /// Create an ordinary object under a loaded parent.
    pub fn create(
        &mut self,
        parent: &LoadedObject,
        sensitive: &Tpm2bSensitiveCreate,
        template: &[u8],
    ) -> ToolResult<(Vec<u8>, Vec<u8>)> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Create);
        cmd.add_handle(parent.handle);
        cmd.add_auth(&parent.resolve_auth());
        cmd.add(sensitive);
        cmd.add_tpm2b(template);
        cmd.add_tpm2b_empty();
        cmd.add(&TpmlPcrSelection::default());

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("Create")?;

        let mut buf = response.skip_parameter_size()?;
        let out_private = buf.get_tpm2b()?;
        let out_public = buf.get_tpm2b()?;
        Ok((out_private, out_public))
    }

    /// Load a created object under its parent, yielding a transient handle.
    pub fn load(
        &mut self,
        parent: &LoadedObject,
        in_private: &[u8],
        in_public: &[u8],
    ) -> ToolResult<u32> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Load);
        cmd.add_handle(parent.handle);
        cmd.add_auth(&parent.resolve_auth());
        cmd.add_tpm2b(in_private);
        cmd.add_tpm2b(in_public);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("Load")?;

        let mut buf = response.data_buffer();
        let handle = buf.get_u32()?;

        debug!("loaded object with handle 0x{:08x}", handle);
        Ok(handle)
    }

    /// Make a loaded key persistent (or evict it when `object` already names
    /// a persistent handle).
    pub fn evict_control(
        &mut self,
        auth_hierarchy: &LoadedObject,
        object_handle: u32,
        persistent_handle: u32,
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::EvictControl);
        cmd.add_handle(auth_hierarchy.handle);
        cmd.add_handle(object_handle);
        cmd.add_auth(&auth_hierarchy.resolve_auth());
        cmd.add_handle(persistent_handle);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("EvictControl")?;

        debug!("made key persistent at 0x{:08x}", persistent_handle);
        Ok(())
    }

    /// Flush a transient object, sequence, or session handle.
    pub fn flush_context(&mut self, handle: u32) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::FlushContext);
        cmd.add_handle(handle);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("FlushContext")
    }

    /// Read the public area, name, and qualified name of a loaded object.
    pub fn read_public(&mut self, handle: u32) -> ToolResult<(Vec<u8>, Tpm2bName, Tpm2bName)> {
        let mut cmd = TpmCommand::new(TpmCc::ReadPublic);
        cmd.add_handle(handle);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("ReadPublic")?;

        let mut buf = response.data_buffer();
        let out_public = buf.get_tpm2b()?;
        let name = Tpm2bName::unmarshal(&mut buf)?;
        let qualified_name = Tpm2bName::unmarshal(&mut buf)?;
        Ok((out_public, name, qualified_name))
    }

    /// Check whether a handle names a loaded or persistent object.
    pub fn handle_exists(&mut self, handle: u32) -> ToolResult<bool> {
        let mut cmd = TpmCommand::new(TpmCc::ReadPublic);
        cmd.add_handle(handle);

        let response = self.tpm.execute(&cmd.finalize())?;
        Ok(response.is_success())
    }

    /// Unseal the data held by a sealed object.
    pub fn unseal(&mut self, sealed: &LoadedObject) -> ToolResult<Vec<u8>> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Unseal);
        cmd.add_handle(sealed.handle);
        cmd.add_auth(&sealed.resolve_auth());

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("Unseal")?;

        let mut buf = response.skip_parameter_size()?;
        buf.get_tpm2b()
    }

    /// Duplicate a key to a new parent.
    pub fn duplicate(
        &mut self,
        key: &LoadedObject,
        new_parent_handle: u32,
        encryption_key_in: &[u8],
        sym_alg: &TpmtSymDef,
    ) -> ToolResult<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Duplicate);
        cmd.add_handle(key.handle);
        cmd.add_handle(new_parent_handle);
        cmd.add_auth(&key.resolve_auth());
        cmd.add_tpm2b(encryption_key_in);
        cmd.add(sym_alg);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("Duplicate")?;

        let mut buf = response.skip_parameter_size()?;
        let encryption_key_out = buf.get_tpm2b()?;
        let duplicate = buf.get_tpm2b()?;
        let encrypted_seed = buf.get_tpm2b()?;
        Ok((encryption_key_out, duplicate, encrypted_seed))
    }

    // ==================== Signing and attestation ====================

    /// Sign a digest with a loaded key.
    pub fn sign(
        &mut self,
        key: &LoadedObject,
        digest: &[u8],
        scheme: &TpmtSigScheme,
        validation: &TpmtTkHashcheck,
    ) -> ToolResult<Vec<u8>> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Sign);
        cmd.add_handle(key.handle);
        cmd.add_auth(&key.resolve_auth());
        cmd.add_tpm2b(digest);
        cmd.add(scheme);
        cmd.add(validation);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("Sign")?;

        let mut buf = response.skip_parameter_size()?;
        Ok(buf.get_remaining()) // TPMT_SIGNATURE
    }

    /// Quote the selected PCRs with a signing key.
    pub fn quote(
        &mut self,
        key: &LoadedObject,
        qualifying_data: &[u8],
        pcr_selection: &TpmlPcrSelection,
    ) -> ToolResult<(Vec<u8>, Vec<u8>)> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Quote);
        cmd.add_handle(key.handle);
        cmd.add_auth(&key.resolve_auth());
        cmd.add_tpm2b(qualifying_data);
        cmd.add(&TpmtSigScheme::null());
        cmd.add(pcr_selection);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("Quote")?;

        let mut buf = response.skip_parameter_size()?;
        let quoted = buf.get_tpm2b()?; // TPM2B_ATTEST
        let signature = buf.get_remaining(); // TPMT_SIGNATURE
        Ok((quoted, signature))
    }

    /// Certify one loaded object with another; both carry their own
    /// authorization.
    pub fn certify(
        &mut self,
        certified: &LoadedObject,
        signer: &LoadedObject,
        qualifying_data: &[u8],
        scheme: &TpmtSigScheme,
    ) -> ToolResult<(Vec<u8>, Vec<u8>)> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Certify);
        cmd.add_handle(certified.handle);
        cmd.add_handle(signer.handle);
        cmd.add_auth_area(&[certified.resolve_auth(), signer.resolve_auth()]);
        cmd.add_tpm2b(qualifying_data);
        cmd.add(scheme);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("Certify")?;

        let mut buf = response.skip_parameter_size()?;
        let certify_info = buf.get_tpm2b()?;
        let signature = buf.get_remaining();
        Ok((certify_info, signature))
    }

    // ==================== Symmetric cipher ====================

    /// Encrypt or decrypt with a loaded symmetric key.
    ///
    /// Attempts the EncryptDecrypt2 encoding first; if the TPM reports the
    /// command code as unsupported, retries exactly once with the legacy
    /// encoding. The version that ran is returned so diagnostics reference
    /// the correct verb.
    pub fn encrypt_decrypt(
        &mut self,
        key: &LoadedObject,
        decrypt: bool,
        mode: TpmAlgId,
        iv_in: &[u8],
        data: &[u8],
    ) -> ToolResult<(Vec<u8>, Vec<u8>, EncryptDecryptVersion)> {
        let auth = key.resolve_auth();

        let mut cmd = TpmCommand::with_sessions(TpmCc::EncryptDecrypt2);
        cmd.add_handle(key.handle);
        cmd.add_auth(&auth);
        cmd.add_tpm2b(data);
        cmd.add_u8(decrypt as u8);
        cmd.add_u16(mode.to_u16());
        cmd.add_tpm2b(iv_in);

        let mut version = EncryptDecryptVersion::Two;
        let mut response = self.tpm.execute(&cmd.finalize())?;

        if response.error_code() == tpm_rc::COMMAND_CODE {
            warn!("EncryptDecrypt2 not supported, falling back to EncryptDecrypt");
            version = EncryptDecryptVersion::Legacy;

            let mut cmd = TpmCommand::with_sessions(TpmCc::EncryptDecrypt);
            cmd.add_handle(key.handle);
            cmd.add_auth(&auth);
            cmd.add_u8(decrypt as u8);
            cmd.add_u16(mode.to_u16());
            cmd.add_tpm2b(iv_in);
            cmd.add_tpm2b(data);

            response = self.tpm.execute(&cmd.finalize())?;
        }

        response.ensure_success(version.verb())?;

        let mut buf = response.skip_parameter_size()?;
        let out_data = buf.get_tpm2b()?;
        let iv_out = buf.get_tpm2b()?;
        Ok((out_data, iv_out, version))
    }

    // ==================== Administrative ====================

    /// Clear the TPM. An "already initialized" status is a safe no-op and is
    /// treated as success.
    pub fn clear(&mut self, auth_hierarchy: &LoadedObject) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Clear);
        cmd.add_handle(auth_hierarchy.handle);
        cmd.add_auth(&auth_hierarchy.resolve_auth());

        let response = self.tpm.execute(&cmd.finalize())?;
        if response.error_code() == tpm_rc::INITIALIZE {
            debug!("Clear: TPM already in the requested state");
            return Ok(());
        }
        response.ensure_success("Clear")
    }

    /// Enable or disable the ability to clear; tolerates the
    /// already-in-requested-state status.
    pub fn clear_control(
        &mut self,
        auth_hierarchy: &LoadedObject,
        disable_clear: bool,
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::ClearControl);
        cmd.add_handle(auth_hierarchy.handle);
        cmd.add_auth(&auth_hierarchy.resolve_auth());
        cmd.add_u8(disable_clear as u8);

        let response = self.tpm.execute(&cmd.finalize())?;
        if response.error_code() == tpm_rc::INITIALIZE {
            debug!("ClearControl: TPM already in the requested state");
            return Ok(());
        }
        response.ensure_success("ClearControl")
    }

    /// Enable or disable a hierarchy; tolerates the
    /// already-in-requested-state status.
    pub fn hierarchy_control(
        &mut self,
        auth_hierarchy: &LoadedObject,
        enable: u32,
        state: bool,
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::HierarchyControl);
        cmd.add_handle(auth_hierarchy.handle);
        cmd.add_auth(&auth_hierarchy.resolve_auth());
        cmd.add_u32(enable);
        cmd.add_u8(state as u8);

        let response = self.tpm.execute(&cmd.finalize())?;
        if response.error_code() == tpm_rc::INITIALIZE {
            debug!("HierarchyControl: TPM already in the requested state");
            return Ok(());
        }
        response.ensure_success("HierarchyControl")
    }

    /// Change a hierarchy's auth value.
    pub fn hierarchy_change_auth(
        &mut self,
        hierarchy: &LoadedObject,
        new_auth: &[u8],
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::HierarchyChangeAuth);
        cmd.add_handle(hierarchy.handle);
        cmd.add_auth(&hierarchy.resolve_auth());
        cmd.add_tpm2b(new_auth);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("HierarchyChangeAuth")
    }

    /// Reset the dictionary-attack lockout and/or set its parameters. When
    /// both are requested the reset runs first.
    #[allow(clippy::too_many_arguments)]
    pub fn dictionary_lockout(
        &mut self,
        auth_hierarchy: &LoadedObject,
        clear_lockout: bool,
        setup_parameters: bool,
        max_tries: u32,
        recovery_time: u32,
        lockout_recovery_time: u32,
    ) -> ToolResult<()> {
        let auth = auth_hierarchy.resolve_auth();

        if clear_lockout {
            debug!("resetting dictionary lockout state");
            let mut cmd = TpmCommand::with_sessions(TpmCc::DictionaryAttackLockReset);
            cmd.add_handle(auth_hierarchy.handle);
            cmd.add_auth(&auth);

            let response = self.tpm.execute(&cmd.finalize())?;
            response.ensure_success("DictionaryAttackLockReset")?;
        }

        if setup_parameters {
            debug!("setting dictionary lockout parameters");
            let mut cmd = TpmCommand::with_sessions(TpmCc::DictionaryAttackParameters);
            cmd.add_handle(auth_hierarchy.handle);
            cmd.add_auth(&auth);
            cmd.add_u32(max_tries);
            cmd.add_u32(recovery_time);
            cmd.add_u32(lockout_recovery_time);

            let response = self.tpm.execute(&cmd.finalize())?;
            response.ensure_success("DictionaryAttackParameters")?;
        }

        Ok(())
    }

    // ==================== PCR Operations ====================

    /// Read PCR values for the given selection
    pub fn pcr_read(&mut self, pcr_selection: &TpmlPcrSelection) -> ToolResult<Vec<(u32, Vec<u8>)>> {
        let mut cmd = TpmCommand::new(TpmCc::PcrRead);
        cmd.add(pcr_selection);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("PCR_Read")?;

        let mut buf = response.data_buffer();
        let _update_counter = buf.get_u32()?;
        let pcr_selection_out = TpmlPcrSelection::unmarshal(&mut buf)?;
        let digest_list = TpmlDigest::unmarshal(&mut buf)?;

        // Map digests back to PCR indices
        let mut result = Vec::new();
        let mut digest_idx = 0;

        for sel in &pcr_selection_out.pcr_selections {
            for (byte_idx, &byte) in sel.pcr_select.iter().enumerate() {
                for bit in 0..8 {
                    if byte & (1 << bit) != 0 {
                        let pcr_idx = (byte_idx * 8 + bit) as u32;
                        if digest_idx < digest_list.digests.len() {
                            result.push((pcr_idx, digest_list.digests[digest_idx].buffer.clone()));
                            digest_idx += 1;
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    /// Extend a PCR with a hash value
    pub fn pcr_extend(&mut self, pcr: u32, hash: &[u8], hash_alg: TpmAlgId) -> ToolResult<()> {
        let digest_values = TpmlDigestValues::single(TpmtHa {
            hash_alg,
            digest: hash.to_vec(),
        });

        let mut cmd = TpmCommand::with_sessions(TpmCc::PcrExtend);
        cmd.add_handle(pcr);
        cmd.add_auth(&SessionParameter::Password { auth: Vec::new() });
        cmd.add(&digest_values);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("PCR_Extend")?;

        debug!("extended PCR {}", pcr);
        Ok(())
    }

    /// Reset every PCR selected in `pcrs`, stopping at the first failure.
    pub fn pcr_reset(&mut self, pcrs: &PcrList) -> ToolResult<()> {
        for pcr in pcrs.iter() {
            let mut cmd = TpmCommand::with_sessions(TpmCc::PcrReset);
            cmd.add_handle(pcr);
            cmd.add_auth(&SessionParameter::Password { auth: Vec::new() });

            let response = self.tpm.execute(&cmd.finalize())?;
            response.ensure_success("PCR_Reset")?;

            debug!("reset PCR {}", pcr);
        }
        Ok(())
    }

    /// Reallocate the PCR banks. Requires platform authorization; surfaces
    /// the TPM's capacity numbers when the requested allocation does not
    /// fit.
    pub fn pcr_allocate(
        &mut self,
        auth_platform: &LoadedObject,
        allocation: &TpmlPcrSelection,
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::PcrAllocate);
        cmd.add_handle(auth_platform.handle);
        cmd.add_auth(&auth_platform.resolve_auth());
        cmd.add(allocation);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("PCR_Allocate")?;

        let mut buf = response.skip_parameter_size()?;
        let allocation_success = buf.get_u8()? != 0;
        let max_pcr = buf.get_u32()?;
        let size_needed = buf.get_u32()?;
        let size_available = buf.get_u32()?;

        if !allocation_success {
            return Err(ToolError::Capacity {
                max_pcr,
                size_needed,
                size_available,
            });
        }

        Ok(())
    }

    // ==================== NV Operations ====================

    /// Read the public area and name of an NV index.
    pub fn nv_read_public(&mut self, nv_index: u32) -> ToolResult<(TpmsNvPublic, Tpm2bName)> {
        let mut cmd = TpmCommand::new(TpmCc::NvReadPublic);
        cmd.add_handle(nv_index);

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("NV_ReadPublic")?;

        let mut buf = response.data_buffer();
        let nv_public = Tpm2bNvPublic::unmarshal(&mut buf)?;
        let nv_name = Tpm2bName::unmarshal(&mut buf)?;
        Ok((nv_public.nv_public, nv_name))
    }

    /// Define a new NV index under the authorizing hierarchy.
    pub fn nv_define_space(
        &mut self,
        auth_hierarchy: &LoadedObject,
        index_auth: &[u8],
        public_info: &TpmsNvPublic,
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::NvDefineSpace);
        cmd.add_handle(auth_hierarchy.handle);
        cmd.add_auth(&auth_hierarchy.resolve_auth());
        cmd.add_tpm2b(index_auth);
        cmd.add(&Tpm2bNvPublic {
            nv_public: public_info.clone(),
        });

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("NV_DefineSpace")?;

        debug!(
            "defined NV index 0x{:08x} with size {}",
            public_info.nv_index, public_info.data_size
        );
        Ok(())
    }

    /// Undefine (delete) an NV index.
    pub fn nv_undefine(&mut self, auth_hierarchy: &LoadedObject, nv_index: u32) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::NvUndefineSpace);
        cmd.add_handle(auth_hierarchy.handle);
        cmd.add_handle(nv_index);
        cmd.add_auth(&auth_hierarchy.resolve_auth());

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("NV_UndefineSpace")?;

        debug!("released NV index 0x{:08x}", nv_index);
        Ok(())
    }

    /// Read the full contents of an NV index in chunks.
    pub fn nv_read(&mut self, auth: &LoadedObject, nv_index: u32) -> ToolResult<Vec<u8>> {
        const MAX_READ_SIZE: u16 = 1024;

        let (nv_public, _) = self.nv_read_public(nv_index)?;
        let total_size = nv_public.data_size as usize;

        let mut result = Vec::with_capacity(total_size);
        let mut offset = 0u16;

        while (offset as usize) < total_size {
            let remaining = total_size - offset as usize;
            let read_size = (remaining as u16).min(MAX_READ_SIZE);

            let mut cmd = TpmCommand::with_sessions(TpmCc::NvRead);
            cmd.add_handle(auth.handle);
            cmd.add_handle(nv_index);
            cmd.add_auth(&auth.resolve_auth());
            cmd.add_u16(read_size);
            cmd.add_u16(offset);

            let response = self.tpm.execute(&cmd.finalize())?;
            response.ensure_success("NV_Read")?;

            let mut buf = response.skip_parameter_size()?;
            let data = buf.get_tpm2b()?;
            result.extend_from_slice(&data);

            offset += read_size;
        }

        Ok(result)
    }

    /// Write data to an NV index in chunks starting at `offset`.
    pub fn nv_write(
        &mut self,
        auth: &LoadedObject,
        nv_index: u32,
        data: &[u8],
        offset: u16,
    ) -> ToolResult<()> {
        const MAX_WRITE_SIZE: usize = 1024;

        // Offsets on the wire are 16-bit; reject writes that cannot be
        // addressed before touching the TPM.
        let end = offset as usize + data.len();
        if end > u16::MAX as usize {
            return Err(ToolError::Parse(format!(
                "NV write of {} bytes at offset {} exceeds the 16-bit offset range",
                data.len(),
                offset
            )));
        }

        let mut written = 0usize;

        while written < data.len() {
            let write_size = (data.len() - written).min(MAX_WRITE_SIZE);
            let chunk = &data[written..written + write_size];

            let mut cmd = TpmCommand::with_sessions(TpmCc::NvWrite);
            cmd.add_handle(auth.handle);
            cmd.add_handle(nv_index);
            cmd.add_auth(&auth.resolve_auth());
            cmd.add_tpm2b(chunk);
            cmd.add_u16(offset + written as u16);

            let response = self.tpm.execute(&cmd.finalize())?;
            response.ensure_success("NV_Write")?;

            written += write_size;
        }

        debug!("wrote {} bytes to NV index 0x{:08x}", data.len(), nv_index);
        Ok(())
    }

    /// Increment an NV counter index.
    pub fn nv_increment(&mut self, auth: &LoadedObject, nv_index: u32) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::NvIncrement);
        cmd.add_handle(auth.handle);
        cmd.add_handle(nv_index);
        cmd.add_auth(&auth.resolve_auth());

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("NV_Increment")
    }

    /// Lock an NV index against further reads until the next boot.
    pub fn nv_read_lock(&mut self, auth: &LoadedObject, nv_index: u32) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::NvReadLock);
        cmd.add_handle(auth.handle);
        cmd.add_handle(nv_index);
        cmd.add_auth(&auth.resolve_auth());

        let response = self.tpm.execute(&cmd.finalize())?;
        response.ensure_success("NV_ReadLock")
    }
}
