// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Policy-session assertions.
//!
//! Each assertion extends the session's accumulated policy digest inside the
//! TPM. The digest is a left-fold over the exact assertion sequence, so two
//! sessions that apply the same assertions in the same order from the same
//! starting state end up with identical digests, and reordering changes the
//! result. On an assertion failure the TPM keeps its last-good digest; the
//! session must be restarted before it can satisfy the intended policy.

use tracing::debug;

use crate::constants::*;
use crate::device::{TpmCommand, TpmTransport};
use crate::error::ToolResult;
use crate::session::{LoadedObject, Session};
use crate::types::*;

impl Session {
    /// Bind the digest to a snapshot of PCR state.
    ///
    /// `pcr_digest` is the expected composite over the selected PCRs (see
    /// [`compute_pcr_digest`]); a real session fails if the TPM's current
    /// PCR state does not match.
    pub fn policy_pcr(
        &mut self,
        tpm: &mut dyn TpmTransport,
        pcr_digest: &[u8],
        pcr_selection: &TpmlPcrSelection,
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::PolicyPcr);
        cmd.add_handle(self.handle());
        cmd.add_tpm2b(pcr_digest);
        cmd.add(pcr_selection);

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicyPCR")
    }

    /// Restrict the session's eventual use to one command code.
    pub fn policy_command_code(&mut self, tpm: &mut dyn TpmTransport, code: TpmCc) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::PolicyCommandCode);
        cmd.add_handle(self.handle());
        cmd.add_u32(code.to_u32());

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicyCommandCode")
    }

    /// Restrict the session's eventual use to a specific locality.
    pub fn policy_locality(&mut self, tpm: &mut dyn TpmTransport, locality: u8) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::PolicyLocality);
        cmd.add_handle(self.handle());
        cmd.add_u8(locality);

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicyLocality")
    }

    /// Mark the session as requiring the object's own auth value and nothing
    /// more.
    pub fn policy_password(&mut self, tpm: &mut dyn TpmTransport) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::PolicyPassword);
        cmd.add_handle(self.handle());

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicyPassword")
    }

    /// Require proof of the named auxiliary object's authorization.
    ///
    /// The auxiliary object's own session (or password sentinel) is resolved
    /// and presented here; this is the one assertion that chains session
    /// resolution.
    pub fn policy_secret(
        &mut self,
        tpm: &mut dyn TpmTransport,
        auth_entity: &LoadedObject,
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::with_sessions(TpmCc::PolicySecret);
        cmd.add_handle(auth_entity.handle);
        cmd.add_handle(self.handle());
        cmd.add_auth(&auth_entity.resolve_auth());
        // nonceTPM, cpHashA, policyRef: all empty
        cmd.add_tpm2b_empty();
        cmd.add_tpm2b_empty();
        cmd.add_tpm2b_empty();
        // expiration: no time bound
        cmd.add_i32(0);

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicySecret")?;

        // Outputs (timeout, policy ticket) are only meaningful with a
        // nonzero expiration; discard them.
        Ok(())
    }

    /// Bind the digest to a specific duplication: object name, new-parent
    /// name, and whether the object's own name is included.
    pub fn policy_duplication_select(
        &mut self,
        tpm: &mut dyn TpmTransport,
        object_name: &Tpm2bName,
        new_parent_name: &Tpm2bName,
        include_object: bool,
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::PolicyDuplicationSelect);
        cmd.add_handle(self.handle());
        cmd.add(object_name);
        cmd.add(new_parent_name);
        cmd.add_u8(include_object as u8);

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicyDuplicationSelect")
    }

    /// Replace the digest with the OR-composition of the supplied branches.
    ///
    /// A real session requires its current digest to match one of the
    /// branches; the branch list must be supplied in the order agreed when
    /// the policy was authored, since composition is order-sensitive.
    pub fn policy_or(&mut self, tpm: &mut dyn TpmTransport, branches: &TpmlDigest) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::PolicyOr);
        cmd.add_handle(self.handle());
        cmd.add(branches);

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicyOR")
    }

    /// Substitute an externally-approved policy digest, vouched for by the
    /// signing authority named in `key_sign` and the verification ticket.
    pub fn policy_authorize(
        &mut self,
        tpm: &mut dyn TpmTransport,
        approved_policy: &[u8],
        policy_ref: &[u8],
        key_sign: &Tpm2bName,
        check_ticket: &TpmtTkVerified,
    ) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::PolicyAuthorize);
        cmd.add_handle(self.handle());
        cmd.add_tpm2b(approved_policy);
        cmd.add_tpm2b(policy_ref);
        cmd.add(key_sign);
        cmd.add(check_ticket);

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicyAuthorize")
    }

    /// Reset the session's digest to its initial empty value without
    /// destroying the session handle, so one session can serve several
    /// independent policy evaluations.
    pub fn policy_restart(&mut self, tpm: &mut dyn TpmTransport) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::PolicyRestart);
        cmd.add_handle(self.handle());

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicyRestart")?;

        debug!("restarted policy session 0x{:08x}", self.handle());
        Ok(())
    }

    /// Read the accumulated policy digest without mutating it.
    pub fn policy_get_digest(&self, tpm: &mut dyn TpmTransport) -> ToolResult<Vec<u8>> {
        let mut cmd = TpmCommand::new(TpmCc::PolicyGetDigest);
        cmd.add_handle(self.handle());

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("PolicyGetDigest")?;

        let mut buf = response.data_buffer();
        buf.get_tpm2b()
    }
}

/// Compute the composite digest over the current values of the selected
/// PCRs, for authoring a PCR assertion.
pub fn compute_pcr_digest(
    tpm: &mut dyn TpmTransport,
    pcr_selection: &TpmlPcrSelection,
    hash_alg: TpmAlgId,
) -> ToolResult<Vec<u8>> {
    use sha2::{Digest, Sha256, Sha384, Sha512};

    let pcr_values = read_pcr_values(tpm, pcr_selection)?;

    let mut concat = Vec::new();
    for value in &pcr_values {
        concat.extend_from_slice(value);
    }

    let digest = match hash_alg {
        TpmAlgId::Sha256 => Sha256::digest(&concat).to_vec(),
        TpmAlgId::Sha384 => Sha384::digest(&concat).to_vec(),
        TpmAlgId::Sha512 => Sha512::digest(&concat).to_vec(),
        _ => {
            return Err(crate::error::ToolError::Parse(format!(
                "unsupported hash algorithm for PCR digest: {hash_alg:?}"
            )))
        }
    };

    Ok(digest)
}

/// Read PCR values for a selection
pub fn read_pcr_values(
    tpm: &mut dyn TpmTransport,
    pcr_selection: &TpmlPcrSelection,
) -> ToolResult<Vec<Vec<u8>>> {
    use crate::marshal::Unmarshal;

    let mut cmd = TpmCommand::new(TpmCc::PcrRead);
    cmd.add(pcr_selection);

    let response = tpm.execute(&cmd.finalize())?;
    response.ensure_success("PCR_Read")?;

    let mut buf = response.data_buffer();
    let _update_counter = buf.get_u32()?;
    let _pcr_selection_out = TpmlPcrSelection::unmarshal(&mut buf)?;
    let digest_list = TpmlDigest::unmarshal(&mut buf)?;

    Ok(digest_list.digests.into_iter().map(|d| d.buffer).collect())
}
