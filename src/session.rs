// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Authorization sessions and session resolution.
//!
//! A [`LoadedObject`] pairs a TPM handle with either a plaintext auth value
//! or a reference to an open [`Session`]; resolution picks the authorization
//! parameter presented on the wire. A password "session" is a sentinel for
//! plaintext authorization and never names a real session handle.

use tracing::debug;

use crate::constants::*;
use crate::device::{TpmCommand, TpmTransport};
use crate::error::ToolResult;

/// An open authorization session.
///
/// The attribute mask is client-side state sent with every authorization
/// area, so it must be set before the session is presented to a command that
/// depends on it. Ownership stays with whichever caller started the session;
/// objects only ever borrow it.
#[derive(Debug)]
pub struct Session {
    handle: u32,
    session_type: TpmSe,
    hash_alg: TpmAlgId,
    attributes: TpmaSa,
}

impl Session {
    /// Start a new authorization session
    pub fn start(
        tpm: &mut dyn TpmTransport,
        session_type: TpmSe,
        hash_alg: TpmAlgId,
    ) -> ToolResult<Self> {
        let mut cmd = TpmCommand::new(TpmCc::StartAuthSession);

        const ZERO_NONCE: [u8; 16] = [0u8; 16];

        // tpmKey (TPM_RH_NULL for unbound session)
        cmd.add_handle(tpm_rh::NULL);
        // bind (TPM_RH_NULL for unbound session)
        cmd.add_handle(tpm_rh::NULL);
        // nonceCaller (16-byte nonce as required by TPM spec)
        cmd.add_tpm2b(&ZERO_NONCE);
        // encryptedSalt (empty - no salt)
        cmd.add_tpm2b_empty();
        // sessionType
        cmd.add_u8(session_type as u8);
        // symmetric
        cmd.add(&crate::types::TpmtSymDef::aes_128_cfb());
        // authHash
        cmd.add_u16(hash_alg.to_u16());

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("StartAuthSession")?;

        let mut buf = response.data_buffer();
        let handle = buf.get_u32()?;
        let _nonce_tpm = buf.get_tpm2b()?;

        debug!("started {:?} session 0x{:08x}", session_type, handle);
        Ok(Self {
            handle,
            session_type,
            hash_alg,
            attributes: TpmaSa::new(),
        })
    }

    /// Start a real policy session
    pub fn start_policy(tpm: &mut dyn TpmTransport, hash_alg: TpmAlgId) -> ToolResult<Self> {
        Self::start(tpm, TpmSe::Policy, hash_alg)
    }

    /// Start a trial policy session (for computing policy digests offline)
    pub fn start_trial(tpm: &mut dyn TpmTransport, hash_alg: TpmAlgId) -> ToolResult<Self> {
        Self::start(tpm, TpmSe::Trial, hash_alg)
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn session_type(&self) -> TpmSe {
        self.session_type
    }

    pub fn is_trial(&self) -> bool {
        self.session_type == TpmSe::Trial
    }

    pub fn hash_alg(&self) -> TpmAlgId {
        self.hash_alg
    }

    pub fn attributes(&self) -> TpmaSa {
        self.attributes
    }

    /// Update the attribute bits selected by `mask` to the values in `flags`.
    pub fn set_attributes(&mut self, flags: u8, mask: u8) {
        self.attributes = TpmaSa((self.attributes.0 & !mask) | (flags & mask));
    }

    /// Flush (close) this session
    pub fn flush(self, tpm: &mut dyn TpmTransport) -> ToolResult<()> {
        let mut cmd = TpmCommand::new(TpmCc::FlushContext);
        cmd.add_handle(self.handle);

        let response = tpm.execute(&cmd.finalize())?;
        response.ensure_success("FlushContext")
    }
}

/// The authorization parameter presented alongside a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionParameter {
    /// Plaintext authorization via the TPM_RS_PW sentinel.
    Password { auth: Vec<u8> },
    /// An open HMAC or policy session.
    Attached { handle: u32, attributes: TpmaSa },
}

impl SessionParameter {
    pub fn handle(&self) -> u32 {
        match self {
            SessionParameter::Password { .. } => tpm_rh::PW,
            SessionParameter::Attached { handle, .. } => *handle,
        }
    }

    pub fn attributes(&self) -> u8 {
        match self {
            SessionParameter::Password { .. } => 0,
            SessionParameter::Attached { attributes, .. } => attributes.0,
        }
    }

    pub fn auth_bytes(&self) -> &[u8] {
        match self {
            SessionParameter::Password { auth } => auth,
            SessionParameter::Attached { .. } => &[],
        }
    }
}

/// A handle plus the authorization attached to it.
///
/// The session is borrowed, never owned: flushing or restarting it remains
/// the opener's concern.
#[derive(Debug, Default)]
pub struct LoadedObject<'s> {
    pub handle: u32,
    pub auth_value: Vec<u8>,
    pub session: Option<&'s Session>,
}

impl<'s> LoadedObject<'s> {
    /// An object authorized by an empty password.
    pub fn new(handle: u32) -> Self {
        Self {
            handle,
            auth_value: Vec::new(),
            session: None,
        }
    }

    /// An object authorized by a plaintext auth value.
    pub fn with_auth(handle: u32, auth_value: impl Into<Vec<u8>>) -> Self {
        Self {
            handle,
            auth_value: auth_value.into(),
            session: None,
        }
    }

    /// An object authorized by an open session.
    pub fn with_session(handle: u32, session: &'s Session) -> Self {
        Self {
            handle,
            auth_value: Vec::new(),
            session: Some(session),
        }
    }

    /// Resolve the authorization parameter for this object: the attached
    /// session's handle when one is present, the password sentinel
    /// otherwise. Pure lookup; never opens, closes, or mutates a session.
    pub fn resolve_auth(&self) -> SessionParameter {
        match self.session {
            Some(session) => SessionParameter::Attached {
                handle: session.handle(),
                attributes: session.attributes(),
            },
            None => SessionParameter::Password {
                auth: self.auth_value.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_session(handle: u32) -> Session {
        Session {
            handle,
            session_type: TpmSe::Policy,
            hash_alg: TpmAlgId::Sha256,
            attributes: TpmaSa::new().with_continue_session(),
        }
    }

    #[test]
    fn bare_object_resolves_to_password_sentinel() {
        let object = LoadedObject::with_auth(tpm_rh::OWNER, *b"ownerpw");
        match object.resolve_auth() {
            SessionParameter::Password { auth } => assert_eq!(auth, b"ownerpw"),
            other => panic!("expected password sentinel, got {other:?}"),
        }
    }

    #[test]
    fn attached_session_resolves_to_its_own_handle() {
        let session = fake_session(0x0300_0001);
        let object = LoadedObject::with_session(0x8100_0001, &session);
        let param = object.resolve_auth();
        assert_eq!(param.handle(), 0x0300_0001);
        assert_eq!(param.attributes(), TpmaSa::CONTINUE_SESSION);
        assert!(param.auth_bytes().is_empty());
    }

    #[test]
    fn set_attributes_honors_the_mask() {
        let mut session = fake_session(0x0300_0001);
        session.set_attributes(TpmaSa::AUDIT, TpmaSa::AUDIT | TpmaSa::CONTINUE_SESSION);
        assert_eq!(session.attributes().0, TpmaSa::AUDIT);
    }
}
