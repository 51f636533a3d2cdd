// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM device communication layer
//!
//! Provides low-level communication with TPM devices via /dev/tpmrm0 or
//! /dev/tpm0, the command builder, and response parsing. The wire protocol is
//! strictly request-then-response; one exchange is in flight at a time.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;

use crate::constants::*;
use crate::error::{ToolError, ToolResult};
use crate::marshal::*;
use crate::session::SessionParameter;

/// Maximum TPM command/response size
const TPM_MAX_COMMAND_SIZE: usize = 4096;

/// A synchronous TPM command/response channel.
///
/// [`TpmDevice`] is the production implementation; tests substitute scripted
/// transports to drive the authorization layer without hardware.
pub trait TpmTransport {
    /// Send a raw command and return the raw response bytes.
    fn transmit(&mut self, command: &[u8]) -> ToolResult<Vec<u8>>;

    /// Send a command and parse the response header.
    fn execute(&mut self, command: &[u8]) -> ToolResult<TpmResponse> {
        let response_bytes = self.transmit(command)?;
        TpmResponse::parse(&response_bytes)
    }
}

/// TPM character-device transport
pub struct TpmDevice {
    file: std::fs::File,
    path: String,
}

impl TpmDevice {
    /// Open a TPM device
    pub fn open(path: &str) -> ToolResult<Self> {
        // Strip "device:" prefix if present
        let device_path = path.strip_prefix("device:").unwrap_or(path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_path)?;

        Ok(Self {
            file,
            path: device_path.to_string(),
        })
    }

    /// Detect and open the default TPM device
    pub fn detect() -> ToolResult<Self> {
        if Path::new("/dev/tpmrm0").exists() {
            Self::open("/dev/tpmrm0")
        } else if Path::new("/dev/tpm0").exists() {
            Self::open("/dev/tpm0")
        } else {
            Err(ToolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "TPM device not found",
            )))
        }
    }

    /// Get the device path
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl TpmTransport for TpmDevice {
    fn transmit(&mut self, command: &[u8]) -> ToolResult<Vec<u8>> {
        self.file.write_all(command)?;

        let mut response = vec![0u8; TPM_MAX_COMMAND_SIZE];
        let n = self.file.read(&mut response)?;

        response.truncate(n);
        Ok(response)
    }
}

/// TPM command builder
pub struct TpmCommand {
    buf: CommandBuffer,
    code: TpmCc,
}

impl TpmCommand {
    /// Create a new command without sessions
    pub fn new(command_code: TpmCc) -> Self {
        Self::with_tag(command_code, TpmSt::NoSessions)
    }

    /// Create a new command with an authorization area
    pub fn with_sessions(command_code: TpmCc) -> Self {
        Self::with_tag(command_code, TpmSt::Sessions)
    }

    fn with_tag(command_code: TpmCc, tag: TpmSt) -> Self {
        let mut buf = CommandBuffer::with_capacity(256);

        // Header: tag (2) + size (4) + command code (4)
        buf.put_u16(tag.to_u16());
        buf.put_u32(0); // Size placeholder
        buf.put_u32(command_code.to_u32());

        Self {
            buf,
            code: command_code,
        }
    }

    pub fn command_code(&self) -> TpmCc {
        self.code
    }

    /// Add a handle to the command
    pub fn add_handle(&mut self, handle: u32) {
        self.buf.put_u32(handle);
    }

    pub fn add_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn add_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn add_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn add_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    /// Add a TPM2B structure
    pub fn add_tpm2b(&mut self, data: &[u8]) {
        self.buf.put_tpm2b(data);
    }

    /// Add an empty TPM2B structure
    pub fn add_tpm2b_empty(&mut self) {
        self.buf.put_tpm2b_empty();
    }

    /// Add a marshallable structure
    pub fn add<T: Marshal>(&mut self, value: &T) {
        value.marshal(&mut self.buf);
    }

    /// Write the authorization area for the given resolved sessions.
    ///
    /// Each entry is session handle (4), empty nonce (2), attribute byte (1),
    /// and the auth value (2 + len). The password sentinel carries the
    /// object's plaintext auth; attached sessions carry their own attribute
    /// byte, which must have been set before the session is presented here.
    pub fn add_auth_area(&mut self, sessions: &[SessionParameter]) {
        let total: u32 = sessions
            .iter()
            .map(|s| 4 + 2 + 1 + 2 + s.auth_bytes().len() as u32)
            .sum();
        self.buf.put_u32(total);

        for session in sessions {
            self.buf.put_u32(session.handle());
            self.buf.put_u16(0); // Empty nonce
            self.buf.put_u8(session.attributes());
            self.buf.put_tpm2b(session.auth_bytes());
        }
    }

    /// Add a single resolved session as the authorization area.
    pub fn add_auth(&mut self, session: &SessionParameter) {
        self.add_auth_area(std::slice::from_ref(session));
    }

    /// Finalize the command and return the bytes
    pub fn finalize(mut self) -> Vec<u8> {
        // Update the size field
        let size = self.buf.len() as u32;
        self.buf.update_u32(2, size);
        self.buf.into_vec()
    }
}

/// TPM response parser
#[derive(Debug)]
pub struct TpmResponse {
    pub tag: TpmSt,
    pub response_code: u32,
    pub data: Vec<u8>,
}

impl TpmResponse {
    /// Parse a TPM response
    pub fn parse(response: &[u8]) -> ToolResult<Self> {
        if response.len() < 10 {
            return Err(ToolError::Parse(format!(
                "TPM response too short: {} bytes",
                response.len()
            )));
        }

        let mut buf = ResponseBuffer::new(response);

        let tag_raw = buf.get_u16()?;
        let tag = TpmSt::from_u16(tag_raw)
            .ok_or_else(|| ToolError::Parse(format!("invalid response tag: 0x{tag_raw:04x}")))?;

        let size = buf.get_u32()? as usize;
        if response.len() < size {
            return Err(ToolError::Parse(format!(
                "TPM response size mismatch: expected {}, got {}",
                size,
                response.len()
            )));
        }

        let response_code = buf.get_u32()?;

        // Remaining data after header
        let data = response[10..size].to_vec();

        Ok(Self {
            tag,
            response_code,
            data,
        })
    }

    /// Check if the response indicates success
    pub fn is_success(&self) -> bool {
        self.response_code == 0
    }

    /// The error portion of the response code (low 16 bits).
    pub fn error_code(&self) -> u32 {
        tpm_rc::error_get(self.response_code)
    }

    /// Ensure the response is successful, tagging failures with the verb.
    pub fn ensure_success(&self, op: &'static str) -> ToolResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(ToolError::from_tpm(op, self.response_code))
        }
    }

    /// Get a response buffer for parsing the data
    pub fn data_buffer(&self) -> ResponseBuffer<'_> {
        ResponseBuffer::new(&self.data)
    }

    /// Skip the parameter size field (for commands with sessions)
    pub fn skip_parameter_size(&self) -> ToolResult<ResponseBuffer<'_>> {
        let mut buf = self.data_buffer();
        if self.tag == TpmSt::Sessions {
            let _param_size = buf.get_u32()?;
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_builder_header() {
        let mut cmd = TpmCommand::new(TpmCc::PcrRead);
        cmd.add_u16(0);

        let bytes = cmd.finalize();

        assert_eq!(&bytes[0..2], &[0x80, 0x01]); // TPM_ST_NO_SESSIONS
        assert_eq!(&bytes[6..10], &[0x00, 0x00, 0x01, 0x7E]); // TPM_CC_PCR_Read

        let size = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        assert_eq!(size as usize, bytes.len());
    }

    #[test]
    fn password_auth_area_carries_the_auth_value() {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Unseal);
        cmd.add_handle(0x80000000);
        cmd.add_auth(&SessionParameter::Password {
            auth: b"secret".to_vec(),
        });
        let bytes = cmd.finalize();

        // Header (10) + handle (4), then the auth area.
        let mut buf = ResponseBuffer::new(&bytes[14..]);
        let area_size = buf.get_u32().unwrap();
        assert_eq!(area_size, 4 + 2 + 1 + 2 + 6);
        assert_eq!(buf.get_u32().unwrap(), tpm_rh::PW);
        assert_eq!(buf.get_u16().unwrap(), 0); // nonce
        assert_eq!(buf.get_u8().unwrap(), 0); // attributes
        assert_eq!(buf.get_tpm2b().unwrap(), b"secret");
    }

    #[test]
    fn attached_session_auth_area_uses_session_attributes() {
        let mut cmd = TpmCommand::with_sessions(TpmCc::Unseal);
        cmd.add_handle(0x80000000);
        cmd.add_auth(&SessionParameter::Attached {
            handle: 0x03000000,
            attributes: TpmaSa::new().with_continue_session(),
        });
        let bytes = cmd.finalize();

        let mut buf = ResponseBuffer::new(&bytes[14..]);
        assert_eq!(buf.get_u32().unwrap(), 9);
        assert_eq!(buf.get_u32().unwrap(), 0x03000000);
        assert_eq!(buf.get_u16().unwrap(), 0);
        assert_eq!(buf.get_u8().unwrap(), TpmaSa::CONTINUE_SESSION);
    }

    #[test]
    fn response_parse_minimal_success() {
        let response = vec![
            0x80, 0x01, // TPM_ST_NO_SESSIONS
            0x00, 0x00, 0x00, 0x0A, // Size = 10
            0x00, 0x00, 0x00, 0x00, // TPM_RC_SUCCESS
        ];

        let parsed = TpmResponse::parse(&response).unwrap();
        assert!(parsed.is_success());
        assert!(parsed.data.is_empty());
    }
}
