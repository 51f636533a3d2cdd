// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! PCR index parsing and selection lists.

use crate::constants::{TPM2_MAX_PCRS, TPM2_PCR_LAST};
use crate::error::{ToolError, ToolResult};
use crate::handle::string_to_u32;

/// Parse a PCR index from text and bound-check it against the platform
/// maximum.
pub fn pcr_get_id(value: &str) -> ToolResult<u32> {
    let pcr = string_to_u32(value)
        .ok_or_else(|| ToolError::Handle(format!("Invalid PCR index \"{value}\"")))?;
    if pcr > TPM2_PCR_LAST {
        return Err(ToolError::Handle(format!(
            "PCR index out of range. Allowed range is 0 to {TPM2_PCR_LAST}, got {pcr}"
        )));
    }
    Ok(pcr)
}

/// An explicit, bounded list of selected PCR indices.
///
/// Holds at most [`TPM2_MAX_PCRS`] entries; duplicates are kept in the
/// order they were added.
#[derive(Debug, Clone, Default)]
pub struct PcrList {
    pcrs: Vec<u32>,
}

impl PcrList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse each argument as a PCR index. The first argument that fails to
    /// parse aborts the whole list.
    pub fn from_args<I, S>(args: I) -> ToolResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for arg in args {
            list.push(pcr_get_id(arg.as_ref())?)?;
        }
        Ok(list)
    }

    /// Add a PCR index, rejecting overflow past the platform maximum count.
    pub fn push(&mut self, pcr: u32) -> ToolResult<()> {
        if self.pcrs.len() >= TPM2_MAX_PCRS as usize {
            return Err(ToolError::Handle(format!(
                "Too many PCRs selected, maximum is {TPM2_MAX_PCRS}"
            )));
        }
        self.pcrs.push(pcr);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pcrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.pcrs.iter().copied()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.pcrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcr_get_id() {
        assert_eq!(pcr_get_id("0").unwrap(), 0);
        assert_eq!(pcr_get_id("23").unwrap(), 23);
        assert_eq!(pcr_get_id("0x10").unwrap(), 16);
        assert_eq!(pcr_get_id("31").unwrap(), 31);
    }

    #[test]
    fn test_pcr_get_id_out_of_range() {
        let err = pcr_get_id("32").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_pcr_get_id_not_a_number() {
        assert!(pcr_get_id("abc").is_err());
        assert!(pcr_get_id("").is_err());
    }

    #[test]
    fn test_from_args() {
        let list = PcrList::from_args(["0", "7", "16"]).unwrap();
        assert_eq!(list.as_slice(), &[0, 7, 16]);
    }

    #[test]
    fn test_from_args_first_failure_aborts() {
        assert!(PcrList::from_args(["0", "bogus", "7"]).is_err());
    }

    #[test]
    fn test_push_overflow() {
        let mut list = PcrList::new();
        for i in 0..TPM2_MAX_PCRS {
            list.push(i % 24).unwrap();
        }
        assert!(list.push(0).is_err());
        assert_eq!(list.len(), TPM2_MAX_PCRS as usize);
    }
}
