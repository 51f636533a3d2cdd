// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Handle classification and validation.
//!
//! Every command declares which handle namespaces (and which of the five
//! permanent hierarchies) it accepts as a [`HandleFlags`] mask. A raw 32-bit
//! handle is classified by its top byte; bare indices with no range prefix
//! are completed to NV or PCR handles according to the mask before
//! validation. Classification happens before any wire exchange, so namespace
//! mistakes never cost a TPM round-trip.

use crate::constants::*;
use crate::error::{ToolError, ToolResult};

/// Which handle namespaces and permanent hierarchies a command accepts.
///
/// Declared per command, never mutated at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleFlags(pub u32);

impl HandleFlags {
    pub const NONE: Self = Self(0);
    pub const OWNER: u32 = 1 << 0;
    pub const PLATFORM: u32 = 1 << 1;
    pub const ENDORSEMENT: u32 = 1 << 2;
    pub const NULL: u32 = 1 << 3;
    pub const LOCKOUT: u32 = 1 << 4;
    pub const TRANSIENT: u32 = 1 << 5;
    pub const PERSISTENT: u32 = 1 << 6;
    pub const NV: u32 = 1 << 7;
    pub const PCR: u32 = 1 << 8;

    pub const ALL_HIERARCHIES: Self = Self(
        Self::OWNER | Self::PLATFORM | Self::ENDORSEMENT | Self::NULL | Self::LOCKOUT,
    );
    pub const ALL_W_NV: Self = Self(
        Self::ALL_HIERARCHIES.0 | Self::TRANSIENT | Self::PERSISTENT | Self::NV,
    );

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// The "expected [o|p|e|n|l] or a handle number" diagnostic, reconstructable
/// from the flag set that rejected the handle.
fn expected_handles_message(flags: HandleFlags) -> String {
    let mut letters = Vec::new();
    for (bit, letter) in [
        (HandleFlags::OWNER, "o"),
        (HandleFlags::PLATFORM, "p"),
        (HandleFlags::ENDORSEMENT, "e"),
        (HandleFlags::NULL, "n"),
        (HandleFlags::LOCKOUT, "l"),
    ] {
        if flags.contains(bit) {
            letters.push(letter);
        }
    }

    if letters.is_empty() {
        "expected a handle number".to_string()
    } else {
        format!("expected [{}] or a handle number", letters.join("|"))
    }
}

/// Validate a permanent handle against the hierarchy bits of the flag set.
fn filter_hierarchy_handles(handle: u32, flags: HandleFlags) -> ToolResult<()> {
    let permitted = match handle {
        tpm_rh::OWNER => flags.contains(HandleFlags::OWNER),
        tpm_rh::PLATFORM => flags.contains(HandleFlags::PLATFORM),
        tpm_rh::ENDORSEMENT => flags.contains(HandleFlags::ENDORSEMENT),
        tpm_rh::NULL => flags.contains(HandleFlags::NULL),
        tpm_rh::LOCKOUT => flags.contains(HandleFlags::LOCKOUT),
        // An arbitrary offset into the permanent range: only commands that
        // accept everything (or declare nothing) pass it through.
        _ => flags == HandleFlags::ALL_W_NV || flags == HandleFlags::NONE,
    };

    if permitted {
        Ok(())
    } else {
        Err(ToolError::Handle(expected_handles_message(flags)))
    }
}

/// Classify a handle by its range byte and validate it against `flags`,
/// completing bare NV/PCR indices in place.
///
/// Deterministic and side-effect-free on the flag set: the same input handle
/// and flags always yield the same verdict and the same completed handle.
pub fn classify_and_validate(handle: &mut u32, flags: HandleFlags) -> ToolResult<()> {
    let mut range = *handle & tpm_hr::RANGE_MASK;

    // No range byte: the caller supplied a bare index. Complete it using the
    // single index namespace the command accepts.
    if range == 0 {
        let wants_nv = flags.contains(HandleFlags::NV);
        let wants_pcr = flags.contains(HandleFlags::PCR);
        match (wants_nv, wants_pcr) {
            (true, true) => {
                return Err(ToolError::Handle(
                    "ambiguous index: command accepts both NV and PCR indices".to_string(),
                ));
            }
            (true, false) => {
                *handle += tpm_hr::NV_INDEX;
            }
            (false, true) => {
                *handle += tpm_hr::PCR;
            }
            (false, false) => {
                return Err(ToolError::Handle(
                    "implicit indices are not supported by this command".to_string(),
                ));
            }
        }
        range = *handle & tpm_hr::RANGE_MASK;
    }

    match range {
        tpm_hr::NV_INDEX => {
            if !flags.contains(HandleFlags::NV) {
                return Err(ToolError::Handle(
                    "NV-Index handles are not supported by this command".to_string(),
                ));
            }
            // The window spans exactly the 0x01 range byte, so this check is
            // vacuously true for well-formed handles; it stays explicit
            // rather than trusting the arithmetic above.
            if *handle < TPM2_NV_INDEX_FIRST || *handle > TPM2_NV_INDEX_LAST {
                return Err(ToolError::Handle(format!(
                    "NV-Index handle 0x{:08x} is out of range",
                    *handle
                )));
            }
            Ok(())
        }
        tpm_hr::PCR => {
            if !flags.contains(HandleFlags::PCR) {
                return Err(ToolError::Handle(
                    "PCR handles are not supported by this command".to_string(),
                ));
            }
            // First PCR is 0, so only the upper bound needs checking.
            if *handle > TPM2_PCR_LAST {
                return Err(ToolError::Handle(format!(
                    "PCR handle {} is out of range",
                    *handle
                )));
            }
            Ok(())
        }
        tpm_hr::TRANSIENT => {
            if !flags.contains(HandleFlags::TRANSIENT) {
                return Err(ToolError::Handle(
                    "transient handles are not supported by this command".to_string(),
                ));
            }
            Ok(())
        }
        tpm_hr::PERSISTENT => {
            if !flags.contains(HandleFlags::PERSISTENT) {
                return Err(ToolError::Handle(
                    "persistent handles are not supported by this command".to_string(),
                ));
            }
            if *handle < TPM2_PERSISTENT_FIRST || *handle > TPM2_PERSISTENT_LAST {
                return Err(ToolError::Handle(format!(
                    "persistent handle 0x{:08x} is out of range",
                    *handle
                )));
            }
            Ok(())
        }
        tpm_hr::PERMANENT => filter_hierarchy_handles(*handle, flags),
        // Session handles and any other range never name an authorizable
        // object through this path.
        _ => Err(ToolError::Handle(format!(
            "handle 0x{:08x} does not name an object, index, or hierarchy",
            *handle
        ))),
    }
}

/// Parse a u32 the way strtoul(_, _, 0) does: `0x` prefix selects hex, a
/// leading `0` selects octal, anything else is decimal.
pub fn string_to_u32(value: &str) -> Option<u32> {
    if value.is_empty() {
        return None;
    }
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if value.len() > 1 && value.starts_with('0') {
        return u32::from_str_radix(&value[1..], 8).ok();
    }
    value.parse::<u32>().ok()
}

/// Parse a hierarchy or handle argument for the CLI layer.
///
/// Accepts a case-sensitive prefix of `owner`, `platform`, `endorsement`,
/// `null`, or `lockout` (so `o` and `own` both name the owner hierarchy), or
/// a number in an auto-detected base. The result is classified and validated
/// against `flags` before it is returned.
pub fn hierarchy_from_text(value: &str, flags: HandleFlags) -> ToolResult<u32> {
    if value.is_empty() {
        return Err(ToolError::Handle("empty handle argument".to_string()));
    }

    if flags.contains(HandleFlags::NV) && flags.contains(HandleFlags::PCR) {
        return Err(ToolError::Handle(
            "cannot accept NV and PCR indices together".to_string(),
        ));
    }

    let mut handle = 0u32;

    for (keyword, value_for_keyword) in [
        ("owner", tpm_rh::OWNER),
        ("platform", tpm_rh::PLATFORM),
        ("endorsement", tpm_rh::ENDORSEMENT),
        ("null", tpm_rh::NULL),
        ("lockout", tpm_rh::LOCKOUT),
    ] {
        if keyword.starts_with(value) {
            handle = value_for_keyword;
        }
    }

    if handle == 0 {
        // Not a keyword: a numeric string naming a raw (possibly
        // non-hierarchy) handle.
        handle = string_to_u32(value).ok_or_else(|| {
            ToolError::Handle(format!(
                "incorrect handle value, got \"{value}\", {}",
                expected_handles_message(flags)
            ))
        })?;
    }

    classify_and_validate(&mut handle, flags)?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_index_completes_to_pcr() {
        let mut handle = 0x0000_0005;
        classify_and_validate(&mut handle, HandleFlags::new(HandleFlags::PCR)).unwrap();
        assert_eq!(handle, tpm_hr::PCR + 5);
    }

    #[test]
    fn implicit_index_completes_to_nv() {
        let mut handle = 0x0000_0022;
        classify_and_validate(&mut handle, HandleFlags::new(HandleFlags::NV)).unwrap();
        assert_eq!(handle, tpm_hr::NV_INDEX + 0x22);
    }

    #[test]
    fn implicit_index_with_both_nv_and_pcr_is_ambiguous() {
        let mut handle = 0x0000_0005;
        let err = classify_and_validate(
            &mut handle,
            HandleFlags::new(HandleFlags::NV | HandleFlags::PCR),
        )
        .unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn implicit_index_with_neither_flag_is_rejected() {
        let mut handle = 0x0000_0005;
        assert!(
            classify_and_validate(&mut handle, HandleFlags::new(HandleFlags::TRANSIENT)).is_err()
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let flags = HandleFlags::new(HandleFlags::PCR);
        let mut first = 0x0000_0007;
        let mut second = 0x0000_0007;
        classify_and_validate(&mut first, flags).unwrap();
        classify_and_validate(&mut second, flags).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn pcr_upper_bound_is_enforced() {
        let flags = HandleFlags::new(HandleFlags::PCR);
        let mut last = TPM2_PCR_LAST;
        classify_and_validate(&mut last, flags).unwrap();

        let mut beyond = TPM2_PCR_LAST + 1;
        assert!(classify_and_validate(&mut beyond, flags).is_err());
    }

    #[test]
    fn persistent_bounds() {
        let flags = HandleFlags::new(HandleFlags::PERSISTENT);

        let mut first = TPM2_PERSISTENT_FIRST;
        classify_and_validate(&mut first, flags).unwrap();

        // One below the first legal persistent handle is a transient-range
        // handle, not permitted here.
        let mut below = TPM2_PERSISTENT_FIRST - 1;
        assert!(classify_and_validate(&mut below, flags).is_err());
    }

    #[test]
    fn nv_index_range_is_checked_explicitly() {
        let flags = HandleFlags::new(HandleFlags::NV);
        let mut first = TPM2_NV_INDEX_FIRST;
        classify_and_validate(&mut first, flags).unwrap();
        let mut last = TPM2_NV_INDEX_LAST;
        classify_and_validate(&mut last, flags).unwrap();
    }

    #[test]
    fn owner_hierarchy_requires_the_owner_bit() {
        let mut handle = tpm_rh::OWNER;
        let err = classify_and_validate(
            &mut handle,
            HandleFlags::new(HandleFlags::PLATFORM | HandleFlags::ENDORSEMENT),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid handle: expected [p|e] or a handle number"
        );
    }

    #[test]
    fn unrecognized_permanent_offsets_need_all_or_no_flags() {
        let odd_permanent = tpm_hr::PERMANENT + 0x42;

        let mut handle = odd_permanent;
        classify_and_validate(&mut handle, HandleFlags::NONE).unwrap();

        let mut handle = odd_permanent;
        classify_and_validate(&mut handle, HandleFlags::ALL_W_NV).unwrap();

        let mut handle = odd_permanent;
        assert!(
            classify_and_validate(&mut handle, HandleFlags::new(HandleFlags::OWNER)).is_err()
        );
    }

    #[test]
    fn session_handles_never_classify() {
        let mut handle = tpm_hr::POLICY_SESSION + 1;
        assert!(classify_and_validate(&mut handle, HandleFlags::ALL_W_NV).is_err());
    }

    #[test]
    fn keyword_prefixes() {
        let flags = HandleFlags::ALL_HIERARCHIES;
        assert_eq!(hierarchy_from_text("o", flags).unwrap(), tpm_rh::OWNER);
        assert_eq!(hierarchy_from_text("owner", flags).unwrap(), tpm_rh::OWNER);
        assert_eq!(hierarchy_from_text("p", flags).unwrap(), tpm_rh::PLATFORM);
        assert_eq!(
            hierarchy_from_text("endorse", flags).unwrap(),
            tpm_rh::ENDORSEMENT
        );
        assert_eq!(hierarchy_from_text("null", flags).unwrap(), tpm_rh::NULL);
        assert_eq!(hierarchy_from_text("l", flags).unwrap(), tpm_rh::LOCKOUT);
        // Case-sensitive: "Owner" is not a keyword and not a number.
        assert!(hierarchy_from_text("Owner", flags).is_err());
    }

    #[test]
    fn numeric_bases_are_auto_detected() {
        let flags = HandleFlags::new(HandleFlags::PERSISTENT);
        assert_eq!(
            hierarchy_from_text("0x81000001", flags).unwrap(),
            0x8100_0001
        );

        let pcr_flags = HandleFlags::new(HandleFlags::PCR);
        assert_eq!(hierarchy_from_text("010", pcr_flags).unwrap(), 8); // octal
        assert_eq!(hierarchy_from_text("10", pcr_flags).unwrap(), 10); // decimal
        assert!(hierarchy_from_text("0x", pcr_flags).is_err());
        assert!(hierarchy_from_text("12junk", pcr_flags).is_err());
    }

    #[test]
    fn platform_keyword_against_owner_and_platform_flags() {
        let flags = HandleFlags::new(HandleFlags::OWNER | HandleFlags::PLATFORM);
        assert_eq!(
            hierarchy_from_text("platform", flags).unwrap(),
            tpm_rh::PLATFORM
        );
    }

    #[test]
    fn platform_keyword_against_owner_only_flags_names_the_allowed_set() {
        let flags = HandleFlags::new(HandleFlags::OWNER);
        let err = hierarchy_from_text("platform", flags).unwrap_err();
        assert!(err
            .to_string()
            .contains("expected [o] or a handle number"));
    }
}
