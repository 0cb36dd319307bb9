//! Structural validation of candidate instances

use crate::core::types::{Address, InstanceDescriptor};
use crate::host::MemoryHost;
use crate::memory::MemoryReader;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Per-target field layout used to recognise an instance
///
/// The defaults describe a `GstElement` on a 64-bit (LP64) GStreamer 1.x
/// build: `GstObject.name` at 0x20 and `GstElement.current_state` at 0x80,
/// with the state confined to the five `GstState` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbiProfile {
    pub pointer_size: usize,
    /// Offset of the 32-bit state field
    pub state_offset: usize,
    /// Offset of the `char *` name field
    pub name_offset: usize,
    pub state_min: i32,
    pub state_max: i32,
    pub max_name_len: usize,
}

impl Default for AbiProfile {
    fn default() -> Self {
        AbiProfile {
            pointer_size: 8,
            state_offset: 0x80,
            name_offset: 0x20,
            state_min: 0,
            state_max: 4,
            max_name_len: 256,
        }
    }
}

impl AbiProfile {
    /// Whether `state` is an acceptable value of the state field
    pub fn state_in_range(&self, state: i32) -> bool {
        (self.state_min..=self.state_max).contains(&state)
    }
}

/// Confirms candidates with two speculative reads
///
/// Every fault or implausible value is a "no match", never an error.
pub struct InstanceValidator<'a, H: MemoryHost + ?Sized> {
    reader: MemoryReader<'a, H>,
    profile: &'a AbiProfile,
}

impl<'a, H: MemoryHost + ?Sized> InstanceValidator<'a, H> {
    pub fn new(host: &'a H, profile: &'a AbiProfile) -> Self {
        InstanceValidator {
            reader: MemoryReader::with_pointer_size(host, profile.pointer_size),
            profile,
        }
    }

    pub fn profile(&self) -> &AbiProfile {
        self.profile
    }

    /// Validate `candidate`, returning its descriptor when both probes pass
    pub fn validate(&self, candidate: Address) -> Option<InstanceDescriptor> {
        if candidate.is_null() {
            return None;
        }

        let state_at = candidate.checked_add(self.profile.state_offset)?;
        let state = self.reader.read_u32(state_at).ok()? as i32;
        if !self.profile.state_in_range(state) {
            trace!(candidate = %candidate.to_hex(), state, "State out of range");
            return None;
        }

        let name = self.read_name(candidate)?;
        trace!(candidate = %candidate.to_hex(), %name, "Candidate validated");
        Some(InstanceDescriptor::new(candidate, name))
    }

    fn read_name(&self, candidate: Address) -> Option<String> {
        let name_at = candidate.checked_add(self.profile.name_offset)?;
        let name_ptr = self.reader.read_pointer(name_at).ok()?;
        if name_ptr.is_null() {
            return None;
        }

        let max_len = self.profile.max_name_len;
        let bytes = self.reader.read_c_bytes(name_ptr, max_len.saturating_add(1)).ok()??;
        if bytes.is_empty() || bytes.len() > max_len || !is_plain_ascii(&bytes) {
            return None;
        }
        String::from_utf8(bytes).ok()
    }
}

/// Printable 7-bit ASCII
fn is_plain_ascii(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| (0x20..0x7f).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SimulatedHost;
    use crate::memory::Protection;

    const OBJECT: usize = 0x5_0000;
    const NAME: usize = 0x6_0000;

    fn host_with_object(state: u32, name: &[u8]) -> SimulatedHost {
        let host = SimulatedHost::with_pointer_size(8);
        let mut object = vec![0u8; 0x100];
        object[0x20..0x28].copy_from_slice(&(NAME as u64).to_ne_bytes());
        object[0x80..0x84].copy_from_slice(&state.to_ne_bytes());
        host.map(Address::new(OBJECT), object, Protection::READ_WRITE);
        let mut block = vec![b'x'; 64];
        block[..name.len()].copy_from_slice(name);
        host.map(Address::new(NAME), block, Protection::READ);
        host
    }

    #[test]
    fn test_valid_instance() {
        let host = host_with_object(4, b"pipeline0\0");
        let profile = AbiProfile::default();
        let validator = InstanceValidator::new(&host, &profile);
        assert_eq!(
            validator.validate(Address::new(OBJECT)),
            Some(InstanceDescriptor::new(Address::new(OBJECT), "pipeline0"))
        );
    }

    #[test]
    fn test_state_out_of_range() {
        let host = host_with_object(5, b"pipeline0\0");
        let profile = AbiProfile::default();
        let validator = InstanceValidator::new(&host, &profile);
        assert_eq!(validator.validate(Address::new(OBJECT)), None);

        let narrow = AbiProfile {
            state_max: 3,
            ..AbiProfile::default()
        };
        let host = host_with_object(4, b"pipeline0\0");
        assert_eq!(InstanceValidator::new(&host, &narrow).validate(Address::new(OBJECT)), None);
    }

    #[test]
    fn test_rejects_bad_names() {
        let profile = AbiProfile::default();
        for name in [&b"\0"[..], b"pipe\xffline\0", b"tab\tname\0", b"unterminated"] {
            let host = host_with_object(2, name);
            let validator = InstanceValidator::new(&host, &profile);
            assert_eq!(validator.validate(Address::new(OBJECT)), None, "{name:?}");
        }

        let short = AbiProfile {
            max_name_len: 4,
            ..AbiProfile::default()
        };
        let host = host_with_object(2, b"pipeline0\0");
        assert_eq!(InstanceValidator::new(&host, &short).validate(Address::new(OBJECT)), None);
    }

    #[test]
    fn test_profile_sets_pointer_width() {
        // 32-bit layout read through a host that reports 8-byte pointers
        let host = SimulatedHost::with_pointer_size(8);
        let mut object = vec![0xAAu8; 0x40];
        object[0x10..0x14].copy_from_slice(&(NAME as u32).to_ne_bytes());
        object[0x30..0x34].copy_from_slice(&3u32.to_ne_bytes());
        host.map(Address::new(OBJECT), object, Protection::READ_WRITE);
        host.map(Address::new(NAME), b"queue0\0".to_vec(), Protection::READ);

        let ilp32 = AbiProfile {
            pointer_size: 4,
            name_offset: 0x10,
            state_offset: 0x30,
            ..AbiProfile::default()
        };
        assert_eq!(
            InstanceValidator::new(&host, &ilp32).validate(Address::new(OBJECT)),
            Some(InstanceDescriptor::new(Address::new(OBJECT), "queue0"))
        );
    }

    #[test]
    fn test_unbounded_name_length() {
        let host = host_with_object(1, b"pipeline0\0");
        let unbounded = AbiProfile {
            max_name_len: usize::MAX,
            ..AbiProfile::default()
        };
        assert_eq!(
            InstanceValidator::new(&host, &unbounded).validate(Address::new(OBJECT)),
            Some(InstanceDescriptor::new(Address::new(OBJECT), "pipeline0"))
        );
    }

    #[test]
    fn test_faults_are_no_match() {
        let host = SimulatedHost::with_pointer_size(8);
        let profile = AbiProfile::default();
        let validator = InstanceValidator::new(&host, &profile);
        assert_eq!(validator.validate(Address::new(0x1234)), None);
        assert_eq!(validator.validate(Address::null()), None);
        assert_eq!(validator.validate(Address::new(usize::MAX - 4)), None);
    }
}
