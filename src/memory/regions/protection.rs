//! Memory protection flags

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Page protection of a memory range
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Protection: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

impl Protection {
    /// Read-write protection, the class of ranges that hold heap objects
    pub const READ_WRITE: Protection = Protection::READ.union(Protection::WRITE);

    /// Parses a `/proc/<pid>/maps` permission column such as `rw-p`
    pub fn from_perms(perms: &str) -> Self {
        let mut protection = Protection::empty();
        let bytes = perms.as_bytes();
        if bytes.first() == Some(&b'r') {
            protection |= Protection::READ;
        }
        if bytes.get(1) == Some(&b'w') {
            protection |= Protection::WRITE;
        }
        if bytes.get(2) == Some(&b'x') {
            protection |= Protection::EXECUTE;
        }
        protection
    }

    pub fn is_readable(&self) -> bool {
        self.contains(Protection::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.contains(Protection::WRITE)
    }

    pub fn is_executable(&self) -> bool {
        self.contains(Protection::EXECUTE)
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.is_readable() { 'r' } else { '-' };
        let w = if self.is_writable() { 'w' } else { '-' };
        let x = if self.is_executable() { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_perms() {
        assert_eq!(Protection::from_perms("rw-p"), Protection::READ_WRITE);
        assert_eq!(
            Protection::from_perms("r-xp"),
            Protection::READ | Protection::EXECUTE
        );
        assert_eq!(Protection::from_perms("---p"), Protection::empty());
        assert_eq!(Protection::from_perms(""), Protection::empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(Protection::READ_WRITE.to_string(), "rw-");
        assert_eq!(Protection::all().to_string(), "rwx");
    }
}
