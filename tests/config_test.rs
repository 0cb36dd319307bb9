//! Configuration files driving discovery

use gstaudit_agent::config::{load_config, ConfigError, ConfigLoader};
use gstaudit_agent::discovery::{AbiProfile, TypeHierarchyWalker};
use gstaudit_agent::memory::Protection;
use gstaudit_agent::{Address, InstanceDescriptor, SimulatedHost, TypeId};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

const ILP32: &str = r#"
[scanner]
chunk_size = 4096
align_to_pointer = true

[discovery]
class_name = "GstBin"
type_query_symbol = "gst_bin_get_type"
constructor_symbol = "gst_bin_new"

[discovery.profile]
pointer_size = 4
name_offset = 0x10
state_offset = 0x40
state_min = 0
state_max = 4
max_name_len = 64

[logging]
level = "debug"
"#;

#[test]
fn test_ilp32_profile_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gstaudit.toml");
    fs::write(&path, ILP32).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.discovery.class_name, "GstBin");
    assert_eq!(config.discovery.children_symbol, "g_type_children");
    assert_eq!(
        config.discovery.profile,
        AbiProfile {
            pointer_size: 4,
            state_offset: 0x40,
            name_offset: 0x10,
            state_min: 0,
            state_max: 4,
            max_name_len: 64,
        }
    );

    // a 32-bit target laid out the way the profile says, seen through a
    // 32-bit and a 64-bit agent
    for host_width in [4, 8] {
        let host = SimulatedHost::with_pointer_size(host_width);
        let mut class = vec![0u8; 0x20];
        class[..4].copy_from_slice(&0x8810u32.to_ne_bytes());
        host.map(Address::new(0x1000), class, Protection::READ_WRITE);
        let mut instance = vec![0u8; 0x80];
        instance[..4].copy_from_slice(&0x1000u32.to_ne_bytes());
        instance[0x10..0x14].copy_from_slice(&0x2060u32.to_ne_bytes());
        instance[0x40..0x44].copy_from_slice(&1u32.to_ne_bytes());
        instance[0x60..0x65].copy_from_slice(b"bin0\0");
        host.map(Address::new(0x2000), instance, Protection::READ_WRITE);

        let options = config.scanner.scan_options(config.discovery.profile.pointer_size);
        assert_eq!(options.alignment, 4);
        let walker = TypeHierarchyWalker::new(&host, options, &config.discovery.profile);
        let (found, _) = walker.discover_type(TypeId(0x8810));
        assert_eq!(
            found,
            vec![InstanceDescriptor::new(Address::new(0x2000), "bin0")],
            "host width {host_width}"
        );
    }
}

#[test]
fn test_invalid_files_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gstaudit.toml");

    fs::write(&path, "[discovery.profile]\npointer_size = 2\n").unwrap();
    assert!(matches!(load_config(&path), Err(ConfigError::Invalid(_))));

    fs::write(&path, "[scanner]\nchunk_size = 1000\n").unwrap();
    assert!(matches!(load_config(&path), Err(ConfigError::Invalid(_))));

    fs::write(&path, "[scanner\n").unwrap();
    assert!(matches!(load_config(&path), Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_saved_defaults_load_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gstaudit.toml");
    let loader = ConfigLoader::new(&path);
    let defaults = gstaudit_agent::config::default_config();
    loader.save(&defaults).unwrap();

    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded.server.port, defaults.server.port);
    assert_eq!(loaded.discovery.profile, defaults.discovery.profile);
    assert_eq!(loaded.logging.file, None);
}
