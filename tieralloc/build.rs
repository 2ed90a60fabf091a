use cfg_aliases::cfg_aliases;
use std::env;
use std::fs;
use std::path::Path;

const DEFAULT_HEAP_SIZE: usize = 64 * 1024 * 1024;
const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
const DEFAULT_LINEAR_SIZE: usize = 1024 * 1024;

fn env_size(key: &str, default: usize) -> usize {
    println!("cargo:rerun-if-env-changed={}", key);
    match env::var(key) {
        Ok(raw) => {
            let raw = raw.trim();
            let parsed = if let Some(hex) = raw.strip_prefix("0x") {
                usize::from_str_radix(hex, 16)
            } else {
                raw.parse::<usize>()
            };
            match parsed {
                Ok(v) if v > 0 => v,
                _ => panic!("{} must be a positive integer, got {:?}", key, raw),
            }
        }
        Err(_) => default,
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Setup cfg aliases
    cfg_aliases! {
        // Platforms
        linux: { target_os = "linux" },
        mmap: { unix },
    }

    let heap_size = env_size("TIERALLOC_HEAP_SIZE", DEFAULT_HEAP_SIZE);
    let chunk_size = env_size("TIERALLOC_CHUNK_SIZE", DEFAULT_CHUNK_SIZE);
    let linear_size = env_size("TIERALLOC_LINEAR_SIZE", DEFAULT_LINEAR_SIZE);

    assert!(
        chunk_size.is_power_of_two(),
        "TIERALLOC_CHUNK_SIZE must be a power of two, got {}",
        chunk_size
    );
    assert!(
        heap_size >= chunk_size * 2,
        "TIERALLOC_HEAP_SIZE ({}) must hold at least two chunks of {} bytes",
        heap_size,
        chunk_size
    );

    let out_dir = env::var_os("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("consts.rs");

    let content = format!(
        "pub const HEAP_SIZE: usize = {};\n
         pub const CHUNK_SIZE: usize = {};\n
         pub const LINEAR_REGION_SIZE: usize = {};\n\n",
        heap_size, chunk_size, linear_size
    );

    fs::write(&dest_path, content).unwrap();
}
