const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

pub fn fnv1a_init() -> u64 {
    FNV1A_OFFSET
}

pub fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    fnv1a_bytes(fnv1a_init(), bytes)
}

/// Hash of the build options, a NUL, then the jit block and the kernel body.
/// Truncated to the native word.
pub fn kernel_hash(build_options: &str, jit: &str, source: &str) -> usize {
    let mut hash = fnv1a_bytes(fnv1a_init(), build_options.as_bytes());
    hash = fnv1a_bytes(hash, &[0]);
    hash = fnv1a_bytes(hash, jit.as_bytes());
    fnv1a_bytes(hash, source.as_bytes()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(fnv1a_hash(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_hash(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn kernel_hash_covers_every_part() {
        assert_eq!(
            kernel_hash("-cl-fast", "#define A 1\n", "kernel"),
            fnv1a_hash(b"-cl-fast\0#define A 1\nkernel") as usize
        );
        assert_ne!(kernel_hash("", "a", "b"), kernel_hash("", "b", "a"));
        assert_ne!(kernel_hash("-O2", "", "k"), kernel_hash("", "-O2", "k"));
        assert_ne!(kernel_hash("-O2", "", "k"), kernel_hash("", "", "k"));
    }
}
