use knot_types::Hash;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"knot-object-v1"`) that is
/// prepended to every hash computation, so keys derived for different
/// purposes never collide even when the input bytes are identical.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for stored envelopes. Every object, schema and root key is
    /// derived with this domain.
    pub const OBJECT: Self = Self {
        domain: "knot-object-v1",
    };

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Hash::from_hash(*hasher.finalize().as_bytes())
    }

    /// Verify that `data` hashes to `expected`. The store checks every
    /// object it reads this way.
    pub fn verify(&self, data: &[u8], expected: &Hash) -> bool {
        self.hash(data) == *expected
    }
}
