//! Stable identities derived from free-text names.
//!
//! Property identities and template hashes are truncated SHA-256 digests over
//! normalised input, so the same address typed with different casing or
//! accents maps to the same record.

use sha2::{Digest, Sha256};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

const DIGEST_HEX_LEN: usize = 16;

/// Lowercase, strip diacritics, and collapse runs of whitespace.
///
/// `"  Nueva  Andalucía "` → `"nueva andalucia"`.
pub fn normalize_name(name: &str) -> String {
  let folded: String = name
    .nfd()
    .filter(|c| !is_combining_mark(*c))
    .collect::<String>()
    .to_lowercase();
  folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn short_digest(input: &str) -> String {
  let digest = Sha256::digest(input.as_bytes());
  let mut hex = hex::encode(digest);
  hex.truncate(DIGEST_HEX_LEN);
  hex
}

/// Stable identity of a property: address, city and province, normalised.
pub fn property_id(address: &str, city: &str, province: &str) -> String {
  let joined = [address, city, province]
    .iter()
    .map(|part| normalize_name(part))
    .collect::<Vec<_>>()
    .join("|");
  short_digest(&joined)
}

/// Identity of a prompt template. Whitespace-only edits do not change it.
pub fn template_hash(template: &str) -> String {
  let canonical = template.split_whitespace().collect::<Vec<_>>().join(" ");
  short_digest(&canonical)
}
