use blake3::Hasher;
use ndarray::{ArrayBase, Data, Dimension};

pub const RECEPTIVE_FIELD_DIGEST_DOMAIN: &str = "LSN:RECEPTIVE_FIELD";
pub const MEAN_SWEEP_DIGEST_DOMAIN: &str = "LSN:MEAN_SWEEP_RESPONSE";
pub const PVAL_DIGEST_DOMAIN: &str = "LSN:PVAL";

pub fn digest_meta(domain: &str, bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(domain.as_bytes());
    hasher.update(bytes);
    *hasher.finalize().as_bytes()
}

/// Digest of an f64 array in logical (row-major) order, shape included.
///
/// NaN payloads are canonicalised so two NaN-holed arrays of equal shape
/// digest the same.
pub fn digest_array<S, D>(domain: &str, array: &ArrayBase<S, D>) -> [u8; 32]
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let mut bytes = Vec::with_capacity(4 + 8 * (array.ndim() + array.len()));
    bytes.extend_from_slice(&(array.ndim() as u32).to_le_bytes());
    for len in array.shape() {
        bytes.extend_from_slice(&(*len as u64).to_le_bytes());
    }
    for value in array.iter() {
        let bits = if value.is_nan() {
            f64::NAN.to_bits()
        } else {
            value.to_bits()
        };
        bytes.extend_from_slice(&bits.to_le_bytes());
    }
    digest_meta(domain, &bytes)
}

pub fn hex(digest: &[u8; 32]) -> String {
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
