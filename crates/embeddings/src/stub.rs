use crate::error::Result;
use crate::provider::{Embedding, EmbeddingProvider};
use ndarray::Array2;
use std::path::Path;

pub const STUB_VECTOR_LENGTH: usize = 8;
const STUB_SEGMENTS: usize = 3;

/// Deterministic, model-free embedding provider.
///
/// Vectors are derived from the source path alone, so the same path always
/// embeds to the same tensor. Segment rows differ from each other, which
/// keeps the average/segment role distinction observable in tests.
#[derive(Debug)]
pub struct StubProvider {
    vector_length: usize,
}

impl StubProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::with_vector_length(STUB_VECTOR_LENGTH)
    }

    #[must_use]
    pub fn with_vector_length(vector_length: usize) -> Self {
        Self { vector_length }
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn vector_length(&self) -> usize {
        self.vector_length
    }

    fn ensure_ready(&mut self) -> Result<()> {
        Ok(())
    }

    fn embed(&mut self, audio: &Path) -> Result<Embedding> {
        let seed = fnv1a_64(audio.as_os_str().as_encoded_bytes());
        let mut values = Vec::with_capacity(STUB_SEGMENTS * self.vector_length);
        for segment in 0..STUB_SEGMENTS {
            let mut state = seed ^ (segment as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            for _ in 0..self.vector_length {
                let bits = splitmix64(&mut state);
                let high = (bits >> 32) as u32;
                let mantissa = high >> 9;
                let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
                values.push(unit.mul_add(2.0, -1.0));
            }
        }
        let embedding = Array2::from_shape_vec((STUB_SEGMENTS, self.vector_length), values)
            .map_err(|e| crate::ProviderError::InferenceError(format!("stub shape error: {e}")))?;
        Ok(embedding)
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
