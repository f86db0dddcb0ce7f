//! Up-front sizing of a run: query count, batch count, projected storage.

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunEstimate {
    pub expected_triples: u64,
    pub expected_batches: u64,
}

impl RunEstimate {
    pub fn new(sources: usize, targets: usize, metapaths: usize, chunk_size: usize) -> Self {
        let expected_triples = (sources as u64)
            .saturating_mul(targets as u64)
            .saturating_mul(metapaths as u64);
        let expected_batches = if chunk_size == 0 {
            0
        } else {
            expected_triples.div_ceil(chunk_size as u64)
        };
        Self {
            expected_triples,
            expected_batches,
        }
    }

    /// Storage for the full run given the observed bytes per triple.
    pub fn projected_bytes(&self, bytes_per_triple: f64) -> f64 {
        bytes_per_triple.max(0.0) * self.expected_triples as f64
    }

    pub fn projected_gib(&self, bytes_per_triple: f64) -> f64 {
        self.projected_bytes(bytes_per_triple) / BYTES_PER_GIB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_triples_and_batches() {
        let estimate = RunEstimate::new(3, 4, 5, 7);
        assert_eq!(estimate.expected_triples, 60);
        assert_eq!(estimate.expected_batches, 9);
    }

    #[test]
    fn empty_inputs_need_no_batches() {
        let estimate = RunEstimate::new(0, 20_000, 100, 1000);
        assert_eq!(estimate.expected_triples, 0);
        assert_eq!(estimate.expected_batches, 0);
    }

    #[test]
    fn projection_scales_linearly() {
        let estimate = RunEstimate::new(1024, 1024, 1024, 5_000_000);
        assert!((estimate.projected_gib(1.0) - 1.0).abs() < 1e-9);
        assert_eq!(estimate.projected_bytes(-3.0), 0.0);
    }
}
