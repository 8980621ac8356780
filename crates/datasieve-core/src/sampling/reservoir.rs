//! Reservoir sampling (Algorithm R).
//!
//! The first `capacity` items fill the reservoir. Item `i > capacity`
//! replaces a uniformly chosen slot with probability `capacity / i`, which
//! keeps every item of the stream equally likely to be in the sample.
//! A seeded ChaCha generator makes the sample reproducible for a given
//! stream order.
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub struct ReservoirSampler<T> {
    reservoir: Vec<T>,
    capacity: usize,
    seen: u64,
    rng: ChaCha8Rng,
}

impl<T> ReservoirSampler<T> {
    pub fn new(capacity: usize, seed: u64) -> Self {
        Self {
            // Do not pre-allocate huge reservoirs for short streams
            reservoir: Vec::with_capacity(capacity.min(64 * 1024)),
            capacity,
            seen: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn add(&mut self, value: T) {
        self.seen += 1;
        if self.reservoir.len() < self.capacity {
            self.reservoir.push(value);
            return;
        }
        if self.capacity == 0 {
            return;
        }
        let j = self.rng.gen_range(0..self.seen);
        if j < self.capacity as u64 {
            self.reservoir[j as usize] = value;
        }
    }

    pub fn add_batch<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        for value in values {
            self.add(value);
        }
    }

    /// Current sample as a slice.
    pub fn sample(&self) -> &[T] {
        &self.reservoir
    }

    pub fn into_sample(self) -> Vec<T> {
        self.reservoir
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn len(&self) -> usize {
        self.reservoir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservoir.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// More items were seen than the reservoir can hold.
    pub fn is_saturated(&self) -> bool {
        self.seen > self.capacity as u64
    }

    /// Fraction of the stream held in the sample.
    pub fn sampling_fraction(&self) -> f64 {
        if self.seen == 0 {
            1.0
        } else {
            self.reservoir.len() as f64 / self.seen as f64
        }
    }
}

impl<T: Clone> ReservoirSampler<T> {
    pub fn get_sample(&self) -> Vec<T> {
        self.reservoir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_phase_keeps_everything() {
        let mut sampler = ReservoirSampler::new(10, 1);
        sampler.add_batch(0..7);
        assert_eq!(sampler.get_sample(), (0..7).collect::<Vec<_>>());
        assert!(!sampler.is_saturated());
        assert_eq!(sampler.sampling_fraction(), 1.0);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut sampler = ReservoirSampler::new(100, 7);
        for i in 0..10_000u32 {
            sampler.add(i);
            assert!(sampler.len() <= 100);
        }
        assert_eq!(sampler.len(), 100);
        assert_eq!(sampler.seen(), 10_000);
        assert!(sampler.is_saturated());
    }

    #[test]
    fn test_same_seed_same_sample() {
        let mut a = ReservoirSampler::new(50, 42);
        let mut b = ReservoirSampler::new(50, 42);
        a.add_batch(0..5_000);
        b.add_batch(0..5_000);
        assert_eq!(a.sample(), b.sample());

        let mut c = ReservoirSampler::new(50, 43);
        c.add_batch(0..5_000);
        assert_ne!(a.sample(), c.sample());
    }

    #[test]
    fn test_inclusion_probability_is_uniform() {
        let trials = 20_000;
        let mut hits = [0u32; 10];
        for t in 0..trials {
            let mut sampler = ReservoirSampler::new(5, t as u64);
            sampler.add_batch(0..10usize);
            for &v in sampler.sample() {
                hits[v] += 1;
            }
        }
        for (item, &count) in hits.iter().enumerate() {
            let p = count as f64 / trials as f64;
            assert!((p - 0.5).abs() < 0.02, "item {item} included with p={p}");
        }
    }

    #[test]
    fn test_zero_capacity() {
        let mut sampler = ReservoirSampler::new(0, 3);
        sampler.add_batch(0..10);
        assert!(sampler.is_empty());
        assert_eq!(sampler.seen(), 10);
    }
}
