//! Direct-method Gillespie SSA over a `ReactionNetwork`.
//!
//! Simulates the network as a CTMC:
//! - State = molecule count per agent
//! - Propensity of a rule = rate × Π C(n_agent, stoichiometry)
//! - Waiting time ~ Exp(a0), rule chosen proportionally to its propensity
//!
//! The next event time is drawn once and kept across `run_until` horizons,
//! so splitting an interval into chunks consumes the RNG identically to a
//! single call over the whole interval.

use crate::definition::ReactionNetwork;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};

/// Counts, clock and pending event of one stochastic trajectory.
pub struct SsaState {
    network: ReactionNetwork,
    counts: Vec<u64>,

    /// Rule stoichiometry as (agent, multiplicity) pairs
    consumed: Vec<Vec<(usize, u64)>>,
    produced: Vec<Vec<(usize, u64)>>,

    /// Simulated time in seconds
    time: f64,

    /// Absolute time of the next event, if already drawn
    next_event: Option<f64>,

    events: u64,
    rng: ChaCha8Rng,
}

impl SsaState {
    /// Starts a trajectory at the network's initial counts, t = 0.
    pub fn new(network: ReactionNetwork, rng: ChaCha8Rng) -> Self {
        let consumed = network.rules().iter().map(|r| stoichiometry(&r.reactants)).collect();
        let produced = network.rules().iter().map(|r| stoichiometry(&r.products)).collect();
        Self {
            counts: network.initial_counts().to_vec(),
            network,
            consumed,
            produced,
            time: 0.0,
            next_event: None,
            events: 0,
            rng,
        }
    }

    /// Fires every event with time ≤ `t_end` and leaves the clock at `t_end`.
    pub fn run_until(&mut self, t_end: f64) {
        let mut propensities = vec![0.0; self.consumed.len()];

        loop {
            let next = match self.next_event {
                Some(t) => t,
                None => {
                    let a0 = self.propensities(&mut propensities);
                    // Absorbing state: nothing can fire until counts change
                    let exp = match Exp::new(a0) {
                        Ok(exp) if a0 > 0.0 => exp,
                        _ => break,
                    };
                    let t = self.time + exp.sample(&mut self.rng);
                    self.next_event = Some(t);
                    t
                }
            };

            if next > t_end {
                break;
            }

            let a0 = self.propensities(&mut propensities);
            self.time = next;
            self.next_event = None;
            self.fire(&propensities, a0);
        }

        self.time = self.time.max(t_end);
    }

    fn propensities(&self, out: &mut [f64]) -> f64 {
        let mut a0 = 0.0;
        for (i, rule) in self.network.rules().iter().enumerate() {
            let mut a = rule.rate;
            for &(agent, m) in &self.consumed[i] {
                a *= binomial(self.counts[agent], m);
            }
            out[i] = a;
            a0 += a;
        }
        a0
    }

    fn fire(&mut self, propensities: &[f64], a0: f64) {
        let target = self.rng.gen::<f64>() * a0;
        let mut acc = 0.0;
        let mut chosen = None;
        for (i, &a) in propensities.iter().enumerate() {
            if a <= 0.0 {
                continue;
            }
            acc += a;
            chosen = Some(i);
            if target < acc {
                break;
            }
        }

        let Some(rule) = chosen else { return };
        for &(agent, m) in &self.consumed[rule] {
            self.counts[agent] -= m;
        }
        for &(agent, m) in &self.produced[rule] {
            self.counts[agent] += m;
        }
        self.events += 1;
    }

    /// Current count of observable `name`, if declared.
    pub fn observe(&self, name: &str) -> Option<u64> {
        self.network.observable(name).map(|o| self.counts[o.agent])
    }

    /// Simulated time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Events fired so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }
}

fn stoichiometry(agents: &[usize]) -> Vec<(usize, u64)> {
    let mut out: Vec<(usize, u64)> = Vec::new();
    for &agent in agents {
        match out.iter_mut().find(|(a, _)| *a == agent) {
            Some((_, m)) => *m += 1,
            None => out.push((agent, 1)),
        }
    }
    out
}

/// C(n, k) as f64; zero when n < k.
fn binomial(n: u64, k: u64) -> f64 {
    if n < k {
        return 0.0;
    }
    let mut acc = 1.0;
    for i in 0..k {
        acc *= (n - i) as f64 / (i + 1) as f64;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;

    const AB: &str = "
%agent: A()
%agent: B()
%agent: AB()
'bind' A(), B() -> AB() @ 0.002
%init: 200 A()
%init: 150 B()
%obs: 'AB' |AB()|
%obs: 'A' |A()|
%obs: 'B' |B()|
";

    fn state(seed: u64) -> SsaState {
        let network = ReactionNetwork::parse(AB).unwrap();
        SsaState::new(network, ChaCha8Rng::seed_from_u64(seed))
    }

    #[test]
    fn test_binomial() {
        assert_eq!(binomial(5, 0), 1.0);
        assert_eq!(binomial(5, 1), 5.0);
        assert_eq!(binomial(5, 2), 10.0);
        assert_eq!(binomial(1, 2), 0.0);
    }

    #[test]
    fn test_mass_is_conserved() {
        let mut s = state(7);
        s.run_until(5.0);
        let a = s.observe("A").unwrap();
        let b = s.observe("B").unwrap();
        let ab = s.observe("AB").unwrap();
        assert_eq!(a + ab, 200);
        assert_eq!(b + ab, 150);
        assert!(ab > 0);
        assert_relative_eq!(s.time(), 5.0);
    }

    #[test]
    fn test_absorbing_state_advances_clock() {
        let network = ReactionNetwork::parse("%agent: A()\nA() -> . @ 1.0\n%obs: 'A' |A()|").unwrap();
        let mut s = SsaState::new(network, ChaCha8Rng::seed_from_u64(1));
        s.run_until(3.0);
        assert_eq!(s.observe("A"), Some(0));
        assert_eq!(s.events(), 0);
        assert_eq!(s.time(), 3.0);
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let mut s1 = state(99);
        let mut s2 = state(99);
        s1.run_until(2.0);
        s2.run_until(2.0);
        assert_eq!(s1.counts(), s2.counts());
        assert_eq!(s1.events(), s2.events());
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_trajectory(seed in any::<u64>(), chunks in 1usize..50) {
            let total = 1.0;
            let mut whole = state(seed);
            whole.run_until(total);

            let mut chunked = state(seed);
            let dt = total / chunks as f64;
            for i in 1..=chunks {
                chunked.run_until(dt * i as f64);
            }

            prop_assert_eq!(whole.counts(), chunked.counts());
            prop_assert!((whole.time() - chunked.time()).abs() < 1e-9);
        }
    }
}
