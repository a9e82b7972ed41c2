//! Preference ranking
//!
//! Pairwise preferences are turned into a Markov chain over chores. For every
//! pair, each resident moves one unit of weight between the two chores in
//! proportion to their preference. A resident with no opinion on a pair adds a
//! small implicit weight in both directions instead, so silence pulls only
//! gently towards uniform. Each chore keeps a self-loop equal to the weight it
//! receives, rows are normalised, and the damped chain is walked from the
//! uniform distribution. Cycles simply spread the weight around, and with no
//! preferences the chain is symmetric and the ranking is uniform.

use std::collections::HashMap;

use mirror_config::HouseConfig;

use crate::types::ChorePreference;

/// Power-iteration ranker
#[derive(Debug, Clone)]
pub struct PowerRanker {
    /// Weight per direction from a resident without a preference on a pair
    implicit_pref: f64,
    /// Probability of following the preference graph rather than jumping uniformly
    damping: f64,
    /// L2 distance between iterations below which the walk stops
    epsilon: f64,
    max_iterations: usize,
}

impl PowerRanker {
    pub fn new(implicit_pref: f64, damping: f64, epsilon: f64, max_iterations: usize) -> Self {
        Self {
            implicit_pref,
            damping,
            epsilon,
            max_iterations,
        }
    }

    pub fn from_config(config: &HouseConfig) -> Self {
        Self::new(
            config.ranking_implicit_pref,
            config.ranking_damping,
            config.ranking_epsilon,
            config.ranking_max_iterations,
        )
    }

    /// Rank `chore_ids`, returning one share per chore in the same order.
    ///
    /// Only preferences of the given residents between the given chores are
    /// considered. The shares are non-negative and sum to 1.
    pub fn rank(
        &self,
        chore_ids: &[u64],
        residents: &[String],
        preferences: &[ChorePreference],
    ) -> Vec<f64> {
        let n = chore_ids.len();
        if n == 0 {
            return Vec::new();
        }

        let matrix = self.transition_matrix(chore_ids, residents, preferences);
        self.stationary(&matrix)
    }

    fn transition_matrix(
        &self,
        chore_ids: &[u64],
        residents: &[String],
        preferences: &[ChorePreference],
    ) -> Vec<Vec<f64>> {
        let n = chore_ids.len();
        let index: HashMap<u64, usize> = chore_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        // Last write per resident and pair wins
        let mut latest: HashMap<(&str, usize, usize), (usize, usize, f64)> = HashMap::new();
        for pref in preferences {
            if !residents.iter().any(|r| r == &pref.resident_id) {
                continue;
            }
            let (Some(&a), Some(&b)) = (index.get(&pref.alpha_chore_id), index.get(&pref.beta_chore_id)) else {
                continue;
            };
            if a == b {
                continue;
            }
            latest.insert(
                (pref.resident_id.as_str(), a.min(b), a.max(b)),
                (a, b, pref.preference.clamp(0.0, 1.0)),
            );
        }

        let mut matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                for resident in residents {
                    match latest.get(&(resident.as_str(), i, j)) {
                        // Weight flows from beta to alpha by p, and from alpha to beta by 1 - p
                        Some(&(a, b, p)) => {
                            matrix[b][a] += p;
                            matrix[a][b] += 1.0 - p;
                        }
                        None => {
                            matrix[i][j] += self.implicit_pref;
                            matrix[j][i] += self.implicit_pref;
                        }
                    }
                }
            }
        }

        let received: Vec<f64> = (0..n).map(|j| matrix.iter().map(|row| row[j]).sum()).collect();
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = received[i];

            let sum: f64 = row.iter().sum();
            if sum > 0.0 {
                row.iter_mut().for_each(|x| *x /= sum);
            } else {
                row[i] = 1.0;
            }
        }

        let jump = (1.0 - self.damping) / n as f64;
        for row in matrix.iter_mut() {
            row.iter_mut().for_each(|x| *x = *x * self.damping + jump);
        }

        matrix
    }

    fn stationary(&self, matrix: &[Vec<f64>]) -> Vec<f64> {
        let n = matrix.len();
        let mut rank = vec![1.0 / n as f64; n];

        for _ in 0..self.max_iterations {
            let mut next = vec![0.0; n];
            for (i, row) in matrix.iter().enumerate() {
                for (j, weight) in row.iter().enumerate() {
                    next[j] += rank[i] * weight;
                }
            }

            let diff = next.iter().zip(&rank).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt();
            rank = next;
            if diff < self.epsilon {
                break;
            }
        }

        let total: f64 = rank.iter().sum();
        if total > 0.0 {
            rank.iter_mut().for_each(|x| *x /= total);
        }
        rank
    }
}
