//! Seed planning for batch submissions.

use rand::Rng;

use crate::error::CoreError;
use crate::types::Seed;

/// How the seeds for a batch are chosen.
///
/// Resolution order: explicit seeds, then `count` random 32-bit seeds
/// (when `random` is set), then `count` sequential seeds starting at the
/// template's current seed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedPlan {
    pub seeds: Option<Vec<Seed>>,
    pub count: Option<usize>,
    pub random: bool,
}

impl SeedPlan {
    /// Submit one job per listed seed, in order.
    pub fn explicit(seeds: impl Into<Vec<Seed>>) -> Self {
        Self {
            seeds: Some(seeds.into()),
            ..Self::default()
        }
    }

    /// `count` jobs with seeds drawn uniformly from `0..=u32::MAX`.
    pub fn random(count: usize) -> Self {
        Self {
            count: Some(count),
            random: true,
            ..Self::default()
        }
    }

    /// `count` jobs with deterministic, consecutive seeds.
    pub fn sequential(count: usize) -> Self {
        Self {
            count: Some(count),
            ..Self::default()
        }
    }

    /// Produce the concrete seed list.
    ///
    /// `base` is the seed already present in the template; sequential
    /// plans start from it (or from 0 when there is none).
    pub fn resolve(&self, base: Option<Seed>) -> Result<Vec<Seed>, CoreError> {
        if let Some(seeds) = &self.seeds {
            if seeds.is_empty() {
                return Err(CoreError::Configuration(
                    "explicit seed list must not be empty".into(),
                ));
            }
            return Ok(seeds.clone());
        }

        let count = match self.count {
            Some(0) => {
                return Err(CoreError::Configuration(
                    "seed count must be at least 1".into(),
                ))
            }
            Some(n) => n,
            None => {
                return Err(CoreError::Configuration(
                    "either explicit seeds or a seed count is required".into(),
                ))
            }
        };

        if self.random {
            let mut rng = rand::rng();
            return Ok((0..count).map(|_| Seed::from(rng.random::<u32>())).collect());
        }

        let start = base.unwrap_or(0);
        Ok((0..count as Seed).map(|i| start.wrapping_add(i)).collect())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn explicit_seeds_win_over_count() {
        let plan = SeedPlan {
            seeds: Some(vec![5, 1, 5]),
            count: Some(10),
            random: true,
        };
        assert_eq!(plan.resolve(Some(100)).unwrap(), vec![5, 1, 5]);
    }

    #[test]
    fn random_plan_yields_count_values_in_u32_range() {
        let seeds = SeedPlan::random(64).resolve(None).unwrap();
        assert_eq!(seeds.len(), 64);
        assert!(seeds.iter().all(|s| *s <= u64::from(u32::MAX)));
    }

    #[test]
    fn sequential_plan_starts_from_template_seed() {
        assert_eq!(SeedPlan::sequential(3).resolve(Some(42)).unwrap(), vec![42, 43, 44]);
        assert_eq!(SeedPlan::sequential(3).resolve(None).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn sequential_plan_is_deterministic() {
        let plan = SeedPlan::sequential(4);
        assert_eq!(plan.resolve(Some(9)).unwrap(), plan.resolve(Some(9)).unwrap());
    }

    #[test]
    fn missing_seeds_and_count_is_a_configuration_error() {
        assert_matches!(
            SeedPlan::default().resolve(None),
            Err(CoreError::Configuration(_))
        );
    }

    #[test]
    fn empty_plans_are_rejected() {
        assert_matches!(
            SeedPlan::explicit(Vec::new()).resolve(None),
            Err(CoreError::Configuration(_))
        );
        assert_matches!(
            SeedPlan::sequential(0).resolve(None),
            Err(CoreError::Configuration(_))
        );
    }
}
