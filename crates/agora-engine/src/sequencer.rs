//! Stimulus sequencing.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::{Config, OrderingConfig, OrderingMode};
use crate::stimulus::{Stimulus, StimulusCategory, StimulusSet};

/// Produces the ordered stimuli for a session.
#[derive(Debug, Clone)]
pub struct Sequencer {
    stimuli: StimulusSet,
    ordering: OrderingConfig,
    calibration: bool,
}

impl Sequencer {
    /// Creates a sequencer.
    #[must_use]
    pub const fn new(stimuli: StimulusSet, ordering: OrderingConfig, calibration: bool) -> Self {
        Self {
            stimuli,
            ordering,
            calibration,
        }
    }

    /// Creates a sequencer from the run configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.stimuli.clone(),
            config.ordering.clone(),
            config.calibration,
        )
    }

    /// A sequencer that only ever presents the target.
    #[must_use]
    pub fn target_only(stimuli: StimulusSet) -> Self {
        Self::new(
            stimuli,
            OrderingConfig {
                mode: OrderingMode::Fixed,
                seed: None,
                pattern: vec![StimulusCategory::Target],
            },
            false,
        )
    }

    /// Returns `turns` stimuli.
    ///
    /// Seeded ordering always yields the same sequence for the same seed.
    /// In calibration mode the sequence contains the target at least once.
    ///
    /// # Examples
    ///
    /// ```
    /// use agora_engine::{OrderingConfig, OrderingMode, Sequencer, StimulusCategory, StimulusSet};
    ///
    /// let ordering = OrderingConfig {
    ///     mode: OrderingMode::Fixed,
    ///     seed: None,
    ///     pattern: vec![StimulusCategory::Target, StimulusCategory::Null],
    /// };
    /// let seq = Sequencer::new(StimulusSet::default(), ordering, false).sequence(3);
    /// let categories: Vec<_> = seq.iter().map(|s| s.category).collect();
    /// assert_eq!(
    ///     categories,
    ///     [StimulusCategory::Target, StimulusCategory::Null, StimulusCategory::Target]
    /// );
    /// ```
    #[must_use]
    pub fn sequence(&self, turns: u32) -> Vec<Stimulus> {
        let len = usize::try_from(turns).unwrap_or(usize::MAX);
        let pattern = &self.ordering.pattern;
        if pattern.is_empty() || len == 0 {
            return Vec::new();
        }

        let mut rng = self.rng();
        let mut categories: Vec<StimulusCategory> = match self.ordering.mode {
            OrderingMode::Fixed => pattern.iter().copied().cycle().take(len).collect(),
            OrderingMode::Seeded | OrderingMode::Free => (0..len)
                .filter_map(|_| pattern.choose(&mut rng).copied())
                .collect(),
        };

        if self.calibration && !categories.contains(&StimulusCategory::Target) {
            let slot = rng.gen_range(0..categories.len());
            categories[slot] = StimulusCategory::Target;
        }

        categories.into_iter().map(|c| self.stimuli.get(c)).collect()
    }

    fn rng(&self) -> StdRng {
        match (self.ordering.mode, self.ordering.seed) {
            (OrderingMode::Free, _) | (_, None) => StdRng::from_entropy(),
            (_, Some(seed)) => StdRng::seed_from_u64(seed),
        }
    }
}
