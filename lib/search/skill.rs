use crate::chess::Move;
use crate::eval::{Value, PIECE_VALUE_MG};
use crate::search::{Depth, Options, RootMove};
use rand::Rng;

/// Strength handicap.
///
/// Picks integer skill levels non-deterministically rounded so that the
/// average corresponds to the configured fractional level. `UCI_Elo` is
/// converted to a fractional level by a fit anchored to CCRL Elo.
#[derive(Debug, Clone)]
pub struct Skill {
    level: i32,
    pub best: Option<Move>,
}

impl Skill {
    pub fn new<R: Rng>(options: &Options, rng: &mut R) -> Self {
        let float_level = if options.limit_strength {
            ((options.elo as f64 - 1346.6) / 143.4)
                .powf(1.0 / 0.806)
                .clamp(0.0, 20.0)
        } else {
            options.skill_level as f64
        };

        let level = float_level as i32
            + ((float_level.fract() * 1024.0) as u32 > rng.gen_range(0..1024u32)) as i32;

        Skill { level, best: None }
    }

    /// Whether the handicap is active.
    #[inline(always)]
    pub fn enabled(&self) -> bool {
        self.level < 20
    }

    /// Whether it is time to pick the handicapped move.
    #[inline(always)]
    pub fn time_to_pick(&self, depth: Depth) -> bool {
        depth == 1 + self.level
    }

    /// Chooses a sub-optimal move among the best `multi_pv` root moves.
    ///
    /// Each move's score receives a deterministic push proportional to its
    /// distance from the top plus a random one, both scaled by weakness.
    pub fn pick_best<R: Rng>(
        &mut self,
        root_moves: &[RootMove],
        multi_pv: usize,
        rng: &mut R,
    ) -> Move {
        let multi_pv = multi_pv.min(root_moves.len());
        let top_score = root_moves[0].score;
        let delta = (top_score - root_moves[multi_pv - 1].score)
            .get()
            .min(PIECE_VALUE_MG[0]);
        let weakness = 120 - 2 * self.level;
        let mut max_score = -Value::INFINITE;

        for rm in &root_moves[..multi_pv] {
            let push = (weakness * (top_score - rm.score).get()
                + delta * (rng.gen_range(0..weakness.max(1))))
                / 128;

            if rm.score + Value::new(push) >= max_score {
                max_score = rm.score + Value::new(push);
                self.best = Some(rm.head());
            }
        }

        self.best.unwrap_or(root_moves[0].head())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Square;
    use rand::rngs::mock::StepRng;

    fn options(skill_level: i32) -> Options {
        Options {
            skill_level,
            ..Options::default()
        }
    }

    #[test]
    fn full_skill_is_disabled() {
        let mut rng = StepRng::new(0, 1);
        let skill = Skill::new(&options(20), &mut rng);
        assert!(!skill.enabled());
    }

    #[test]
    fn reduced_skill_is_enabled() {
        let mut rng = StepRng::new(0, 1);
        let skill = Skill::new(&options(5), &mut rng);
        assert!(skill.enabled());
        assert!(skill.time_to_pick(6));
        assert!(!skill.time_to_pick(5));
    }

    #[test]
    fn limited_strength_maps_elo_to_a_level() {
        let mut rng = StepRng::new(0, 1);
        let weak = Skill::new(
            &Options {
                limit_strength: true,
                elo: 1350,
                ..Options::default()
            },
            &mut rng,
        );

        assert!(weak.enabled());
    }

    #[test]
    fn pick_best_returns_a_candidate_from_the_window() {
        let mut rng = StepRng::new(7, 13);
        let mut skill = Skill::new(&options(0), &mut rng);

        let mut moves: Vec<RootMove> = (0..4)
            .map(|i| {
                let m = Move::regular(Square::from_index(8 + i), Square::from_index(16 + i), None);
                RootMove {
                    score: Value::new(100 - 10 * i as i32),
                    ..RootMove::new(m)
                }
            })
            .collect();

        moves[0].previous_score = moves[0].score;
        let best = skill.pick_best(&moves, 4, &mut rng);
        assert!(moves.iter().any(|rm| rm.head() == best));
    }
}
